//! Frame boundaries for tailed files.
//!
//! A split rule inspects buffered bytes and either yields the next frame,
//! as `(advance, token)` where `advance` is how many input bytes were
//! consumed, or asks for more data. Incomplete trailing data is never
//! emitted here; the reader's end-of-file rule decides its fate.

use regex::bytes::Regex;

/// How buffered bytes are framed into logical records.
pub(super) enum SplitRule {
    /// One frame per line; CR, LF, and CRLF all terminate a line. The
    /// newline byte sequence depends on the encoding.
    Newline {
        newline: Vec<u8>,
        carriage_return: Vec<u8>,
    },
    /// A frame is the bytes between two matches of the pattern. Leading
    /// bytes before the first match are flushed as their own frame.
    LineStart(Regex),
    /// A frame runs through each match of the pattern.
    LineEnd(Regex),
}

impl SplitRule {
    /// Attempts to carve the next frame out of `data`.
    ///
    /// Returns `None` when more data is needed. Tokens are trimmed of
    /// trailing CR/LF.
    pub(super) fn split(&self, data: &[u8]) -> Option<(usize, Vec<u8>)> {
        match self {
            SplitRule::Newline {
                newline,
                carriage_return,
            } => {
                let i = find(data, newline)?;
                let mut token = &data[..i];
                if token.ends_with(carriage_return.as_slice()) {
                    token = &token[..token.len() - carriage_return.len()];
                }
                Some((i + newline.len(), token.to_vec()))
            }
            SplitRule::LineStart(re) => {
                let first = re.find(data)?;
                if first.start() != 0 {
                    // Flush whatever precedes the first match.
                    return Some((first.start(), trim_newlines(&data[..first.start()])));
                }
                let second = re.find_at(data, first.end())?;
                Some((second.start(), trim_newlines(&data[..second.start()])))
            }
            SplitRule::LineEnd(re) => {
                let found = re.find(data)?;
                Some((found.end(), trim_newlines(&data[..found.end()])))
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_newlines(mut token: &[u8]) -> Vec<u8> {
    while token.ends_with(b"\n") || token.ends_with(b"\r") {
        token = &token[..token.len() - 1];
    }
    token.to_vec()
}
