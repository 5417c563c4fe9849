//! Content-based file identity.
//!
//! A file is identified by its first bytes rather than by inode or path:
//! inode numbers are reused across rotations and paths change under `mv`,
//! but leading content survives rename, copy-truncate, and logrotate
//! create mode.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

/// How many leading bytes identify a file.
pub(super) const FINGERPRINT_SIZE: usize = 1000;

/// Up to the first [`FINGERPRINT_SIZE`] bytes of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Fingerprint {
    pub first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Reads the fingerprint of the file at `path`.
    pub(super) async fn read(path: &Path) -> std::io::Result<Fingerprint> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut first_bytes = vec![0u8; FINGERPRINT_SIZE];
        let mut filled = 0;
        loop {
            let n = file.read(&mut first_bytes[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == FINGERPRINT_SIZE {
                break;
            }
        }
        first_bytes.truncate(filled);
        Ok(Fingerprint { first_bytes })
    }

    /// True for files with no identifying content yet.
    pub(super) fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// Whether two fingerprints identify the same logical file: equal, or
    /// one a strict prefix of the other (the longer one is the same file,
    /// grown).
    pub(super) fn matches(&self, other: &Fingerprint) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let shorter = self.first_bytes.len().min(other.first_bytes.len());
        self.first_bytes[..shorter] == other.first_bytes[..shorter]
    }
}
