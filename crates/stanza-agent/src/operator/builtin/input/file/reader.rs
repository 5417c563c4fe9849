//! The short-lived worker that drains one file from its saved offset.
//!
//! A reader never touches the known-file table: progress flows back to the
//! dispatcher as [`ReaderUpdate`] messages and the dispatcher applies them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::FileInputCore;

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Progress messages from a reader to the dispatcher.
#[derive(Debug)]
pub(super) enum ReaderUpdate {
    Offset { file_id: u64, offset: u64 },
    FileSize { file_id: u64, size: u64 },
    Finished { file_id: u64 },
}

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("log entry too large: increase max_log_size or ensure that multiline regex patterns terminate")]
    FrameTooLarge,
}

/// Reads one file from `start_offset` to its end, emitting one entry per
/// frame and reporting progress after every frame.
#[allow(clippy::too_many_arguments)]
pub(super) async fn read_to_end(
    core: Arc<FileInputCore>,
    ctx: CancellationToken,
    file_id: u64,
    path: PathBuf,
    start_offset: u64,
    last_seen_size: u64,
    updates: mpsc::UnboundedSender<ReaderUpdate>,
) {
    let result = run(
        &core,
        &ctx,
        file_id,
        &path,
        start_offset,
        last_seen_size,
        &updates,
    )
    .await;
    if let Err(err) = result {
        warn!(
            operator = %core.input.id(),
            path = %path.display(),
            error = %err,
            "failed to read file",
        );
    }
    let _ = updates.send(ReaderUpdate::Finished { file_id });
}

async fn run(
    core: &FileInputCore,
    ctx: &CancellationToken,
    file_id: u64,
    path: &Path,
    start_offset: u64,
    last_seen_size: u64,
    updates: &mpsc::UnboundedSender<ReaderUpdate>,
) -> Result<(), ReadError> {
    if ctx.is_cancelled() {
        return Ok(());
    }

    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let _ = updates.send(ReaderUpdate::FileSize { file_id, size });

    // A file shorter than its saved offset was truncated; start over.
    let mut offset = start_offset;
    if size < offset {
        offset = 0;
        let _ = updates.send(ReaderUpdate::Offset { file_id, offset });
    }
    let cycle_start = offset;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut at_eof = false;
    let mut pos = offset;

    loop {
        if ctx.is_cancelled() {
            return Ok(());
        }

        match core.splitter.split(&buffer) {
            Some((advance, token)) => {
                pos += advance as u64;
                buffer.drain(..advance);
                let text = core.decode(&token);
                core.emit(ctx, text, path).await;
                let _ = updates.send(ReaderUpdate::Offset {
                    file_id,
                    offset: pos,
                });
            }
            None => {
                if buffer.len() >= core.max_log_size {
                    return Err(ReadError::FrameTooLarge);
                }
                if at_eof {
                    break;
                }
                let n = file.read(&mut chunk).await?;
                if n == 0 {
                    at_eof = true;
                } else {
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }

    // If nothing advanced this cycle and the file has not grown since the
    // previous reader saw it, the trailing unterminated bytes are the last
    // frame.
    if pos < size && pos == cycle_start && last_seen_size == size && !buffer.is_empty() {
        let text = core.decode(&buffer);
        core.emit(ctx, text, path).await;
        pos += buffer.len() as u64;
        let _ = updates.send(ReaderUpdate::Offset {
            file_id,
            offset: pos,
        });
    }

    Ok(())
}
