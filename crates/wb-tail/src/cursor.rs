//! Byte cursor into a followed file.
//!
//! The cursor only ever advances past complete lines. A trailing fragment
//! without a newline is left unread and picked up whole on a later poll.
//! A shrinking file (truncation) or a new file at the same path (rotation)
//! restarts the cursor at offset 0.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Largest single read. A chunk this size with no newline in it is emitted
/// as one line so a newline-free writer cannot grow memory without bound.
pub const READ_CHUNK_BYTES: usize = 1 << 20;

/// Upper bound on bytes consumed by one poll; the rest waits for the next.
pub const MAX_BYTES_PER_POLL: u64 = 4 * READ_CHUNK_BYTES as u64;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("file no longer exists")]
    Gone,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result of one poll.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TailRead {
    pub lines: Vec<String>,
    /// The file shrank or was replaced and reading restarted from offset 0.
    pub restarted: bool,
}

#[derive(Debug)]
pub struct TailCursor {
    path: PathBuf,
    file: File,
    offset: u64,
    /// Inode of `file`, for rotation detection.
    file_id: Option<u64>,
}

impl TailCursor {
    /// Follow `file` (opened from `path`) starting at `offset`.
    pub fn new(path: impl Into<PathBuf>, file: File, offset: u64) -> Self {
        let file_id = file.metadata().ok().and_then(|m| file_id(&m));
        Self {
            path: path.into(),
            file,
            offset,
            file_id,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every complete line appended since the last poll.
    pub fn poll(&mut self) -> Result<TailRead, TailError> {
        let mut restarted = false;

        match fs::metadata(&self.path) {
            Ok(meta) => {
                let current = file_id(&meta);
                if current.is_some() && current != self.file_id {
                    self.file = File::open(&self.path)?;
                    self.file_id = current;
                    self.offset = 0;
                    restarted = true;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(TailError::Gone),
            Err(e) => return Err(e.into()),
        }

        let size = self.file.metadata()?.len();
        if size < self.offset {
            self.offset = 0;
            restarted = true;
        }

        let mut lines = Vec::new();
        let mut budget = MAX_BYTES_PER_POLL;
        while self.offset < size && budget > 0 {
            let want = (size - self.offset).min(READ_CHUNK_BYTES as u64).min(budget);
            self.file.seek(SeekFrom::Start(self.offset))?;
            let mut buf = Vec::with_capacity(want as usize);
            (&mut self.file).take(want).read_to_end(&mut buf)?;
            if buf.is_empty() {
                break;
            }

            let consumed = match buf.iter().rposition(|&b| b == b'\n') {
                Some(last) => {
                    push_lines(&buf[..last], &mut lines);
                    last + 1
                }
                None if buf.len() >= READ_CHUNK_BYTES => {
                    lines.push(decode(&buf));
                    buf.len()
                }
                // Partial line: leave the cursor in front of it.
                None => break,
            };
            self.offset += consumed as u64;
            budget = budget.saturating_sub(consumed as u64);
        }

        Ok(TailRead { lines, restarted })
    }
}

/// Split newline-separated `bytes` (without the final newline) into lines.
pub(crate) fn push_lines(bytes: &[u8], out: &mut Vec<String>) {
    for raw in bytes.split(|&b| b == b'\n') {
        out.push(decode(raw));
    }
}

pub(crate) fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn file_id(meta: &fs::Metadata) -> Option<u64> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some(meta.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}
