//! Tail session state machine.
//!
//! ```text
//! Opening ──► Replaying ──► Tailing ──► Closed
//!    │            │            │           ▲
//!    └────────────┴────────────┴─► Failed ─┘
//! ```
//!
//! The session owns the file handle and the cursor. It never sleeps and
//! never talks to the network: the caller decides when to [`tick`] and
//! where the returned [`TailMessage`]s go.
//!
//! [`tick`]: TailSession::tick

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};

use serde::Serialize;
use wb_core::{Identity, ResolvedPath};

use crate::cursor::{TailCursor, TailError};
use crate::replay;

/// Lines of history sent when a session opens.
pub const DEFAULT_REPLAY_LINES: usize = 100;

/// One message to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TailMessage {
    /// Recent history, sent once at open.
    History { lines: Vec<String> },
    /// One newly appended line. A line longer than
    /// [`READ_CHUNK_BYTES`](crate::cursor::READ_CHUNK_BYTES) arrives as
    /// several messages of at most that size.
    Line { line: String },
    /// Terminal failure; nothing follows it.
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Opening,
    Replaying,
    Tailing,
    Failed,
    Closed,
}

#[derive(Debug)]
enum Phase {
    Opening,
    Replaying,
    Tailing { cursor: TailCursor },
    Failed { reason: String },
    Closed,
}

#[derive(Debug)]
pub struct TailSession {
    path: ResolvedPath,
    /// Root-relative name used in client messages and logs.
    display: String,
    replay_lines: usize,
    phase: Phase,
}

impl TailSession {
    pub fn new(path: ResolvedPath, display: impl Into<String>, replay_lines: usize) -> Self {
        Self {
            path,
            display: display.into(),
            replay_lines,
            phase: Phase::Opening,
        }
    }

    pub fn state(&self) -> TailState {
        match self.phase {
            Phase::Opening => TailState::Opening,
            Phase::Replaying => TailState::Replaying,
            Phase::Tailing { .. } => TailState::Tailing,
            Phase::Failed { .. } => TailState::Failed,
            Phase::Closed => TailState::Closed,
        }
    }

    /// Failed or closed: no further messages will be produced.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Failed { .. } | Phase::Closed)
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Current cursor offset while tailing.
    pub fn offset(&self) -> Option<u64> {
        match &self.phase {
            Phase::Tailing { cursor } => Some(cursor.offset()),
            _ => None,
        }
    }

    /// Authenticate, open the file and replay its recent history.
    ///
    /// Without an identity the session fails before any file access. Only
    /// valid in `Opening`; later calls return nothing.
    pub fn open(&mut self, identity: Option<&Identity>) -> Vec<TailMessage> {
        if !matches!(self.phase, Phase::Opening) {
            return Vec::new();
        }
        if identity.is_none() {
            return self.fail("not authenticated".to_string());
        }

        let mut file = match self.open_regular_file() {
            Ok(file) => file,
            Err(message) => return self.fail(message),
        };

        self.phase = Phase::Replaying;
        let (lines, offset) = match replay::last_lines(&mut file, self.replay_lines) {
            Ok(replay) => (replay.lines, replay.end),
            Err(e) => {
                tracing::warn!(path = %self.display, error = %e, "replay failed, tailing from end");
                match file.seek(SeekFrom::End(0)) {
                    Ok(end) => (Vec::new(), end),
                    Err(e) => return self.fail(format!("cannot read {}: {e}", self.display)),
                }
            }
        };

        tracing::debug!(
            path = %self.display,
            replayed = lines.len(),
            offset,
            "tail session open"
        );
        self.phase = Phase::Tailing {
            cursor: TailCursor::new(self.path.as_path(), file, offset),
        };
        vec![TailMessage::History { lines }]
    }

    /// Emit every complete line appended since the previous tick. Does
    /// nothing unless tailing.
    pub fn tick(&mut self) -> Vec<TailMessage> {
        let Phase::Tailing { cursor } = &mut self.phase else {
            return Vec::new();
        };
        match cursor.poll() {
            Ok(read) => {
                if read.restarted {
                    tracing::info!(path = %self.display, "file truncated or rotated, restarting at offset 0");
                }
                read.lines
                    .into_iter()
                    .map(|line| TailMessage::Line { line })
                    .collect()
            }
            Err(TailError::Gone) => self.fail(format!("{} no longer exists", self.display)),
            Err(TailError::Io(e)) => self.fail(format!("cannot read {}: {e}", self.display)),
        }
    }

    /// Release the file handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if !matches!(self.phase, Phase::Closed) {
            tracing::debug!(path = %self.display, state = ?self.state(), "tail session closed");
            self.phase = Phase::Closed;
        }
    }

    fn open_regular_file(&self) -> Result<File, String> {
        let path = self.path.as_path();
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(format!("{} is not a regular file", self.display)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(format!("{} not found", self.display));
            }
            Err(e) => return Err(format!("cannot open {}: {e}", self.display)),
        }
        File::open(path).map_err(|e| format!("cannot open {}: {e}", self.display))
    }

    fn fail(&mut self, reason: String) -> Vec<TailMessage> {
        tracing::warn!(path = %self.display, reason = %reason, "tail session failed");
        self.phase = Phase::Failed {
            reason: reason.clone(),
        };
        vec![TailMessage::Error { message: reason }]
    }
}

impl Drop for TailSession {
    fn drop(&mut self) {
        self.close();
    }
}
