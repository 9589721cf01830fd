//! Error taxonomy shared by every operation that touches the served tree.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WbError>;

#[derive(Debug, Error)]
pub enum WbError {
    #[error("path escapes root: {requested:?}")]
    PathOutOfBounds { requested: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("{path} is {size} bytes, limit is {limit}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },
}

/// Coarse classification of a [`WbError`], stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    NotFound,
    Unauthenticated,
    IoFailure,
    Invalid,
    TooLarge,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Unauthenticated => "unauthenticated",
            Self::IoFailure => "io_failure",
            Self::Invalid => "invalid",
            Self::TooLarge => "too_large",
        }
    }
}

impl WbError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn out_of_bounds(requested: impl Into<String>) -> Self {
        Self::PathOutOfBounds {
            requested: requested.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathOutOfBounds { .. } => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotAuthenticated => ErrorKind::Unauthenticated,
            Self::Io { .. } | Self::InvalidRoot { .. } => ErrorKind::IoFailure,
            Self::NotADirectory(_) | Self::NotAFile(_) | Self::InvalidRequest(_) => {
                ErrorKind::Invalid
            }
            Self::TooLarge { .. } => ErrorKind::TooLarge,
        }
    }

    /// Message safe to show a remote client. I/O errors omit the absolute
    /// path so the layout above the root is not leaked.
    pub fn client_message(&self) -> String {
        match self {
            Self::Io { source, .. } => format!("io error: {source}"),
            Self::InvalidRoot { .. } => "server misconfigured".to_string(),
            other => other.to_string(),
        }
    }
}
