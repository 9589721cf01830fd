//! The served root directory.

use std::path::{Path, PathBuf};

use crate::error::{Result, WbError};

/// Canonical, existing directory that bounds every served path.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    path: PathBuf,
}

impl Root {
    /// Canonicalize `path` and check that it names a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let raw = path.as_ref();
        if raw.as_os_str().is_empty() {
            return Err(WbError::InvalidRoot {
                path: raw.to_path_buf(),
                reason: "empty path".into(),
            });
        }
        let path = std::fs::canonicalize(raw).map_err(|e| WbError::InvalidRoot {
            path: raw.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !path.is_dir() {
            return Err(WbError::InvalidRoot {
                path,
                reason: "not a directory".into(),
            });
        }
        Ok(Self { path })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Path of `absolute` relative to the root, `/`-separated, empty for the
    /// root itself. `None` when `absolute` is outside the root.
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.path).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}
