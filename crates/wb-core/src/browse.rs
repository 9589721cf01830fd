//! Filesystem operations behind the browser: list, read, download, upload,
//! rename and delete.
//!
//! Each operation resolves its client paths first and touches nothing when
//! resolution fails. Concurrent writers to the same path are not coordinated;
//! the last writer wins, as the OS decides.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, WbError};
use crate::resolver::{ResolvedPath, resolve, resolve_entry};
use crate::root::Root;

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    /// Path relative to the root, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirListing {
    pub path: String,
    /// Relative path of the parent directory; `None` at the root.
    pub parent: Option<String>,
    pub entries: Vec<DirEntry>,
}

pub fn list_dir(root: &Root, requested: &str) -> Result<DirListing> {
    let dir = resolve(root, requested)?;
    let meta = metadata(&dir, requested)?;
    if !meta.is_dir() {
        return Err(WbError::NotADirectory(requested.to_string()));
    }

    let rel = relative(root, &dir);
    let reader = fs::read_dir(dir.as_path()).map_err(|e| WbError::io(dir.as_path(), e))?;

    let mut entries = Vec::new();
    for entry in reader {
        let entry = entry.map_err(|e| WbError::io(dir.as_path(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        // Follow symlinks for display; a dangling link still gets listed.
        let meta = match fs::metadata(&path).or_else(|_| fs::symlink_metadata(&path)) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        entries.push(DirEntry {
            path: join_rel(&rel, &name),
            name,
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok().map(to_utc),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let parent = if rel.is_empty() {
        None
    } else {
        Some(rel.rsplit_once('/').map_or(String::new(), |(p, _)| p.to_string()))
    };

    Ok(DirListing {
        path: rel,
        parent,
        entries,
    })
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FileText {
    pub path: String,
    pub content: String,
    pub size: u64,
    /// True when only the first `limit` bytes were read.
    pub truncated: bool,
}

/// Read a file as text, replacing invalid UTF-8, capped at `limit` bytes.
pub fn read_text(root: &Root, requested: &str, limit: u64) -> Result<FileText> {
    let file = resolve(root, requested)?;
    let size = regular_file_size(&file, requested)?;

    let handle = fs::File::open(file.as_path()).map_err(|e| WbError::io(file.as_path(), e))?;
    let mut buf = Vec::new();
    handle
        .take(limit)
        .read_to_end(&mut buf)
        .map_err(|e| WbError::io(file.as_path(), e))?;

    Ok(FileText {
        path: relative(root, &file),
        content: String::from_utf8_lossy(&buf).into_owned(),
        size,
        truncated: size > limit,
    })
}

#[derive(Debug, Clone)]
pub struct FileBytes {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Read a whole file for download. Files above `limit` are refused rather
/// than truncated.
pub fn read_bytes(root: &Root, requested: &str, limit: u64) -> Result<FileBytes> {
    let file = resolve(root, requested)?;
    let size = regular_file_size(&file, requested)?;
    if size > limit {
        return Err(WbError::TooLarge {
            path: requested.to_string(),
            size,
            limit,
        });
    }
    let bytes = fs::read(file.as_path()).map_err(|e| WbError::io(file.as_path(), e))?;
    let name = file
        .as_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FileBytes { name, bytes })
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Relative name inside the destination, may contain sub-directories.
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRejection {
    pub name: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    /// Root-relative paths written, in request order.
    pub written: Vec<String>,
    pub rejected: Vec<UploadRejection>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Write a batch of files under `directory`.
///
/// The destination must resolve to an existing directory or the whole batch
/// is refused. Each entry is then resolved on its own inside that directory:
/// a bad entry is recorded in the report and skipped without writing, and
/// its siblings are still written.
pub fn upload_batch(
    root: &Root,
    directory: &str,
    files: Vec<UploadFile>,
    max_file_bytes: u64,
) -> Result<UploadReport> {
    let dest = resolve(root, directory)?;
    if !metadata(&dest, directory)?.is_dir() {
        return Err(WbError::NotADirectory(directory.to_string()));
    }

    let mut report = UploadReport::default();
    for file in files {
        match write_upload(root, &dest, &file, max_file_bytes) {
            Ok(path) => {
                tracing::info!(path = %path, bytes = file.bytes.len(), "uploaded file");
                report.written.push(path);
            }
            Err(e) => {
                tracing::warn!(name = %file.name, error = %e, "upload entry rejected");
                report.rejected.push(UploadRejection {
                    name: file.name,
                    kind: e.kind().as_str(),
                    reason: e.client_message(),
                });
            }
        }
    }
    Ok(report)
}

fn write_upload(
    root: &Root,
    dest: &ResolvedPath,
    file: &UploadFile,
    max_file_bytes: u64,
) -> Result<String> {
    let size = file.bytes.len() as u64;
    if size > max_file_bytes {
        return Err(WbError::TooLarge {
            path: file.name.clone(),
            size,
            limit: max_file_bytes,
        });
    }

    let target = dest.join(&file.name)?;
    if target == *dest {
        return Err(WbError::InvalidRequest(format!(
            "upload name {:?} does not name a file",
            file.name
        )));
    }
    if target.as_path().is_dir() {
        return Err(WbError::NotAFile(file.name.clone()));
    }

    // Only reached once `target` is confirmed inside `dest`, so every
    // directory created here is below it too.
    if let Some(parent) = target.as_path().parent() {
        fs::create_dir_all(parent).map_err(|e| WbError::io(parent, e))?;
    }
    fs::write(target.as_path(), &file.bytes).map_err(|e| WbError::io(target.as_path(), e))?;

    Ok(relative(root, &target))
}

// ---------------------------------------------------------------------------
// Rename / delete
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RenameOutcome {
    pub from: String,
    pub to: String,
}

/// Rename `source` to `destination`. Both are resolved independently and
/// both must pass before anything moves.
pub fn rename(root: &Root, source: &str, destination: &str) -> Result<RenameOutcome> {
    let from = resolve_entry(root, source)?;
    let to = resolve_entry(root, destination)?;

    if from.as_path() == root.as_path() || to.as_path() == root.as_path() {
        return Err(WbError::InvalidRequest(
            "the root directory cannot be renamed or replaced".into(),
        ));
    }

    let meta = entry_metadata(&from, source)?;
    match to.as_path().parent().map(fs::metadata) {
        Some(Ok(parent)) if parent.is_dir() => {}
        _ => {
            return Err(WbError::NotFound(format!(
                "parent directory of {destination:?}"
            )));
        }
    }
    if meta.is_dir() && to.as_path().starts_with(from.as_path()) {
        return Err(WbError::InvalidRequest(
            "cannot move a directory inside itself".into(),
        ));
    }

    fs::rename(from.as_path(), to.as_path()).map_err(|e| WbError::io(from.as_path(), e))?;
    tracing::info!(from = %source, to = %destination, "renamed");

    Ok(RenameOutcome {
        from: relative(root, &from),
        to: relative(root, &to),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub path: String,
    pub was_dir: bool,
}

/// Remove `target`. Directories are removed recursively; there is no undo.
/// A symlink is unlinked, never its target.
pub fn delete(root: &Root, target: &str) -> Result<DeleteOutcome> {
    let entry = resolve_entry(root, target)?;
    if entry.as_path() == root.as_path() {
        return Err(WbError::InvalidRequest(
            "the root directory cannot be deleted".into(),
        ));
    }

    let meta = entry_metadata(&entry, target)?;
    let was_dir = meta.is_dir();
    let removed = if was_dir {
        fs::remove_dir_all(entry.as_path())
    } else {
        fs::remove_file(entry.as_path())
    };
    removed.map_err(|e| WbError::io(entry.as_path(), e))?;
    tracing::info!(path = %target, was_dir, "deleted");

    Ok(DeleteOutcome {
        path: relative(root, &entry),
        was_dir,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn metadata(path: &ResolvedPath, requested: &str) -> Result<fs::Metadata> {
    fs::metadata(path.as_path()).map_err(|e| not_found_or_io(path.as_path(), requested, e))
}

fn entry_metadata(path: &ResolvedPath, requested: &str) -> Result<fs::Metadata> {
    fs::symlink_metadata(path.as_path()).map_err(|e| not_found_or_io(path.as_path(), requested, e))
}

fn regular_file_size(path: &ResolvedPath, requested: &str) -> Result<u64> {
    let meta = metadata(path, requested)?;
    if !meta.is_file() {
        return Err(WbError::NotAFile(requested.to_string()));
    }
    Ok(meta.len())
}

fn not_found_or_io(path: &Path, requested: &str, e: io::Error) -> WbError {
    if e.kind() == io::ErrorKind::NotFound {
        WbError::NotFound(requested.to_string())
    } else {
        WbError::io(path, e)
    }
}

fn relative(root: &Root, path: &ResolvedPath) -> String {
    root.relative(path.as_path()).unwrap_or_default()
}

fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Root) {
        let tmp = tempfile::tempdir().expect("test");
        let root_dir = tmp.path().join("root");
        fs::create_dir_all(root_dir.join("docs/nested")).expect("test");
        fs::write(root_dir.join("docs/readme.txt"), "read me\n").expect("test");
        fs::write(root_dir.join("b.log"), "line\n").expect("test");
        fs::write(root_dir.join("a.txt"), "alpha").expect("test");
        let root = Root::new(&root_dir).expect("test");
        (tmp, root)
    }

    fn upload(name: &str, body: &str) -> UploadFile {
        UploadFile {
            name: name.to_string(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn list_root_is_sorted_without_parent() {
        let (_tmp, root) = setup();
        let listing = list_dir(&root, "").expect("test");
        assert_eq!(listing.path, "");
        assert_eq!(listing.parent, None);
        let names: Vec<&str> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.log", "docs"]);
        let docs = &listing.entries[2];
        assert!(docs.is_dir);
        assert_eq!(docs.path, "docs");
        assert_eq!(listing.entries[0].size, 5);
    }

    #[test]
    fn list_nested_reports_parent_and_relative_paths() {
        let (_tmp, root) = setup();
        let listing = list_dir(&root, "docs/nested/..").expect("test");
        assert_eq!(listing.path, "docs");
        assert_eq!(listing.parent.as_deref(), Some(""));
        let paths: Vec<&str> = listing.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/nested", "docs/readme.txt"]);

        let nested = list_dir(&root, "docs/nested").expect("test");
        assert_eq!(nested.parent.as_deref(), Some("docs"));
    }

    #[test]
    fn list_rejects_escape_and_files() {
        let (_tmp, root) = setup();
        assert!(matches!(list_dir(&root, ".."), Err(WbError::PathOutOfBounds { .. })));
        assert!(matches!(list_dir(&root, "a.txt"), Err(WbError::NotADirectory(_))));
        assert!(matches!(list_dir(&root, "nope"), Err(WbError::NotFound(_))));
    }

    #[test]
    fn read_text_replaces_invalid_utf8_and_caps_size() {
        let (_tmp, root) = setup();
        fs::write(root.as_path().join("bin.dat"), [b'o', b'k', 0xff, b'!']).expect("test");
        let text = read_text(&root, "bin.dat", 1024).expect("test");
        assert_eq!(text.content, "ok\u{fffd}!");
        assert!(!text.truncated);

        let capped = read_text(&root, "a.txt", 2).expect("test");
        assert_eq!(capped.content, "al");
        assert!(capped.truncated);
        assert_eq!(capped.size, 5);
    }

    #[test]
    fn read_rejects_directories_and_escape() {
        let (_tmp, root) = setup();
        assert!(matches!(read_text(&root, "docs", 10), Err(WbError::NotAFile(_))));
        assert!(matches!(
            read_text(&root, "../root/a.txt/../../x", 10),
            Err(WbError::PathOutOfBounds { .. })
        ));
    }

    #[test]
    fn read_bytes_refuses_large_files() {
        let (_tmp, root) = setup();
        let file = read_bytes(&root, "docs/readme.txt", 1024).expect("test");
        assert_eq!(file.name, "readme.txt");
        assert_eq!(file.bytes, b"read me\n");
        assert!(matches!(
            read_bytes(&root, "a.txt", 3),
            Err(WbError::TooLarge { size: 5, limit: 3, .. })
        ));
    }

    #[test]
    fn upload_batch_writes_valid_entries_and_rejects_traversal() {
        let (tmp, root) = setup();
        let files = vec![
            upload("one.txt", "1"),
            upload("sub/two.txt", "2"),
            upload("../../evil.txt", "evil"),
            upload("sub/deeper/three.txt", "3"),
        ];
        let report = upload_batch(&root, "docs", files, 1024).expect("test");

        assert_eq!(
            report.written,
            vec!["docs/one.txt", "docs/sub/two.txt", "docs/sub/deeper/three.txt"]
        );
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].name, "../../evil.txt");
        assert_eq!(report.rejected[0].kind, "forbidden");
        assert!(!report.is_complete());

        assert_eq!(
            fs::read_to_string(root.as_path().join("docs/sub/deeper/three.txt")).expect("test"),
            "3"
        );
        assert!(!tmp.path().join("evil.txt").exists());
        assert!(!root.as_path().join("evil.txt").exists());
    }

    #[test]
    fn upload_entry_cannot_leave_destination_even_inside_root() {
        let (_tmp, root) = setup();
        let report =
            upload_batch(&root, "docs", vec![upload("../sibling.txt", "x")], 1024).expect("test");
        assert!(report.written.is_empty());
        assert!(!root.as_path().join("sibling.txt").exists());
    }

    #[test]
    fn upload_to_escaping_directory_writes_nothing() {
        let (tmp, root) = setup();
        let err = upload_batch(&root, "../", vec![upload("x.txt", "x")], 1024).expect_err("escape");
        assert!(matches!(err, WbError::PathOutOfBounds { .. }));
        assert!(!tmp.path().join("x.txt").exists());
    }

    #[test]
    fn upload_rejects_oversized_and_nameless_entries() {
        let (_tmp, root) = setup();
        let files = vec![upload("big.bin", "0123456789"), upload("", "x"), upload(".", "x")];
        let report = upload_batch(&root, "", files, 4).expect("test");
        assert!(report.written.is_empty());
        let kinds: Vec<&str> = report.rejected.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec!["too_large", "invalid", "invalid"]);
    }

    #[test]
    fn upload_into_missing_directory_is_not_found() {
        let (_tmp, root) = setup();
        let err = upload_batch(&root, "missing", vec![upload("x", "x")], 4).expect_err("missing");
        assert!(matches!(err, WbError::NotFound(_)));
    }

    #[test]
    fn rename_moves_within_root() {
        let (_tmp, root) = setup();
        let outcome = rename(&root, "a.txt", "docs/renamed.txt").expect("test");
        assert_eq!(outcome.from, "a.txt");
        assert_eq!(outcome.to, "docs/renamed.txt");
        assert!(!root.as_path().join("a.txt").exists());
        assert_eq!(
            fs::read_to_string(root.as_path().join("docs/renamed.txt")).expect("test"),
            "alpha"
        );
    }

    #[test]
    fn rename_checks_both_endpoints() {
        let (tmp, root) = setup();
        assert!(matches!(
            rename(&root, "a.txt", "../stolen.txt"),
            Err(WbError::PathOutOfBounds { .. })
        ));
        assert!(root.as_path().join("a.txt").exists());
        assert!(!tmp.path().join("stolen.txt").exists());

        fs::write(tmp.path().join("outside.txt"), "o").expect("test");
        assert!(matches!(
            rename(&root, "../outside.txt", "inside.txt"),
            Err(WbError::PathOutOfBounds { .. })
        ));
        assert!(tmp.path().join("outside.txt").exists());
    }

    #[test]
    fn rename_edge_cases() {
        let (_tmp, root) = setup();
        assert!(matches!(rename(&root, "missing", "x"), Err(WbError::NotFound(_))));
        assert!(matches!(
            rename(&root, "a.txt", "no/such/dir/a.txt"),
            Err(WbError::NotFound(_))
        ));
        assert!(matches!(rename(&root, "", "x"), Err(WbError::InvalidRequest(_))));
        assert!(matches!(
            rename(&root, "docs", "docs/nested/docs"),
            Err(WbError::InvalidRequest(_))
        ));
    }

    #[test]
    fn delete_file_and_directory_recursively() {
        let (_tmp, root) = setup();
        let file = delete(&root, "a.txt").expect("test");
        assert!(!file.was_dir);
        assert!(!root.as_path().join("a.txt").exists());

        let dir = delete(&root, "docs/").expect("test");
        assert!(dir.was_dir);
        assert_eq!(dir.path, "docs");
        assert!(!root.as_path().join("docs").exists());
    }

    #[test]
    fn delete_refuses_root_escape_and_missing() {
        let (tmp, root) = setup();
        fs::write(tmp.path().join("keep.txt"), "k").expect("test");
        assert!(matches!(delete(&root, ""), Err(WbError::InvalidRequest(_))));
        assert!(matches!(delete(&root, "docs/.."), Err(WbError::InvalidRequest(_))));
        assert!(matches!(
            delete(&root, "../keep.txt"),
            Err(WbError::PathOutOfBounds { .. })
        ));
        assert!(tmp.path().join("keep.txt").exists());
        assert!(matches!(delete(&root, "ghost"), Err(WbError::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn delete_symlink_removes_link_only() {
        let (_tmp, root) = setup();
        let link = root.as_path().join("docs-link");
        std::os::unix::fs::symlink(root.as_path().join("docs"), &link).expect("test");
        let outcome = delete(&root, "docs-link").expect("test");
        assert!(!outcome.was_dir);
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(root.as_path().join("docs/readme.txt").exists());
    }
}
