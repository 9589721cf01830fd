//! Path confinement.
//!
//! A client path is walked one component at a time starting from the root.
//! Each component that exists on disk is canonicalized immediately, so `..`
//! always pops a real directory and symlinks are followed before the
//! containment check, never after it. Components that do not exist yet
//! (upload targets, rename destinations) are appended lexically; they cannot
//! be symlinks, so lexical handling is exact for them.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, WbError};
use crate::root::Root;

/// A path proven to lie inside its boundary (the root, or a confirmed
/// directory below it). Only the functions in this module construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    /// Resolve `requested` relative to this path and confine the result to
    /// it. Used for batch uploads, where every entry must land inside the
    /// already-confirmed destination directory.
    pub fn join(&self, requested: &str) -> Result<ResolvedPath> {
        let walked = walk(&self.path, Path::new(requested), requested)?;
        confine(&self.path, walked, requested)
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolve a client path against `root`.
///
/// Leading separators are ignored (`"/etc"` means `<root>/etc`), an empty
/// path is the root itself, and trailing slashes are insignificant. The
/// result is rejected with [`WbError::PathOutOfBounds`] unless it is the root
/// or a descendant of it.
pub fn resolve(root: &Root, requested: &str) -> Result<ResolvedPath> {
    let walked = walk(root.as_path(), Path::new(requested), requested)?;
    confine(root.as_path(), walked, requested)
}

/// Resolve a client path that names a directory entry to be renamed,
/// replaced or removed.
///
/// The parent is resolved as in [`resolve`], but the final component is not
/// dereferenced: deleting `link` removes the link, not its target. A final
/// component that is a symlink must still point inside the root.
pub fn resolve_entry(root: &Root, requested: &str) -> Result<ResolvedPath> {
    let relative: PathBuf = Path::new(requested)
        .components()
        .filter(|c| !matches!(c, Component::Prefix(_) | Component::RootDir | Component::CurDir))
        .collect();

    let name = match relative.components().next_back() {
        Some(Component::Normal(name)) => name.to_os_string(),
        // Empty or ending in `..`: the entry is a canonical directory already.
        _ => return resolve(root, requested),
    };
    let parent_rel = relative.parent().unwrap_or(Path::new(""));

    let parent = walk(root.as_path(), parent_rel, requested)?;
    let parent = confine(root.as_path(), parent, requested)?;
    let entry = parent.path.join(&name);

    if let Ok(meta) = fs::symlink_metadata(&entry) {
        if meta.file_type().is_symlink() {
            let target = canonical_existing(entry.clone(), requested)?;
            confine(root.as_path(), target, requested)?;
        }
    }

    Ok(ResolvedPath { path: entry })
}

fn walk(base: &Path, requested: &Path, original: &str) -> Result<PathBuf> {
    let mut current = base.to_path_buf();
    for component in requested.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !current.pop() {
                    return Err(WbError::out_of_bounds(original));
                }
            }
            Component::Normal(segment) => {
                current.push(segment);
                current = canonical_existing(current, original)?;
            }
        }
    }
    Ok(current)
}

/// Canonicalize `path` if something exists there; return it untouched if
/// not. A dangling symlink cannot be verified and is rejected.
fn canonical_existing(path: PathBuf, original: &str) -> Result<PathBuf> {
    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            return Ok(path);
        }
        Err(e) => return Err(WbError::io(path, e)),
    };
    match fs::canonicalize(&path) {
        Ok(canonical) => Ok(canonical),
        Err(e) if meta.file_type().is_symlink() && e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(requested = %original, "rejecting dangling symlink");
            Err(WbError::out_of_bounds(original))
        }
        Err(e) => Err(WbError::io(path, e)),
    }
}

/// `Path::starts_with` compares whole components, so `/srv/rootx` is not
/// inside `/srv/root`.
fn confine(boundary: &Path, candidate: PathBuf, original: &str) -> Result<ResolvedPath> {
    if candidate.starts_with(boundary) {
        Ok(ResolvedPath { path: candidate })
    } else {
        tracing::warn!(
            requested = %original,
            boundary = %boundary.display(),
            "path escapes boundary"
        );
        Err(WbError::out_of_bounds(original))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Layout:
    /// ```text
    /// <tmp>/outside/secret.txt
    /// <tmp>/rootx/
    /// <tmp>/root/a/file.txt      (the root)
    /// ```
    struct Fixture {
        _tmp: TempDir,
        root: Root,
        outside: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().expect("test");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).expect("test");
        fs::write(outside.join("secret.txt"), "secret").expect("test");
        fs::create_dir_all(tmp.path().join("rootx")).expect("test");
        let root_dir = tmp.path().join("root");
        fs::create_dir_all(root_dir.join("a")).expect("test");
        fs::write(root_dir.join("a/file.txt"), "hello").expect("test");
        let root = Root::new(&root_dir).expect("test");
        let outside = fs::canonicalize(outside).expect("test");
        Fixture {
            _tmp: tmp,
            root,
            outside,
        }
    }

    #[test]
    fn empty_path_is_root() {
        let fx = fixture();
        let resolved = resolve(&fx.root, "").expect("test");
        assert_eq!(resolved.as_path(), fx.root.as_path());
    }

    #[test]
    fn dot_dot_inside_root_normalizes() {
        let fx = fixture();
        let a = resolve(&fx.root, "a/../a/file.txt").expect("test");
        let b = resolve(&fx.root, "a/file.txt").expect("test");
        assert_eq!(a, b);
        assert_eq!(a.as_path(), fx.root.as_path().join("a/file.txt"));
    }

    #[test]
    fn trailing_slash_is_insignificant() {
        let fx = fixture();
        assert_eq!(
            resolve(&fx.root, "a/").expect("test"),
            resolve(&fx.root, "a").expect("test")
        );
    }

    #[test]
    fn leading_separator_stays_under_root() {
        let fx = fixture();
        let resolved = resolve(&fx.root, "/a/file.txt").expect("test");
        assert_eq!(resolved.as_path(), fx.root.as_path().join("a/file.txt"));
        let etc = resolve(&fx.root, "/etc/passwd").expect("test");
        assert!(etc.as_path().starts_with(fx.root.as_path()));
    }

    #[test]
    fn escaping_with_dot_dot_is_rejected() {
        let fx = fixture();
        for requested in ["..", "../outside/secret.txt", "a/../../outside", "a/../../../.."] {
            let err = resolve(&fx.root, requested).expect_err(requested);
            assert!(matches!(err, WbError::PathOutOfBounds { .. }), "{requested}");
        }
    }

    #[test]
    fn sibling_with_shared_prefix_is_rejected() {
        let fx = fixture();
        let err = resolve(&fx.root, "../rootx").expect_err("sibling");
        assert!(matches!(err, WbError::PathOutOfBounds { .. }));
    }

    #[test]
    fn missing_components_resolve_lexically() {
        let fx = fixture();
        let resolved = resolve(&fx.root, "new/dir/../file.txt").expect("test");
        assert_eq!(resolved.as_path(), fx.root.as_path().join("new/file.txt"));
        assert!(resolve(&fx.root, "new/../../escape").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_is_rejected() {
        let fx = fixture();
        std::os::unix::fs::symlink(&fx.outside, fx.root.as_path().join("out")).expect("test");
        assert!(matches!(
            resolve(&fx.root, "out/secret.txt"),
            Err(WbError::PathOutOfBounds { .. })
        ));
        assert!(matches!(
            resolve(&fx.root, "out"),
            Err(WbError::PathOutOfBounds { .. })
        ));
        assert!(matches!(
            resolve_entry(&fx.root, "out"),
            Err(WbError::PathOutOfBounds { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_is_followed() {
        let fx = fixture();
        std::os::unix::fs::symlink(fx.root.as_path().join("a"), fx.root.as_path().join("in"))
            .expect("test");
        let resolved = resolve(&fx.root, "in/file.txt").expect("test");
        assert_eq!(resolved.as_path(), fx.root.as_path().join("a/file.txt"));

        // `..` after a symlink pops the real directory, not the link name.
        let parent = resolve(&fx.root, "in/..").expect("test");
        assert_eq!(parent.as_path(), fx.root.as_path());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_rejected() {
        let fx = fixture();
        std::os::unix::fs::symlink(
            fx.outside.join("not-yet-created"),
            fx.root.as_path().join("dangling"),
        )
        .expect("test");
        assert!(matches!(
            resolve(&fx.root, "dangling"),
            Err(WbError::PathOutOfBounds { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_entry_keeps_final_symlink() {
        let fx = fixture();
        let link = fx.root.as_path().join("in");
        std::os::unix::fs::symlink(fx.root.as_path().join("a"), &link).expect("test");
        let entry = resolve_entry(&fx.root, "in").expect("test");
        assert_eq!(entry.as_path(), link);
    }

    #[test]
    fn resolve_entry_rejects_escape() {
        let fx = fixture();
        assert!(resolve_entry(&fx.root, "../outside/secret.txt").is_err());
        assert!(resolve_entry(&fx.root, "a/../../outside").is_err());
        let missing = resolve_entry(&fx.root, "a/new.txt").expect("test");
        assert_eq!(missing.as_path(), fx.root.as_path().join("a/new.txt"));
    }

    #[test]
    fn join_is_confined_to_base() {
        let fx = fixture();
        let dest = resolve(&fx.root, "a").expect("test");
        let nested = dest.join("sub/x.txt").expect("test");
        assert_eq!(nested.as_path(), fx.root.as_path().join("a/sub/x.txt"));

        // Still inside root, but outside the destination.
        assert!(dest.join("../escape.txt").is_err());
        assert!(dest.join("../../evil.txt").is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = &'static str> {
            proptest::sample::select(vec![
                "..", ".", "a", "file.txt", "missing", "outside", "rootx", "in", "out", "",
            ])
        }

        fn requested() -> impl Strategy<Value = String> {
            (any::<bool>(), proptest::collection::vec(segment(), 0..8)).prop_map(|(abs, segs)| {
                let joined = segs.join("/");
                if abs { format!("/{joined}") } else { joined }
            })
        }

        proptest! {
            /// Whatever the input, a successful resolution stays under root.
            #[test]
            fn resolution_never_escapes_root(req in requested()) {
                let fx = fixture();
                #[cfg(unix)]
                {
                    std::os::unix::fs::symlink(&fx.outside, fx.root.as_path().join("out")).expect("test");
                    std::os::unix::fs::symlink(fx.root.as_path().join("a"), fx.root.as_path().join("in")).expect("test");
                }
                if let Ok(resolved) = resolve(&fx.root, &req) {
                    prop_assert!(resolved.as_path().starts_with(fx.root.as_path()),
                        "{req:?} resolved to {}", resolved.as_path().display());
                }
                if let Ok(entry) = resolve_entry(&fx.root, &req) {
                    prop_assert!(entry.as_path().starts_with(fx.root.as_path()),
                        "{req:?} entry resolved to {}", entry.as_path().display());
                }
            }
        }
    }
}
