//! Path-safety policy shared by every read and write relative to a root.
//!
//! `.` and `..` are folded lexically first, so a target that does not exist
//! yet (an output directory about to be created) is checked the same way as
//! an existing source file. Then the longest existing prefix of both the root
//! and the target is canonicalized, which catches symlinks leading out of the
//! root. The check happens before any read or write of the target.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Output directory used when a payload names none, relative to `repo_root`.
pub const DEFAULT_OUTPUT_DIR: &str = "screehshots_evidence";

/// Make `root` absolute against the current directory and fold it lexically.
pub fn absolute_root(root: &Path) -> Result<PathBuf> {
    let base = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()?.join(root)
    };
    Ok(normalize(&base))
}

/// Resolve `relative` against `root`, rejecting anything that lands outside it.
///
/// The resolved path must equal `root` or be nested beneath it. Absolute
/// inputs are accepted only when they already sit under `root`.
pub fn resolve_under(root: &Path, relative: &Path) -> Result<PathBuf> {
    let root = absolute_root(root)?;
    let candidate = normalize(&root.join(relative));
    if !candidate.starts_with(&root) {
        return Err(PipelineError::PathEscape {
            root,
            path: candidate,
        });
    }

    let physical_root = physical(&root).unwrap_or_else(|| root.clone());
    match physical(&candidate) {
        Some(resolved) if resolved.starts_with(&physical_root) => Ok(candidate),
        resolved => Err(PipelineError::PathEscape {
            root,
            path: resolved.unwrap_or(candidate),
        }),
    }
}

// Canonicalize the longest existing ancestor and re-append the missing tail.
// `path` is already absolute and folded, so the tail holds no `..`. A
// dangling symlink on the way yields `None`: its target cannot be checked.
fn physical(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut resolved) = std::fs::canonicalize(existing) {
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return Some(resolved);
        }
        if std::fs::symlink_metadata(existing).is_ok() {
            return None;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Some(path.to_path_buf()),
        }
    }
}

// Lexical normalisation; `..` above the filesystem root is dropped.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nested_path_is_accepted() {
        let resolved = resolve_under(Path::new("/repo"), Path::new("out/report.json")).unwrap();
        assert_eq!(resolved, PathBuf::from("/repo/out/report.json"));
    }

    #[test]
    fn root_itself_is_accepted() {
        let resolved = resolve_under(Path::new("/repo"), Path::new(".")).unwrap();
        assert_eq!(resolved, PathBuf::from("/repo"));
    }

    #[test]
    fn inner_parent_components_are_folded() {
        let resolved = resolve_under(Path::new("/repo"), Path::new("a/b/../c")).unwrap();
        assert_eq!(resolved, PathBuf::from("/repo/a/c"));
    }

    #[test]
    fn traversal_is_rejected() {
        let err = resolve_under(Path::new("/repo"), Path::new("../../etc")).unwrap_err();
        assert!(matches!(err, PipelineError::PathEscape { .. }));
    }

    #[test]
    fn sibling_prefix_is_rejected() {
        let err = resolve_under(Path::new("/repo"), Path::new("../repo-evil/x")).unwrap_err();
        assert!(matches!(err, PipelineError::PathEscape { .. }));
    }

    #[test]
    fn absolute_outside_is_rejected() {
        let err = resolve_under(Path::new("/repo"), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, PipelineError::PathEscape { .. }));
    }

    #[test]
    fn absolute_inside_is_accepted() {
        let resolved = resolve_under(Path::new("/repo"), Path::new("/repo/data.csv")).unwrap();
        assert_eq!(resolved, PathBuf::from("/repo/data.csv"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        use std::os::unix::fs::symlink;

        let repo = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.json"), "[]").unwrap();
        symlink(outside.path(), repo.path().join("data")).unwrap();

        let err = resolve_under(repo.path(), Path::new("data/secret.json")).unwrap_err();
        assert!(matches!(err, PipelineError::PathEscape { .. }));

        // Not-yet-existing targets beneath the link are caught too.
        let err = resolve_under(repo.path(), Path::new("data/new/report.json")).unwrap_err();
        assert!(matches!(err, PipelineError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_rejected() {
        use std::os::unix::fs::symlink;

        let repo = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        symlink(outside.path().join("not-yet"), repo.path().join("out")).unwrap();

        let err = resolve_under(repo.path(), Path::new("out/report.json")).unwrap_err();
        assert!(matches!(err, PipelineError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_root_is_accepted() {
        use std::os::unix::fs::symlink;

        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir(repo.path().join("real")).unwrap();
        symlink(repo.path().join("real"), repo.path().join("alias")).unwrap();

        let resolved = resolve_under(repo.path(), Path::new("alias/rows.csv")).unwrap();
        assert!(resolved.ends_with("alias/rows.csv"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_root_is_followed() {
        use std::os::unix::fs::symlink;

        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir(base.path().join("actual")).unwrap();
        let link = base.path().join("repo");
        symlink(base.path().join("actual"), &link).unwrap();

        assert!(resolve_under(&link, Path::new("out/report.json")).is_ok());
    }

    proptest! {
        #[test]
        fn leading_parents_always_escape(
            depth in 1usize..6,
            tail in proptest::collection::vec("q[a-z]{0,5}", 0..3),
        ) {
            let mut rel = "../".repeat(depth);
            rel.push_str(&tail.join("/"));
            // `/srv/repo` is two levels deep, so any run of `..` leaves it.
            let result = resolve_under(Path::new("/srv/repo"), Path::new(&rel));
            prop_assert!(result.is_err());
        }

        #[test]
        fn plain_segments_never_escape(
            segments in proptest::collection::vec("[a-z0-9_]{1,8}", 1..5),
        ) {
            let rel = segments.join("/");
            let resolved = resolve_under(Path::new("/srv/repo"), Path::new(&rel)).unwrap();
            prop_assert!(resolved.starts_with("/srv/repo"));
        }
    }
}
