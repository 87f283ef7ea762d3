//! Cache keys and their on-disk layout
//!
//! A key is a cleaned, relative, slash-separated path. The cache directory,
//! the staging directory and the remote store all share this namespace: a
//! key `a/b/c.bin` lives at `<root>/a/b/c.bin` locally and under the same
//! name remotely.

use crate::error::{EdgeError, Result};
use std::path::{Component, Path, PathBuf};

/// Prefix of temp files used for atomic writes. Never a valid key segment.
pub const TEMP_FILE_PREFIX: &str = ".tmp";

/// Clean a request path into a cache key
///
/// Works like cleaning a rooted path: empty and `.` segments are dropped,
/// `..` pops the previous segment and can never climb above the root. The
/// returned key has no leading slash.
///
/// # Errors
/// `InvalidKey` if nothing is left after cleaning (e.g. `/`), or if a
/// segment contains a NUL byte, a backslash, or the temp-file prefix.
pub fn normalize_key(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => {
                if s.contains('\0') || s.contains('\\') {
                    return Err(EdgeError::InvalidKey(format!(
                        "illegal character in path segment: {:?}",
                        s
                    )));
                }
                if s.starts_with(TEMP_FILE_PREFIX) {
                    return Err(EdgeError::InvalidKey(format!(
                        "reserved path segment: {}",
                        s
                    )));
                }
                segments.push(s);
            }
        }
    }

    if segments.is_empty() {
        return Err(EdgeError::InvalidKey(format!(
            "path {:?} does not name a file",
            path
        )));
    }

    Ok(segments.join("/"))
}

/// Map a key onto a file under `root`
pub fn key_to_path(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in key.split('/') {
        path.push(segment);
    }
    path
}

/// Map a file under `root` back onto its key
///
/// Returns `None` for paths outside `root`, for non-UTF-8 names and for
/// temp files left behind by interrupted atomic writes.
pub fn path_to_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();

    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str()?;
                if name.starts_with(TEMP_FILE_PREFIX) {
                    return None;
                }
                segments.push(name);
            }
            _ => return None,
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_leading_slash() {
        assert_eq!(normalize_key("/images/cat.png").unwrap(), "images/cat.png");
        assert_eq!(normalize_key("images/cat.png").unwrap(), "images/cat.png");
    }

    #[test]
    fn test_normalize_collapses_segments() {
        assert_eq!(normalize_key("//a///b/./c").unwrap(), "a/b/c");
        assert_eq!(normalize_key("/a/b/../c").unwrap(), "a/c");
    }

    #[test]
    fn test_normalize_never_escapes_root() {
        assert_eq!(normalize_key("/../../etc/passwd").unwrap(), "etc/passwd");
        assert_eq!(normalize_key("a/../../b").unwrap(), "b");
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(normalize_key("/"), Err(EdgeError::InvalidKey(_))));
        assert!(matches!(normalize_key(""), Err(EdgeError::InvalidKey(_))));
        assert!(matches!(normalize_key("/a/.."), Err(EdgeError::InvalidKey(_))));
    }

    #[test]
    fn test_normalize_rejects_reserved() {
        assert!(normalize_key("/a/.tmpXYZ").is_err());
        assert!(normalize_key("/a\\b").is_err());
    }

    #[test]
    fn test_path_round_trip() {
        let root = Path::new("/var/cache");
        let path = key_to_path(root, "a/b/c.bin");
        assert_eq!(path, PathBuf::from("/var/cache/a/b/c.bin"));
        assert_eq!(path_to_key(root, &path).as_deref(), Some("a/b/c.bin"));
    }

    #[test]
    fn test_path_to_key_skips_foreign_and_temp() {
        let root = Path::new("/var/cache");
        assert_eq!(path_to_key(root, Path::new("/etc/passwd")), None);
        assert_eq!(path_to_key(root, Path::new("/var/cache/a/.tmp1234")), None);
        assert_eq!(path_to_key(root, Path::new("/var/cache")), None);
    }
}
