//! Resolution of user-supplied paths into upload targets.
//!
//! A regular file uploads under its base name. A directory is walked
//! recursively and each file uploads as `<dir name>/<relative path>`,
//! always with `/` separators.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ClientError;

/// Lists the regular files below a directory.
pub trait FileLister: Send + Sync {
    fn list_files(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Walks directories with `std::fs::read_dir`. Symlinks to regular files
/// are listed; symlinked directories and special files are skipped.
/// Results are sorted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecursiveLister;

impl FileLister for RecursiveLister {
    fn list_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        walk_dir(root, &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn walk_dir(current: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        } else if file_type.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(target) if target.is_file() => files.push(path),
                Ok(_) => debug!(path = %path.display(), "skipping symlink to non-file"),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping dangling symlink"),
            }
        } else {
            debug!(path = %path.display(), "skipping special file");
        }
    }
    Ok(())
}

fn utf8_name<'a>(name: &'a OsStr, path: &Path) -> Result<&'a str, ClientError> {
    name.to_str()
        .ok_or_else(|| ClientError::InvalidFileName(path.to_path_buf()))
}

/// One file to upload and the name it is sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub path: PathBuf,
    pub file_name: String,
}

/// Expands a leading `~/` to `$HOME`.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return Path::new(&home).join(rest);
    }
    PathBuf::from(path)
}

/// Turns `path` into one target per regular file it denotes.
///
/// Names that are not valid UTF-8 are rejected rather than rewritten, so
/// two distinct files never share a wire name.
pub fn resolve_targets(path: &Path, lister: &dyn FileLister) -> Result<Vec<UploadTarget>, ClientError> {
    let path = std::path::absolute(path)?;
    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ClientError::NotFound(path)),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        let prefix = match path.file_name() {
            Some(name) => utf8_name(name, &path)?.to_string(),
            None => String::new(),
        };
        let files = lister.list_files(&path)?;
        let mut targets = Vec::with_capacity(files.len());
        for file in files {
            let rel = file.strip_prefix(&path).map_err(io::Error::other)?;
            let rel = utf8_name(rel.as_os_str(), &file)?.replace('\\', "/");
            let file_name = if prefix.is_empty() {
                rel
            } else {
                format!("{prefix}/{rel}")
            };
            targets.push(UploadTarget { path: file, file_name });
        }
        Ok(targets)
    } else {
        let name = path
            .file_name()
            .ok_or_else(|| ClientError::NotFound(path.clone()))?;
        let file_name = utf8_name(name, &path)?.to_string();
        Ok(vec![UploadTarget { path, file_name }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("photos");
        fs::create_dir_all(root.join("2024").join("summer")).unwrap();
        fs::write(root.join("index.txt"), b"IDX").unwrap();
        fs::write(root.join("2024").join("a.jpg"), b"AAAA").unwrap();
        fs::write(root.join("2024").join("summer").join("b.jpg"), b"BB").unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        dir
    }

    #[test]
    fn lists_all_files_recursively() {
        let dir = create_test_tree();
        let files = RecursiveLister.list_files(&dir.path().join("photos")).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn directory_targets_are_prefixed_with_dir_name() {
        let dir = create_test_tree();
        let targets = resolve_targets(&dir.path().join("photos"), &RecursiveLister).unwrap();
        let mut names: Vec<_> = targets.iter().map(|t| t.file_name.as_str()).collect();
        names.sort();
        assert_eq!(
            names,
            ["photos/2024/a.jpg", "photos/2024/summer/b.jpg", "photos/index.txt"]
        );
        assert!(targets.iter().all(|t| t.path.is_absolute()));
    }

    #[test]
    fn single_file_uses_base_name() {
        let dir = create_test_tree();
        let path = dir.path().join("photos").join("2024").join("a.jpg");
        let targets = resolve_targets(&path, &RecursiveLister).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].file_name, "a.jpg");
        assert_eq!(targets[0].path, path);
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = resolve_targets(&dir.path().join("nope"), &RecursiveLister);
        assert!(matches!(result, Err(ClientError::NotFound(_))));
    }

    #[test]
    fn empty_directory_has_no_targets() {
        let dir = create_test_tree();
        let targets = resolve_targets(&dir.path().join("photos").join("empty"), &RecursiveLister).unwrap();
        assert!(targets.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_listed_and_dir_links_skipped() {
        let dir = create_test_tree();
        let root = dir.path().join("photos");
        std::os::unix::fs::symlink(root.join("index.txt"), root.join("alias.txt")).unwrap();
        std::os::unix::fs::symlink(root.join("2024"), root.join("loop")).unwrap();
        std::os::unix::fs::symlink(root.join("gone"), root.join("dangling")).unwrap();

        let targets = resolve_targets(&root, &RecursiveLister).unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.file_name.as_str()).collect();
        assert!(names.contains(&"photos/alias.txt"), "{names:?}");
        assert_eq!(names.len(), 4, "{names:?}");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_rejected() {
        use std::os::unix::ffi::OsStrExt;

        let dir = create_test_tree();
        let root = dir.path().join("photos");
        let odd = root.join(OsStr::from_bytes(b"caf\xe9.jpg"));
        if fs::write(&odd, b"X").is_err() {
            // Filesystem refuses non-UTF-8 names.
            return;
        }

        let result = resolve_targets(&root, &RecursiveLister);
        assert!(matches!(result, Err(ClientError::InvalidFileName(p)) if p == odd));
        let result = resolve_targets(&odd, &RecursiveLister);
        assert!(matches!(result, Err(ClientError::InvalidFileName(_))));
    }

    #[test]
    fn expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        if !home.is_empty() {
            assert_eq!(expand_path("~/big.iso"), Path::new(&home).join("big.iso"));
        }
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_path("rel~/x"), PathBuf::from("rel~/x"));
    }
}
