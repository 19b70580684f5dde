//! Per-job scratch directories.
//!
//! A [`ScratchDir`] is created fresh for every job under the configured
//! scratch root. Creation uses `create_dir` (not `create_dir_all`) for the
//! leaf so two jobs can never end up sharing a directory: a name collision
//! surfaces as `AlreadyExists` and the caller picks a new name.

use crate::error::{ConvertError, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates `root/name`, which must not exist yet.
    ///
    /// Returns `Ok(None)` on a name collision.
    pub async fn create(root: &Path, name: &str) -> Result<Option<Self>> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| ConvertError::workspace("create_root", root, e))?;

        let path = root.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "created scratch directory");
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(ConvertError::workspace("create", path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a file inside this directory. `file_name` must be a bare
    /// name produced by the service, never a client-supplied path.
    pub fn file(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// Recursively removes the directory. Already gone counts as success.
    pub fn destroy(&self) -> io::Result<()> {
        destroy_scratch_dir(&self.path)
    }
}

/// Removes `path` and everything below it, tolerating `NotFound`.
pub fn destroy_scratch_dir(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Best-effort unlink. Returns whether anything was actually deleted.
pub(crate) fn remove_file_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to remove temporary file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_empty_unique_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = ScratchDir::create(root.path(), "merge-1").await.unwrap().unwrap();

        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let again = ScratchDir::create(root.path(), "merge-1").await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn creates_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let dir = ScratchDir::create(&nested, "job").await.unwrap().unwrap();
        assert!(dir.path().starts_with(&nested));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = ScratchDir::create(root.path(), "job").await.unwrap().unwrap();
        std::fs::write(dir.file("input-0.pdf"), b"%PDF-1.7").unwrap();

        dir.destroy().unwrap();
        assert!(!dir.path().exists());
        dir.destroy().unwrap();
    }

    #[test]
    fn remove_file_quietly_reports_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        assert!(remove_file_quietly(&file));
        assert!(!remove_file_quietly(&file));
    }
}
