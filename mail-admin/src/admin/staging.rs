//! Staged key files
//!
//! Key files written while preparing a change are tracked here. Unless the
//! change is committed, they are removed again when the guard goes out of
//! scope, on every return path.

use crate::config::store::KeyFileStore;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub struct StagedKeyFiles<'a> {
    store: &'a dyn KeyFileStore,
    paths: Vec<PathBuf>,
    committed: bool,
}

impl<'a> StagedKeyFiles<'a> {
    pub fn new(store: &'a dyn KeyFileStore) -> Self {
        StagedKeyFiles {
            store,
            paths: Vec::new(),
            committed: false,
        }
    }

    /// Create a new key file. The path must not exist yet.
    pub fn write(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        self.store.create_exclusive(path, data)?;
        debug!("Staged key file {}", path.display());
        self.paths.push(path.to_path_buf());
        Ok(())
    }

    /// Keep the staged files, they are referenced by the persisted config.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedKeyFiles<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            match self.store.remove(path) {
                Ok(()) => debug!("Removed staged key file {}", path.display()),
                Err(e) => error!("Failed to remove staged key file {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::FsKeyFileStore;
    use tempfile::TempDir;

    #[test]
    fn test_uncommitted_files_removed() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsKeyFileStore::new(temp_dir.path());

        {
            let mut staged = StagedKeyFiles::new(&store);
            staged.write(Path::new("dkim/a.pem"), b"a").unwrap();
            staged.write(Path::new("dkim/b.pem"), b"b").unwrap();
            assert!(store.exists(Path::new("dkim/a.pem")));
            assert!(store.exists(Path::new("dkim/b.pem")));
        }

        assert!(!store.exists(Path::new("dkim/a.pem")));
        assert!(!store.exists(Path::new("dkim/b.pem")));
    }

    #[test]
    fn test_committed_files_kept() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsKeyFileStore::new(temp_dir.path());

        let mut staged = StagedKeyFiles::new(&store);
        staged.write(Path::new("dkim/a.pem"), b"a").unwrap();
        staged.commit();

        assert!(store.exists(Path::new("dkim/a.pem")));
    }

    #[test]
    fn test_existing_file_not_tracked() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsKeyFileStore::new(temp_dir.path());
        store.create_exclusive(Path::new("dkim/a.pem"), b"old").unwrap();

        {
            let mut staged = StagedKeyFiles::new(&store);
            assert!(staged.write(Path::new("dkim/a.pem"), b"new").is_err());
        }

        assert_eq!(store.read(Path::new("dkim/a.pem")).unwrap(), b"old");
    }
}
