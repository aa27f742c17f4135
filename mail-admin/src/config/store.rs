//! Persistence collaborators: the dynamic configuration document and the
//! DKIM key file namespace.

use crate::config::types::DynamicConfig;
use crate::error::{AdminError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Storage for the dynamic configuration document.
///
/// `write` must either replace the document completely or leave the stored
/// document unchanged.
#[cfg_attr(test, mockall::automock)]
pub trait DocumentStore: Send + Sync {
    /// Read the document, `None` if it does not exist yet.
    fn read(&self) -> Result<Option<DynamicConfig>>;

    fn write(&self, config: &DynamicConfig) -> Result<()>;
}

/// Hierarchical file namespace holding DKIM private keys.
///
/// Paths are relative to the configuration directory.
pub trait KeyFileStore: Send + Sync {
    /// Create a new file, failing if the path already exists.
    fn create_exclusive(&self, path: &Path, data: &[u8]) -> Result<()>;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// Dynamic configuration as a TOML file, replaced through rename.
pub struct TomlDocumentStore {
    path: PathBuf,
}

impl TomlDocumentStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        TomlDocumentStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DocumentStore for TomlDocumentStore {
    fn read(&self) -> Result<Option<DynamicConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let config = toml::from_str(&content)
            .map_err(|e| AdminError::Config(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(config))
    }

    fn write(&self, config: &DynamicConfig) -> Result<()> {
        let content =
            toml::to_string_pretty(config).map_err(|e| AdminError::Persist(e.to_string()))?;

        let temp_path = self.temp_path();
        let persist = || -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        };
        if let Err(e) = persist() {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    error!(
                        "Failed to remove temporary config file {}: {}",
                        temp_path.display(),
                        cleanup
                    );
                }
            }
            return Err(AdminError::Persist(format!("{}: {}", self.path.display(), e)));
        }

        debug!("Wrote dynamic config to {}", self.path.display());
        Ok(())
    }
}

/// Key files on the local file system, rooted at the configuration directory.
pub struct FsKeyFileStore {
    root: PathBuf,
}

impl FsKeyFileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FsKeyFileStore { root: root.into() }
    }

    /// Absolute location of a relative key path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn key_file_error(&self, path: &Path, e: std::io::Error) -> AdminError {
        AdminError::KeyFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}

impl KeyFileStore for FsKeyFileStore {
    fn create_exclusive(&self, path: &Path, data: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir).map_err(|e| self.key_file_error(path, e))?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o660);
        }
        let mut file = options
            .open(&full)
            .map_err(|e| self.key_file_error(path, e))?;

        if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&full) {
                error!(
                    "Failed to remove partially written key file {}: {}",
                    full.display(),
                    cleanup
                );
            }
            return Err(self.key_file_error(path, e));
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)).map_err(|e| self.key_file_error(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let to_full = self.resolve(to);
        if let Some(dir) = to_full.parent() {
            fs::create_dir_all(dir).map_err(|e| self.key_file_error(to, e))?;
        }
        fs::rename(self.resolve(from), to_full).map_err(|e| self.key_file_error(from, e))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.resolve(path)).map_err(|e| self.key_file_error(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Account;
    use tempfile::TempDir;

    #[test]
    fn test_document_store_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = TomlDocumentStore::new(temp_dir.path().join("domains.toml"));
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_document_store_write_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = TomlDocumentStore::new(temp_dir.path().join("domains.toml"));

        let mut config = DynamicConfig::default();
        config.accounts.insert(
            "alice".to_string(),
            Account {
                domain: "example.org".to_string(),
                full_name: "Alice".to_string(),
                ..Default::default()
            },
        );
        store.write(&config).unwrap();

        let loaded = store.read().unwrap().unwrap();
        assert_eq!(loaded.accounts, config.accounts);
        assert!(!temp_dir.path().join("domains.toml.tmp").exists());
    }

    #[test]
    fn test_document_store_failed_write_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("domains.toml");
        // A non-empty directory in place of the document cannot be replaced.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        let store = TomlDocumentStore::new(&path);
        let err = store.write(&DynamicConfig::default()).unwrap_err();
        assert!(matches!(err, AdminError::Persist(_)));
        assert!(!temp_dir.path().join("domains.toml.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn test_create_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsKeyFileStore::new(temp_dir.path());
        let path = Path::new("dkim/key.pem");

        store.create_exclusive(path, b"first").unwrap();
        assert!(store.exists(path));
        assert_eq!(store.read(path).unwrap(), b"first");

        let err = store.create_exclusive(path, b"second").unwrap_err();
        assert!(matches!(err, AdminError::KeyFile { .. }));
        assert_eq!(store.read(path).unwrap(), b"first");
    }

    #[test]
    fn test_rename_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsKeyFileStore::new(temp_dir.path());
        let from = Path::new("dkim/key.pem");
        let to = Path::new("dkim/old/key.pem");

        store.create_exclusive(from, b"key").unwrap();
        store.rename(from, to).unwrap();
        assert!(!store.exists(from));
        assert!(store.exists(to));

        store.remove(to).unwrap();
        assert!(!store.exists(to));
    }
}
