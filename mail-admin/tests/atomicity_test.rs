use mail_admin::admin::ConfigManager;
use mail_admin::config::{
    Destination, DocumentStore, DynamicConfig, FsKeyFileStore, StaticConfig,
};
use mail_admin::{AdminError, Result};
use mockall::mock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

mock! {
    pub Documents {}

    impl DocumentStore for Documents {
        fn read(&self) -> Result<Option<DynamicConfig>>;
        fn write(&self, config: &DynamicConfig) -> Result<()>;
    }
}

/// Helper to count files below a directory
fn count_files(dir: &Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}

/// Helper to create a manager whose document writes fail once `fail` is set
fn manager_with_switch(dir: &Path, fail: Arc<AtomicBool>) -> ConfigManager {
    let mut documents = MockDocuments::new();
    documents.expect_write().returning(move |_| {
        if fail.load(Ordering::SeqCst) {
            Err(AdminError::Persist("injected failure".to_string()))
        } else {
            Ok(())
        }
    });

    ConfigManager::new(
        StaticConfig::new("mail.example.org").unwrap(),
        DynamicConfig::default(),
        Box::new(documents),
        Box::new(FsKeyFileStore::new(dir)),
    )
    .unwrap()
}

/// A failed write leaves the published config and key files as they were
#[test]
fn test_persist_failure_is_atomic() {
    let temp_dir = TempDir::new().unwrap();
    let fail = Arc::new(AtomicBool::new(false));
    let manager = manager_with_switch(temp_dir.path(), fail.clone());

    manager
        .domain_add("example.org", "alice", Some("alice"))
        .unwrap();
    let files_before = count_files(temp_dir.path());
    assert_eq!(files_before, 4);

    fail.store(true, Ordering::SeqCst);
    let before = manager.snapshot();

    let results = vec![
        manager.domain_add("example.com", "alice", None),
        manager.domain_remove("example.org"),
        manager.account_add("bob", "bob@example.org"),
        manager.account_remove("bob"),
        manager.address_add("carol@example.org", "alice"),
        manager.address_add("@example.org", "alice"),
        manager.address_remove("alice@example.org"),
        manager.account_full_name_save("alice", "Alice"),
        manager.destination_save("alice", "alice@example.org", Destination::default()),
        manager.account_limits_save("alice", 10, 10, 0),
    ];
    for result in results {
        assert!(result.is_err());
    }

    let after = manager.snapshot();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(count_files(temp_dir.path()), files_before);
    assert!(!temp_dir.path().join("dkim").join("old").exists());
}

/// Persist errors are reported as such
#[test]
fn test_persist_error_kind() {
    let temp_dir = TempDir::new().unwrap();
    let fail = Arc::new(AtomicBool::new(true));
    let manager = manager_with_switch(temp_dir.path(), fail);

    let err = manager
        .domain_add("example.org", "alice", Some("alice"))
        .unwrap_err();
    assert!(matches!(err, AdminError::Persist(_)));
    assert_eq!(count_files(temp_dir.path()), 0);
    assert!(manager.snapshot().domain("example.org").is_none());
}

/// The document passed to the store is the one that gets published
#[test]
fn test_written_document_matches_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let written = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = written.clone();

    let mut documents = MockDocuments::new();
    documents
        .expect_write()
        .times(2)
        .returning(move |config| {
            sink.lock()
                .unwrap()
                .push(config.accounts.keys().cloned().collect::<Vec<_>>());
            Ok(())
        });

    let manager = ConfigManager::new(
        StaticConfig::new("mail.example.org").unwrap(),
        DynamicConfig::default(),
        Box::new(documents),
        Box::new(FsKeyFileStore::new(temp_dir.path())),
    )
    .unwrap();

    manager
        .domain_add("example.org", "alice", Some("alice"))
        .unwrap();
    manager.account_add("bob", "bob@example.org").unwrap();

    let written = written.lock().unwrap();
    assert_eq!(written[0], vec!["alice".to_string()]);
    assert_eq!(written[1], vec!["alice".to_string(), "bob".to_string()]);
}
