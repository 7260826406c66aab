//! Test utilities for Sessionkeeper
//!
//! Shared fixtures for unit tests: managers over in-memory storage with the
//! background sweep disabled, temporary config files, and error assertions.

use crate::config::ManagerOptions;
use crate::manager::SessionManager;
use crate::storage::MemoryStorage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Manager options with the given TTL and no background sweep
pub fn quiet_options(ttl: Duration) -> ManagerOptions {
    ManagerOptions {
        default_ttl: ttl,
        cleanup_interval: Duration::ZERO,
        cleanup_timeout: Duration::from_secs(1),
        max_content_chars: 1_000,
    }
}

/// Manager over a fresh in-memory store of the given capacity
///
/// The storage handle is returned as well so tests can inspect what was
/// actually persisted.
pub fn memory_manager(capacity: usize, ttl: Duration) -> (SessionManager, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new(capacity));
    let manager = SessionManager::with_storage(storage.clone(), quiet_options(ttl));
    (manager, storage)
}

/// Write `contents` to `config.yaml` inside a fresh temporary directory
///
/// # Panics
///
/// Panics if the directory or file cannot be created
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temporary directory");
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, contents).expect("Failed to write config file");
    (dir, path)
}

/// Assert that an error's full context chain contains `expected`
///
/// # Panics
///
/// Panics if the message is not found
pub fn assert_error_contains(error: &anyhow::Error, expected: &str) {
    let message = format!("{:#}", error);
    assert!(
        message.contains(expected),
        "Error message '{}' does not contain '{}'",
        message,
        expected
    );
}
