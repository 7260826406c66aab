use sessionkeeper::{ManagerOptions, MemoryStorage, SessionManager};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_memory_manager(
    capacity: usize,
    ttl: Duration,
) -> (SessionManager, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new(capacity));
    let options = ManagerOptions {
        default_ttl: ttl,
        cleanup_interval: Duration::ZERO,
        ..ManagerOptions::default()
    };
    let manager = SessionManager::with_storage(storage.clone(), options);
    (manager, storage)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
