//! Session storage engines
//!
//! [`SessionStorage`] is the capability contract every backend satisfies
//! with identical observable semantics. Two engines ship with the crate:
//!
//! - [`MemoryStorage`]: capacity-bounded, read-aware LRU map with a per-user
//!   index. Contents are lost when the process exits.
//! - `RedisStorage` (feature `redis-backend`): networked engine for
//!   deployments that share sessions across processes.
//!
//! Engines never hand out references into their own state: `get` and
//! `list` return clones and `set` takes ownership of the value it stores.

use crate::config::StorageConfig;
use crate::error::{Result, SessionError};
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod remote;

pub use memory::{MemoryStorage, StorageStats};
#[cfg(feature = "redis-backend")]
pub use remote::RedisStorage;

/// Storage capability shared by all session backends
///
/// # Examples
///
/// ```
/// use sessionkeeper::session::Session;
/// use sessionkeeper::storage::{MemoryStorage, SessionStorage};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let storage = MemoryStorage::new(10);
/// let session = Session::new("u1", Duration::from_secs(60));
/// let id = session.id.clone();
///
/// storage.set(session, Duration::ZERO).await?;
/// assert!(storage.exists(&id).await?);
/// assert_eq!(storage.list("u1").await?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Fetch a copy of a session
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the ID is unknown.
    async fn get(&self, id: &str) -> Result<Session>;

    /// Insert or replace a session
    ///
    /// A non-zero `ttl` overwrites `expires_at` with `now + ttl`.
    async fn set(&self, session: Session, ttl: Duration) -> Result<()>;

    /// Remove a session
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the ID is unknown.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All sessions owned by `user_id`, in no particular order
    ///
    /// Unknown users yield an empty list.
    async fn list(&self, user_id: &str) -> Result<Vec<Session>>;

    /// Whether a session is stored under `id`
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Overwrite a session's expiry deadline
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the ID is unknown.
    async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Remove every session whose deadline has passed, returning how many
    /// were removed. Idempotent.
    async fn cleanup(&self) -> Result<usize>;

    /// Release all resources. Later calls fail with `SessionError::Storage`.
    async fn close(&self) -> Result<()>;
}

/// Storage backend kinds recognised at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process, capacity-bounded engine
    Memory,
    /// Networked engine backed by Redis
    Redis,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = SessionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" => Ok(BackendKind::Memory),
            "redis" | "networked" | "remote" => Ok(BackendKind::Redis),
            other => Err(SessionError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Create a storage engine from configuration
///
/// # Errors
///
/// Returns `SessionError::UnsupportedBackend` for unknown selectors (or the
/// networked backend when the `redis-backend` feature is disabled), and
/// `SessionError::BackendInit` when a networked backend cannot be reached.
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn SessionStorage>> {
    let kind: BackendKind = config.backend.parse()?;

    match kind {
        BackendKind::Memory => {
            tracing::info!(
                capacity = config.max_sessions,
                "Using in-memory session storage"
            );
            Ok(Arc::new(MemoryStorage::new(config.max_sessions)))
        }
        BackendKind::Redis => create_redis_storage(config).await,
    }
}

#[cfg(feature = "redis-backend")]
async fn create_redis_storage(config: &StorageConfig) -> Result<Arc<dyn SessionStorage>> {
    tracing::info!(url = %config.redis.url, "Using Redis session storage");
    Ok(Arc::new(RedisStorage::connect(&config.redis).await?))
}

#[cfg(not(feature = "redis-backend"))]
async fn create_redis_storage(_config: &StorageConfig) -> Result<Arc<dyn SessionStorage>> {
    Err(SessionError::UnsupportedBackend(
        "redis (rebuild with --features redis-backend)".to_string(),
    )
    .into())
}
