//! Sessionkeeper - conversation session store library
//!
//! Tracks per-user conversation sessions: their message history, token
//! estimates, derived titles, and sliding expiry. Sessions live in a
//! pluggable storage engine and are swept by a background task.
//!
//! # Architecture
//!
//! - `session`: the `Session` and `Message` entities plus text utilities
//! - `storage`: the `SessionStorage` trait, the in-memory LRU engine, and
//!   the optional Redis engine
//! - `manager`: lifecycle operations and the background cleanup task
//! - `config`: configuration loading and validation
//! - `error`: error types and result aliases
//! - `logging`: tracing subscriber setup
//! - `cli` / `commands`: the command-line front end
//!
//! # Example
//!
//! ```no_run
//! use sessionkeeper::{Config, Role, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml")?;
//!     let manager = SessionManager::new(&config).await?;
//!
//!     let session = manager.create_session("alice").await?;
//!     manager
//!         .add_message(&session.id, Role::User, "Hello!", None)
//!         .await?;
//!
//!     manager.close().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, ManagerOptions};
pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use session::{Message, Role, Session, SessionStatus, SessionSummary};
pub use storage::{create_storage, MemoryStorage, SessionStorage};

#[cfg(test)]
pub mod test_utils;
