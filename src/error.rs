//! Error types for Sessionkeeper
//!
//! This module defines the error taxonomy used by the storage engines and
//! the session manager, using `thiserror` for ergonomic error handling.
//!
//! Operations return [`Result`], an `anyhow` alias. Storage failures are
//! wrapped with operation context on the way up, so callers that need to
//! branch on the failure kind should use [`session_error`] (or
//! `anyhow::Error::downcast_ref`) to recover the underlying
//! [`SessionError`].

use crate::session::SessionStatus;
use thiserror::Error;

/// Main error type for Sessionkeeper operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Unknown session ID on get, delete, or expiry update
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Mutation attempted against a closed or expired session
    #[error("Session {id} is not active (status: {status})")]
    InactiveSession {
        /// Session that rejected the mutation
        id: String,
        /// Status observed when the mutation was attempted
        status: SessionStatus,
    },

    /// Unrecognized storage backend selector
    #[error("Unsupported storage backend: {0}")]
    UnsupportedBackend(String),

    /// Networked backend could not be reached at construction
    #[error("Storage backend initialization failed: {0}")]
    BackendInit(String),

    /// Invalid caller input (user ID, message content, title)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage engine failures (closed engine, poisoned lock, backend I/O)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SessionError {
    /// Returns true for [`SessionError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound(_))
    }

    /// Returns true for [`SessionError::InactiveSession`]
    pub fn is_inactive(&self) -> bool {
        matches!(self, SessionError::InactiveSession { .. })
    }
}

/// Result type alias for Sessionkeeper operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Recover the [`SessionError`] behind an `anyhow` error, looking through
/// any context layers added while the error propagated.
///
/// # Examples
///
/// ```
/// use anyhow::Context;
/// use sessionkeeper::error::{session_error, SessionError};
///
/// let err = Err::<(), _>(SessionError::NotFound("sess_1".into()))
///     .context("failed to load session")
///     .unwrap_err();
/// assert!(session_error(&err).is_some_and(|e| e.is_not_found()));
/// ```
pub fn session_error(err: &anyhow::Error) -> Option<&SessionError> {
    err.downcast_ref::<SessionError>()
}
