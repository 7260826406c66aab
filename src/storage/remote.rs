//! Redis-backed session storage
//!
//! Layout under the configured key prefix:
//!
//! - `{prefix}session:{id}`: JSON-encoded [`Session`]
//! - `{prefix}user:{user_id}`: set of session IDs owned by the user
//! - `{prefix}expiry`: sorted set of session IDs scored by `expires_at`
//!   in epoch milliseconds, scanned by `cleanup`
//!
//! Keys carry no Redis TTL: as with the in-memory engine, `expires_at` is
//! advisory and only `cleanup` removes expired sessions. There is no
//! capacity bound.

use super::SessionStorage;
use crate::config::RedisConfig;
use crate::error::{Result, SessionError};
use crate::session::{deadline_after, Session};
use ::redis::aio::ConnectionManager;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Networked session store
pub struct RedisStorage {
    conn: ConnectionManager,
    prefix: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn backend_error(err: ::redis::RedisError) -> SessionError {
    SessionError::Storage(format!("redis: {}", err))
}

impl RedisStorage {
    /// Connect to Redis and verify the server answers `PING`
    ///
    /// # Errors
    ///
    /// Returns `SessionError::BackendInit` if the URL is invalid, the
    /// connection cannot be established within the configured timeout, or
    /// the server does not answer.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = ::redis::Client::open(config.url.as_str())
            .map_err(|e| SessionError::BackendInit(format!("invalid redis url: {}", e)))?;

        let timeout = Duration::from_secs(config.connect_timeout_seconds);
        let mut conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                SessionError::BackendInit(format!(
                    "timed out after {:?} connecting to {}",
                    timeout, config.url
                ))
            })?
            .map_err(|e| SessionError::BackendInit(e.to_string()))?;

        let pong: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::BackendInit(e.to_string()))?;
        if pong != "PONG" {
            return Err(SessionError::BackendInit(format!("unexpected PING reply: {}", pong)).into());
        }

        tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn session_key(&self, id: &str) -> String {
        format!("{}session:{}", self.prefix, id)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}user:{}", self.prefix, user_id)
    }

    fn expiry_key(&self) -> String {
        format!("{}expiry", self.prefix)
    }

    fn ensure_open(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Storage("storage is closed".to_string()).into());
        }
        Ok(self.conn.clone())
    }

    async fn load(&self, conn: &mut ConnectionManager, id: &str) -> Result<Option<Session>> {
        let raw: Option<String> = ::redis::cmd("GET")
            .arg(self.session_key(id))
            .query_async(conn)
            .await
            .map_err(backend_error)?;

        raw.map(|json| {
            serde_json::from_str::<Session>(&json)
                .map_err(SessionError::from)
                .with_context(|| format!("failed to decode session {}", id))
        })
        .transpose()
    }

    async fn store(&self, conn: &mut ConnectionManager, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session).map_err(SessionError::from)?;

        ::redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.session_key(&session.id))
            .arg(json)
            .ignore()
            .cmd("SADD")
            .arg(self.user_key(&session.user_id))
            .arg(&session.id)
            .ignore()
            .cmd("ZADD")
            .arg(self.expiry_key())
            .arg(session.expires_at.timestamp_millis())
            .arg(&session.id)
            .ignore()
            .query_async::<()>(conn)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn remove(&self, conn: &mut ConnectionManager, session: &Session) -> Result<()> {
        ::redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(self.session_key(&session.id))
            .ignore()
            .cmd("SREM")
            .arg(self.user_key(&session.user_id))
            .arg(&session.id)
            .ignore()
            .cmd("ZREM")
            .arg(self.expiry_key())
            .arg(&session.id)
            .ignore()
            .query_async::<()>(conn)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for RedisStorage {
    async fn get(&self, id: &str) -> Result<Session> {
        let mut conn = self.ensure_open()?;
        self.load(&mut conn, id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()).into())
    }

    async fn set(&self, mut session: Session, ttl: Duration) -> Result<()> {
        let mut conn = self.ensure_open()?;
        if !ttl.is_zero() {
            session.expires_at = deadline_after(Utc::now(), ttl);
        }

        if let Some(previous) = self.load(&mut conn, &session.id).await? {
            if previous.user_id != session.user_id {
                ::redis::cmd("SREM")
                    .arg(self.user_key(&previous.user_id))
                    .arg(&session.id)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(backend_error)?;
            }
        }

        self.store(&mut conn, &session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.ensure_open()?;
        let session = self
            .load(&mut conn, id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.remove(&mut conn, &session).await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Session>> {
        let mut conn = self.ensure_open()?;
        let ids: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(self.user_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.session_key(id)).collect();
        let values: Vec<Option<String>> = ::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        let mut sessions = Vec::with_capacity(values.len());
        for (id, raw) in ids.iter().zip(values) {
            match raw {
                Some(json) => match serde_json::from_str::<Session>(&json) {
                    Ok(session) => sessions.push(session),
                    Err(e) => {
                        tracing::warn!(session_id = %id, error = %e, "Skipping undecodable session")
                    }
                },
                None => tracing::debug!(session_id = %id, "Index entry without session body"),
            }
        }
        Ok(sessions)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut conn = self.ensure_open()?;
        ::redis::cmd("EXISTS")
            .arg(self.session_key(id))
            .query_async::<bool>(&mut conn)
            .await
            .map_err(|e| backend_error(e).into())
    }

    async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.ensure_open()?;
        let mut session = self
            .load(&mut conn, id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.expires_at = expires_at;
        self.store(&mut conn, &session).await
    }

    async fn cleanup(&self) -> Result<usize> {
        let mut conn = self.ensure_open()?;
        let now = Utc::now();

        let candidates: Vec<String> = ::redis::cmd("ZRANGEBYSCORE")
            .arg(self.expiry_key())
            .arg("-inf")
            .arg(format!("({}", now.timestamp_millis()))
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        let mut removed = 0;
        for id in candidates {
            match self.load(&mut conn, &id).await? {
                // Re-check: the deadline may have been extended since the scan.
                Some(session) if session.is_expired_at(now) => {
                    self.remove(&mut conn, &session).await?;
                    removed += 1;
                }
                Some(_) => {}
                None => {
                    ::redis::cmd("ZREM")
                        .arg(self.expiry_key())
                        .arg(&id)
                        .query_async::<()>(&mut conn)
                        .await
                        .map_err(backend_error)?;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Removed expired sessions from Redis");
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
