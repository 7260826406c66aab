//! In-process session storage with LRU eviction
//!
//! The engine keeps three structures:
//!
//! - the primary map from session ID to [`Session`]
//! - a secondary index from user ID to the IDs that user owns
//! - an access clock recording the logical time each ID was last touched
//!
//! The primary map and user index live behind one `RwLock`; the access
//! clock has its own `Mutex` so reads can bump it without taking the write
//! lock. Locks are always taken in that order (state, then clock).
//!
//! `expires_at` is advisory here: `get` never filters on it, and only
//! [`SessionStorage::cleanup`] removes sessions whose deadline has passed.

use super::SessionStorage;
use crate::error::{Result, SessionError};
use crate::session::{deadline_after, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Point-in-time counters for a [`MemoryStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStats {
    /// Sessions currently stored
    pub sessions: usize,
    /// Users with at least one stored session
    pub users: usize,
    /// Maximum number of sessions
    pub capacity: usize,
    /// Sessions evicted to make room since construction
    pub evictions: u64,
    /// Sessions removed by cleanup since construction
    pub expired_removed: u64,
}

#[derive(Debug, Default)]
struct StorageState {
    sessions: HashMap<String, Session>,
    user_index: HashMap<String, HashSet<String>>,
}

impl StorageState {
    fn index(&mut self, user_id: &str, id: &str) {
        self.user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(id.to_string());
    }

    fn unindex(&mut self, user_id: &str, id: &str) {
        if let Some(ids) = self.user_index.get_mut(user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.user_index.remove(user_id);
            }
        }
    }

    fn remove(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.unindex(&session.user_id, id);
        Some(session)
    }
}

/// Logical LRU clock: every touch gets a strictly larger tick
#[derive(Debug, Default)]
struct AccessClock {
    tick: u64,
    last_access: HashMap<String, u64>,
}

impl AccessClock {
    fn touch(&mut self, id: &str) {
        self.tick += 1;
        self.last_access.insert(id.to_string(), self.tick);
    }

    fn forget(&mut self, id: &str) {
        self.last_access.remove(id);
    }

    fn least_recent(&self) -> Option<String> {
        self.last_access
            .iter()
            .min_by_key(|(_, tick)| **tick)
            .map(|(id, _)| id.clone())
    }
}

/// Capacity-bounded in-memory session store
///
/// Inserting a new ID while the store is full evicts exactly one session:
/// the least recently accessed one. `get`, `update_expiry`, and `set` on an
/// existing key count as accesses; `list` and `exists` do not.
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
/// let storage = MemoryStorage::new(2);
/// let mut ids = Vec::new();
/// for _ in 0..3 {
///     let session = Session::new("u1", Duration::from_secs(60));
///     ids.push(session.id.clone());
///     storage.set(session, Duration::ZERO).await?;
/// }
///
/// assert!(!storage.exists(&ids[0]).await?);
/// assert!(storage.exists(&ids[2]).await?);
/// assert_eq!(storage.stats()?.evictions, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStorage {
    state: RwLock<StorageState>,
    clock: Mutex<AccessClock>,
    capacity: usize,
    evictions: AtomicU64,
    expired_removed: AtomicU64,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create an engine holding at most `capacity` sessions
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(StorageState::default()),
            clock: Mutex::new(AccessClock::default()),
            capacity: capacity.max(1),
            evictions: AtomicU64::new(0),
            expired_removed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Maximum number of sessions held before eviction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored sessions
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_state()?.sessions.len())
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the engine's counters
    pub fn stats(&self) -> Result<StorageStats> {
        let state = self.read_state()?;
        Ok(StorageStats {
            sessions: state.sessions.len(),
            users: state.user_index.len(),
            capacity: self.capacity,
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_removed: self.expired_removed.load(Ordering::Relaxed),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Storage("storage is closed".to_string()).into());
        }
        Ok(())
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StorageState>> {
        self.state
            .read()
            .map_err(|_| SessionError::Storage("session map lock poisoned".to_string()).into())
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StorageState>> {
        self.state
            .write()
            .map_err(|_| SessionError::Storage("session map lock poisoned".to_string()).into())
    }

    fn lock_clock(&self) -> Result<MutexGuard<'_, AccessClock>> {
        self.clock
            .lock()
            .map_err(|_| SessionError::Storage("access clock lock poisoned".to_string()).into())
    }

    /// Evict the least recently accessed session. Caller holds both locks.
    fn evict_one(&self, state: &mut StorageState, clock: &mut AccessClock) {
        let victim = clock
            .least_recent()
            .or_else(|| state.sessions.keys().next().cloned());

        if let Some(id) = victim {
            clock.forget(&id);
            if let Some(session) = state.remove(&id) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    session_id = %id,
                    user_id = %session.user_id,
                    "Evicted least recently used session"
                );
            }
        }
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn get(&self, id: &str) -> Result<Session> {
        self.ensure_open()?;
        let state = self.read_state()?;
        let session = state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        // Still under the read lock so a concurrent delete cannot leave a
        // stale clock entry behind.
        self.lock_clock()?.touch(id);
        Ok(session)
    }

    async fn set(&self, mut session: Session, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        if !ttl.is_zero() {
            session.expires_at = deadline_after(Utc::now(), ttl);
        }

        let mut state = self.write_state()?;
        let mut clock = self.lock_clock()?;
        let id = session.id.clone();

        match state.sessions.get(&id).map(|s| s.user_id.clone()) {
            Some(previous_owner) => {
                if previous_owner != session.user_id {
                    state.unindex(&previous_owner, &id);
                }
            }
            None => {
                if state.sessions.len() >= self.capacity {
                    self.evict_one(&mut state, &mut clock);
                }
            }
        }

        state.index(&session.user_id, &id);
        state.sessions.insert(id.clone(), session);
        clock.touch(&id);

        tracing::trace!(session_id = %id, "Stored session");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.write_state()?;
        let mut clock = self.lock_clock()?;

        state
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        clock.forget(id);
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Session>> {
        self.ensure_open()?;
        let state = self.read_state()?;

        let sessions = state
            .user_index
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(sessions)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.read_state()?.sessions.contains_key(id))
    }

    async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.write_state()?;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.expires_at = expires_at;

        self.lock_clock()?.touch(id);
        Ok(())
    }

    async fn cleanup(&self) -> Result<usize> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut state = self.write_state()?;
        let mut clock = self.lock_clock()?;

        let expired: Vec<String> = state
            .sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            state.remove(id);
            clock.forget(id);
        }

        if !expired.is_empty() {
            self.expired_removed
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            tracing::debug!(removed = expired.len(), "Removed expired sessions");
        }
        Ok(expired.len())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut state = self.write_state()?;
        let mut clock = self.lock_clock()?;
        state.sessions.clear();
        state.user_index.clear();
        clock.last_access.clear();
        Ok(())
    }
}
