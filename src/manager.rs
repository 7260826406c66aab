//! Session lifecycle management
//!
//! [`SessionManager`] layers conversational operations (create, append,
//! extend, close, rename, tag) on top of a [`SessionStorage`] engine and
//! enforces the session state machine:
//!
//! - `Active` sessions accept messages, renames, tags, and extensions.
//! - `Expired` is computed when a session is read: an active session whose
//!   deadline has passed is returned with `Expired` status, without a write.
//! - `Closed` is persisted by [`SessionManager::close_session`].
//!
//! Nothing returns a session to `Active`; callers create a new one.
//!
//! Mutations of a single session are serialized through a fixed set of
//! striped async locks, so concurrent appends to the same session cannot
//! lose updates. Operations on different sessions proceed independently.
//!
//! A background task sweeps expired sessions out of storage on a fixed
//! interval. [`SessionManager::close`] stops it, waits for it, and then
//! closes the storage engine.

use crate::config::{Config, ManagerOptions};
use crate::error::{Result, SessionError};
use crate::session::{
    sanitize_content, truncate_messages, validate_user_id, Message, Role, Session,
    SessionStatus, SessionSummary,
};
use crate::storage::{create_storage, SessionStorage};
use anyhow::Context;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Number of striped locks guarding per-session read-modify-write cycles
const LOCK_STRIPES: usize = 64;

/// Maximum characters in an explicit session title
pub const MAX_RENAME_LENGTH: usize = 200;

/// Coordinates session lifecycle on top of a storage engine
///
/// # Examples
///
/// ```
/// use sessionkeeper::config::ManagerOptions;
/// use sessionkeeper::session::{Role, SessionStatus};
/// use sessionkeeper::storage::MemoryStorage;
/// use sessionkeeper::SessionManager;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let manager = SessionManager::with_storage(
///     Arc::new(MemoryStorage::new(100)),
///     ManagerOptions::default(),
/// );
///
/// let session = manager.create_session("u1").await?;
/// manager
///     .add_message(&session.id, Role::User, "Hello, assistant!", None)
///     .await?;
///
/// let session = manager.get_session(&session.id).await?;
/// assert_eq!(session.title, "Hello, assistant!");
/// assert_eq!(session.status, SessionStatus::Active);
///
/// manager.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    options: ManagerOptions,
    locks: Vec<Mutex<()>>,
    shutdown: CancellationToken,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("options", &self.options)
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build a manager from configuration, constructing the storage engine
    /// the configuration selects
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnsupportedBackend` for an unknown backend,
    /// `SessionError::BackendInit` if a networked backend is unreachable,
    /// and `SessionError::Config` for invalid values. No manager is
    /// returned in any of these cases.
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let storage = create_storage(&config.storage)
            .await
            .context("failed to initialize session storage")?;
        Ok(Self::with_storage(storage, ManagerOptions::from(config)))
    }

    /// Build a manager around an existing storage engine
    ///
    /// When `options.cleanup_interval` is non-zero this spawns the cleanup
    /// task, so it must be called from within a Tokio runtime.
    pub fn with_storage(storage: Arc<dyn SessionStorage>, options: ManagerOptions) -> Self {
        let shutdown = CancellationToken::new();

        let sweeper = if options.cleanup_interval.is_zero() {
            tracing::debug!("Background session cleanup disabled");
            None
        } else {
            Some(spawn_sweeper(
                Arc::clone(&storage),
                options.cleanup_interval,
                options.cleanup_timeout,
                shutdown.clone(),
            ))
        };

        Self {
            storage,
            options,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            shutdown,
            sweeper: std::sync::Mutex::new(sweeper),
        }
    }

    /// Options this manager runs with
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Storage engine backing this manager
    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        Arc::clone(&self.storage)
    }

    fn lock_for(&self, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % self.locks.len()]
    }

    async fn persist(&self, session: Session) -> Result<()> {
        let id = session.id.clone();
        self.storage
            .set(session, Duration::ZERO)
            .await
            .with_context(|| format!("failed to save session {}", id))
    }

    /// Read a session and reject it unless it is active
    async fn load_active(&self, id: &str) -> Result<Session> {
        let session = self.get_session(id).await?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::InactiveSession {
                id: id.to_string(),
                status: session.status,
            }
            .into());
        }
        Ok(session)
    }

    /// Create an active session for `user_id`
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` for a malformed user ID, or the
    /// storage error if the session cannot be written.
    pub async fn create_session(&self, user_id: &str) -> Result<Session> {
        validate_user_id(user_id)?;

        let session = Session::new(user_id, self.options.default_ttl);
        self.persist(session.clone()).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            expires_at = %session.expires_at,
            "Created session"
        );
        Ok(session)
    }

    /// Fetch a session, reporting `Expired` status for active sessions past
    /// their deadline
    ///
    /// The stored copy is not rewritten.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the session does not exist.
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let mut session = self
            .storage
            .get(id)
            .await
            .with_context(|| format!("failed to load session {}", id))?;
        session.status = session.status_at(Utc::now());
        Ok(session)
    }

    /// Append a message to an active session
    ///
    /// Content is sanitized and length-capped. The first user message sets
    /// the session title, and every append slides the expiry window forward.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InactiveSession` for closed or expired
    /// sessions (nothing is written), `SessionError::Validation` if the
    /// content is empty after sanitizing, and `SessionError::NotFound` for
    /// unknown sessions.
    pub async fn add_message(
        &self,
        id: &str,
        role: Role,
        content: &str,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Message> {
        let content = sanitize_content(content, self.options.max_content_chars);
        if content.is_empty() {
            return Err(SessionError::Validation("message content is empty".to_string()).into());
        }

        let _guard = self.lock_for(id).lock().await;
        let mut session = self.load_active(id).await?;

        let message = Message::new(role, content).with_metadata(metadata.unwrap_or_default());
        session.push_message(message.clone());
        session.extend(Utc::now(), self.options.default_ttl);

        tracing::debug!(
            session_id = %id,
            message_id = %message.id,
            role = %role,
            tokens = message.token_count,
            total_tokens = session.token_count,
            "Appended message"
        );

        self.persist(session).await?;
        Ok(message)
    }

    /// Push an active session's deadline to now plus the default TTL
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InactiveSession` for closed or expired
    /// sessions and `SessionError::NotFound` for unknown sessions.
    pub async fn extend_session(&self, id: &str) -> Result<Session> {
        let _guard = self.lock_for(id).lock().await;
        let mut session = self.load_active(id).await?;

        session.extend(Utc::now(), self.options.default_ttl);
        self.persist(session.clone()).await?;

        tracing::debug!(session_id = %id, expires_at = %session.expires_at, "Extended session");
        Ok(session)
    }

    /// Mark a session closed
    ///
    /// Closing an already closed session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown sessions.
    pub async fn close_session(&self, id: &str) -> Result<()> {
        let _guard = self.lock_for(id).lock().await;
        let mut session = self
            .storage
            .get(id)
            .await
            .with_context(|| format!("failed to load session {}", id))?;

        if session.status == SessionStatus::Closed {
            return Ok(());
        }

        session.status = SessionStatus::Closed;
        session.updated_at = Utc::now();
        self.persist(session).await?;

        tracing::info!(session_id = %id, "Closed session");
        Ok(())
    }

    /// Remove a session from storage
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown sessions.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let _guard = self.lock_for(id).lock().await;
        self.storage
            .delete(id)
            .await
            .with_context(|| format!("failed to delete session {}", id))?;

        tracing::info!(session_id = %id, "Deleted session");
        Ok(())
    }

    /// Give an active session an explicit title
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` for an empty title and
    /// `SessionError::InactiveSession` for closed or expired sessions.
    pub async fn rename_session(&self, id: &str, title: &str) -> Result<Session> {
        let title = sanitize_content(title, MAX_RENAME_LENGTH)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if title.is_empty() {
            return Err(SessionError::Validation("title cannot be empty".to_string()).into());
        }

        let _guard = self.lock_for(id).lock().await;
        let mut session = self.load_active(id).await?;

        session.title = title;
        session.updated_at = Utc::now();
        self.persist(session.clone()).await?;
        Ok(session)
    }

    /// Set a metadata tag on an active session
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` for an empty key and
    /// `SessionError::InactiveSession` for closed or expired sessions.
    pub async fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<Session> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SessionError::Validation("metadata key cannot be empty".to_string()).into());
        }

        let _guard = self.lock_for(id).lock().await;
        let mut session = self.load_active(id).await?;

        session.metadata.insert(key.to_string(), value.to_string());
        session.updated_at = Utc::now();
        self.persist(session.clone()).await?;
        Ok(session)
    }

    /// The most recent `max_messages` messages of a session, oldest first
    ///
    /// Zero returns the whole history.
    pub async fn get_conversation_history(
        &self,
        id: &str,
        max_messages: usize,
    ) -> Result<Vec<Message>> {
        let session = self.get_session(id).await?;
        Ok(session.recent_messages(max_messages).to_vec())
    }

    /// The most recent messages whose combined token estimate fits
    /// `max_tokens`, oldest first
    pub async fn get_context(&self, id: &str, max_tokens: usize) -> Result<Vec<Message>> {
        let session = self.get_session(id).await?;
        Ok(truncate_messages(&session.messages, max_tokens))
    }

    /// All sessions owned by `user_id`, most recently updated first
    ///
    /// Statuses reflect expiry as of the call. Unknown users yield an
    /// empty list.
    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let now = Utc::now();
        let mut sessions = self
            .storage
            .list(user_id)
            .await
            .with_context(|| format!("failed to list sessions for user {}", user_id))?;

        for session in &mut sessions {
            session.status = session.status_at(now);
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Listing summaries of a user's sessions, most recently updated first
    pub async fn list_user_summaries(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let now = Utc::now();
        Ok(self
            .list_user_sessions(user_id)
            .await?
            .iter()
            .map(|session| session.summary_at(now))
            .collect())
    }

    /// Run a cleanup sweep immediately, returning how many sessions were
    /// removed
    pub async fn cleanup_now(&self) -> Result<usize> {
        let removed = self
            .storage
            .cleanup()
            .await
            .context("failed to clean up expired sessions")?;
        tracing::info!(removed, "Manual session cleanup finished");
        Ok(removed)
    }

    /// Stop the cleanup task, wait for it to finish, then close storage
    ///
    /// Calling `close` more than once is harmless. The manager must not be
    /// used for session operations afterwards.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let handle = self
            .sweeper
            .lock()
            .map_err(|_| SessionError::Storage("cleanup task lock poisoned".to_string()))?
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Session cleanup task ended abnormally: {}", e);
            }
        }

        self.storage
            .close()
            .await
            .context("failed to close session storage")
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Run one cleanup pass bounded by `timeout`, logging rather than failing
async fn sweep_once(storage: &dyn SessionStorage, timeout: Duration) {
    match tokio::time::timeout(timeout, storage.cleanup()).await {
        Ok(Ok(0)) => tracing::trace!("Cleanup sweep found no expired sessions"),
        Ok(Ok(removed)) => tracing::info!(removed, "Cleanup sweep removed expired sessions"),
        Ok(Err(e)) => tracing::error!(error = %e, "Cleanup sweep failed"),
        Err(_) => tracing::warn!("Cleanup sweep timed out after {:?}", timeout),
    }
}

fn spawn_sweeper(
    storage: Arc<dyn SessionStorage>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::debug!("Session cleanup task started (interval {:?})", interval);
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => sweep_once(storage.as_ref(), timeout).await,
            }
        }
        tracing::debug!("Session cleanup task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::session_error;
    use crate::storage::{MemoryStorage, MockSessionStorage};
    use crate::test_utils::{self, assert_error_contains, quiet_options};
    use chrono::{DateTime, Utc};

    fn memory_manager(ttl: Duration) -> (SessionManager, Arc<MemoryStorage>) {
        test_utils::memory_manager(100, ttl)
    }

    fn error_of(err: &anyhow::Error) -> &SessionError {
        session_error(err).expect("expected a SessionError")
    }

    /// Storage whose cleanup never finishes within a test's patience
    struct StalledCleanup(MemoryStorage);

    #[async_trait::async_trait]
    impl SessionStorage for StalledCleanup {
        async fn get(&self, id: &str) -> Result<Session> {
            self.0.get(id).await
        }
        async fn set(&self, session: Session, ttl: Duration) -> Result<()> {
            self.0.set(session, ttl).await
        }
        async fn delete(&self, id: &str) -> Result<()> {
            self.0.delete(id).await
        }
        async fn list(&self, user_id: &str) -> Result<Vec<Session>> {
            self.0.list(user_id).await
        }
        async fn exists(&self, id: &str) -> Result<bool> {
            self.0.exists(id).await
        }
        async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
            self.0.update_expiry(id, expires_at).await
        }
        async fn cleanup(&self) -> Result<usize> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.0.cleanup().await
        }
        async fn close(&self) -> Result<()> {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_first_user_message_sets_title() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        manager
            .add_message(&session.id, Role::User, "Hello, assistant!", None)
            .await
            .unwrap();

        let session = manager.get_session(&session.id).await.unwrap();
        assert_eq!(session.title, "Hello, assistant!");
        assert_eq!(session.message_count(), 1);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_create_session_persists_defaults() {
        let (manager, storage) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        let stored = storage.get(&session.id).await.unwrap();
        assert_eq!(stored, session);
        assert_eq!(stored.title, crate::session::DEFAULT_TITLE);
        assert!(stored.expires_at > stored.created_at);
    }

    #[tokio::test]
    async fn test_create_session_rejects_invalid_user() {
        let (manager, storage) = memory_manager(Duration::from_secs(60));

        let err = manager.create_session("bad user!").await.unwrap_err();
        assert!(matches!(error_of(&err), SessionError::Validation(_)));
        assert_eq!(storage.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_token_count_tracks_message_sum() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        for (role, text) in [
            (Role::System, "You are a concise assistant."),
            (Role::User, "What is the capital of France?"),
            (Role::Assistant, "Paris."),
            (Role::User, "And of Germany?"),
        ] {
            manager
                .add_message(&session.id, role, text, None)
                .await
                .unwrap();
            let current = manager.get_session(&session.id).await.unwrap();
            let sum: usize = current.messages.iter().map(|m| m.token_count).sum();
            assert_eq!(current.token_count, sum);
        }
    }

    #[tokio::test]
    async fn test_title_changes_only_once() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        manager
            .add_message(&session.id, Role::Assistant, "How can I help?", None)
            .await
            .unwrap();
        assert_eq!(
            manager.get_session(&session.id).await.unwrap().title,
            crate::session::DEFAULT_TITLE
        );

        manager
            .add_message(&session.id, Role::User, "Book a table", None)
            .await
            .unwrap();
        manager
            .add_message(&session.id, Role::User, "For four people", None)
            .await
            .unwrap();

        assert_eq!(
            manager.get_session(&session.id).await.unwrap().title,
            "Book a table"
        );
    }

    #[tokio::test]
    async fn test_add_message_sanitizes_and_keeps_metadata() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), serde_json::json!("search"));
        let message = manager
            .add_message(&session.id, Role::Assistant, "  ok\u{0000}ay  ", Some(metadata))
            .await
            .unwrap();

        assert_eq!(message.content, "okay");
        assert!(message.id.starts_with("msg_"));
        let stored = manager.get_session(&session.id).await.unwrap();
        assert_eq!(stored.messages[0], message);
    }

    #[tokio::test]
    async fn test_add_message_rejects_empty_content() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        let err = manager
            .add_message(&session.id, Role::User, " \u{0007} ", None)
            .await
            .unwrap_err();
        assert!(matches!(error_of(&err), SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_message_slides_expiry_forward() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        manager
            .add_message(&session.id, Role::User, "ping", None)
            .await
            .unwrap();

        let updated = manager.get_session(&session.id).await.unwrap();
        assert!(updated.expires_at > session.expires_at);
        assert!(updated.updated_at > session.updated_at);
    }

    #[tokio::test]
    async fn test_lazy_expiry_rejects_messages() {
        let (manager, storage) = memory_manager(Duration::from_millis(100));
        let session = manager.create_session("u1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let observed = manager.get_session(&session.id).await.unwrap();
        assert_eq!(observed.status, SessionStatus::Expired);

        let err = manager
            .add_message(&session.id, Role::User, "anyone there?", None)
            .await
            .unwrap_err();
        assert!(error_of(&err).is_inactive());

        // The expired view is computed, not written back.
        let stored = storage.get(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(stored.messages.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_mutation() {
        let (manager, storage) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();
        manager
            .add_message(&session.id, Role::User, "first", None)
            .await
            .unwrap();

        manager.close_session(&session.id).await.unwrap();
        manager.close_session(&session.id).await.unwrap();
        let before = storage.get(&session.id).await.unwrap();

        let err = manager
            .add_message(&session.id, Role::User, "second", None)
            .await
            .unwrap_err();
        assert!(matches!(
            error_of(&err),
            SessionError::InactiveSession {
                status: SessionStatus::Closed,
                ..
            }
        ));
        assert!(manager.extend_session(&session.id).await.is_err());
        assert!(manager.rename_session(&session.id, "x").await.is_err());
        assert!(manager.set_metadata(&session.id, "k", "v").await.is_err());

        assert_eq!(storage.get(&session.id).await.unwrap(), before);
        assert_eq!(
            manager.get_session(&session.id).await.unwrap().status,
            SessionStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_extend_session_pushes_deadline() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let extended = manager.extend_session(&session.id).await.unwrap();

        assert!(extended.expires_at > session.expires_at);
        assert_eq!(
            manager.get_session(&session.id).await.unwrap().expires_at,
            extended.expires_at
        );
    }

    #[tokio::test]
    async fn test_rename_and_tag_session() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        manager
            .rename_session(&session.id, "  Trip   planning ")
            .await
            .unwrap();
        manager
            .set_metadata(&session.id, "topic", "travel")
            .await
            .unwrap();
        manager
            .add_message(&session.id, Role::User, "Where should I go?", None)
            .await
            .unwrap();

        let stored = manager.get_session(&session.id).await.unwrap();
        assert_eq!(stored.title, "Trip planning");
        assert_eq!(stored.metadata.get("topic").map(String::as_str), Some("travel"));

        assert!(manager.rename_session(&session.id, "   ").await.is_err());
        assert!(manager.set_metadata(&session.id, " ", "v").await.is_err());
    }

    #[tokio::test]
    async fn test_history_keeps_most_recent_in_order() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();
        for i in 0..6 {
            manager
                .add_message(&session.id, Role::User, &format!("message {}", i), None)
                .await
                .unwrap();
        }

        let history = manager
            .get_conversation_history(&session.id, 3)
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 3", "message 4", "message 5"]);

        assert_eq!(
            manager
                .get_conversation_history(&session.id, 50)
                .await
                .unwrap()
                .len(),
            6
        );
    }

    #[tokio::test]
    async fn test_get_context_respects_token_budget() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();
        for text in ["a".repeat(40), "b".repeat(40), "c".repeat(40)] {
            manager
                .add_message(&session.id, Role::User, &text, None)
                .await
                .unwrap();
        }

        let context = manager.get_context(&session.id, 25).await.unwrap();
        assert_eq!(context.len(), 2);
        assert!(context[1].content.starts_with('c'));
        assert!(context.iter().map(|m| m.token_count).sum::<usize>() <= 25);
    }

    #[tokio::test]
    async fn test_list_user_sessions_newest_first_with_expiry_view() {
        let (manager, storage) = memory_manager(Duration::from_secs(60));
        let older = manager.create_session("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = manager.create_session("u1").await.unwrap();
        manager.create_session("u2").await.unwrap();

        storage
            .update_expiry(&older.id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let sessions = manager.list_user_sessions("u1").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, newer.id);
        assert_eq!(sessions[1].id, older.id);
        assert_eq!(sessions[1].status, SessionStatus::Expired);

        let summaries = manager.list_user_summaries("u1").await.unwrap();
        assert_eq!(summaries[0].status, SessionStatus::Active);
        assert!(manager.list_user_sessions("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_session_then_not_found() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let session = manager.create_session("u1").await.unwrap();

        manager.delete_session(&session.id).await.unwrap();

        let err = manager.get_session(&session.id).await.unwrap_err();
        assert!(error_of(&err).is_not_found());
        let err = manager.delete_session(&session.id).await.unwrap_err();
        assert!(error_of(&err).is_not_found());
        let err = manager
            .add_message(&session.id, Role::User, "hello", None)
            .await
            .unwrap_err();
        assert!(error_of(&err).is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_not_lost() {
        let (manager, _) = memory_manager(Duration::from_secs(60));
        let manager = Arc::new(manager);
        let session = manager.create_session("u1").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40 {
            let manager = Arc::clone(&manager);
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .add_message(&id, Role::User, &format!("message number {}", i), None)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = manager.get_session(&session.id).await.unwrap();
        assert_eq!(stored.message_count(), 40);
        let sum: usize = stored.messages.iter().map(|m| m.token_count).sum();
        assert_eq!(stored.token_count, sum);
    }

    #[tokio::test]
    async fn test_background_cleanup_removes_expired_sessions() {
        let storage = Arc::new(MemoryStorage::new(100));
        let manager = SessionManager::with_storage(
            storage.clone(),
            ManagerOptions {
                default_ttl: Duration::from_millis(50),
                cleanup_interval: Duration::from_millis(20),
                cleanup_timeout: Duration::from_secs(1),
                max_content_chars: 1_000,
            },
        );

        let session = manager.create_session("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(!storage.exists(&session.id).await.unwrap());
        assert!(storage.list("u1").await.unwrap().is_empty());
        assert!(storage.stats().unwrap().expired_removed >= 1);

        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_stop_sweeps() {
        let mut storage = MockSessionStorage::new();
        storage
            .expect_cleanup()
            .times(2..)
            .returning(|| Err(SessionError::Storage("backend down".to_string()).into()));
        storage.expect_close().times(1).returning(|| Ok(()));

        let manager = SessionManager::with_storage(
            Arc::new(storage),
            ManagerOptions {
                cleanup_interval: Duration::from_millis(10),
                ..quiet_options(Duration::from_secs(60))
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_sweeper_then_closes_storage() {
        let storage = Arc::new(StalledCleanup(MemoryStorage::new(10)));
        let manager = SessionManager::with_storage(
            storage.clone(),
            ManagerOptions {
                cleanup_interval: Duration::from_millis(10),
                cleanup_timeout: Duration::from_millis(30),
                ..quiet_options(Duration::from_secs(60))
            },
        );
        let session = manager.create_session("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        // A stalled sweep is bounded by cleanup_timeout, so close returns.
        tokio::time::timeout(Duration::from_secs(2), manager.close())
            .await
            .expect("close should not hang")
            .unwrap();

        assert!(storage.get(&session.id).await.is_err());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_errors_carry_context() {
        let mut storage = MockSessionStorage::new();
        storage
            .expect_get()
            .returning(|id| Err(SessionError::NotFound(id.to_string()).into()));

        let manager =
            SessionManager::with_storage(Arc::new(storage), quiet_options(Duration::from_secs(1)));
        let err = manager.get_session("sess_x").await.unwrap_err();

        assert!(error_of(&err).is_not_found());
        assert_error_contains(&err, "failed to load session sess_x");
    }

    #[tokio::test]
    async fn test_new_rejects_unsupported_backend() {
        let mut config = Config::default();
        config.storage.backend = "tape-drive".to_string();

        let err = SessionManager::new(&config).await.unwrap_err();
        assert!(matches!(
            error_of(&err),
            SessionError::UnsupportedBackend(_)
        ));
    }

    #[tokio::test]
    async fn test_new_builds_memory_manager_from_config() {
        let mut config = Config::default();
        config.session.cleanup_interval_seconds = 0;
        config.storage.max_sessions = 1;

        let manager = SessionManager::new(&config).await.unwrap();
        let first = manager.create_session("u1").await.unwrap();
        let second = manager.create_session("u1").await.unwrap();

        assert!(manager.get_session(&first.id).await.is_err());
        assert!(manager.get_session(&second.id).await.is_ok());
        assert_eq!(manager.options().default_ttl, Duration::from_secs(1800));
        manager.close().await.unwrap();
    }
}
