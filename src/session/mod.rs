//! Session entity and lifecycle state
//!
//! A [`Session`] is one conversation thread: its owner, derived title,
//! ordered messages, aggregate token count, tags, expiry deadline, and
//! lifecycle [`SessionStatus`]. The entity is a plain value type; storage
//! engines hand out clones, never references into their own state.

pub mod message;
pub mod utils;

pub use message::{Message, Role};
pub use utils::{
    derive_title, estimate_tokens, generate_message_id, generate_session_id, sanitize_content,
    truncate_messages, validate_user_id,
};

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Title assigned to a session until the first user message arrives
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Lifecycle state of a session
///
/// Sessions start `Active`. `Expired` is computed at read time from the
/// stored deadline; `Closed` is persisted by an explicit close. Neither
/// transitions back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepts messages, renames, and extensions
    #[default]
    Active,
    /// Deadline has passed
    Expired,
    /// Explicitly closed by a caller
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Expired => write!(f, "expired"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Compute `now + ttl`, saturating at the largest representable instant
pub fn deadline_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (`sess_` + 128-bit hex)
    pub id: String,
    /// Owner of the session
    pub user_id: String,
    /// Human-readable label
    pub title: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated
    pub updated_at: DateTime<Utc>,
    /// Absolute deadline after which the session reads as expired
    pub expires_at: DateTime<Utc>,
    /// Conversation turns in order
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Sum of `messages[i].token_count`
    #[serde(default)]
    pub token_count: usize,
    /// Free-form tags
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Stored lifecycle state
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    /// Create an active session owned by `user_id` that expires `ttl` from now
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionkeeper::session::{Session, SessionStatus, DEFAULT_TITLE};
    /// use std::time::Duration;
    ///
    /// let session = Session::new("u1", Duration::from_secs(60));
    /// assert_eq!(session.title, DEFAULT_TITLE);
    /// assert_eq!(session.status, SessionStatus::Active);
    /// assert!(session.expires_at > session.created_at);
    /// ```
    pub fn new(user_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(),
            user_id: user_id.into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: deadline_after(now, ttl),
            messages: Vec::new(),
            token_count: 0,
            metadata: HashMap::new(),
            status: SessionStatus::Active,
        }
    }

    /// Number of messages in the conversation
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Whether the stored status is `Active`
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whether the deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Status as observed at `now`
    ///
    /// An active session whose deadline has passed reads as `Expired`; a
    /// closed session stays `Closed` regardless of its deadline.
    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.status == SessionStatus::Active && self.is_expired_at(now) {
            SessionStatus::Expired
        } else {
            self.status
        }
    }

    /// Append a message, keeping the aggregate token count and title in step
    ///
    /// The title is derived from the first user message while it still
    /// carries [`DEFAULT_TITLE`]; later messages never change it.
    pub fn push_message(&mut self, message: Message) {
        let first_user_message =
            message.role == Role::User && !self.messages.iter().any(|m| m.role == Role::User);

        if first_user_message && self.title == DEFAULT_TITLE {
            self.title = derive_title(&message.content);
        }

        self.token_count += message.token_count;
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// Push the deadline to `now + ttl`
    pub fn extend(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = deadline_after(now, ttl);
        self.updated_at = now;
    }

    /// The most recent `max_messages` messages, or all when `max_messages`
    /// is zero or exceeds the history length
    pub fn recent_messages(&self, max_messages: usize) -> &[Message] {
        if max_messages == 0 || max_messages >= self.messages.len() {
            &self.messages
        } else {
            &self.messages[self.messages.len() - max_messages..]
        }
    }

    /// Listing view of the session as observed at `now`
    pub fn summary_at(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            message_count: self.message_count(),
            token_count: self.token_count,
            status: self.status_at(now),
        }
    }

    /// Listing view of the session as observed now
    pub fn summary(&self) -> SessionSummary {
        self.summary_at(Utc::now())
    }
}

/// Lightweight listing view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier
    pub id: String,
    /// Owner of the session
    pub user_id: String,
    /// Human-readable label
    pub title: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated
    pub updated_at: DateTime<Utc>,
    /// Expiry deadline
    pub expires_at: DateTime<Utc>,
    /// Number of messages
    pub message_count: usize,
    /// Aggregate token estimate
    pub token_count: usize,
    /// Observed lifecycle status
    pub status: SessionStatus,
}
