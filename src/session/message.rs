//! Conversation turns stored inside a session

use super::utils::{estimate_tokens, generate_message_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message written by the end user
    User,
    /// Message produced by the assistant
    Assistant,
    /// Instructions or context injected by the system
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!(
                "Invalid role: {}. Must be one of: user, assistant, system",
                s
            )),
        }
    }
}

/// One turn in a conversation
///
/// Messages are immutable once appended to a session. The token estimate is
/// computed at construction so the owning session can keep its aggregate
/// count without rescanning content.
///
/// # Examples
///
/// ```
/// use sessionkeeper::session::{Message, Role};
///
/// let message = Message::new(Role::User, "Hello there, how are you?");
/// assert!(message.id.starts_with("msg_"));
/// assert_eq!(message.token_count, 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier (`msg_` + 64-bit hex)
    pub id: String,
    /// Author of the message
    pub role: Role,
    /// Sanitized message text
    pub content: String,
    /// When the message was appended
    pub timestamp: DateTime<Utc>,
    /// Estimated token count of `content`
    pub token_count: usize,
    /// Caller-supplied metadata (tool names, sources, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Message {
    /// Create a message with a fresh ID, the current timestamp, and a token
    /// estimate for `content`
    ///
    /// Content is stored as given; the session manager sanitizes caller
    /// input before it reaches this constructor.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: generate_message_id(),
            role,
            token_count: estimate_tokens(&content),
            content,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Attach metadata to the message
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        };
        self
    }
}
