//! Shared helpers for identifiers, token estimation, and text hygiene

use super::message::Message;
use crate::error::{Result, SessionError};
use regex::Regex;
use std::sync::OnceLock;

/// Prefix for generated session identifiers
pub const SESSION_ID_PREFIX: &str = "sess_";

/// Prefix for generated message identifiers
pub const MESSAGE_ID_PREFIX: &str = "msg_";

/// Characters per estimated token
pub const CHARS_PER_TOKEN: usize = 4;

/// Maximum length of a user identifier, in characters
pub const MAX_USER_ID_LENGTH: usize = 100;

/// Maximum length of a derived session title, in characters
pub const MAX_TITLE_LENGTH: usize = 50;

const USER_ID_PATTERN: &str = r"^[A-Za-z0-9_.@-]+$";

/// Generate a session identifier: `sess_` followed by 128 random bits in hex
///
/// # Examples
///
/// ```
/// use sessionkeeper::session::generate_session_id;
///
/// let id = generate_session_id();
/// assert!(id.starts_with("sess_"));
/// assert_eq!(id.len(), 5 + 32);
/// ```
pub fn generate_session_id() -> String {
    format!("{}{:032x}", SESSION_ID_PREFIX, rand::random::<u128>())
}

/// Generate a message identifier: `msg_` followed by 64 random bits in hex
pub fn generate_message_id() -> String {
    format!("{}{:016x}", MESSAGE_ID_PREFIX, rand::random::<u64>())
}

/// Estimate the token count of `text` as characters divided by four
///
/// This is an approximation; it only needs to be monotonic so budget
/// checks behave predictably.
///
/// # Examples
///
/// ```
/// use sessionkeeper::session::estimate_tokens;
///
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abc"), 0);
/// assert_eq!(estimate_tokens("héllo wörld!"), 3);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Keep the most recent messages whose summed token count fits `max_tokens`
///
/// Walks backward from the newest message and stops at the first message
/// that would exceed the budget. The result is a suffix of `messages` in
/// the original order; it is empty when even the newest message is larger
/// than the budget.
///
/// # Examples
///
/// ```
/// use sessionkeeper::session::{truncate_messages, Message, Role};
///
/// let history = vec![
///     Message::new(Role::User, "a".repeat(40)),      // 10 tokens
///     Message::new(Role::Assistant, "b".repeat(40)), // 10 tokens
///     Message::new(Role::User, "c".repeat(20)),      // 5 tokens
/// ];
/// let kept = truncate_messages(&history, 16);
/// assert_eq!(kept.len(), 2);
/// assert_eq!(kept[1].content, "c".repeat(20));
/// ```
pub fn truncate_messages(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    let mut used = 0usize;
    let mut start = messages.len();

    for (index, message) in messages.iter().enumerate().rev() {
        let next = used.saturating_add(message.token_count);
        if next > max_tokens {
            break;
        }
        used = next;
        start = index;
    }

    messages[start..].to_vec()
}

/// Strip control characters (other than newline and tab), trim surrounding
/// whitespace, and cap the result at `max_chars` characters
pub fn sanitize_content(content: &str, max_chars: usize) -> String {
    let cleaned: String = content
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    cleaned.trim().chars().take(max_chars).collect()
}

/// Derive a session title from the first user message
///
/// Whitespace runs collapse to single spaces; titles longer than
/// [`MAX_TITLE_LENGTH`] are cut and suffixed with `...`.
///
/// # Examples
///
/// ```
/// use sessionkeeper::session::derive_title;
///
/// assert_eq!(derive_title("Hello, assistant!"), "Hello, assistant!");
/// assert_eq!(derive_title("  two\n\nlines  "), "two lines");
/// assert_eq!(derive_title(&"x".repeat(80)).chars().count(), 50);
/// ```
pub fn derive_title(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= MAX_TITLE_LENGTH {
        return collapsed;
    }

    let mut title: String = collapsed.chars().take(MAX_TITLE_LENGTH - 3).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    title
}

fn user_id_regex() -> Result<&'static Regex> {
    static USER_ID_REGEX: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    USER_ID_REGEX
        .get_or_init(|| Regex::new(USER_ID_PATTERN))
        .as_ref()
        .map_err(|e| SessionError::Validation(format!("user id pattern: {}", e)).into())
}

/// Validate a user identifier
///
/// User IDs are opaque but restricted to `[A-Za-z0-9_.@-]` and at most
/// [`MAX_USER_ID_LENGTH`] characters.
///
/// # Errors
///
/// Returns `SessionError::Validation` if the ID is empty, too long, or
/// contains a character outside the allowed set.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(SessionError::Validation("user id cannot be empty".to_string()).into());
    }

    if user_id.chars().count() > MAX_USER_ID_LENGTH {
        return Err(SessionError::Validation(format!(
            "user id exceeds {} characters",
            MAX_USER_ID_LENGTH
        ))
        .into());
    }

    if !user_id_regex()?.is_match(user_id) {
        return Err(SessionError::Validation(format!(
            "user id contains invalid characters: {}",
            user_id
        ))
        .into());
    }

    Ok(())
}
