//! Slash-command parser for the interactive session shell
//!
//! Input beginning with `/` is a shell command; anything else is appended
//! to the current session as a user message. Command names are
//! case-insensitive, arguments keep their case.

use thiserror::Error;

/// Errors that can occur when parsing shell commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Commands understood by the session shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Start a new session for the current user
    NewSession,

    /// Append an assistant message
    Reply(String),

    /// Append a system message
    System(String),

    /// Show the most recent messages; `None` shows everything
    History(Option<usize>),

    /// Show the messages that fit a token budget
    Context(usize),

    /// Show details of the current session
    Info,

    /// List sessions for a user, defaulting to the current one
    List(Option<String>),

    /// Make another session current
    Switch(String),

    /// Set an explicit title
    Rename(String),

    /// Set a metadata tag
    Tag { key: String, value: String },

    /// Slide the expiry window forward
    Extend,

    /// Close the current session
    Close,

    /// Delete the current session
    Delete,

    /// Run a cleanup sweep now
    Cleanup,

    /// Display help information
    Help,

    /// Exit the shell
    Exit,

    /// Plain text to append as a user message
    Message(String),
}

fn missing(command: &str, usage: &str) -> CommandError {
    CommandError::MissingArgument {
        command: command.to_string(),
        usage: usage.to_string(),
    }
}

fn required(command: &str, arg: &str, usage: &str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(missing(command, usage))
    } else {
        Ok(arg.to_string())
    }
}

fn parse_count(command: &str, arg: &str) -> Result<usize, CommandError> {
    arg.parse().map_err(|_| CommandError::UnsupportedArgument {
        command: command.to_string(),
        arg: arg.to_string(),
    })
}

/// Parse one line of shell input
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` for an unrecognised `/command`,
/// `CommandError::MissingArgument` when a required argument is absent, and
/// `CommandError::UnsupportedArgument` for malformed arguments.
///
/// # Examples
///
/// ```
/// use sessionkeeper::commands::special_commands::{parse_shell_command, ShellCommand};
///
/// assert_eq!(parse_shell_command("/history 5").unwrap(), ShellCommand::History(Some(5)));
/// assert_eq!(
///     parse_shell_command("hello there").unwrap(),
///     ShellCommand::Message("hello there".to_string())
/// );
/// assert!(parse_shell_command("/teleport").is_err());
/// ```
pub fn parse_shell_command(input: &str) -> Result<ShellCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if lower == "exit" || lower == "quit" {
        return Ok(ShellCommand::Exit);
    }
    if !trimmed.starts_with('/') {
        return Ok(ShellCommand::Message(trimmed.to_string()));
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, arg)) => (name.to_lowercase(), arg.trim()),
        None => (lower.clone(), ""),
    };

    match name.as_str() {
        "/new" => Ok(ShellCommand::NewSession),
        "/reply" => required("/reply", arg, "/reply <text>").map(ShellCommand::Reply),
        "/system" => required("/system", arg, "/system <text>").map(ShellCommand::System),
        "/history" if arg.is_empty() => Ok(ShellCommand::History(None)),
        "/history" => parse_count("/history", arg).map(|n| ShellCommand::History(Some(n))),
        "/context" if arg.is_empty() => Err(missing("/context", "/context <tokens>")),
        "/context" => parse_count("/context", arg).map(ShellCommand::Context),
        "/info" | "/status" => Ok(ShellCommand::Info),
        "/list" | "/ls" => Ok(ShellCommand::List(
            (!arg.is_empty()).then(|| arg.to_string()),
        )),
        "/switch" | "/use" => {
            required("/switch", arg, "/switch <session-id>").map(ShellCommand::Switch)
        }
        "/rename" | "/title" => required("/rename", arg, "/rename <title>").map(ShellCommand::Rename),
        "/tag" => {
            if arg.is_empty() {
                return Err(missing("/tag", "/tag <key>=<value>"));
            }
            match arg.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => Ok(ShellCommand::Tag {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }),
                _ => Err(CommandError::UnsupportedArgument {
                    command: "/tag".to_string(),
                    arg: arg.to_string(),
                }),
            }
        }
        "/extend" => Ok(ShellCommand::Extend),
        "/close" => Ok(ShellCommand::Close),
        "/delete" => Ok(ShellCommand::Delete),
        "/cleanup" => Ok(ShellCommand::Cleanup),
        "/help" | "/?" => Ok(ShellCommand::Help),
        "/quit" | "/exit" => Ok(ShellCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print shell help
pub fn print_help() {
    println!(
        r#"
Session Shell Commands
======================

MESSAGES:
  <text>              - Append a user message to the current session
  /reply <text>       - Append an assistant message
  /system <text>      - Append a system message

READING:
  /history [n]        - Show the last n messages (all when omitted)
  /context <tokens>   - Show the newest messages that fit the token budget
  /info               - Show details of the current session
  /list [user]        - List sessions, newest first

LIFECYCLE:
  /new                - Start a new session
  /switch <id>        - Make another session current
  /rename <title>     - Set the session title
  /tag <key>=<value>  - Set a metadata tag
  /extend             - Push the expiry deadline forward
  /close              - Close the current session
  /delete             - Delete the current session
  /cleanup            - Remove expired sessions now

OTHER:
  /help               - Show this help
  /quit, exit         - Leave the shell
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            parse_shell_command("  What is Rust?  ").unwrap(),
            ShellCommand::Message("What is Rust?".to_string())
        );
    }

    #[test]
    fn test_exit_aliases() {
        for input in ["exit", "QUIT", "/quit", "/exit"] {
            assert_eq!(parse_shell_command(input).unwrap(), ShellCommand::Exit);
        }
    }

    #[test]
    fn test_command_names_are_case_insensitive_arguments_are_not() {
        assert_eq!(
            parse_shell_command("/RENAME Trip To Rome").unwrap(),
            ShellCommand::Rename("Trip To Rome".to_string())
        );
        assert_eq!(
            parse_shell_command("/Switch sess_ABC").unwrap(),
            ShellCommand::Switch("sess_ABC".to_string())
        );
    }

    #[test]
    fn test_history_with_and_without_count() {
        assert_eq!(
            parse_shell_command("/history").unwrap(),
            ShellCommand::History(None)
        );
        assert_eq!(
            parse_shell_command("/history 10").unwrap(),
            ShellCommand::History(Some(10))
        );
        assert!(matches!(
            parse_shell_command("/history ten"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn test_context_requires_budget() {
        assert_eq!(
            parse_shell_command("/context 500").unwrap(),
            ShellCommand::Context(500)
        );
        assert!(matches!(
            parse_shell_command("/context"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_list_optional_user() {
        assert_eq!(parse_shell_command("/list").unwrap(), ShellCommand::List(None));
        assert_eq!(
            parse_shell_command("/ls alice").unwrap(),
            ShellCommand::List(Some("alice".to_string()))
        );
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!(
            parse_shell_command("/tag topic = travel plans").unwrap(),
            ShellCommand::Tag {
                key: "topic".to_string(),
                value: "travel plans".to_string()
            }
        );
        assert!(matches!(
            parse_shell_command("/tag topic"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
        assert!(matches!(
            parse_shell_command("/tag =x"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
        assert!(matches!(
            parse_shell_command("/tag"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_messages_require_text() {
        assert_eq!(
            parse_shell_command("/reply Sure thing").unwrap(),
            ShellCommand::Reply("Sure thing".to_string())
        );
        assert!(parse_shell_command("/reply").is_err());
        assert!(parse_shell_command("/system   ").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_shell_command("/teleport now").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/teleport now".to_string()));
        assert!(err.to_string().contains("/help"));
    }

    #[test]
    fn test_argumentless_commands() {
        assert_eq!(parse_shell_command("/new").unwrap(), ShellCommand::NewSession);
        assert_eq!(parse_shell_command("/info").unwrap(), ShellCommand::Info);
        assert_eq!(parse_shell_command("/extend").unwrap(), ShellCommand::Extend);
        assert_eq!(parse_shell_command("/close").unwrap(), ShellCommand::Close);
        assert_eq!(parse_shell_command("/delete").unwrap(), ShellCommand::Delete);
        assert_eq!(parse_shell_command("/cleanup").unwrap(), ShellCommand::Cleanup);
        assert_eq!(parse_shell_command("/help").unwrap(), ShellCommand::Help);
    }
}
