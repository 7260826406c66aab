//! Interactive session shell
//!
//! A readline loop over a [`SessionManager`]: plain input is appended to the
//! current session as a user message, `/commands` drive the lifecycle.

use crate::commands::special_commands::{parse_shell_command, print_help, ShellCommand};
use crate::config::Config;
use crate::error::{session_error, Result};
use crate::manager::SessionManager;
use crate::session::{Message, Role, Session, SessionStatus, SessionSummary};
use chrono::Utc;
use colored::Colorize;
use prettytable::{format, Table};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Whether the shell keeps reading input after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlow {
    Continue,
    Exit,
}

/// State of one shell: the manager, the acting user, and the current session
pub struct ShellState {
    manager: SessionManager,
    user: String,
    current: Option<String>,
}

impl ShellState {
    pub fn new(manager: SessionManager, user: impl Into<String>) -> Self {
        Self {
            manager,
            user: user.into(),
            current: None,
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn require_current(&self) -> Result<&str> {
        self.current
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no current session; use /new or /switch <id>"))
    }

    fn prompt(&self) -> String {
        let session = match &self.current {
            Some(id) => short_id(id).to_string(),
            None => "-".to_string(),
        };
        format!("[{}@{}] >> ", self.user, session)
            .cyan()
            .bold()
            .to_string()
    }

    /// Start a new session for the shell user and make it current
    pub async fn start_session(&mut self) -> Result<Session> {
        let session = self.manager.create_session(&self.user).await?;
        self.current = Some(session.id.clone());
        Ok(session)
    }

    /// Run one parsed command
    pub async fn execute(&mut self, command: ShellCommand) -> Result<ShellFlow> {
        match command {
            ShellCommand::Exit => return Ok(ShellFlow::Exit),
            ShellCommand::Help => print_help(),
            ShellCommand::NewSession => {
                let session = self.start_session().await?;
                println!("Started session {}", session.id.green());
            }
            ShellCommand::Message(text) => self.append(Role::User, &text).await?,
            ShellCommand::Reply(text) => self.append(Role::Assistant, &text).await?,
            ShellCommand::System(text) => self.append(Role::System, &text).await?,
            ShellCommand::History(limit) => {
                let id = self.require_current()?;
                let messages = self
                    .manager
                    .get_conversation_history(id, limit.unwrap_or(0))
                    .await?;
                print_messages(&messages);
            }
            ShellCommand::Context(budget) => {
                let id = self.require_current()?;
                let messages = self.manager.get_context(id, budget).await?;
                let used: usize = messages.iter().map(|m| m.token_count).sum();
                print_messages(&messages);
                println!(
                    "{}",
                    format!(
                        "{} message(s), ~{} of {} tokens",
                        messages.len(),
                        used,
                        budget
                    )
                    .dimmed()
                );
            }
            ShellCommand::Info => {
                let id = self.require_current()?;
                let session = self.manager.get_session(id).await?;
                print_session_info(&session);
            }
            ShellCommand::List(user) => {
                let user = user.unwrap_or_else(|| self.user.clone());
                let summaries = self.manager.list_user_summaries(&user).await?;
                print_session_table(&user, &summaries, self.current.as_deref());
            }
            ShellCommand::Switch(id) => {
                let session = self.manager.get_session(&id).await?;
                if session.status != SessionStatus::Active {
                    println!(
                        "{}",
                        format!("Note: session is {}, it is read-only", session.status).yellow()
                    );
                }
                println!("Switched to {} ({})", session.id.green(), session.title);
                self.current = Some(session.id);
            }
            ShellCommand::Rename(title) => {
                let id = self.require_current()?;
                let session = self.manager.rename_session(id, &title).await?;
                println!("Renamed to {}", session.title.green());
            }
            ShellCommand::Tag { key, value } => {
                let id = self.require_current()?;
                self.manager.set_metadata(id, &key, &value).await?;
                println!("Tagged {}={}", key.cyan(), value);
            }
            ShellCommand::Extend => {
                let id = self.require_current()?;
                let session = self.manager.extend_session(id).await?;
                println!("Session now expires at {}", format_time(&session.expires_at));
            }
            ShellCommand::Close => {
                let id = self.require_current()?;
                self.manager.close_session(id).await?;
                println!("{}", "Session closed".yellow());
            }
            ShellCommand::Delete => {
                let id = self.require_current()?.to_string();
                self.manager.delete_session(&id).await?;
                self.current = None;
                println!("{}", format!("Deleted session {}", id).yellow());
            }
            ShellCommand::Cleanup => {
                let removed = self.manager.cleanup_now().await?;
                println!("Removed {} expired session(s)", removed);
            }
        }
        Ok(ShellFlow::Continue)
    }

    async fn append(&mut self, role: Role, content: &str) -> Result<()> {
        if self.current.is_none() {
            self.start_session().await?;
        }
        let id = self.require_current()?;
        let message = self.manager.add_message(id, role, content, None).await?;
        println!(
            "{}",
            format!("{} stored ({} tokens)", message.id, message.token_count).dimmed()
        );
        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(13)
        .map(|(index, _)| index)
        .unwrap_or(id.len());
    &id[..end]
}

fn format_time(time: &chrono::DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn colored_status(status: SessionStatus) -> colored::ColoredString {
    match status {
        SessionStatus::Active => status.to_string().green(),
        SessionStatus::Expired => status.to_string().yellow(),
        SessionStatus::Closed => status.to_string().red(),
    }
}

fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("{}", "No messages.".yellow());
        return;
    }
    for message in messages {
        let role = match message.role {
            Role::User => "user".cyan(),
            Role::Assistant => "assistant".green(),
            Role::System => "system".magenta(),
        };
        println!(
            "{} {:>9}: {}",
            message.timestamp.format("%H:%M:%S").to_string().dimmed(),
            role,
            message.content
        );
    }
}

fn print_session_info(session: &Session) {
    let status = session.status_at(Utc::now());
    println!();
    println!("{} {}", "Session:".bold(), session.id);
    println!("{} {}", "Title:".bold(), session.title);
    println!("{} {}", "User:".bold(), session.user_id);
    println!("{} {}", "Status:".bold(), colored_status(status));
    println!("{} {}", "Messages:".bold(), session.message_count());
    println!("{} {}", "Tokens:".bold(), session.token_count);
    println!("{} {}", "Created:".bold(), format_time(&session.created_at));
    println!("{} {}", "Updated:".bold(), format_time(&session.updated_at));
    println!("{} {}", "Expires:".bold(), format_time(&session.expires_at));
    if !session.metadata.is_empty() {
        let mut tags: Vec<_> = session.metadata.iter().collect();
        tags.sort();
        let tags: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("{} {}", "Tags:".bold(), tags.join(", "));
    }
    println!();
}

fn print_session_table(user: &str, summaries: &[SessionSummary], current: Option<&str>) {
    if summaries.is_empty() {
        println!("{}", format!("No sessions for {}.", user).yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "",
        "ID".bold(),
        "Title".bold(),
        "Status".bold(),
        "Messages".bold(),
        "Tokens".bold(),
        "Last Updated".bold()
    ]);

    for summary in summaries {
        let marker = if Some(summary.id.as_str()) == current {
            "*"
        } else {
            ""
        };
        table.add_row(prettytable::row![
            marker,
            summary.id.cyan(),
            summary.title,
            colored_status(summary.status),
            summary.message_count,
            summary.token_count,
            format_time(&summary.updated_at)
        ]);
    }

    println!("\nSessions for {}:", user);
    table.printstd();
    println!();
}

fn print_welcome_banner(user: &str, config: &Config) {
    println!("\n{}", "Session Shell".bold());
    println!(
        "user: {}  backend: {}  ttl: {}s",
        user.cyan(),
        config.storage.backend,
        config.session.default_ttl_seconds
    );
    println!("Type text to add a message, '/help' for commands, '/quit' to leave.\n");
}

/// Run the interactive shell for `user`
pub async fn run_shell(config: Config, user: String) -> Result<()> {
    tracing::info!(user = %user, "Starting session shell");

    let manager = SessionManager::new(&config).await?;
    let mut state = ShellState::new(manager, user);
    let session = state.start_session().await?;

    let mut rl = DefaultEditor::new()?;
    print_welcome_banner(&state.user, &config);
    println!("Started session {}", session.id.green());

    loop {
        match rl.readline(&state.prompt()) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                let command = match parse_shell_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{}", e.to_string().red());
                        continue;
                    }
                };

                match state.execute(command).await {
                    Ok(ShellFlow::Exit) => break,
                    Ok(ShellFlow::Continue) => {}
                    Err(e) => match session_error(&e) {
                        Some(err) => eprintln!("{}", err.to_string().red()),
                        None => eprintln!("{}", format!("Error: {:#}", e).red()),
                    },
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    state.manager.close().await?;
    println!("Goodbye!");
    Ok(())
}
