//! Synthetic workload against the session manager
//!
//! Creates sessions for a number of users, appends alternating user and
//! assistant messages with bounded concurrency, and reports what storage
//! holds afterwards. Always runs against a fresh in-memory engine sized by
//! `storage.max_sessions`, so eviction is visible when the workload exceeds
//! capacity.

use crate::config::{Config, ManagerOptions};
use crate::error::Result;
use crate::manager::SessionManager;
use crate::session::{Role, SessionStatus};
use crate::storage::{MemoryStorage, StorageStats};
use colored::Colorize;
use futures::stream::{self, StreamExt};
use prettytable::{format, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shape of a simulated workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationParams {
    pub users: usize,
    pub sessions_per_user: usize,
    pub messages: usize,
    pub concurrency: usize,
}

/// Outcome of a simulated workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub sessions_created: usize,
    pub messages_added: usize,
    pub failures: usize,
    pub sessions_retained: usize,
    pub active_retained: usize,
    pub tokens_retained: usize,
    pub elapsed: Duration,
}

fn user_id(index: usize) -> String {
    format!("sim-user-{:03}", index)
}

fn message_text(session: usize, turn: usize) -> (Role, String) {
    if turn % 2 == 0 {
        (
            Role::User,
            format!("Question {} in conversation {}: how do lifetimes work?", turn / 2 + 1, session),
        )
    } else {
        (
            Role::Assistant,
            format!(
                "Answer {}: a lifetime names the region where a reference stays valid.",
                turn / 2 + 1
            ),
        )
    }
}

/// Run one simulated conversation, returning messages stored
async fn run_conversation(
    manager: &SessionManager,
    user: &str,
    index: usize,
    messages: usize,
) -> Result<usize> {
    let session = manager.create_session(user).await?;
    for turn in 0..messages {
        let (role, text) = message_text(index, turn);
        manager.add_message(&session.id, role, &text, None).await?;
    }
    Ok(messages)
}

/// Drive the workload through `manager`
pub async fn run_simulation(
    manager: &SessionManager,
    params: &SimulationParams,
) -> Result<SimulationReport> {
    let started = Instant::now();
    let jobs: Vec<(String, usize)> = (0..params.users)
        .flat_map(|u| (0..params.sessions_per_user).map(move |s| (user_id(u), u * 1_000 + s)))
        .collect();

    let results: Vec<Result<usize>> = stream::iter(jobs)
        .map(|(user, index)| async move {
            run_conversation(manager, &user, index, params.messages).await
        })
        .buffer_unordered(params.concurrency.max(1))
        .collect()
        .await;

    let mut report = SimulationReport::default();
    for result in results {
        match result {
            Ok(added) => {
                report.sessions_created += 1;
                report.messages_added += added;
            }
            Err(e) => {
                tracing::warn!("Simulated conversation failed: {:#}", e);
                report.failures += 1;
            }
        }
    }

    for u in 0..params.users {
        for session in manager.list_user_sessions(&user_id(u)).await? {
            report.sessions_retained += 1;
            report.tokens_retained += session.token_count;
            if session.status == SessionStatus::Active {
                report.active_retained += 1;
            }
        }
    }

    report.elapsed = started.elapsed();
    Ok(report)
}

fn print_report(params: &SimulationParams, report: &SimulationReport, stats: &StorageStats) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.add_row(prettytable::row!["Metric".bold(), "Value".bold()]);
    table.add_row(prettytable::row!["Users", params.users]);
    table.add_row(prettytable::row!["Sessions per user", params.sessions_per_user]);
    table.add_row(prettytable::row!["Messages per session", params.messages]);
    table.add_row(prettytable::row!["Concurrency", params.concurrency]);
    table.add_row(prettytable::row!["Sessions created", report.sessions_created]);
    table.add_row(prettytable::row!["Messages added", report.messages_added]);
    table.add_row(prettytable::row!["Failed conversations", report.failures]);
    table.add_row(prettytable::row!["Sessions retained", report.sessions_retained]);
    table.add_row(prettytable::row!["Active retained", report.active_retained]);
    table.add_row(prettytable::row!["Tokens retained", report.tokens_retained]);
    table.add_row(prettytable::row!["Capacity", stats.capacity]);
    table.add_row(prettytable::row!["LRU evictions", stats.evictions]);
    table.add_row(prettytable::row!["Expired removed", stats.expired_removed]);
    table.add_row(prettytable::row![
        "Elapsed",
        format!("{:.2?}", report.elapsed)
    ]);

    println!("\nSimulation Results:");
    table.printstd();

    if stats.evictions > 0 {
        println!(
            "{}",
            format!(
                "{} session(s) were evicted; raise storage.max_sessions to keep them",
                stats.evictions
            )
            .yellow()
        );
    }
    println!();
}

/// Run the simulation against an in-memory engine and print a summary
pub async fn run_simulate(config: Config, params: SimulationParams) -> Result<()> {
    if config.storage.backend.trim().to_lowercase() != "memory" {
        tracing::warn!(
            backend = %config.storage.backend,
            "Simulation ignores the configured backend and uses in-memory storage"
        );
    }
    tracing::info!(?params, capacity = config.storage.max_sessions, "Starting simulation");

    let storage = Arc::new(MemoryStorage::new(config.storage.max_sessions));
    let manager = SessionManager::with_storage(storage.clone(), ManagerOptions::from(&config));

    let outcome = run_simulation(&manager, &params).await;
    let stats = storage.stats();
    manager.close().await?;

    print_report(&params, &outcome?, &stats?);
    Ok(())
}
