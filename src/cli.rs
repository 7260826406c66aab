//! Command-line interface definition for Sessionkeeper
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for the interactive shell, load simulation, and
//! configuration inspection.

use clap::{Parser, Subcommand};

/// Sessionkeeper - conversation session store
///
/// Create, append to, expire, and sweep conversation sessions backed by
/// an in-memory LRU store or Redis.
#[derive(Parser, Debug, Clone)]
#[command(name = "sessionkeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the storage backend (memory, redis)
    #[arg(short, long, env = "SESSIONKEEPER_STORAGE_BACKEND")]
    pub backend: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Sessionkeeper
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive session shell
    Shell {
        /// User that owns the sessions created in the shell
        #[arg(short, long, default_value = "local-user")]
        user: String,
    },

    /// Run a synthetic multi-user workload and print a summary
    Simulate {
        /// Number of simulated users
        #[arg(long, default_value_t = 10)]
        users: usize,

        /// Sessions created per user
        #[arg(long, default_value_t = 3)]
        sessions_per_user: usize,

        /// Messages appended to each session
        #[arg(long, default_value_t = 6)]
        messages: usize,

        /// Conversations in flight at once
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
    },

    /// Print the effective configuration
    Config,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
