//! Sessionkeeper - conversation session store CLI
//!
//! Main entry point for the Sessionkeeper application.

use anyhow::Result;

use sessionkeeper::cli::{Cli, Commands};
use sessionkeeper::commands;
use sessionkeeper::commands::simulate::SimulationParams;
use sessionkeeper::config::Config;
use sessionkeeper::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let mut config = Config::load(config_path)?;
    config.apply_cli_overrides(cli.backend.as_deref(), cli.verbose);

    init_logging(&config.logging)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Shell { user } => {
            tracing::info!("Starting interactive shell");
            commands::shell::run_shell(config, user).await?;
        }
        Commands::Simulate {
            users,
            sessions_per_user,
            messages,
            concurrency,
        } => {
            tracing::info!("Starting simulation");
            let params = SimulationParams {
                users,
                sessions_per_user,
                messages,
                concurrency,
            };
            commands::simulate::run_simulate(config, params).await?;
        }
        Commands::Config => {
            commands::config::show_config(&config)?;
        }
    }

    Ok(())
}
