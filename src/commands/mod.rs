//! Command handlers for the CLI
//!
//! - `shell`: interactive session shell
//! - `simulate`: synthetic multi-user workload
//! - `config`: print the effective configuration

pub mod shell;
pub mod simulate;
pub mod special_commands;

pub mod config {
    //! Effective configuration printer

    use crate::config::Config;
    use crate::error::{Result, SessionError};

    /// Render `config` as YAML
    pub fn render(config: &Config) -> Result<String> {
        Ok(serde_yaml::to_string(config).map_err(SessionError::from)?)
    }

    /// Print the effective configuration after file, environment, and CLI
    /// overrides have been applied
    pub fn show_config(config: &Config) -> Result<()> {
        print!("{}", render(config)?);
        Ok(())
    }

}
