use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Common subcommands available for all binaries
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the service (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("LedgerDB Configuration:");
            println!("=======================");
            println!("Database DSN: {}", config.database.dsn);
            println!("Trim enabled: {}", config.trim.enabled);
            println!("Max rollback: {}", config.trim.max_rollback);
            match config.trim.effective_retained_height() {
                Some(height) => println!("Retained height: {height}"),
                None => println!("Retained height: disabled"),
            }
            match config.trim.batch_limit() {
                Some(limit) => println!("Batch size: {limit}"),
                None => println!("Batch size: unbounded"),
            }
            println!("Tick interval: {:?}", config.trim.tick_interval);
            println!("Height query: {}", config.trim.height_query);

            for table in &config.trim.tables {
                let keys: Vec<&str> = table.key_columns.iter().map(|c| c.name.as_str()).collect();
                println!(
                    "Table {}: keys=({}), every {} opportunities",
                    table.name,
                    keys.join(", "),
                    config.trim.frequency_for(&table.name)
                );
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        if config.trim.height_query.trim().is_empty() {
            anyhow::bail!("Trim height query cannot be empty");
        }

        let mut names = std::collections::HashSet::new();
        for table in &config.trim.tables {
            if table.key_columns.is_empty() {
                anyhow::bail!("Table {} has no key columns", table.name);
            }
            if !names.insert(table.name.as_str()) {
                anyhow::bail!("Table {} is configured more than once", table.name);
            }
        }

        for table in config.trim.frequency.keys() {
            if !names.contains(table.as_str()) {
                log::warn!("Trim frequency set for unconfigured table {table}");
            }
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting services
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, KeyColumnConfig, KeyColumnType, TableConfig};

    #[test]
    fn test_common_commands_default() {
        assert!(matches!(CommonCommands::default(), CommonCommands::Start));
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_validate_rejects_keyless_table() {
        let mut config = Configuration::default();
        assert!(utils::validate_config(&config).is_ok());

        config.trim.tables.push(TableConfig {
            name: "account".to_string(),
            key_columns: vec![],
            height_column: "height".to_string(),
            latest_column: "latest".to_string(),
        });
        assert!(utils::validate_config(&config).is_err());

        config.trim.tables[0].key_columns.push(KeyColumnConfig {
            name: "id".to_string(),
            column_type: KeyColumnType::Integer,
        });
        assert!(utils::validate_config(&config).is_ok());

        let duplicate = config.trim.tables[0].clone();
        config.trim.tables.push(duplicate);
        assert!(utils::validate_config(&config).is_err());
    }

    #[test]
    fn test_start_is_not_handled() {
        let config = Configuration::default();
        let handled = utils::handle_common_command(&CommonCommands::Start, &config).unwrap();
        assert!(!handled);
    }
}
