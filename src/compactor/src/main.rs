//! LedgerDB Trimmer Service
//!
//! Periodically trims obsolete history from the configured multi-version
//! tables, keeping everything a rollback of up to `max_rollback` blocks may
//! need.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::utils::{handle_common_command, init_logging, load_config};
use common::cli::{CommonArgs, CommonCommands};
use common::config::Configuration;
use compactor::probe::ScanOrder;
use compactor::retention::TrimSettings;
use compactor::store::{SqlHeightSource, SqliteVersionStore};
use compactor::{Height, TrimRunResult, Trimmer, VersionedTable};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ledgerdb-trimmer", author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Common(CommonCommands),
    /// Run a single trim opportunity and exit
    Once {
        /// Current chain height; read with the configured height query when omitted
        #[arg(long)]
        height: Option<Height>,
    },
    /// Show which trim path each configured table uses
    Probe,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

struct Runtime {
    trimmer: Arc<Trimmer<SqliteVersionStore>>,
    heights: SqlHeightSource,
}

async fn build_runtime(config: &Configuration) -> Result<Runtime> {
    let settings =
        TrimSettings::try_from(&config.trim).context("Invalid trim configuration")?;

    let pool = common::database::connect(&config.database)
        .await
        .with_context(|| format!("Failed to connect to database {}", config.database.dsn))?;
    let store = Arc::new(SqliteVersionStore::new(pool.clone()));

    let heights = SqlHeightSource::new(
        pool,
        config.trim.height_query.clone(),
        settings.retention_depth,
    );

    let trimmer = Arc::new(Trimmer::new(store, settings));
    for table in &config.trim.tables {
        trimmer
            .register(VersionedTable::from(table))
            .await
            .with_context(|| format!("Failed to register table {}", table.name))?;
    }

    log::info!(
        "Registered {} tables for trimming",
        config.trim.tables.len()
    );

    Ok(Runtime { trimmer, heights })
}

fn log_run(result: &TrimRunResult) {
    log::info!(
        "Trim run {} at trim height {}: {} rows deleted across {} tables",
        result.run_id,
        result.trim_height,
        result.rows_deleted(),
        result.table_results.len()
    );
    for error in &result.errors {
        log::error!("{error}");
    }
}

async fn run_once(config: &Configuration, height: Option<Height>) -> Result<()> {
    let runtime = build_runtime(config).await?;

    let result = match height {
        Some(height) => runtime.trimmer.trim(height).await,
        None => runtime
            .trimmer
            .trim_from(&runtime.heights)
            .await
            .context("Failed to read current height")?,
    };

    log_run(&result);
    runtime.trimmer.metrics().summary().log();

    if !result.is_success() {
        anyhow::bail!("{} tables failed to trim", result.errors.len());
    }
    Ok(())
}

async fn run_probe(config: &Configuration) -> Result<()> {
    let runtime = build_runtime(config).await?;

    for (table, scan_order) in runtime.trimmer.tables().await {
        match scan_order {
            ScanOrder::Available { index } => println!("{table}: ordered (index {index})"),
            ScanOrder::Unavailable(reason) => println!("{table}: fallback ({reason})"),
        }
    }
    Ok(())
}

async fn run_service(config: &Configuration) -> Result<()> {
    if !config.trim.enabled {
        log::info!("Trimming is disabled in configuration (trim.enabled = false)");
        log::info!("Set LEDGERDB__TRIM__ENABLED=true or enable in config file to run the trimmer");
        return Ok(());
    }

    log::info!("Starting LedgerDB Trimmer Service");
    let runtime = build_runtime(config).await?;

    let tick_interval = config.trim.tick_interval;
    log::info!("Trimmer initialized with tick interval: {tick_interval:?}");

    let trim_task = {
        let trimmer = runtime.trimmer.clone();
        let heights = runtime.heights.clone();
        tokio::spawn(async move {
            use tokio::time::interval;
            let mut ticker = interval(tick_interval);

            loop {
                ticker.tick().await;

                log::debug!("Running trim cycle");
                match trimmer.trim_from(&heights).await {
                    Ok(result) => log_run(&result),
                    Err(e) => log::error!("Trim cycle failed: {e:?}"),
                }
            }
        })
    };

    log::info!("Trimmer service running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Received shutdown signal, stopping trimmer service");
    trim_task.abort();

    runtime.trimmer.metrics().summary().log();
    log::info!("Trimmer service stopped");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.common);

    let config = load_config(args.common.config.as_ref())?;

    match args.command.unwrap_or(Command::Common(CommonCommands::Start)) {
        Command::Common(command) => {
            if let CommonCommands::Validate = command {
                TrimSettings::try_from(&config.trim).context("Invalid trim configuration")?;
            }
            if handle_common_command(&command, &config)? {
                return Ok(());
            }
            run_service(&config).await
        }
        Command::Once { height } => run_once(&config, height).await,
        Command::Probe => run_probe(&config).await,
    }
}
