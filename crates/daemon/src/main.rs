//! Lingosync daemon entry point.
//!
//! Loads configuration, initializes the database and merge coordinator,
//! runs the sync scheduler and handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use lingosync_core::config::AppConfig;
use lingosync_core::credentials::ConfigCredentials;
use lingosync_core::db::Database;
use lingosync_core::format::FormatRegistry;
use lingosync_core::MergeCoordinator;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Lingosync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "lingosync-daemon",
    version,
    about = "Keeps translation files in version control in sync with pending translator edits"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load and resolve configuration
    let formats = FormatRegistry::default();
    let config = AppConfig::load_and_resolve(&args.config, &formats)
        .context("failed to load configuration")?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let _log_guard = init_tracing(&log_level, &config)?;

    // Startup banner
    info!("========================================");
    info!("  Lingosync Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Repositories  : {}", config.repositories.len());
    for repo in &config.repositories {
        info!(
            "  {} ({}, {} file(s)) {}",
            repo.id,
            repo.vcs,
            repo.files.len(),
            repo.url
        );
    }
    info!("Poll interval : {}s", config.daemon.poll_interval_secs);
    info!("Commit policy : {:?}", config.sync.commit_policy);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.daemon.data_dir).context("failed to create data directory")?;

    let db_path = config.daemon.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    let credentials = Arc::new(ConfigCredentials::from_config(&config));
    let coordinator = Arc::new(MergeCoordinator::new(
        config.clone(),
        Arc::new(db),
        formats,
        credentials,
    ));

    let shutdown = CancellationToken::new();
    let poll_interval = Duration::from_secs(config.daemon.poll_interval_secs);
    let mut sched = scheduler::Scheduler::new(coordinator, poll_interval);
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move {
        sched.run(scheduler_shutdown).await;
    });

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    // Running cycles observe the cancellation and abandon their work.
    shutdown.cancel();

    match tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    info!("Lingosync daemon stopped.");
    Ok(())
}

/// Log to stdout, and additionally to `daemon.log_file` when configured.
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_level: &str, config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.daemon.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .context("daemon.log_file must name a file")?;
            std::fs::create_dir_all(&dir).context("failed to create log directory")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}
