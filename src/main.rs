use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use warden::audit::{AuditSink, JsonlAuditSink, TracingAuditSink};
use warden::bots::{build_bots, NeutralSignals};
use warden::broker::{BrokerClient, PaperBroker};
use warden::cli::{self, Cli, Commands};
use warden::clock::{Clock, SystemClock};
use warden::config::{AppConfig, LoggingConfig};
use warden::orchestrator::Orchestrator;
use warden::persistence::{SqliteStateStore, StateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load config from {}", cli.config_dir))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let _guard = init_logging(&config.logging);
            run(config).await?;
        }
        Commands::Resume { requested_by } => {
            init_logging_simple();
            let store = open_store(&config).await?;
            let request = store
                .request_resume(&requested_by, SystemClock::new().now())
                .await?;
            println!(
                "Resume request #{} queued by {}; the running loop will re-check limits before resuming",
                request.id, request.requested_by
            );
            store.close().await;
        }
        Commands::Status { cycles } => {
            init_logging_simple();
            let store = open_store(&config).await?;
            cli::print_status(&mut std::io::stdout(), &store, cycles).await?;
            store.close().await;
        }
    }

    Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store: Arc<dyn StateStore> = Arc::new(open_store(&config).await?);

    warn!("no live broker configured; trading against the in-process paper broker");
    let broker: Arc<dyn BrokerClient> =
        Arc::new(PaperBroker::new(config.paper.starting_equity, clock.clone()));

    let audit: Arc<dyn AuditSink> = match &config.audit.jsonl_path {
        Some(path) => {
            info!(path = %path, "writing audit trail");
            Arc::new(JsonlAuditSink::new(path, clock.clone()))
        }
        None => Arc::new(TracingAuditSink),
    };

    let bots = build_bots(&config.bots, Arc::new(NeutralSignals));
    info!(
        configured = bots.len(),
        enabled = config.enabled_bots().count(),
        "bots loaded"
    );

    let orchestrator = Orchestrator::new(&config, store, broker, bots, audit, clock);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let interval = config.runner.loop_interval();
    let loop_task = tokio::spawn(orchestrator.run_forever(interval, shutdown_rx));

    shutdown_signal().await;
    info!("shutdown requested; letting the current cycle finish");
    let _ = shutdown_tx.send(());

    if let Err(e) = loop_task.await {
        error!(error = %e, "orchestrator task ended abnormally");
    }
    info!("warden stopped");
    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStateStore> {
    SqliteStateStore::connect(&config.store.database_url, config.store.max_connections)
        .await
        .with_context(|| format!("failed to open state store {}", config.store.database_url))
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warden=debug,sqlx=warn", config.level)));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                // Daily rotating file appender
                let appender = tracing_appender::rolling::daily(dir, "warden.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not create log directory {} ({}), file logging disabled",
                    dir, e
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let (json_layer, console_layer) = if config.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
