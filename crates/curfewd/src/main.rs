//! curfewd - the curfew policy daemon
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - Core engine and its recompute actor
//! - The host protocol: NDJSON events on stdin, NDJSON replies on stdout

mod handler;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use curfew_api::{HostReply, ReplyPayload};
use curfew_config::load_config_or_default;
use curfew_core::{CoreEngine, RebuildScheduler};
use curfew_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use curfew_util::{default_config_path, format_datetime_full, is_mock_time_active, DATABASE_FILENAME};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// curfewd - App-blocking policy daemon for personal devices
#[derive(Parser, Debug)]
#[command(name = "curfewd")]
#[command(about = "App-blocking policy daemon for personal devices", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/curfew/config.toml)
    #[arg(short, long, env = "CURFEW_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CURFEW_DATA_DIR env var)
    #[arg(short, long, env = "CURFEW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Main service state
struct Service {
    engine: Arc<CoreEngine>,
    scheduler: RebuildScheduler,
    store: Arc<dyn Store>,
    usage_flush: std::time::Duration,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        let config = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            self_package = %config.engine.self_package,
            whitelist = config.whitelist.len(),
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.engine.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let now = curfew_util::now();
        if is_mock_time_active() {
            warn!(now = %format_datetime_full(&now), "Running with mock time");
        }
        store.append_audit(AuditEvent::new(AuditEventType::DaemonStarted, now))?;

        let (engine, scheduler) =
            CoreEngine::new(&config, store.clone(), now).context("Failed to start core engine")?;

        Ok(Self {
            engine: Arc::new(engine),
            scheduler,
            store,
            usage_flush: config.engine.usage_flush,
        })
    }

    async fn run(self) -> Result<()> {
        let engine = self.engine;
        let store = self.store;

        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let actor = tokio::spawn(self.scheduler.run(events_tx, shutdown_rx));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut flush_timer = tokio::time::interval(self.usage_flush);
        // Skip the immediate first tick
        flush_timer.tick().await;

        let now = curfew_util::now();
        write_reply(
            &mut stdout,
            ReplyPayload::PolicyActivity {
                active: engine.is_any_policy_active(),
            },
            now,
        )
        .await?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let now = curfew_util::now();
                            for payload in handler::handle_line(&engine, &line, now) {
                                write_reply(&mut stdout, payload, now).await?;
                            }
                        }
                        Ok(None) => {
                            info!("Host closed stdin, shutting down");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to read from host");
                            break;
                        }
                    }
                }

                Some(event) = events_rx.recv() => {
                    debug!(?event, "Core event");
                    let payload = handler::reply_for_core_event(event);
                    write_reply(&mut stdout, payload, curfew_util::now()).await?;
                }

                _ = flush_timer.tick() => {
                    if let Err(e) = engine.flush_usage(curfew_util::now()) {
                        warn!(error = %e, "Failed to flush usage");
                    }
                }
            }
        }

        info!("Shutting down curfewd");

        let _ = shutdown_tx.send(true);
        if let Err(e) = actor.await {
            warn!(error = %e, "Recompute actor did not stop cleanly");
        }

        let now = curfew_util::now();
        match engine.flush_usage(now) {
            Ok(packages) => info!(packages, "Usage flushed"),
            Err(e) => warn!(error = %e, "Failed to flush usage on shutdown"),
        }

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::DaemonStopped, now)) {
            warn!(error = %e, "Failed to log daemon shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Write one reply line and flush it to the host
async fn write_reply<W>(out: &mut W, payload: ReplyPayload, now: DateTime<Local>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(&HostReply::new(payload, now))?;
    line.push('\n');
    out.write_all(line.as_bytes())
        .await
        .context("Failed to write reply")?;
    out.flush().await.context("Failed to flush reply")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries replies; logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "curfewd starting");

    let service = Service::new(&args)?;
    service.run().await
}
