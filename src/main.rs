#![forbid(unsafe_code)]

//! `grok-sidecar` binary.
//!
//! Loads configuration, then speaks the request/event protocol on
//! stdin/stdout until `shutdown`, EOF, or a termination signal. Logs go to
//! stderr or `--log-file`; stdout carries protocol frames only.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use grok_sidecar::backend::xai::XaiBackend;
use grok_sidecar::engine::ProtocolEngine;
use grok_sidecar::protocol::OutputSink;
use grok_sidecar::service::SidecarService;
use grok_sidecar::{AppError, Result, SidecarConfig};

/// How long the runtime waits for stray tasks (blocked stdin reads,
/// abandoned chats) before the process exits.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "grok-sidecar", about = "Grok protocol sidecar", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "GROK_SIDECAR_CONFIG")]
    config: Option<PathBuf>,

    /// Additional `.env` file to load before reading credentials.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Override the configured default model.
    #[arg(long, env = "GROK_SIDECAR_MODEL")]
    model: Option<String>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "GROK_SIDECAR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "GROK_SIDECAR_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    if let Some(path) = &args.env_file {
        dotenvy::from_path(path).map_err(|err| {
            AppError::Config(format!("failed to load env file {}: {err}", path.display()))
        })?;
    }
    init_tracing(&args)?;
    info!(version = env!("CARGO_PKG_VERSION"), "grok sidecar bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let outcome = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    outcome
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SidecarConfig::load_from_path(path)?,
        None => SidecarConfig::default(),
    };
    if let Some(model) = args.model.filter(|m| !m.trim().is_empty()) {
        config.model = model;
    }
    config.load_credentials();
    let config = Arc::new(config);
    info!(model = %config.model, base_url = %config.base_url, "configuration loaded");

    let service = Arc::new(SidecarService::new(
        Arc::clone(&config),
        XaiBackend::factory(),
    )?);
    let engine = ProtocolEngine::new(service, OutputSink::stdout());

    let ct = engine.cancellation_token();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        ct.cancel();
    });

    let outcome = engine.run(tokio::io::stdin()).await;
    signal_handle.abort();
    info!("grok sidecar shut down");
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(args: &Cli) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .map_err(|err| AppError::Config(format!("invalid log level: {err}")))?,
    };

    let (writer, ansi) = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    AppError::Config(format!("cannot open log file {}: {err}", path.display()))
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(ansi);

    match args.log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
