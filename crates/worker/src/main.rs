use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use va_domain::config::{Config, ConfigSeverity};
use va_metrics::MetricsSink;
use va_protocol::WorkerCapability;
use va_providers::ProviderRegistry;
use va_worker::cli::{Cli, Command, ConfigCommand};
use va_worker::{ReconnectBackoff, WorkerClient, WorkerDeps, WorkerError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = va_worker::cli::load_config()?;
            match serve(Arc::new(config)).await {
                Ok(()) => Ok(()),
                Err(ServeError::AuthNotConfigured(msg)) => {
                    tracing::error!(error = %msg, "worker exited: room-server credentials not configured");
                    std::process::exit(2);
                }
                Err(ServeError::Other(e)) => {
                    tracing::error!(error = %e, "worker exited with a fatal error");
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Doctor) => {
            let (config, config_path) = va_worker::cli::load_config()?;
            let passed = va_worker::cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = va_worker::cli::load_config()?;
            let valid = va_worker::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = va_worker::cli::load_config()?;
            va_worker::cli::config::show(&config);
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,va_worker=debug")),
        )
        .json()
        .init();
}

/// Why `serve` stopped before or during a connection attempt, carrying
/// enough information for `main` to pick an exit code.
#[derive(thiserror::Error, Debug)]
enum ServeError {
    /// `server.url`/`api_key`/`api_secret` are not all set — the worker
    /// can't even attempt the handshake. Distinct from a generic config
    /// error because it is the one startup failure the room-server
    /// operator is expected to hit routinely (a fresh checkout with no
    /// secrets yet), so it gets its own exit code.
    #[error("{0}")]
    AuthNotConfigured(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Connect to the room-server control plane and serve dispatched jobs
/// until shutdown.
///
/// Exit codes (handled by `main`): `0` clean shutdown, `1` fatal init
/// error or reconnect exhaustion, `2` room-server credentials not
/// configured.
async fn serve(config: Arc<Config>) -> Result<(), ServeError> {
    if !config.server.is_configured() {
        return Err(ServeError::AuthNotConfigured(
            "server.url, server.api_key and server.api_secret must all be set to connect to the room-server control plane".into(),
        ));
    }
    serve_connected(config).await.map_err(ServeError::Other)
}

async fn serve_connected(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("voice-agent-worker starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let ws_url = config
        .server
        .url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("server.url must be set to connect to the room-server"))?;

    let llm = Arc::new(ProviderRegistry::from_config(&config.llm)?);
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — dispatched jobs will fail at think()");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    let metrics = Arc::new(MetricsSink::default());

    let worker_id = std::env::var("VA_WORKER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let client = WorkerClient {
        ws_url,
        worker_id: worker_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: vec![WorkerCapability {
            name: "voice-agent".into(),
            description: "Drives STT/LLM/TTS telephony conversations".into(),
        }],
        heartbeat_interval: Duration::from_secs(30),
        reconnect_backoff: ReconnectBackoff::default(),
    };

    let deps = WorkerDeps { config, llm, metrics };
    let shutdown = CancellationToken::new();

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            shutdown_signal.cancel();
        }
    });

    tracing::info!(worker_id = %worker_id, "worker ready, connecting to room-server");

    match client.run(deps, shutdown).await {
        Ok(()) => Ok(()),
        Err(WorkerError::Shutdown) => {
            tracing::info!("worker shut down cleanly");
            Ok(())
        }
        Err(e @ WorkerError::ReconnectExhausted(_)) => Err(anyhow::anyhow!(e)),
    }
}
