//! Relay Daemon - HTTP long-poll server for streamed generations
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (localhost:9042)
//! relay-daemon
//!
//! # Custom address and config file
//! relay-daemon --addr 0.0.0.0:8080 --config /etc/relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! Providers are enabled by `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and, for
//! Ollama, a non-empty model list.
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{
    default_config_path, load_config_from_path, AnthropicBackend, Broker, ConfigOverrides,
    LlmBackend, OllamaBackend, OpenAiBackend, Relay, RelayConfig,
};
use relay_daemon::{serve, AppState};
use tracing::{error, info, warn};

/// Relay Daemon - per-channel message broker for streamed generations
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listen address
    #[arg(short = 'a', long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Long-poll timeout in seconds
    #[arg(long, value_name = "SECS")]
    long_poll_timeout: Option<u64>,

    /// Messages every channel keeps regardless of age
    #[arg(long, value_name = "N")]
    keep_min: Option<usize>,

    /// Age in seconds after which messages above the floor are evicted
    #[arg(long, value_name = "SECS")]
    max_age: Option<u64>,

    /// Model used when a request names none
    #[arg(short = 'm', long, value_name = "MODEL")]
    default_model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            addr: self.addr.clone(),
            long_poll_timeout_secs: self.long_poll_timeout,
            keep_min: self.keep_min,
            max_age_secs: self.max_age,
            default_model: self.default_model.clone(),
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Backends for every provider that has credentials or models configured
fn configured_backends(config: &RelayConfig) -> Vec<Arc<dyn LlmBackend>> {
    let mut backends: Vec<Arc<dyn LlmBackend>> = Vec::new();

    match OpenAiBackend::from_env() {
        Some(backend) => {
            let backend = match &config.openai_base_url {
                Some(url) => backend.with_base_url(url),
                None => backend,
            };
            backends.push(Arc::new(backend));
        }
        None => info!("OPENAI_API_KEY not set, OpenAI models disabled"),
    }

    match AnthropicBackend::from_env() {
        Some(backend) => {
            let backend = match &config.anthropic_base_url {
                Some(url) => backend.with_base_url(url),
                None => backend,
            };
            backends.push(Arc::new(backend));
        }
        None => info!("ANTHROPIC_API_KEY not set, Anthropic models disabled"),
    }

    if config.ollama_models.is_empty() {
        info!("No Ollama models configured, Ollama disabled");
    } else {
        backends.push(Arc::new(OllamaBackend::new(
            config.ollama_host.clone(),
            config.ollama_port,
        )));
    }

    backends
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Relay daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate()?;

    info!(
        addr = %config.addr,
        source = %config.source(),
        keep_min = config.retention.keep_min,
        max_age_secs = config.retention.max_age.as_secs(),
        "Configuration resolved"
    );

    let broker = Broker::new(config.retention);
    let relay = configured_backends(&config).into_iter().fold(
        Relay::new(broker, config.model_registry(), config.relay_settings()),
        Relay::with_backend,
    );
    if relay.providers().is_empty() {
        warn!("No providers configured; /ask will answer 503 for every model");
    }

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.addr))?;
    info!(addr = %config.addr, "Listening");

    let state = AppState::new(relay, &config);
    let result = serve(listener, state, config.sweep_interval, shutdown_signal()).await;

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e.into())
        }
    }
}
