//! Ziproxy binary.
//!
//! Loads the configuration, binds the listener and serves until SIGINT or
//! SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ziproxy::config::validation::validate_config;
use ziproxy::config::{load_config, ConfigError, ProxyConfig};
use ziproxy::lifecycle::{wait_for_signal, Shutdown};
use ziproxy::net::Listener;
use ziproxy::observability::logging::init_tracing;
use ziproxy::observability::metrics::init_metrics;
use ziproxy::observability::AccessLog;
use ziproxy::tables::Tables;
use ziproxy::transform::Transformers;
use ziproxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "ziproxy", version, about = "Compressing HTTP forward and transparent proxy")]
struct Cli {
    /// Configuration file (TOML). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let tables = Tables::from_config(&config)?;

    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ziproxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_size = config.limits.max_size,
        gzip = config.transform.gzip,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validated above.
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(error = %e, "Invalid metrics address"),
        }
    }

    let (access_log, access_log_writer) = AccessLog::open(config.observability.access_log.as_deref()).await?;
    let listener = Listener::bind(&config.listener).await?;

    let config = Arc::new(config);
    let server = HttpServer::new(
        Arc::clone(&config),
        Arc::new(tables),
        Transformers::default(),
        access_log,
    );

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let serving = tokio::spawn(server.run(listener, signal));

    wait_for_signal().await;
    shutdown.trigger();

    serving.await??;
    if let Some(writer) = access_log_writer {
        if !writer.finish(Duration::from_secs(2)).await {
            tracing::warn!("Access log writer did not finish in time");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
