//! Elasticsearch exporter — exposes cluster metrics for Prometheus.
//!
//! Starts the cluster info retriever, wires the optional scrapers to it,
//! and serves `/metrics` until interrupted.

use anyhow::{Context, Result};
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use elasticsearch_exporter::clusterinfo::{Retriever, RunError};
use elasticsearch_exporter::collector::{self, AllSettings, Shared};
use elasticsearch_exporter::config::{Config, LogFormat, LogOutput};
use elasticsearch_exporter::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    init_tracing(&config);

    info!("Elasticsearch exporter v{}", env!("CARGO_PKG_VERSION"));

    let listen_addr = config.listen_addr()?;
    let es_url = Url::parse(&config.es_uri).context("failed to parse es.uri")?;

    let registry = Registry::new();
    registry.register(Box::new(collector::build_info()?))?;

    // ── Cluster info retriever ──────────────────────────────────────
    let retriever = Retriever::new(
        &config.es_uri,
        config.es_timeout,
        config.clusterinfo_interval,
    );

    let mut state = AppState::new(registry.clone(), &config.metrics_path);

    // ── Scrapers ────────────────────────────────────────────────────
    if config.export_all_settings {
        let client = reqwest::Client::builder()
            .timeout(config.es_timeout)
            .build()
            .context("failed to build Elasticsearch HTTP client")?;
        let all_settings = Arc::new(AllSettings::new(client, &es_url)?);
        registry.register(Box::new(Shared(Arc::clone(&all_settings))))?;
        retriever
            .register_consumer(all_settings.clone())
            .context("failed to register all settings collector in cluster info")?;
        state = state.with_all_settings(all_settings);
    }

    let cancel = CancellationToken::new();
    match retriever.run(cancel.clone()).await {
        Ok(()) => info!(
            interval = ?config.clusterinfo_interval,
            "Started cluster info retriever"
        ),
        Err(RunError::InitialCallTimeout(timeout)) => {
            info!(timeout = ?timeout, "Initial cluster info call timed out");
        }
        Err(e) => return Err(e).context("failed to run cluster info retriever"),
    }

    registry.register(Box::new(retriever.collector()?))?;

    // ── HTTP server ─────────────────────────────────────────────────
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;
    info!(addr = %listen_addr, "Starting elasticsearch_exporter");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server quit")?;

    info!("Shutting down");
    cancel.cancel();
    retriever.wait().await;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("elasticsearch_exporter={}", config.log_level).into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match (config.log_format, config.log_output) {
        (LogFormat::Logfmt, LogOutput::Stdout) => builder.init(),
        (LogFormat::Logfmt, LogOutput::Stderr) => builder.with_writer(std::io::stderr).init(),
        (LogFormat::Json, LogOutput::Stdout) => builder.json().init(),
        (LogFormat::Json, LogOutput::Stderr) => builder.json().with_writer(std::io::stderr).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
