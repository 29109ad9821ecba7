use anyhow::{Context, Result};
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use siphon::{
    config::{Config, ENV_LOG_FORMAT, LogFormat},
    fetcher::HttpFetcher,
    orchestrator::Orchestrator,
    store::Store,
    telemetry,
    uploader::HttpIngestionClient,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Logging comes up before config so config errors are visible
    let log_format = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LogFormat::Text);
    telemetry::init(log_format);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        source = %config.source_url(),
        endpoint = %config.ingest_endpoint(),
        state_dir = %config.state_dir().display(),
        api_key = %config.masked_api_key(),
        "configuration loaded"
    );

    let store = match Store::open(config.state_dir()) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot open store");
            return Ok(ExitCode::FAILURE);
        }
    };

    let fetcher = HttpFetcher::new(config.request_timeout()).context("building page fetcher")?;
    let api = HttpIngestionClient::new(
        config.ingest_endpoint().clone(),
        config.api_key(),
        config.request_timeout(),
    )
    .context("building ingestion client")?;
    let orchestrator = Orchestrator::new(config, store, fetcher, api)?;

    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal, finishing current batch...");
        shutdown_token.cancel();
    });

    let result = orchestrator.run(cancel).await;
    Ok(if result.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
