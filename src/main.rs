use std::sync::Arc;

use anyhow::{Context, Result};
use pulse_sim::{Engine, EngineConfig, FileScenarioSource, HttpTransport};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = EngineConfig::from_env().context("Invalid configuration")?;
    let transport = HttpTransport::new(config.ad_server_host(), config.request_timeout())
        .context("Unable to build the ad server client")?;
    let scenario_source =
        FileScenarioSource::new(config.scenario_path(), config.scenario_poll_interval());

    let engine = Engine::builder()
        .config(config)
        .transport(Arc::new(transport))
        .scenario_source(Arc::new(scenario_source))
        .build()
        .start()
        .await;

    tokio::signal::ctrl_c()
        .await
        .context("Unable to listen for Ctrl-C")?;
    info!("Received Ctrl-C");

    engine.shut_down().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pulse_sim=info,info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
