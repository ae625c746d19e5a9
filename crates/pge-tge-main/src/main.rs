// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of PGE TGE.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use pge_tge_adapters::{HaSensorPublisher, HomeAssistantClient, PgeDataHubSource};
use pge_tge_core::{JsonFileSnapshotStore, PriceCoordinator, PriceRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pge-tge")]
#[command(about = "PGE TGE day-ahead fixing prices for Home Assistant", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Refresh once, print the sensor states as JSON and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (config, source) = AppConfig::load(args.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.system.log_level)),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("🚀 Starting PGE TGE price cache v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from {source}");
    info!("   Timezone: {}", config.system.timezone);
    info!("   Unit: {}", config.sensors.unit.label());
    info!("   Update interval: {}s", config.system.update_interval_secs);
    info!("   State file: {}", config.system.state_path.display());

    let tz = config.timezone()?;

    // The blocking HTTP client owns its own runtime; it is created and
    // finally dropped outside of the async runtime
    let datahub = Arc::new(PgeDataHubSource::new(
        config.source.base_url.clone(),
        &config.source.user_agent,
        config.timeout(),
        tz,
    )
    .context("Failed to create datahub client")?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(run(config, Arc::clone(&datahub), args.once));
    drop(runtime);
    drop(datahub);
    result
}

async fn run(config: AppConfig, datahub: Arc<PgeDataHubSource>, once: bool) -> Result<()> {
    let tz = config.timezone()?;
    let store = Arc::new(JsonFileSnapshotStore::new(&config.system.state_path));
    let coordinator = Arc::new(PriceCoordinator::new(
        datahub,
        config.build_calculator(),
        store,
        tz,
    ));

    let mut runner = PriceRunner::new(coordinator, config.sensors.unit)
        .with_metrics(config.metrics())
        .with_interval(config.update_interval());

    if once {
        if let Err(e) = runner.start().await {
            error!("❌ Refresh failed: {e}");
        }
        runner.coordinator().on_detach();

        let states = runner.states(&runner.coordinator().now());
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    match connect_home_assistant(&config).await {
        Some(client) => {
            runner = runner.with_publisher(Arc::new(HaSensorPublisher::new(client)));
        }
        None => warn!("Home Assistant publishing disabled, prices are only cached"),
    }

    runner.run(shutdown_signal()).await;
    info!("👋 Shutdown complete");
    Ok(())
}

/// Supervisor API when running as an addon, otherwise the configured instance
async fn connect_home_assistant(config: &AppConfig) -> Option<HomeAssistantClient> {
    let client = if std::env::var("SUPERVISOR_TOKEN").is_ok() {
        HomeAssistantClient::from_supervisor()
    } else {
        // Credentials may live outside the config file
        HomeAssistantClient::from_config(
            config.system.ha_base_url.clone().or_else(|| std::env::var("HA_BASE_URL").ok()),
            config.system.ha_token.clone().or_else(|| std::env::var("HA_TOKEN").ok()),
        )
    };

    let client = match client {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to initialize HA client: {e}");
            return None;
        }
    };

    match client.ping().await {
        Ok(true) => info!("✅ Connected to Home Assistant at {}", client.base_url()),
        Ok(false) => warn!("Home Assistant at {} did not answer, will keep trying", client.base_url()),
        Err(e) => warn!("Home Assistant ping failed: {e}"),
    }
    Some(client)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
