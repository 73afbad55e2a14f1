use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info};

use mcpulse::api::{self, AppState};
use mcpulse::config::MonitorConfig;
use mcpulse::engine::StatusResolver;
use mcpulse::monitor::PeriodicMonitor;
use mcpulse::notify::WebhookNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_ansi(true)
        .init();

    let config_path = PathBuf::from(std::env::var("MCPULSE_CONFIG").unwrap_or_else(|_| "config.json".to_string()));
    let config = MonitorConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let resolver = Arc::new(StatusResolver::from_config(&config));

    // `mcpulse ping <address>` prints one status and exits.
    let mut args = std::env::args().skip(1);
    if let Some("ping") = args.next().as_deref() {
        let address = args.next().unwrap_or_default();
        let outcome = resolver.resolve(&address).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let monitor = Arc::new(PeriodicMonitor::new(Arc::clone(&resolver), config.scan_targets()));
    if let Some(notifier) = WebhookNotifier::from_config(&config) {
        info!("Notifications go to {}", notifier.url());
        monitor.bind(Arc::new(notifier)).await;
    }
    if config.enable && config.scanner_enable {
        monitor.start(config.ping_interval_seconds).await;
    } else {
        info!("Scanner disabled in config");
    }

    let api_port = config.api_port;
    let state = AppState {
        resolver,
        monitor: Arc::clone(&monitor),
        config: Arc::new(RwLock::new(config)),
        config_path,
    };
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_port, state).await {
            error!("Control API failed: {:#}", e);
        }
    });

    signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping mcpulse...");
    monitor.stop(true).await;

    Ok(())
}
