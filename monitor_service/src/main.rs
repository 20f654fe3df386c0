// monitor_service/src/main.rs
use monitor_service::Monitor;
use network_service::Services;
use shared::MonitorConfig;
use std::sync::Arc;
use storage_service::SledStorage;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = MonitorConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level.parse::<Level>().unwrap_or(Level::INFO))
        .init();

    let storage = Arc::new(SledStorage::open(&config.storage_path)?);
    let services = Arc::new(Services::from_config(config.chain, &config.providers));
    info!(
        "Monitor for {} chain with {} providers",
        config.chain,
        config.providers.len()
    );

    let monitor = Arc::new(Monitor::new(storage.clone(), services, config)?);
    monitor.add_default_tasks().await?;

    let runner = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.start_tasks().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down monitor");
    monitor.stop_tasks();
    runner.await??;
    storage.flush().await?;
    Ok(())
}
