use wicap_core::{ConfigStorage, InstrumentSettings};
use wicap_server::{FileConfigStorage, ServerConfig, WiCapServer};
use wicap_web::InstrumentHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Settings directory when `WICAP_CONFIG_DIR` is not set.
const DEFAULT_CONFIG_DIR: &str = "wicap-config";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wicap_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("WiCap starting...");

    // Configuration
    let config_dir =
        std::env::var("WICAP_CONFIG_DIR").unwrap_or_else(|_| DEFAULT_CONFIG_DIR.into());
    let storage = FileConfigStorage::new(&config_dir);
    let settings = load_settings(&storage)?;
    let config = ServerConfig::from_settings(&settings.http)?;
    let bind_addr = config.bind_addr;

    let handle = InstrumentHandle::simulated(&settings);
    let server = WiCapServer::new(config, handle);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Server error: {}", e);
        }
    });

    tracing::info!("WiCap ready on http://{}", bind_addr);
    tracing::info!("   Status:  curl http://{}/status.txt", bind_addr);
    tracing::info!("   Capture: curl 'http://{}/status.txt?xsamp=1000&xrate=10000&cmd=1'", bind_addr);
    tracing::info!("   Data:    curl http://{}/data.bin -o data.bin", bind_addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = server_handle => {
            tracing::warn!("Server stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load stored settings, writing the defaults on first start.
fn load_settings(storage: &FileConfigStorage) -> anyhow::Result<InstrumentSettings> {
    if !storage.has_key("settings") {
        let settings = InstrumentSettings::default();
        storage.save_settings(&settings)?;
        tracing::info!("Wrote default settings to {}", storage.dir().display());
        return Ok(settings);
    }
    let settings = storage.load_or_default()?;
    tracing::info!("Loaded settings from {}", storage.dir().display());
    Ok(settings)
}
