//! livefleet - Browser fleet client
//!
//! Keeps a pool of browser sessions open on live-stream pages, keeps them
//! looking watched, and follows orders from the relay server.
//!
//! Environment variables:
//! - `LIVEFLEET_RELAY_URL` - Relay WebSocket URL override
//! - `LIVEFLEET_WEB_PORT` - Local HTTP server port override

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = livefleet::init_logging();

    info!("Starting livefleet");

    if let Some(dir) = livefleet::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let mut config = livefleet::AppConfig::load();

    if let Ok(url) = std::env::var("LIVEFLEET_RELAY_URL") {
        if !url.is_empty() {
            info!("Relay URL override from environment: {}", url);
            config.relay.url = url;
        }
    }
    if let Some(port) = std::env::var("LIVEFLEET_WEB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        config.web_port = port;
    }

    // No display means headless is the only option
    let has_display = std::env::var("DISPLAY").map(|d| !d.is_empty()).unwrap_or(false);
    if cfg!(target_os = "linux") && !has_display && !config.headless {
        info!("No DISPLAY available - forcing headless mode");
        config.headless = true;
    }

    config.save();
    let web_port = config.web_port;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let state = Arc::new(livefleet::AppState::new(config, outbound_tx));

    let web_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = livefleet::web::start_server(web_state, web_port).await {
            error!("Web server failed: {}", e);
        }
    });

    let handles = livefleet::fleet::start_fleet(state.clone(), outbound_rx).await?;
    info!("Fleet started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    livefleet::fleet::shutdown(&state, handles).await;

    Ok(())
}
