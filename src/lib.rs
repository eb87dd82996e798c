//! livefleet
//!
//! A fleet client that keeps many isolated browser sessions open on
//! live-stream pages, simulates human pointer activity so they stay live,
//! and takes its orders from a central relay server over a persistent
//! WebSocket connection.

pub mod browser;
pub mod dispatch;
pub mod fleet;
pub mod identity;
pub mod liveness;
pub mod relay;
pub mod web;
pub mod worker;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use browser::{BrowserSessionConfig, SessionPool};
use liveness::LivenessConfig;
use relay::{AccountRecord, ChannelStatus, Outbound, RelayConfig};
use worker::WorkerSupervisor;

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Relay connection settings
    pub relay: RelayConfig,

    /// Number of browser sessions to keep open
    pub pool_size: usize,
    /// Run browsers headless
    pub headless: bool,
    /// Explicit Chrome/Chromium path (auto-detected when unset)
    pub chrome_path: Option<String>,
    /// Navigation timeout in seconds
    pub nav_timeout_secs: u64,

    /// Liveness driver settings
    pub liveness: LivenessConfig,

    /// Accounts announced to the relay (read-only from this side)
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,

    /// Override for the persisted device id file
    #[serde(default)]
    pub device_id_file: Option<String>,

    /// Port for the local status/download HTTP server
    pub web_port: u16,
    /// File served at GET /download
    #[serde(default)]
    pub download_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            pool_size: 5,
            headless: false,
            chrome_path: None,
            nav_timeout_secs: 60,
            liveness: LivenessConfig::default(),
            accounts: vec![],
            device_id_file: None,
            web_port: 8080,
            download_file: None,
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("livefleet").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("livefleet").join("config.json"))
    }

    /// Path of the persisted device id file
    pub fn device_id_path(&self) -> PathBuf {
        if let Some(ref path) = self.device_id_file {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .map(|p| p.join("livefleet").join("device_id"))
            .unwrap_or_else(|| PathBuf::from("device_id"))
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }

    /// Session config template derived from this app config
    pub fn session_config(&self) -> BrowserSessionConfig {
        BrowserSessionConfig::default()
            .headless(self.headless)
            .chrome_path(self.chrome_path.clone())
            .timeout(self.nav_timeout_secs)
    }
}

/// Application state shared across the fleet
pub struct AppState {
    /// Browser session pool
    pub pool: Arc<SessionPool>,
    /// Per-account gather workers
    pub supervisor: Arc<WorkerSupervisor>,
    /// Observable relay connection state
    pub channel_status: Arc<ChannelStatus>,
    /// Queue of messages to the relay
    pub outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,
    /// Fleet running flag; cleared exactly once on shutdown
    pub is_running: Arc<AtomicBool>,
}

impl AppState {
    /// Create application state. The outbound sender feeds the relay
    /// channel created alongside this state in `main`.
    pub fn new(config: AppConfig, outbound_tx: mpsc::UnboundedSender<Outbound>) -> Self {
        let pool = Arc::new(SessionPool::new(config.session_config()));
        let supervisor = Arc::new(WorkerSupervisor::new(outbound_tx.clone()));

        Self {
            pool,
            supervisor,
            channel_status: Arc::new(ChannelStatus::new()),
            outbound_tx,
            config: Arc::new(RwLock::new(config)),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Initialize logging: console layer plus a daily-rolling file layer when a
/// log directory is available.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "livefleet.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.nav_timeout_secs, 60);
        assert_eq!(config.relay.heartbeat_secs, 30);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = AppConfig {
            pool_size: 3,
            headless: true,
            accounts: vec![AccountRecord {
                id: "1".to_string(),
                account_id: "gg-1".to_string(),
                device_name: String::new(),
            }],
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.pool_size, 3);
        assert!(parsed.headless);
        assert_eq!(parsed.accounts.len(), 1);
    }

    #[test]
    fn test_session_config_inherits_app_settings() {
        let config = AppConfig {
            headless: true,
            nav_timeout_secs: 30,
            ..Default::default()
        };
        let session = config.session_config();
        assert!(session.headless);
        assert_eq!(session.nav_timeout_secs, 30);
    }
}
