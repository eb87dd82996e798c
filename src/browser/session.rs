//! Browser session management
//!
//! Handles launching and controlling individual Chrome browser instances.
//! Each session gets its own persistent profile directory so cookies and
//! cache never cross sessions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::BrowserError;

/// User agents rotated before every navigation so the fleet does not present
/// a single identical fingerprint.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4577.82 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.71 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.45 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/100.0.4896.75 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/101.0.4951.41 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/102.0.5005.63 Safari/537.36",
];

/// Pick a random user agent from the rotation list.
pub fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Remove stale cache and cookie directories from a profile directory before
/// launch. Missing paths are fine; the profile may be brand new.
pub fn clear_profile_cache(user_data_dir: &Path) {
    for sub in ["Cache", "Cookies"] {
        let path = user_data_dir.join("Default").join(sub);
        if path.exists() {
            match std::fs::remove_dir_all(&path).or_else(|_| std::fs::remove_file(&path)) {
                Ok(()) => debug!("Cleared stale profile data: {}", path.display()),
                Err(e) => warn!("Failed to clear {}: {}", path.display(), e),
            }
        }
    }
}

/// Configuration for a browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSessionConfig {
    /// Path to Chrome/Chromium executable
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// User data directory (per-session persistent profile)
    pub user_data_dir: Option<String>,
    /// Navigation timeout in seconds
    pub nav_timeout_secs: u64,
    /// Minimum pre-navigation delay in milliseconds
    pub min_nav_delay_ms: u64,
    /// Maximum pre-navigation delay in milliseconds
    pub max_nav_delay_ms: u64,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
}

impl Default for BrowserSessionConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            user_data_dir: None,
            nav_timeout_secs: 60,
            min_nav_delay_ms: 2000,
            max_nav_delay_ms: 5000,
            window_width: 1280,
            window_height: 800,
        }
    }
}

impl BrowserSessionConfig {
    /// Create config for a specific session slot with its own data directory
    pub fn for_session(index: usize) -> Self {
        let base = std::env::temp_dir().join("livefleet").join("browser_data");
        let user_data_dir = base.join(format!("session_{}", index)).to_string_lossy().to_string();

        Self {
            user_data_dir: Some(user_data_dir),
            ..Default::default()
        }
    }

    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set Chrome path
    pub fn chrome_path(mut self, path: Option<String>) -> Self {
        self.chrome_path = path;
        self
    }

    /// Set navigation timeout
    pub fn timeout(mut self, secs: u64) -> Self {
        self.nav_timeout_secs = secs;
        self
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Ready,
    Navigating,
    Closed,
}

/// One isolated browser process and its tabs
pub struct BrowserSession {
    /// Pool slot index
    pub id: usize,
    /// Display name, e.g. "Viewer-1"
    pub name: String,
    /// The browser instance
    browser: RwLock<Option<Browser>>,
    /// Session configuration
    config: BrowserSessionConfig,
    /// Lifecycle status
    status: RwLock<SessionStatus>,
    /// Whether the Chrome process is still connected
    alive: Arc<AtomicBool>,
    /// Serializes command-driven navigation against liveness ticks.
    /// Liveness only ever try-locks this; navigation waits on it.
    action: Mutex<()>,
}

impl BrowserSession {
    /// Launch a new browser session with the given config
    pub async fn launch(id: usize, config: BrowserSessionConfig) -> Result<Self, BrowserError> {
        let name = format!("Viewer-{}", id + 1);

        info!("Launching browser session {} (headless: {})", name, config.headless);

        if config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(BrowserError::LaunchFailed(
                "Chrome/Chromium not found on this machine".to_string(),
            ));
        }

        let mut builder = BrowserConfig::builder();

        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            debug!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        if let Some(ref dir) = config.user_data_dir {
            // Stale cache/cookies from a previous run are cleared first
            clear_profile_cache(Path::new(dir));
            let _ = std::fs::create_dir_all(dir);
            builder = builder.user_data_dir(dir);
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-restore-session-state")
            .arg("--disable-notifications")
            .arg("--disable-infobars")
            .arg("--no-sandbox")
            .window_size(config.window_width, config.window_height);

        let browser_config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Drive the CDP event stream; when it ends, Chrome has disconnected.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let name_for_handler = name.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Session {} handler event error: {}", name_for_handler, e);
                }
            }
            warn!("Session {} Chrome disconnected (event handler ended)", name_for_handler);
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Chrome opens with a blank tab; keep exactly one page.
        {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            if pages.is_empty() {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
            } else {
                for extra in pages.split_off(1) {
                    let _ = extra.close().await;
                }
            }
        }

        info!("Browser session {} created", name);

        Ok(Self {
            id,
            name,
            browser: RwLock::new(Some(browser)),
            config,
            status: RwLock::new(SessionStatus::Ready),
            alive,
            action: Mutex::new(()),
        })
    }

    /// Check if the Chrome process is still connected
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Current lifecycle status
    pub async fn status(&self) -> SessionStatus {
        self.status.read().await.clone()
    }

    /// Non-blocking attempt to take the per-session action lock.
    ///
    /// Used by the liveness driver: a session busy with a command-driven
    /// navigation is skipped for this tick rather than waited on.
    pub fn try_action_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.action.try_lock().ok()
    }

    /// All currently open tabs in this session
    pub async fn pages(&self) -> Result<Vec<Page>, BrowserError> {
        let browser = self.browser.read().await;
        let browser = browser
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("Session closed".into()))?;
        browser
            .pages()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))
    }

    /// Navigate this session to `url`.
    ///
    /// Rotates the user agent, applies a randomized pre-navigation delay so
    /// the fleet does not hit the target in a synchronized burst, waits for
    /// the network to settle within the configured timeout, and closes every
    /// other tab so per-session memory stays bounded.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let _guard = self.action.lock().await;
        *self.status.write().await = SessionStatus::Navigating;

        let result = self.navigate_inner(url).await;

        *self.status.write().await = if result.is_ok() {
            SessionStatus::Ready
        } else if self.is_alive() {
            SessionStatus::Ready
        } else {
            SessionStatus::Closed
        };

        result
    }

    async fn navigate_inner(&self, url: &str) -> Result<(), BrowserError> {
        let pages = self.pages().await?;
        let page = pages
            .first()
            .ok_or_else(|| BrowserError::NavigationFailed("No open page in session".into()))?;

        self.apply_random_user_agent(page).await?;

        let delay = rand::thread_rng()
            .gen_range(self.config.min_nav_delay_ms..=self.config.max_nav_delay_ms);
        debug!("Session {} pre-navigation delay {}ms", self.name, delay);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        debug!("Session {} navigating to: {}", self.name, url);
        tokio::time::timeout(Duration::from_secs(self.config.nav_timeout_secs), async {
            page.goto(url)
                .await
                .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
            Ok::<(), BrowserError>(())
        })
        .await
        .map_err(|_| {
            BrowserError::Timeout(format!(
                "Navigation to {} timed out after {}s",
                url, self.config.nav_timeout_secs
            ))
        })??;

        // Keep only the freshly navigated tab
        for extra in pages.iter().skip(1) {
            let _ = extra.clone().close().await;
        }

        info!("Session {} opened {}", self.name, url);
        Ok(())
    }

    /// Apply a randomly rotated user agent via CDP
    async fn apply_random_user_agent(&self, page: &Page) -> Result<(), BrowserError> {
        let ua = random_user_agent();
        debug!("Session {} user agent: {}", self.name, ua);

        page.execute(SetUserAgentOverrideParams::new(ua))
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    /// Close the browser session. Idempotent.
    pub async fn close(&self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::Relaxed);
        *self.status.write().await = SessionStatus::Closed;

        let mut browser = self.browser.write().await;
        if let Some(mut b) = browser.take() {
            // Graceful close first, then force kill so no Chrome child
            // processes are left behind.
            let _ = b.close().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = b.kill().await;
            info!("Browser session {} closed", self.name);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_comes_from_rotation_list() {
        for _ in 0..50 {
            let ua = random_user_agent();
            assert!(USER_AGENTS.contains(&ua));
        }
    }

    #[test]
    fn test_for_session_uses_distinct_profile_dirs() {
        let a = BrowserSessionConfig::for_session(0);
        let b = BrowserSessionConfig::for_session(1);
        assert_ne!(a.user_data_dir, b.user_data_dir);
        assert!(a.user_data_dir.unwrap().contains("session_0"));
    }

    #[test]
    fn test_clear_profile_cache_removes_stale_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("Default").join("Cache");
        let cookies = dir.path().join("Default").join("Cookies");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(cookies.parent().unwrap()).unwrap();
        std::fs::write(&cookies, b"stale").unwrap();

        clear_profile_cache(dir.path());

        assert!(!cache.exists());
        assert!(!cookies.exists());
    }

    #[test]
    fn test_clear_profile_cache_tolerates_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        // No Default/ directory at all
        clear_profile_cache(dir.path());
    }
}
