//! Browser session pool
//!
//! Owns the fixed-size collection of browser instances. One dead browser
//! must never stop the fleet: every launch and navigation failure is
//! contained to its own session and reported individually.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::{BrowserError, BrowserSession, BrowserSessionConfig, SessionStatus};

/// Per-launch timeout; a hung Chrome start must not stall the whole batch.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Information about a browser session (for the status API)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: usize,
    pub name: String,
    pub alive: bool,
    pub status: SessionStatus,
}

/// Pool of isolated browser sessions
pub struct SessionPool {
    /// All live sessions; never more than the configured pool size
    sessions: RwLock<Vec<Arc<BrowserSession>>>,
    /// Template configuration for new sessions
    default_config: BrowserSessionConfig,
}

impl SessionPool {
    /// Create a new, empty pool
    pub fn new(default_config: BrowserSessionConfig) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            default_config,
        }
    }

    /// Launch `count` browser sessions in parallel.
    ///
    /// Each session gets its own profile directory. Failure of one launch
    /// does not abort the others; the pool ends up with however many came up.
    /// Returns the ids of the sessions that launched. Zero successful
    /// launches out of a non-zero request is the only fatal case.
    pub async fn create_sessions(&self, count: usize) -> Result<Vec<usize>, BrowserError> {
        use futures::future::join_all;

        info!("=== LAUNCHING {} BROWSER SESSIONS IN PARALLEL ===", count);

        let mut launches = Vec::with_capacity(count);
        for i in 0..count {
            let config = BrowserSessionConfig::for_session(i)
                .headless(self.default_config.headless)
                .chrome_path(self.default_config.chrome_path.clone())
                .timeout(self.default_config.nav_timeout_secs);

            launches.push(tokio::spawn(async move {
                let result =
                    tokio::time::timeout(LAUNCH_TIMEOUT, BrowserSession::launch(i, config)).await;
                (i, result)
            }));
        }

        let results = join_all(launches).await;
        let mut launched = Vec::with_capacity(count);

        for result in results {
            match result {
                Ok((i, Ok(Ok(session)))) => {
                    info!("<<< Session {}/{} ready: {}", i + 1, count, session.name);
                    launched.push(i);
                    self.sessions.write().await.push(Arc::new(session));
                }
                Ok((i, Ok(Err(e)))) => {
                    error!("!!! Session {}/{} FAILED: {}", i + 1, count, e);
                }
                Ok((i, Err(_))) => {
                    error!(
                        "!!! Session {}/{} TIMED OUT ({}s)",
                        i + 1,
                        count,
                        LAUNCH_TIMEOUT.as_secs()
                    );
                }
                Err(e) => {
                    error!("!!! Session launch task panicked: {}", e);
                }
            }
        }

        info!("=== {} of {} sessions launched successfully ===", launched.len(), count);

        if launched.is_empty() && count > 0 {
            return Err(BrowserError::PoolError("All session launches failed".into()));
        }

        Ok(launched)
    }

    /// Get a session by id
    pub async fn get_session(&self, id: usize) -> Option<Arc<BrowserSession>> {
        self.sessions.read().await.iter().find(|s| s.id == id).cloned()
    }

    /// Get all sessions
    pub async fn sessions(&self) -> Vec<Arc<BrowserSession>> {
        self.sessions.read().await.clone()
    }

    /// Number of sessions currently in the pool
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Navigate every session to `url`.
    ///
    /// Failures are contained per session and returned alongside the ids so
    /// the caller can see exactly which viewers made it.
    pub async fn navigate_all(&self, url: &str) -> Vec<(usize, Result<(), BrowserError>)> {
        let sessions = self.sessions().await;
        let mut results = Vec::with_capacity(sessions.len());

        for session in sessions {
            let outcome = session.navigate(url).await;
            if let Err(ref e) = outcome {
                warn!("Session {} navigation failed: {}", session.name, e);
            }
            results.push((session.id, outcome));
        }

        results
    }

    /// Navigate a single session to `url`
    pub async fn navigate_one(&self, id: usize, url: &str) -> Result<(), BrowserError> {
        let session = self
            .get_session(id)
            .await
            .ok_or_else(|| BrowserError::SessionNotFound(format!("session {}", id)))?;
        session.navigate(url).await
    }

    /// Snapshot of every session's state (for the status API)
    pub async fn session_info(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos = Vec::with_capacity(sessions.len());

        for session in sessions.iter() {
            infos.push(SessionInfo {
                id: session.id,
                name: session.name.clone(),
                alive: session.is_alive(),
                status: session.status().await,
            });
        }

        infos
    }

    /// Close every session. Idempotent: a second call finds an empty pool.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<BrowserSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain(..).collect()
        };

        for session in sessions {
            if let Err(e) = session.close().await {
                warn!("Error closing session {}: {}", session.name, e);
            }
        }

        info!("All browser sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_pool_reports_zero_sessions() {
        let pool = SessionPool::new(BrowserSessionConfig::default());
        assert_eq!(pool.session_count().await, 0);
        assert!(pool.session_info().await.is_empty());
    }

    #[tokio::test]
    async fn test_navigate_one_on_missing_session_is_not_found() {
        let pool = SessionPool::new(BrowserSessionConfig::default());
        let err = pool.navigate_one(3, "https://example.com").await.unwrap_err();
        assert!(matches!(err, BrowserError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let pool = SessionPool::new(BrowserSessionConfig::default());
        pool.close_all().await;
        pool.close_all().await;
        assert_eq!(pool.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_navigate_all_on_empty_pool_returns_no_results() {
        let pool = SessionPool::new(BrowserSessionConfig::default());
        assert!(pool.navigate_all("https://example.com/live/1").await.is_empty());
    }
}
