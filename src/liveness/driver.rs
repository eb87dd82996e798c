//! Liveness driver
//!
//! Background loop that keeps every open page visibly "active": checks that
//! live-stream video is still playing (reloading the page when it stalls)
//! and walks the pointer through an interpolated path on every tick.
//!
//! The driver runs independently of relay connectivity and is only stopped
//! on full fleet shutdown. A failure on one page never aborts the tick for
//! other pages, and the driver never waits on a session that is busy with a
//! command-driven navigation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::Page;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, SessionPool};

use super::pointer;

/// Liveness driver configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessConfig {
    /// Minimum seconds between ticks
    pub min_tick_secs: u64,
    /// Maximum seconds between ticks
    pub max_tick_secs: u64,
    /// URL substrings that identify live-content pages
    pub target_patterns: Vec<String>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            min_tick_secs: 30,
            max_tick_secs: 90,
            target_patterns: vec!["live".to_string(), "douyin".to_string()],
        }
    }
}

impl LivenessConfig {
    /// Randomized tick interval; a fixed cadence would be a detectable pattern
    pub fn random_interval(&self) -> Duration {
        let secs = rand::thread_rng().gen_range(self.min_tick_secs..=self.max_tick_secs);
        Duration::from_secs(secs)
    }

    /// Whether `url` matches the live-content allow-list
    pub fn is_target_url(&self, url: &str) -> bool {
        self.target_patterns.iter().any(|p| url.contains(p.as_str()))
    }
}

/// What one liveness pass does to a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NudgePlan {
    /// Blank or empty page; nothing to keep alive
    Skip,
    /// Stalled live video; recover it, then move the pointer as usual
    ReloadThenMove,
    /// Pointer motion only
    Move,
}

/// Decide the nudge for a page. The pointer moves on every non-blank page,
/// reload or not.
fn plan_nudge(config: &LivenessConfig, url: &str, video_paused: bool) -> NudgePlan {
    if url.is_empty() || url == "about:blank" {
        return NudgePlan::Skip;
    }
    if config.is_target_url(url) && video_paused {
        return NudgePlan::ReloadThenMove;
    }
    NudgePlan::Move
}

/// Drive the per-page nudges in order. A failure on one page is logged and
/// never stops the remaining pages; returns how many completed cleanly.
async fn drain_nudges<F>(session_name: &str, nudges: Vec<F>) -> usize
where
    F: std::future::Future<Output = Result<(), BrowserError>>,
{
    let mut completed = 0;
    for nudge in nudges {
        match nudge.await {
            Ok(()) => completed += 1,
            Err(e) => warn!("Session {} liveness nudge failed: {}", session_name, e),
        }
    }
    completed
}

/// Background driver that nudges every page on a randomized interval
pub struct LivenessDriver {
    pool: Arc<SessionPool>,
    config: LivenessConfig,
    running: Arc<AtomicBool>,
}

impl LivenessDriver {
    pub fn new(pool: Arc<SessionPool>, config: LivenessConfig) -> Self {
        Self {
            pool,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used to stop the driver on shutdown
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Start the recurring liveness loop.
    ///
    /// Runs until the running flag is cleared. The tick itself never
    /// returns an error; everything is contained and logged per page.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);

        tokio::spawn(async move {
            info!(
                "Liveness driver started (tick every {}-{}s)",
                self.config.min_tick_secs, self.config.max_tick_secs
            );

            while self.running.load(Ordering::Relaxed) {
                tokio::time::sleep(self.config.random_interval()).await;

                if !self.running.load(Ordering::Relaxed) {
                    break;
                }

                self.tick().await;
            }

            info!("Liveness driver stopped");
        })
    }

    /// Stop the loop (only ever called on full shutdown)
    pub fn stop(running: &AtomicBool) {
        running.store(false, Ordering::Relaxed);
    }

    /// One liveness pass over every page in every session
    async fn tick(&self) {
        for session in self.pool.sessions().await {
            if !session.is_alive() {
                debug!("Session {} not alive, skipping tick", session.name);
                continue;
            }

            // A session mid-navigation is skipped rather than waited on; the
            // driver must never block a command-driven action.
            let Some(_guard) = session.try_action_guard() else {
                debug!("Session {} busy, skipping tick", session.name);
                continue;
            };

            let pages = match session.pages().await {
                Ok(pages) => pages,
                Err(e) => {
                    warn!("Session {} page listing failed: {}", session.name, e);
                    continue;
                }
            };

            let nudges: Vec<_> = pages
                .iter()
                .map(|page| self.nudge_page(&session.name, page))
                .collect();
            drain_nudges(&session.name, nudges).await;
        }
    }

    /// Nudge a single page: recover stalled video, then animate the pointer
    async fn nudge_page(&self, session_name: &str, page: &Page) -> Result<(), BrowserError> {
        let url = page
            .url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .unwrap_or_default();

        let paused = if self.config.is_target_url(&url) {
            self.video_paused(page).await?
        } else {
            false
        };

        match plan_nudge(&self.config, &url, paused) {
            NudgePlan::Skip => Ok(()),
            NudgePlan::ReloadThenMove => {
                // Autoplay policy may block a direct play() call; a reload is
                // the only reliably available recovery.
                info!("Session {} video stalled on {}, reloading", session_name, url);
                page.reload()
                    .await
                    .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
                self.move_pointer(page).await
            }
            NudgePlan::Move => self.move_pointer(page).await,
        }
    }

    /// Whether the page's primary video element is paused
    async fn video_paused(&self, page: &Page) -> Result<bool, BrowserError> {
        let result = page
            .evaluate("(() => { const v = document.querySelector('video'); return v ? v.paused : false; })()")
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        result
            .into_value::<bool>()
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))
    }

    /// Walk the pointer through an interpolated path to a random target
    async fn move_pointer(&self, page: &Page) -> Result<(), BrowserError> {
        let (w, h) = pointer::REFERENCE_VIEWPORT;
        let target = pointer::random_target(w, h);
        let path = pointer::interpolate_path(target, pointer::POINTER_STEPS);

        for (x, y) in path {
            let move_event = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(x)
                .y(y)
                .build()
                .map_err(BrowserError::JavaScriptError)?;

            page.execute(move_event)
                .await
                .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

            tokio::time::sleep(Duration::from_millis(pointer::step_delay_ms())).await;
        }

        debug!("Pointer moved to ({:.0}, {:.0})", target.0, target.1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_matching() {
        let config = LivenessConfig::default();
        assert!(config.is_target_url("https://live.douyin.com/12345"));
        assert!(config.is_target_url("https://example.com/live/1"));
        assert!(!config.is_target_url("https://example.com/about"));
    }

    #[test]
    fn test_random_interval_in_bounds() {
        let config = LivenessConfig {
            min_tick_secs: 30,
            max_tick_secs: 90,
            ..Default::default()
        };
        for _ in 0..100 {
            let interval = config.random_interval();
            assert!(interval >= Duration::from_secs(30));
            assert!(interval <= Duration::from_secs(90));
        }
    }

    #[test]
    fn test_stalled_target_video_reloads_and_still_moves_pointer() {
        let config = LivenessConfig::default();
        assert_eq!(
            plan_nudge(&config, "https://live.douyin.com/9", true),
            NudgePlan::ReloadThenMove
        );
    }

    #[test]
    fn test_playing_video_gets_pointer_motion_only() {
        let config = LivenessConfig::default();
        assert_eq!(plan_nudge(&config, "https://live.douyin.com/9", false), NudgePlan::Move);
        // Paused video off the allow-list is not ours to recover
        assert_eq!(plan_nudge(&config, "https://example.com/about", true), NudgePlan::Move);
    }

    #[test]
    fn test_blank_pages_are_skipped() {
        let config = LivenessConfig::default();
        assert_eq!(plan_nudge(&config, "", false), NudgePlan::Skip);
        assert_eq!(plan_nudge(&config, "about:blank", false), NudgePlan::Skip);
    }

    #[tokio::test]
    async fn test_one_failing_page_never_stops_its_siblings() {
        use std::sync::atomic::AtomicUsize;

        let hits = Arc::new(AtomicUsize::new(0));

        async fn tracked(
            outcome: Result<(), BrowserError>,
            hits: Arc<AtomicUsize>,
        ) -> Result<(), BrowserError> {
            hits.fetch_add(1, Ordering::Relaxed);
            outcome
        }

        let nudges = vec![
            tracked(Err(BrowserError::JavaScriptError("boom".into())), hits.clone()),
            tracked(Ok(()), hits.clone()),
            tracked(Err(BrowserError::ConnectionLost("gone".into())), hits.clone()),
            tracked(Ok(()), hits.clone()),
        ];

        let completed = drain_nudges("Viewer-1", nudges).await;

        // Every page was processed despite the failures in between
        assert_eq!(hits.load(Ordering::Relaxed), 4);
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn test_tick_over_empty_pool_is_a_no_op() {
        use crate::browser::{BrowserSessionConfig, SessionPool};

        let pool = Arc::new(SessionPool::new(BrowserSessionConfig::default()));
        let driver = LivenessDriver::new(pool, LivenessConfig::default());
        driver.tick().await;
    }
}
