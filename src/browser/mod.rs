//! Browser automation module
//!
//! Handles launching and controlling multiple isolated Chrome/Chromium
//! instances, one persistent profile per session.

mod errors;
mod pool;
mod session;

pub use errors::BrowserError;
pub use pool::{SessionInfo, SessionPool};
pub use session::{clear_profile_cache, random_user_agent, BrowserSession, BrowserSessionConfig, SessionStatus};
