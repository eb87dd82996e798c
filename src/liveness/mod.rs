//! Liveness simulation
//!
//! Keeps sessions visibly active: periodic pointer motion over every open
//! page and reload-based recovery for stalled live-stream video.

mod driver;
pub mod pointer;

pub use driver::{LivenessConfig, LivenessDriver};
