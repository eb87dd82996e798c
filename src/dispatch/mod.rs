//! Command dispatcher
//!
//! Pure routing from an inbound relay command to the fleet action it
//! triggers. No state lives here; execution happens in the fleet control
//! loop so routing stays trivially testable.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::relay::Command;

/// The fleet action a command maps to
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Re-announce identity to the relay
    ReportIdentity,
    /// Start (or reuse) a per-account gather task
    StartTask { account_id: String, params: Value },
    /// Stop a per-account gather task
    StopTask { account_id: String },
    /// Answer a relay heartbeat probe
    Pong,
    /// Point every session at a new target
    NavigateAll { url: String, duration_ms: Option<u64> },
    /// Nothing to do; the channel stays open
    Ignore,
}

/// Map a command to its action. Unknown commands are logged and ignored,
/// never fatal.
pub fn route(command: Command) -> Action {
    match command {
        Command::AccountInfo => Action::ReportIdentity,
        Command::StartGatherTask { account_id, params } => {
            Action::StartTask { account_id, params }
        }
        Command::StopGatherTask { account_id } => Action::StopTask { account_id },
        Command::Ping => Action::Pong,
        Command::Navigate { url, duration_ms } => Action::NavigateAll { url, duration_ms },
        Command::Confirmation(message) => {
            info!("Relay confirmation: {}", message);
            Action::Ignore
        }
        Command::ErrorMessage(message) => {
            warn!("Relay reported error: {}", message);
            Action::Ignore
        }
        Command::Unknown(kind) => {
            debug!("Ignoring unknown command type: {}", kind);
            Action::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_is_ignored() {
        let action = route(Command::Unknown("mystery".to_string()));
        assert_eq!(action, Action::Ignore);
    }

    #[test]
    fn test_ping_routes_to_pong() {
        assert_eq!(route(Command::Ping), Action::Pong);
    }

    #[test]
    fn test_navigate_routes_to_navigate_all() {
        let action = route(Command::Navigate {
            url: "https://example.com/live/1".to_string(),
            duration_ms: Some(5000),
        });
        assert_eq!(
            action,
            Action::NavigateAll {
                url: "https://example.com/live/1".to_string(),
                duration_ms: Some(5000)
            }
        );
    }

    #[test]
    fn test_start_and_stop_task_routing() {
        let start = route(Command::StartGatherTask {
            account_id: "42".to_string(),
            params: serde_json::json!({"keywords": ["x"]}),
        });
        assert!(matches!(start, Action::StartTask { ref account_id, .. } if account_id == "42"));

        let stop = route(Command::StopGatherTask { account_id: "42".to_string() });
        assert_eq!(stop, Action::StopTask { account_id: "42".to_string() });
    }

    #[test]
    fn test_confirmation_and_error_are_ignored() {
        assert_eq!(route(Command::Confirmation("ok".to_string())), Action::Ignore);
        assert_eq!(route(Command::ErrorMessage("bad".to_string())), Action::Ignore);
    }
}
