//! Relay wire protocol
//!
//! Messages travel as a JSON envelope `{type, data}`. Inbound envelopes are
//! parsed into `Command`; malformed payloads are a parse error the channel
//! logs and drops, never a crash. Outbound messages serialize back into the
//! same envelope shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw inbound envelope as it appears on the wire
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
}

/// A validated inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Report identity to the relay
    AccountInfo,
    /// Start (or reuse) a per-account gather task
    StartGatherTask { account_id: String, params: Value },
    /// Signal a per-account gather task to stop
    StopGatherTask { account_id: String },
    /// Heartbeat probe from the relay
    Ping,
    /// Acknowledgement text from the relay
    Confirmation(String),
    /// Error text from the relay
    ErrorMessage(String),
    /// Point every session at a new target URL
    Navigate { url: String, duration_ms: Option<u64> },
    /// Anything we don't recognize; logged and ignored, never fatal
    Unknown(String),
}

/// Parse one wire message into a command.
///
/// Returns `Err` only for malformed JSON; unrecognized but well-formed
/// envelopes become `Command::Unknown`.
pub fn parse_command(text: &str) -> Result<Command, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    Ok(Command::from(envelope))
}

impl From<Envelope> for Command {
    fn from(envelope: Envelope) -> Self {
        let Envelope { kind, data, message } = envelope;

        match kind.as_str() {
            "accountInfo" => Command::AccountInfo,
            "accountStartGatherTask" => match extract_account_id(&data) {
                Some(account_id) => Command::StartGatherTask { account_id, params: data },
                None => Command::Unknown(kind),
            },
            "accountStopGatherTask" => match extract_account_id(&data) {
                Some(account_id) => Command::StopGatherTask { account_id },
                None => Command::Unknown(kind),
            },
            "ping" => Command::Ping,
            "confirmation" => Command::Confirmation(message.unwrap_or_default()),
            "error" => Command::ErrorMessage(message.unwrap_or_default()),
            _ => {
                // Task dispatch arrives under varying types; what identifies
                // it is the payload: either a bare taskParams URL or an
                // explicit {url, duration} pair.
                if let Some(url) = data.get("taskParams").and_then(Value::as_str) {
                    Command::Navigate { url: url.to_string(), duration_ms: None }
                } else if let Some(url) = data.get("url").and_then(Value::as_str) {
                    let duration_ms = data.get("duration").and_then(Value::as_u64);
                    Command::Navigate { url: url.to_string(), duration_ms }
                } else {
                    Command::Unknown(kind)
                }
            }
        }
    }
}

/// Pull the account id out of a gather-task payload
/// (`data.accountInfo.accountId`, string or number).
fn extract_account_id(data: &Value) -> Option<String> {
    let id = data.get("accountInfo")?.get("accountId")?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One account record announced to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    pub account_id: String,
    /// Derived as "<device>-<id>" at announcement time
    #[serde(default)]
    pub device_name: String,
}

/// The identity announcement sent on every successful connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountAnnouncement {
    pub device_name: String,
    pub accounts: Vec<AccountRecord>,
}

/// Per-task status payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub account_id: String,
    pub state: String,
}

/// Outbound messages, serialized into the `{type, ...}` envelope
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "heartbeat")]
    Heartbeat { message: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "accountInfo")]
    AccountInfo { data: AccountAnnouncement },
    #[serde(rename = "initInfo")]
    InitInfo { state: String },
    #[serde(rename = "taskStatus")]
    TaskStatus { data: TaskStatus },
}

impl Outbound {
    pub fn heartbeat() -> Self {
        Outbound::Heartbeat { message: "ping".to_string() }
    }

    pub fn init_info(state: impl Into<String>) -> Self {
        Outbound::InitInfo { state: state.into() }
    }

    pub fn task_status(account_id: impl Into<String>, state: impl Into<String>) -> Self {
        Outbound::TaskStatus {
            data: TaskStatus {
                account_id: account_id.into(),
                state: state.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        assert_eq!(parse_command(r#"{"type":"ping"}"#).unwrap(), Command::Ping);
    }

    #[test]
    fn test_parse_task_params_dispatch() {
        let cmd =
            parse_command(r#"{"type":"data","data":{"taskParams":"https://example.com/live/1"}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            Command::Navigate {
                url: "https://example.com/live/1".to_string(),
                duration_ms: None
            }
        );
    }

    #[test]
    fn test_parse_url_duration_dispatch() {
        let cmd = parse_command(r#"{"type":"task","data":{"url":"https://live.douyin.com/9","duration":120000}}"#)
            .unwrap();
        assert_eq!(
            cmd,
            Command::Navigate {
                url: "https://live.douyin.com/9".to_string(),
                duration_ms: Some(120000)
            }
        );
    }

    #[test]
    fn test_parse_start_gather_task() {
        let cmd = parse_command(
            r#"{"type":"accountStartGatherTask","data":{"accountInfo":{"accountId":42},"keywords":["a"]}}"#,
        )
        .unwrap();
        match cmd {
            Command::StartGatherTask { account_id, params } => {
                assert_eq!(account_id, "42");
                assert!(params.get("keywords").is_some());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_stop_gather_task_string_id() {
        let cmd = parse_command(
            r#"{"type":"accountStopGatherTask","data":{"accountInfo":{"accountId":"acct-7"}}}"#,
        )
        .unwrap();
        assert_eq!(cmd, Command::StopGatherTask { account_id: "acct-7".to_string() });
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let cmd = parse_command(r#"{"type":"somethingNew","data":{}}"#).unwrap();
        assert_eq!(cmd, Command::Unknown("somethingNew".to_string()));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        assert!(parse_command("not json at all").is_err());
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let json = serde_json::to_value(Outbound::heartbeat()).unwrap();
        assert_eq!(json, serde_json::json!({"type":"heartbeat","message":"ping"}));
    }

    #[test]
    fn test_pong_wire_shape() {
        let json = serde_json::to_value(Outbound::Pong).unwrap();
        assert_eq!(json, serde_json::json!({"type":"pong"}));
    }

    #[test]
    fn test_account_info_wire_shape() {
        let out = Outbound::AccountInfo {
            data: AccountAnnouncement {
                device_name: "dev-1".to_string(),
                accounts: vec![AccountRecord {
                    id: "1".to_string(),
                    account_id: "gg-9".to_string(),
                    device_name: "dev-1-1".to_string(),
                }],
            },
        };
        let json = serde_json::to_value(out).unwrap();
        assert_eq!(json["type"], "accountInfo");
        assert_eq!(json["data"]["deviceName"], "dev-1");
        assert_eq!(json["data"]["accounts"][0]["accountId"], "gg-9");
    }
}
