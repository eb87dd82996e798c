//! Relay command channel
//!
//! Persistent, auto-reconnecting WebSocket connection to the coordinator.
//! State machine: disconnected -> connecting -> connected -> disconnected,
//! looping forever with bounded exponential backoff between attempts — the
//! fleet must stay reachable, so there is no retry cutoff.
//!
//! The heartbeat emitter only exists inside the connected loop, so the
//! "heartbeat active iff connected" invariant holds structurally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::protocol::{parse_command, AccountAnnouncement, Command, Outbound};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Shared, observable channel status
pub struct ChannelStatus {
    state: parking_lot::RwLock<ConnectionState>,
    last_heartbeat_sent_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl ChannelStatus {
    pub fn new() -> Self {
        Self {
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_heartbeat_sent_at: parking_lot::RwLock::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn last_heartbeat_sent_at(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat_sent_at.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!("Relay state: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn mark_heartbeat(&self) {
        *self.last_heartbeat_sent_at.write() = Some(Utc::now());
    }
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay connection configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Coordinator WebSocket URL
    pub url: String,
    /// Heartbeat period in seconds
    pub heartbeat_secs: u64,
    /// Initial reconnect delay in seconds
    pub reconnect_base_secs: u64,
    /// Reconnect delay ceiling in seconds
    pub reconnect_max_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000".to_string(),
            heartbeat_secs: 30,
            reconnect_base_secs: 5,
            reconnect_max_secs: 60,
        }
    }
}

/// Double the delay up to the configured ceiling
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// The persistent command channel to the relay
pub struct CommandChannel {
    config: RelayConfig,
    status: Arc<ChannelStatus>,
    announcement: AccountAnnouncement,
}

impl CommandChannel {
    pub fn new(
        config: RelayConfig,
        status: Arc<ChannelStatus>,
        announcement: AccountAnnouncement,
    ) -> Self {
        Self { config, status, announcement }
    }

    /// Run the connection loop until `running` is cleared.
    ///
    /// Inbound commands are forwarded to `inbound_tx`; outbound messages are
    /// drained from `outbound_rx` while connected.
    pub fn start(
        self,
        inbound_tx: mpsc::UnboundedSender<Command>,
        outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        running: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(inbound_tx, outbound_rx, running))
    }

    async fn run(
        self,
        inbound_tx: mpsc::UnboundedSender<Command>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        running: Arc<AtomicBool>,
    ) {
        let base = Duration::from_secs(self.config.reconnect_base_secs);
        let max = Duration::from_secs(self.config.reconnect_max_secs);
        let mut backoff = base;

        while running.load(Ordering::Relaxed) {
            self.status.set_state(ConnectionState::Connecting);
            info!("Connecting to relay: {}", self.config.url);

            let ws = match connect_async(&self.config.url).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    warn!("Relay connect failed: {} (retry in {:?})", e, backoff);
                    self.status.set_state(ConnectionState::Disconnected);
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, max);
                    continue;
                }
            };

            backoff = base;
            self.status.set_state(ConnectionState::Connected);
            info!("Connected to relay");

            let (mut sink, mut stream) = ws.split();

            // Identity announcement is the first thing on the wire
            let announce = Outbound::AccountInfo { data: self.announcement.clone() };
            if let Some(text) = encode(&announce) {
                if sink.send(Message::Text(text)).await.is_err() {
                    warn!("Relay dropped before identity announcement");
                    self.status.set_state(ConnectionState::Disconnected);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            let mut heartbeat =
                tokio::time::interval(Duration::from_secs(self.config.heartbeat_secs));
            // First interval tick fires immediately; skip it so the first
            // heartbeat goes out one full period after connect.
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let Some(text) = encode(&Outbound::heartbeat()) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            warn!("Heartbeat send failed, reconnecting");
                            break;
                        }
                        self.status.mark_heartbeat();
                        debug!("Heartbeat sent");
                    }
                    Some(out) = outbound_rx.recv() => {
                        let Some(text) = encode(&out) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            warn!("Outbound send failed, reconnecting");
                            break;
                        }
                    }
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match parse_command(&text) {
                                    Ok(cmd) => {
                                        if inbound_tx.send(cmd).is_err() {
                                            // Control loop gone; shut the channel down
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Dropping malformed relay message: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Relay closed the connection");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("Relay transport error: {}", e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }

                if !running.load(Ordering::Relaxed) {
                    return;
                }
            }

            // Leaving the connected loop stops the heartbeat with it
            self.status.set_state(ConnectionState::Disconnected);

            if running.load(Ordering::Relaxed) {
                info!("Reconnecting to relay in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Serialize an outbound message, logging instead of propagating failure
fn encode(out: &Outbound) -> Option<String> {
    match serde_json::to_string(out) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode outbound message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::protocol::AccountRecord;

    fn test_announcement() -> AccountAnnouncement {
        AccountAnnouncement {
            device_name: "test-device".to_string(),
            accounts: vec![AccountRecord {
                id: "1".to_string(),
                account_id: "a-1".to_string(),
                device_name: "test-device-1".to_string(),
            }],
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let max = Duration::from_secs(60);
        let mut backoff = Duration::from_secs(5);
        backoff = next_backoff(backoff, max);
        assert_eq!(backoff, Duration::from_secs(10));
        backoff = next_backoff(backoff, max);
        assert_eq!(backoff, Duration::from_secs(20));
        backoff = next_backoff(backoff, max);
        assert_eq!(backoff, Duration::from_secs(40));
        backoff = next_backoff(backoff, max);
        assert_eq!(backoff, Duration::from_secs(60));
        backoff = next_backoff(backoff, max);
        assert_eq!(backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_status_starts_disconnected_with_no_heartbeat() {
        let status = ChannelStatus::new();
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert!(status.last_heartbeat_sent_at().is_none());
    }

    #[tokio::test]
    async fn test_connect_announce_heartbeat_and_reconnect_after_close() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Relay stand-in: accept one connection, read the announcement, send
        // a ping command, then drop the connection.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let announce = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => text,
                other => panic!("expected text announcement, got {:?}", other),
            };
            let parsed: serde_json::Value = serde_json::from_str(&announce).unwrap();
            assert_eq!(parsed["type"], "accountInfo");
            assert_eq!(parsed["data"]["deviceName"], "test-device");

            ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
                .await
                .unwrap();

            // Wait for the first heartbeat before hanging up
            loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => {
                        let msg: serde_json::Value = serde_json::from_str(&text).unwrap();
                        if msg["type"] == "heartbeat" {
                            assert_eq!(msg["message"], "ping");
                            break;
                        }
                    }
                    _ => {}
                }
            }
        });

        let config = RelayConfig {
            url: format!("ws://{}", addr),
            heartbeat_secs: 1,
            reconnect_base_secs: 1,
            reconnect_max_secs: 4,
        };
        let status = Arc::new(ChannelStatus::new());
        let channel = CommandChannel::new(config, status.clone(), test_announcement());

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));

        let handle = channel.start(inbound_tx, outbound_rx, running.clone());

        // The ping command must come through the inbound channel
        let cmd = tokio::time::timeout(Duration::from_secs(10), inbound_rx.recv())
            .await
            .expect("timed out waiting for command")
            .expect("channel closed");
        assert_eq!(cmd, Command::Ping);

        server.await.unwrap();

        // Heartbeat was sent while connected
        tokio::time::timeout(Duration::from_secs(10), async {
            while status.last_heartbeat_sent_at().is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("heartbeat never recorded");

        // After the server hangs up the channel leaves Connected and goes
        // back into the reconnect path (disconnected or already connecting).
        tokio::time::timeout(Duration::from_secs(10), async {
            while status.state() == ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("channel never observed the close");

        running.store(false, Ordering::Relaxed);
        handle.abort();
    }
}
