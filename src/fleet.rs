//! Fleet orchestration
//!
//! Wires the pool, liveness driver, relay channel, and worker supervisor
//! together: commands come in from the relay, get routed by the dispatcher,
//! and are executed here against the shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatch::{self, Action};
use crate::identity;
use crate::liveness::LivenessDriver;
use crate::relay::{Command, CommandChannel, Outbound};
use crate::AppState;

/// Handles to the long-running fleet tasks
pub struct FleetHandles {
    pub channel: tokio::task::JoinHandle<()>,
    pub liveness: tokio::task::JoinHandle<()>,
    pub control: tokio::task::JoinHandle<()>,
    liveness_flag: Arc<AtomicBool>,
}

/// Bring the fleet up: launch sessions, start liveness, connect to the
/// relay, and start the control loop.
///
/// Partial session launch is tolerated; zero sessions out of a non-zero
/// request is the one fleet-fatal case.
pub async fn start_fleet(
    state: Arc<AppState>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) -> anyhow::Result<FleetHandles> {
    state.is_running.store(true, Ordering::Relaxed);

    let (pool_size, relay_config, liveness_config, accounts, device_id_path) = {
        let config = state.config.read().await;
        (
            config.pool_size,
            config.relay.clone(),
            config.liveness.clone(),
            config.accounts.clone(),
            config.device_id_path(),
        )
    };

    let launched = state
        .pool
        .create_sessions(pool_size)
        .await
        .context("no browser session could be launched")?;

    let _ = state.outbound_tx.send(Outbound::init_info(format!(
        "{} of {} browsers open",
        launched.len(),
        pool_size
    )));

    let driver = LivenessDriver::new(state.pool.clone(), liveness_config);
    let liveness_flag = driver.running_flag();
    let liveness = driver.start();

    let device = identity::device_id(&device_id_path);
    let announcement = identity::build_announcement(&device, &accounts);
    info!("Fleet identity: {}", announcement.device_name);

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let channel = CommandChannel::new(relay_config, state.channel_status.clone(), announcement)
        .start(inbound_tx, outbound_rx, state.is_running.clone());

    let control = tokio::spawn(control_loop(state, inbound_rx));

    Ok(FleetHandles { channel, liveness, control, liveness_flag })
}

/// Route and execute inbound commands until the channel closes
pub async fn control_loop(state: Arc<AppState>, mut inbound_rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = inbound_rx.recv().await {
        let action = dispatch::route(command);
        execute_action(&state, action).await;
    }
    info!("Control loop finished (inbound channel closed)");
}

/// Execute one routed action against the fleet state
pub async fn execute_action(state: &AppState, action: Action) {
    match action {
        Action::ReportIdentity => {
            let (accounts, device_id_path) = {
                let config = state.config.read().await;
                (config.accounts.clone(), config.device_id_path())
            };
            let device = identity::device_id(&device_id_path);
            let announcement = identity::build_announcement(&device, &accounts);
            let _ = state.outbound_tx.send(Outbound::AccountInfo { data: announcement });
        }
        Action::StartTask { account_id, params } => {
            state.supervisor.start(&account_id, params);
        }
        Action::StopTask { account_id } => {
            state.supervisor.stop(&account_id).await;
        }
        Action::Pong => {
            let _ = state.outbound_tx.send(Outbound::Pong);
        }
        Action::NavigateAll { url, duration_ms } => {
            if let Some(duration) = duration_ms {
                // Duration is advisory; the tab stays until the next dispatch
                info!("Navigation dispatch for {} (advertised duration {}ms)", url, duration);
            }
            let results = state.pool.navigate_all(&url).await;
            let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
            let total = results.len();
            if ok < total {
                warn!("Navigation to {} succeeded on {}/{} sessions", url, ok, total);
            }
            let _ = state
                .outbound_tx
                .send(Outbound::init_info(format!("navigated {}/{} sessions", ok, total)));
        }
        Action::Ignore => {}
    }
}

/// Tear the fleet down: stop the liveness loop, drain workers through their
/// grace period, close every browser, and cancel the remaining tasks.
pub async fn shutdown(state: &AppState, handles: FleetHandles) {
    info!("Fleet shutting down");
    state.is_running.store(false, Ordering::Relaxed);

    LivenessDriver::stop(&handles.liveness_flag);
    state.supervisor.stop_all().await;
    state.pool.close_all().await;

    handles.channel.abort();
    handles.liveness.abort();
    handles.control.abort();

    info!("Fleet shutdown complete");
}
