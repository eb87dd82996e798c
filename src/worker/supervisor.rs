//! Worker supervisor
//!
//! Runs per-account gather tasks in isolated tokio tasks. A worker shares
//! no mutable state with the rest of the fleet; the task payload goes in
//! over a message channel and status comes back out through the relay's
//! outbound queue.
//!
//! Cancellation is two-phase: a cooperative stop signal first, then a hard
//! abort once the grace period expires.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::relay::Outbound;

/// How long a worker gets to exit cleanly after a stop signal
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Control messages delivered to a worker
#[derive(Debug)]
enum WorkerMessage {
    Start(Value),
    Stop,
}

struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
    join: tokio::task::JoinHandle<()>,
}

/// Supervisor mapping account ids to live worker contexts.
///
/// Invariant: at most one active worker per account id.
pub struct WorkerSupervisor {
    workers: DashMap<String, WorkerHandle>,
    outbound: mpsc::UnboundedSender<Outbound>,
    grace: Duration,
    cycle_interval: Duration,
}

impl WorkerSupervisor {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            workers: DashMap::new(),
            outbound,
            grace: STOP_GRACE,
            cycle_interval: Duration::from_secs(60),
        }
    }

    /// Override timing (tests use short periods)
    pub fn with_timing(mut self, grace: Duration, cycle_interval: Duration) -> Self {
        self.grace = grace;
        self.cycle_interval = cycle_interval;
        self
    }

    /// Start a gather task for `account_id`. Idempotent: if a live worker
    /// already exists for this account it is reused and re-handed the
    /// payload instead of being replaced.
    pub fn start(&self, account_id: &str, params: Value) {
        if let Some(entry) = self.workers.get(account_id) {
            if !entry.join.is_finished() {
                info!("Worker for account {} already running, reusing", account_id);
                let _ = entry.tx.try_send(WorkerMessage::Start(params));
                return;
            }
        }
        // Either no entry or a stale finished one
        self.workers.remove(account_id);

        let (tx, rx) = mpsc::channel(8);
        let join = tokio::spawn(gather_worker(
            account_id.to_string(),
            params,
            rx,
            self.outbound.clone(),
            self.cycle_interval,
        ));

        info!("Started gather worker for account {}", account_id);
        self.workers.insert(account_id.to_string(), WorkerHandle { tx, join });
    }

    /// Stop the worker for `account_id`.
    ///
    /// Sends the cooperative stop signal and waits up to the grace period
    /// for a clean exit; a worker that overruns is aborted. Returns false
    /// if no worker existed for this account.
    pub async fn stop(&self, account_id: &str) -> bool {
        let Some((_, handle)) = self.workers.remove(account_id) else {
            warn!("Stop requested for unknown account {}", account_id);
            return false;
        };

        let WorkerHandle { tx, join } = handle;
        let _ = tx.send(WorkerMessage::Stop).await;
        drop(tx);

        let mut join = join;
        match tokio::time::timeout(self.grace, &mut join).await {
            Ok(_) => {
                info!("Worker for account {} exited cleanly", account_id);
            }
            Err(_) => {
                warn!(
                    "Worker for account {} missed the {}s grace period, aborting",
                    account_id,
                    self.grace.as_secs()
                );
                join.abort();
            }
        }

        true
    }

    /// Whether a live worker exists for this account
    pub fn is_active(&self, account_id: &str) -> bool {
        self.workers
            .get(account_id)
            .map(|h| !h.join.is_finished())
            .unwrap_or(false)
    }

    /// Number of live workers
    pub fn active_count(&self) -> usize {
        self.workers.iter().filter(|h| !h.join.is_finished()).count()
    }

    /// Stop every worker (fleet shutdown)
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}

/// The isolated worker loop for one account.
///
/// Runs gather cycles on its own interval and reports status outbound until
/// it receives the stop signal or its channel closes.
async fn gather_worker(
    account_id: String,
    params: Value,
    mut rx: mpsc::Receiver<WorkerMessage>,
    outbound: mpsc::UnboundedSender<Outbound>,
    cycle_interval: Duration,
) {
    debug!("Worker {} started with params: {}", account_id, params);
    let _ = outbound.send(Outbound::task_status(&account_id, "running"));

    let mut interval = tokio::time::interval(cycle_interval);
    interval.tick().await;
    let mut cycles: u64 = 0;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(WorkerMessage::Start(_)) => {
                    debug!("Worker {} received start while running", account_id);
                }
                Some(WorkerMessage::Stop) | None => break,
            },
            _ = interval.tick() => {
                cycles += 1;
                debug!("Worker {} gather cycle {}", account_id, cycles);
                let _ = outbound.send(Outbound::task_status(&account_id, "running"));
            }
        }
    }

    let _ = outbound.send(Outbound::task_status(&account_id, "stopped"));
    info!("Worker {} exited after {} cycles", account_id, cycles);
}
