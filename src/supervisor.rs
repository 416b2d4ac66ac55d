//! One-for-one supervision for long-lived loops.
//!
//! Each child [`Worker`] gets its own monitor task. When a child returns an
//! error or panics, only that child is restarted, after an exponential
//! backoff. A child that fails more than `max_restarts` times inside
//! `window` is abandoned and logged. A clean `Ok(())` return ends the child
//! without restart.
//!
//! ```text
//!            Supervisor
//!         ┌──────┴───────┐
//!   monitor(rate_limiter)  monitor(watcher)
//!         │                   │
//!     spawn ─▶ await JoinHandle ─▶ panic/err? ─▶ backoff ─▶ respawn
//! ```
//!
//! Shutdown is broadcast over a `watch` channel; workers are expected to
//! select on it and return promptly.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;

/// A restartable long-lived unit of work.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Run until `shutdown` flips to `true` or the work is done.
    async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// Restart intensity and backoff for supervised children.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_restarts: usize,
    pub window: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RestartPolicy {
    /// Backoff before the given restart attempt (0-indexed), doubling and capped.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16) as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Restarting,
    Stopped,
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct ChildStatus {
    pub state: ChildState,
    pub restarts: usize,
    pub last_error: Option<String>,
}

type StatusMap = Arc<Mutex<HashMap<String, ChildStatus>>>;

pub struct Supervisor {
    policy: RestartPolicy,
    shutdown_tx: watch::Sender<bool>,
    monitors: Vec<JoinHandle<()>>,
    statuses: StatusMap,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            policy,
            shutdown_tx,
            monitors: Vec::new(),
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start supervising `worker`.
    pub fn spawn<W: Worker>(&mut self, worker: Arc<W>) {
        let name = worker.name().to_string();
        set_status(&self.statuses, &name, |s| s.state = ChildState::Running);

        let monitor = tokio::spawn(monitor(
            worker,
            name,
            self.policy.clone(),
            self.shutdown_tx.subscribe(),
            self.statuses.clone(),
        ));
        self.monitors.push(monitor);
    }

    pub fn status(&self, name: &str) -> Option<ChildStatus> {
        self.statuses
            .lock()
            .ok()
            .and_then(|map| map.get(name).cloned())
    }

    /// Signal every child to stop and wait for the monitors to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for monitor in self.monitors {
            if let Err(e) = monitor.await {
                warn!(error = %e, "supervisor monitor did not exit cleanly");
            }
        }
    }
}

fn set_status(statuses: &StatusMap, name: &str, update: impl FnOnce(&mut ChildStatus)) {
    if let Ok(mut map) = statuses.lock() {
        let entry = map.entry(name.to_string()).or_insert(ChildStatus {
            state: ChildState::Running,
            restarts: 0,
            last_error: None,
        });
        update(entry);
    }
}

async fn monitor<W: Worker>(
    worker: Arc<W>,
    name: String,
    policy: RestartPolicy,
    mut shutdown: watch::Receiver<bool>,
    statuses: StatusMap,
) {
    let mut recent: VecDeque<Instant> = VecDeque::new();

    loop {
        let child = tokio::spawn(worker.clone().run(shutdown.clone()));
        let outcome = child.await;

        if *shutdown.borrow() {
            set_status(&statuses, &name, |s| s.state = ChildState::Stopped);
            break;
        }

        let failure = match outcome {
            Ok(Ok(())) => {
                info!(worker = %name, "worker finished");
                set_status(&statuses, &name, |s| s.state = ChildState::Stopped);
                break;
            }
            Ok(Err(e)) => format!("error: {}", e),
            Err(join_err) if join_err.is_panic() => "panicked".to_string(),
            Err(join_err) => format!("cancelled: {}", join_err),
        };

        let now = Instant::now();
        while recent
            .front()
            .is_some_and(|t| now.duration_since(*t) > policy.window)
        {
            recent.pop_front();
        }

        if recent.len() >= policy.max_restarts {
            error!(
                worker = %name,
                restarts = recent.len(),
                failure = %failure,
                "restart intensity exceeded, giving up"
            );
            set_status(&statuses, &name, |s| {
                s.state = ChildState::GaveUp;
                s.last_error = Some(failure.clone());
            });
            break;
        }

        let delay = policy.backoff(recent.len());
        recent.push_back(now);
        warn!(worker = %name, failure = %failure, delay_ms = delay.as_millis() as u64, "restarting worker");
        set_status(&statuses, &name, |s| {
            s.state = ChildState::Restarting;
            s.restarts += 1;
            s.last_error = Some(failure.clone());
        });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                set_status(&statuses, &name, |s| s.state = ChildState::Stopped);
                break;
            }
        }
        set_status(&statuses, &name, |s| s.state = ChildState::Running);
    }
}
