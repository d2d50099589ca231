//! Background sync scheduling
//!
//! One task per account. It fires once on spawn, then on every interval tick
//! and on explicit triggers. Runs are spawned off the loop so commands stay
//! responsive; overlapping requests are turned away by the coordinator.
//!
//! A run rejected for bad credentials pauses the interval until the next
//! explicit trigger.

use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::coordinator::SyncCoordinator;
use crate::config::SyncMode;
use crate::error::{ErrorClass, Result, TriageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run now; `None` lets the scheduler pick the mode
    Trigger(Option<SyncMode>),
    SetInterval(Duration),
    Shutdown,
}

/// What a finished run means for the interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Continue,
    PauseInterval,
}

pub struct SchedulerHandle {
    account: String,
    tx: Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn trigger(&self, mode: Option<SyncMode>) -> Result<()> {
        self.send(SchedulerCommand::Trigger(mode))
    }

    pub fn set_interval_minutes(&self, minutes: u64) -> Result<()> {
        self.set_interval(Duration::from_secs(minutes.max(1) * 60))
    }

    pub(crate) fn set_interval(&self, every: Duration) -> Result<()> {
        self.send(SchedulerCommand::SetInterval(every))
    }

    /// Stops the loop and waits for any run it started.
    pub async fn shutdown(self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!(account = %self.account, "Scheduler task ended abnormally: {}", e);
        }
    }

    fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| TriageError::InvalidInput(format!("Scheduler for {} is not running", self.account)))
    }
}

pub fn spawn(coordinator: Arc<SyncCoordinator>, account: &str) -> Result<SchedulerHandle> {
    let every = coordinator.settings().interval();
    spawn_with_interval(coordinator, account, every)
}

pub(crate) fn spawn_with_interval(
    coordinator: Arc<SyncCoordinator>,
    account: &str,
    every: Duration,
) -> Result<SchedulerHandle> {
    let account = coordinator.account(account)?.email.clone();
    let (tx, rx) = flume::unbounded();

    let task_account = account.clone();
    let task = tokio::spawn(async move {
        let account = task_account;
        let mut every = every;
        // First tick completes immediately: the app-start run.
        let mut ticker = interval_at(Instant::now(), every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = JoinSet::new();
        let mut paused = false;

        info!(account = %account, interval = ?every, "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if paused {
                        debug!(account = %account, "Interval paused until credentials are fixed");
                    } else {
                        launch(&mut runs, coordinator.clone(), account.clone(), None);
                    }
                }
                command = rx.recv_async() => match command {
                    Ok(SchedulerCommand::Trigger(mode)) => {
                        debug!(account = %account, ?mode, "Sync triggered");
                        if paused {
                            info!(account = %account, "Interval resumed by explicit trigger");
                            paused = false;
                        }
                        launch(&mut runs, coordinator.clone(), account.clone(), mode);
                    }
                    Ok(SchedulerCommand::SetInterval(next)) => {
                        if next != every {
                            info!(account = %account, from = ?every, to = ?next, "Sync interval changed");
                            every = next;
                            ticker = interval_at(Instant::now() + every, every);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                    }
                    Ok(SchedulerCommand::Shutdown) | Err(_) => break,
                },
                Some(finished) = runs.join_next(), if !runs.is_empty() => {
                    if let Ok(RunOutcome::PauseInterval) = finished {
                        if !paused {
                            warn!(account = %account, "Login rejected, pausing interval sync");
                        }
                        paused = true;
                    }
                }
            }
        }

        while runs.join_next().await.is_some() {}
        info!(account = %account, "Scheduler stopped");
    });

    Ok(SchedulerHandle { account, tx, task })
}

fn launch(
    runs: &mut JoinSet<RunOutcome>,
    coordinator: Arc<SyncCoordinator>,
    account: String,
    mode: Option<SyncMode>,
) {
    runs.spawn(async move {
        let mode = mode.unwrap_or_else(|| coordinator.default_mode(&account));
        match coordinator.sync(&account, mode).await {
            Ok(_) => RunOutcome::Continue,
            Err(TriageError::SyncInProgress(_)) => {
                debug!(account = %account, "Skipping run, previous one still active");
                RunOutcome::Continue
            }
            Err(e) if e.class() == ErrorClass::Auth => RunOutcome::PauseInterval,
            // Already reported by the coordinator; the next tick retries.
            Err(e) => {
                debug!(account = %account, transient = e.is_transient(), "Scheduled run failed");
                RunOutcome::Continue
            }
        }
    });
}
