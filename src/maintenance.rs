use crate::transport::SessionContext;
use botcore::config::BotConfig;
use botcore::events::{PresenceState, STATUS_BROADCAST_JID};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Presence "available" ping; fires immediately, then every interval.
    Heartbeat,
    /// Re-asserts interest in status broadcasts, which can silently lapse.
    ResubscribeStatus,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heartbeat => f.write_str("heartbeat"),
            Self::ResubscribeStatus => f.write_str("status resubscription"),
        }
    }
}

struct ScheduledTask {
    interval: Duration,
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Cancels the loop and aborts the task, so a tick that already fired but
    /// is parked on a send never resumes.
    fn cancel(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Registry of the periodic tasks that run while a connection is open.
///
/// At most one task per [`TaskKind`] exists; starting a kind that is already
/// live cancels the old one first. [`MaintenanceScheduler::stop`] cancels
/// everything and can be called any number of times.
pub struct MaintenanceScheduler {
    heartbeat_interval: Duration,
    resubscribe_interval: Option<Duration>,
    tasks: HashMap<TaskKind, ScheduledTask>,
}

impl MaintenanceScheduler {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            resubscribe_interval: config
                .auto_view_status
                .then(|| config.resubscribe_interval()),
            tasks: HashMap::new(),
        }
    }

    pub fn start(&mut self, session: SessionContext) {
        self.stop();
        info!(
            target: "Supervisor/Maintenance",
            "Starting maintenance tasks (gen={})",
            session.generation
        );

        self.schedule(
            TaskKind::Heartbeat,
            self.heartbeat_interval,
            Instant::now(),
            session.clone(),
        );
        if let Some(interval) = self.resubscribe_interval {
            self.schedule(
                TaskKind::ResubscribeStatus,
                interval,
                Instant::now() + interval,
                session,
            );
        }
    }

    pub fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for (kind, task) in self.tasks.drain() {
            debug!(
                target: "Supervisor/Maintenance",
                "Cancelling {kind} task (gen={}, every {:?})",
                task.generation,
                task.interval
            );
            task.cancel();
        }
    }

    /// Number of registered tasks that have not finished.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    pub fn is_scheduled(&self, kind: TaskKind) -> bool {
        self.tasks.contains_key(&kind)
    }

    fn schedule(
        &mut self,
        kind: TaskKind,
        interval: Duration,
        first_tick: Instant,
        session: SessionContext,
    ) {
        if let Some(previous) = self.tasks.remove(&kind) {
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        let generation = session.generation;
        let handle = tokio::spawn(run_periodic(
            kind,
            interval,
            first_tick,
            session,
            cancel.clone(),
        ));
        self.tasks.insert(
            kind,
            ScheduledTask {
                interval,
                generation,
                cancel,
                handle,
            },
        );
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_periodic(
    kind: TaskKind,
    interval: Duration,
    first_tick: Instant,
    session: SessionContext,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target: "Supervisor/Maintenance", "{kind} task cancelled");
                return;
            }
            _ = ticker.tick() => {
                if !session.is_current() {
                    debug!(target: "Supervisor/Maintenance", "Session replaced, exiting {kind} task.");
                    return;
                }

                let result = match kind {
                    TaskKind::Heartbeat => {
                        session
                            .transport
                            .send_presence_update(PresenceState::Available)
                            .await
                    }
                    TaskKind::ResubscribeStatus => {
                        session.transport.subscribe_presence(STATUS_BROADCAST_JID).await
                    }
                };

                match result {
                    Ok(()) => debug!(target: "Supervisor/Maintenance", "{kind} sent"),
                    Err(e) => warn!(target: "Supervisor/Maintenance", "{kind} failed: {e:?}"),
                }
            }
        }
    }
}
