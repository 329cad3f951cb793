//! Background recompute actor
//!
//! Rebuilds on a fixed interval and whenever a rebuild is requested. Requests
//! share a single [`Notify`] permit, so any number of triggers arriving while
//! a rebuild runs collapse into one follow-up rebuild.

use chrono::{DateTime, Local};
use curfew_store::{AuditEvent, AuditEventType};
use curfew_util::CurfewResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{CoreEvent, Evaluator, PolicyStore, SnapshotCell, UsageAccumulator};

/// Cheap handle for asking the actor to rebuild
#[derive(Debug, Clone)]
pub struct RebuildHandle {
    notify: Arc<Notify>,
}

impl RebuildHandle {
    pub fn request(&self) {
        self.notify.notify_one();
    }
}

pub struct RebuildScheduler {
    policies: Arc<PolicyStore>,
    usage: Arc<UsageAccumulator>,
    evaluator: Evaluator,
    cell: Arc<SnapshotCell>,
    interval: Duration,
    notify: Arc<Notify>,
}

impl RebuildScheduler {
    pub fn new(
        policies: Arc<PolicyStore>,
        usage: Arc<UsageAccumulator>,
        evaluator: Evaluator,
        cell: Arc<SnapshotCell>,
        interval: Duration,
    ) -> Self {
        Self {
            policies,
            usage,
            evaluator,
            cell,
            interval,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> RebuildHandle {
        RebuildHandle {
            notify: self.notify.clone(),
        }
    }

    /// Run one rebuild. On failure the published snapshot is left as is.
    pub fn rebuild_now(&self, now: DateTime<Local>) -> Vec<CoreEvent> {
        match self.try_rebuild(now) {
            Ok(events) => events,
            Err(e) => {
                error!(
                    error = %e,
                    generation = self.cell.get().generation(),
                    "Rebuild failed, keeping previous snapshot"
                );
                let event = AuditEvent::new(
                    AuditEventType::RebuildFailed {
                        error: e.to_string(),
                    },
                    now,
                );
                if let Err(e) = self.policies.store().append_audit(event) {
                    warn!(error = %e, "Failed to audit rebuild failure");
                }
                Vec::new()
            }
        }
    }

    fn try_rebuild(&self, now: DateTime<Local>) -> CurfewResult<Vec<CoreEvent>> {
        let mut events = self.policies.expire_sessions(now)?;

        let policy = self.policies.snapshot();
        let cache = self.evaluator.rebuild(&policy, &self.usage, now);
        let active = cache.any_policy_active();
        let entries = cache.len();
        let blocked = cache.blocked_packages().len();

        let previous = self.cell.publish(cache);
        if previous.any_policy_active() != active {
            events.push(CoreEvent::PolicyActivityChanged { active });
        }

        info!(
            generation = previous.generation() + 1,
            entries,
            blocked,
            any_policy_active = active,
            "Decision snapshot published"
        );
        Ok(events)
    }

    /// Drive rebuilds until `shutdown` flips or the event receiver closes.
    ///
    /// The first scheduled rebuild comes one interval after start; the
    /// startup snapshot is built by [`crate::CoreEngine::new`]. A snapshot
    /// built during a suspension is also rebuilt as soon as it ends.
    pub async fn run(self, events: mpsc::Sender<CoreEvent>, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Recompute actor started");

        // A failed rebuild keeps the suspended snapshot; wake once per deadline
        let mut handled: Option<DateTime<Local>> = None;

        loop {
            let resume = self
                .cell
                .get()
                .suspended_until()
                .filter(|until| Some(*until) != handled);
            let wake_at = resume.map(instant_at).unwrap_or_else(Instant::now);

            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Scheduled rebuild");
                }
                _ = tokio::time::sleep_until(wake_at), if resume.is_some() => {
                    debug!("Suspension ended, rebuilding");
                    handled = resume;
                }
                _ = self.notify.notified() => {
                    debug!("Requested rebuild");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            for event in self.rebuild_now(curfew_util::now()) {
                if events.send(event).await.is_err() {
                    info!("Event receiver closed, stopping recompute actor");
                    return;
                }
            }
        }

        info!("Recompute actor stopped");
    }
}

/// Monotonic instant matching a wall-clock time; past times map to now
fn instant_at(at: DateTime<Local>) -> Instant {
    let wait = (at - curfew_util::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + wait
}
