//! Core engine: wires policies, usage, the snapshot and the gate together

use chrono::{DateTime, Local};
use curfew_api::{LockCategory, SystemPackages, Verdict};
use curfew_config::EngineConfig;
use curfew_store::{AuditEvent, AuditEventType, Store, StoreResult};
use curfew_util::{CurfewResult, PackageName};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    DecisionCache, Evaluator, HotPathGate, PolicyStore, RebuildHandle, RebuildScheduler,
    SnapshotCell, UsageAccumulator,
};

/// The core policy engine
pub struct CoreEngine {
    store: Arc<dyn Store>,
    policies: Arc<PolicyStore>,
    usage: Arc<UsageAccumulator>,
    cell: Arc<SnapshotCell>,
    gate: HotPathGate,
    rebuild: RebuildHandle,
    max_usage_tick: Duration,
}

impl CoreEngine {
    /// Load policies and today's usage, publish a first snapshot, and hand
    /// back the recompute actor for the caller to spawn.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn Store>,
        now: DateTime<Local>,
    ) -> CurfewResult<(Self, RebuildScheduler)> {
        let policies = Arc::new(PolicyStore::load(store.clone(), config.emergency)?);

        let usage = Arc::new(UsageAccumulator::new());
        let restored = usage.restore(store.as_ref(), now)?;

        let cell = Arc::new(SnapshotCell::new(DecisionCache::empty(now)));
        let scheduler = RebuildScheduler::new(
            policies.clone(),
            usage.clone(),
            Evaluator::new(config),
            cell.clone(),
            config.engine.rebuild_interval,
        );
        scheduler.rebuild_now(now);

        info!(
            whitelist = config.whitelist.len(),
            restored_usage = restored,
            rebuild_interval_secs = config.engine.rebuild_interval.as_secs(),
            "Core engine initialized"
        );
        let _ = store.append_audit(AuditEvent::new(
            AuditEventType::ConfigLoaded {
                whitelist_size: config.whitelist.len(),
            },
            now,
        ));

        let engine = Self {
            gate: HotPathGate::new(cell.clone(), config.engine.self_package.clone()),
            rebuild: scheduler.handle(),
            // Ticks longer than two polls mean the host slept or stalled
            max_usage_tick: config.engine.usage_poll * 2,
            store,
            policies,
            usage,
            cell,
        };
        Ok((engine, scheduler))
    }

    pub fn gate(&self) -> &HotPathGate {
        &self.gate
    }

    pub fn evaluate(&self, package: &str, now: DateTime<Local>) -> Verdict {
        let verdict = self.gate.evaluate(package, now);
        debug!(package, blocked = verdict.blocked, "Foreground evaluated");
        verdict
    }

    pub fn evaluate_domain(&self, domain: &str, now: DateTime<Local>) -> Verdict {
        let verdict = self.gate.evaluate_domain(domain, now);
        debug!(domain, blocked = verdict.blocked, "Domain evaluated");
        verdict
    }

    pub fn is_any_policy_active(&self) -> bool {
        self.gate.is_any_policy_active()
    }

    /// Current decision snapshot
    pub fn snapshot(&self) -> Arc<DecisionCache> {
        self.cell.get()
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn usage(&self) -> &Arc<UsageAccumulator> {
        &self.usage
    }

    pub fn rebuild_handle(&self) -> RebuildHandle {
        self.rebuild.clone()
    }

    pub fn request_rebuild(&self) {
        self.rebuild.request();
    }

    /// Run a policy mutation and schedule a rebuild if it succeeded
    pub fn apply<T, E>(&self, mutation: impl FnOnce(&PolicyStore) -> Result<T, E>) -> Result<T, E> {
        let out = mutation(&self.policies)?;
        self.rebuild.request();
        Ok(out)
    }

    /// Pick up policy writes made by another process, returning the
    /// categories strict mode refused
    pub fn reload_policies(&self, now: DateTime<Local>) -> StoreResult<Vec<LockCategory>> {
        let refused = self.policies.reload(now)?;
        self.rebuild.request();
        Ok(refused)
    }

    /// Count foreground time reported by the host poller
    pub fn record_usage(&self, package: &PackageName, elapsed: Duration, now: DateTime<Local>) {
        let counted = elapsed.min(self.max_usage_tick);
        if counted < elapsed {
            debug!(
                package = %package,
                reported_ms = elapsed.as_millis() as u64,
                counted_ms = counted.as_millis() as u64,
                "Usage tick clamped"
            );
        }
        self.usage.add(package, counted, now);
    }

    /// Persist today's usage totals
    pub fn flush_usage(&self, now: DateTime<Local>) -> StoreResult<usize> {
        self.usage.flush(self.store.as_ref(), now)
    }

    pub fn set_installed(&self, installed: BTreeSet<PackageName>) -> CurfewResult<()> {
        self.apply(|policies| policies.set_installed(installed))
    }

    pub fn set_system_packages(&self, system: SystemPackages) -> CurfewResult<()> {
        self.apply(|policies| policies.set_system_packages(system))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
