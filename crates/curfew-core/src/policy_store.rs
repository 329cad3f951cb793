//! Raw policy entities and the guarded ways of changing them
//!
//! Readers take an `Arc<PolicyState>` and keep a consistent view for as long
//! as they hold it. Every change builds a new state, persists the touched
//! entity, then swaps the pointer.

use chrono::{DateTime, Local};
use curfew_api::{
    AppLimit, BedtimeWindow, CalendarBlock, EmergencyBypass, FocusMode, FocusSession, GroupLimit,
    LockCategory, LockFlags, Schedule, StrictModeConfig, SystemPackages, TargetModes,
};
use curfew_config::EmergencySettings;
use curfew_store::{
    AuditEvent, AuditEventType, Blocklist, InstalledPackages, Store, StoreError, StoreExt,
    StoreResult, TargetModeTable,
};
use curfew_util::{CurfewError, CurfewResult, GroupId, PackageName, SessionId};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::{
    CoreEvent, DisabledVia, EmergencyController, EmergencyError, GroupIndex, StrictError,
    StrictLockController, UnlockAttempt, UnlockSetup,
};

/// Every policy entity, as one immutable value
#[derive(Debug, Clone, Default)]
pub struct PolicyState {
    pub focus: FocusSession,
    pub bedtime: BedtimeWindow,
    pub schedules: Vec<Schedule>,
    pub calendar: Vec<CalendarBlock>,
    pub app_limits: Vec<AppLimit>,
    pub group_limits: Vec<GroupLimit>,
    pub group_index: Arc<GroupIndex>,
    pub strict: StrictLockController,
    pub emergency: EmergencyBypass,
    pub target_modes: TargetModeTable,
    /// Universal target list for schedules and calendar blocks
    pub blocklist: BTreeSet<PackageName>,
    pub installed: BTreeSet<PackageName>,
    pub system: SystemPackages,
}

impl PolicyState {
    /// Read every entity from the store
    pub fn load(store: &dyn Store) -> StoreResult<Self> {
        let group_limits: Vec<GroupLimit> = store.load()?;
        Ok(Self {
            focus: store.load()?,
            bedtime: store.load()?,
            schedules: store.load()?,
            calendar: store.load()?,
            app_limits: store.load()?,
            group_index: Arc::new(GroupIndex::build(&group_limits)),
            group_limits,
            strict: StrictLockController::new(store.load::<StrictModeConfig>()?),
            emergency: store.load()?,
            target_modes: store.load()?,
            blocklist: store.load::<Blocklist>()?.0,
            installed: store.load::<InstalledPackages>()?.0,
            system: store.load()?,
        })
    }

    pub fn modes_for(&self, target: &str) -> TargetModes {
        self.target_modes.modes_for(target)
    }

    pub fn group(&self, id: &GroupId) -> Option<&GroupLimit> {
        self.group_limits.iter().find(|g| &g.id == id)
    }

    fn set_group_limits(&mut self, groups: Vec<GroupLimit>) {
        self.group_index = Arc::new(GroupIndex::build(&groups));
        self.group_limits = groups;
    }
}

/// Owner of the current [`PolicyState`]
pub struct PolicyStore {
    state: RwLock<Arc<PolicyState>>,
    store: Arc<dyn Store>,
    emergency: EmergencyController,
}

impl PolicyStore {
    /// Load persisted policies
    pub fn load(store: Arc<dyn Store>, emergency: EmergencySettings) -> StoreResult<Self> {
        let state = PolicyState::load(store.as_ref())?;
        info!(
            schedules = state.schedules.len(),
            app_limits = state.app_limits.len(),
            group_limits = state.group_limits.len(),
            strict = state.strict.is_enabled(),
            "Policies loaded"
        );

        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            store,
            emergency: EmergencyController::new(emergency),
        })
    }

    /// Current policies
    pub fn snapshot(&self) -> Arc<PolicyState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Re-read every entity, picking up writes made by another process.
    ///
    /// A changed entity passes the same strict-mode check as the matching
    /// guarded mutation. A refused entity keeps its current value, which is
    /// written back over the external copy. Strict-mode and emergency state
    /// only change through this process and are never taken from the store.
    ///
    /// Returns the refused categories.
    pub fn reload(&self, now: DateTime<Local>) -> StoreResult<Vec<LockCategory>> {
        let mut next = PolicyState::load(self.store.as_ref())?;
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let held: Arc<PolicyState> = current.clone();
        let mut refused = Vec::new();

        if next.strict != held.strict {
            warn!("Strict-mode state changed outside the daemon, restoring");
            self.store.save(held.strict.config())?;
        }
        next.strict = held.strict.clone();

        if next.emergency != held.emergency {
            warn!("Emergency state changed outside the daemon, restoring");
            self.store.save(&held.emergency)?;
        }
        next.emergency = held.emergency.clone();

        if next.bedtime != held.bedtime && !self.admits(&held, LockCategory::Bedtime, false, now) {
            next.bedtime = held.bedtime.clone();
            self.store.save(&next.bedtime)?;
            refused.push(LockCategory::Bedtime);
        }

        if next.schedules != held.schedules
            && !self.admits(&held, LockCategory::Schedule, false, now)
        {
            next.schedules = held.schedules.clone();
            self.store.save(&next.schedules)?;
            refused.push(LockCategory::Schedule);
        }

        if next.blocklist != held.blocklist
            && !self.admits(&held, LockCategory::Blocklist, false, now)
        {
            next.blocklist = held.blocklist.clone();
            self.store.save(&Blocklist(next.blocklist.clone()))?;
            refused.push(LockCategory::Blocklist);
        }

        let disables_block = next.calendar.iter().any(|block| {
            !block.enabled
                && held
                    .calendar
                    .iter()
                    .any(|b| b.id == block.id && b.enabled)
        });
        if disables_block && !self.admits(&held, LockCategory::Calendar, false, now) {
            next.calendar = held.calendar.clone();
            self.store.save(&next.calendar)?;
            refused.push(LockCategory::Calendar);
        }

        if next.app_limits != held.app_limits {
            let rule_is_strict =
                changes_strict_rule(&held.app_limits, &next.app_limits, |l| l.is_strict);
            if !self.admits(&held, LockCategory::AppLimit, rule_is_strict, now) {
                next.app_limits = held.app_limits.clone();
                self.store.save(&next.app_limits)?;
                refused.push(LockCategory::AppLimit);
            }
        }

        if next.group_limits != held.group_limits {
            let rule_is_strict =
                changes_strict_rule(&held.group_limits, &next.group_limits, |g| g.is_strict);
            if !self.admits(&held, LockCategory::GroupLimit, rule_is_strict, now) {
                next.group_limits = held.group_limits.clone();
                next.group_index = held.group_index.clone();
                self.store.save(&next.group_limits)?;
                refused.push(LockCategory::GroupLimit);
            }
        }

        if next.target_modes != held.target_modes {
            let opted_out = opted_out_categories(&held, &next);
            let denied: Vec<LockCategory> = opted_out
                .into_iter()
                .filter(|category| !self.admits(&held, *category, false, now))
                .collect();
            if !denied.is_empty() {
                next.target_modes = held.target_modes.clone();
                self.store.save(&next.target_modes)?;
                refused.extend(denied);
            }
        }

        *current = Arc::new(next);
        if refused.is_empty() {
            debug!("Policies reloaded from store");
        } else {
            warn!(?refused, "Policies reloaded, locked changes refused");
        }
        Ok(refused)
    }

    fn admits(
        &self,
        state: &PolicyState,
        category: LockCategory,
        rule_is_strict: bool,
        now: DateTime<Local>,
    ) -> bool {
        self.guard(state, category, rule_is_strict, now).is_ok()
    }

    fn commit<T, E>(
        &self,
        apply: impl FnOnce(&mut PolicyState) -> Result<T, E>,
        persist: impl FnOnce(&dyn Store, &PolicyState) -> StoreResult<()>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = PolicyState::clone(&current);
        let out = apply(&mut next)?;
        persist(self.store.as_ref(), &next)?;
        *current = Arc::new(next);
        Ok(out)
    }

    fn audit(&self, event: AuditEventType, now: DateTime<Local>) {
        let _ = self.store.append_audit(AuditEvent::new(event, now));
    }

    fn guard(
        &self,
        state: &PolicyState,
        category: LockCategory,
        rule_is_strict: bool,
        now: DateTime<Local>,
    ) -> CurfewResult<()> {
        let allowed = state.strict.can_mutate(category, rule_is_strict, now);
        self.audit(
            AuditEventType::MutationChecked {
                category,
                rule_is_strict,
                allowed,
            },
            now,
        );

        if allowed {
            Ok(())
        } else {
            warn!(?category, rule_is_strict, "Mutation denied by strict mode");
            Err(CurfewError::locked(format!("{:?}", category)))
        }
    }

    // Guarded mutations

    pub fn set_bedtime(&self, bedtime: BedtimeWindow, now: DateTime<Local>) -> CurfewResult<()> {
        self.commit(
            |state| {
                self.guard(state, LockCategory::Bedtime, false, now)?;
                state.bedtime = bedtime;
                Ok(())
            },
            |store, state| store.save(&state.bedtime),
        )
    }

    pub fn set_schedules(&self, schedules: Vec<Schedule>, now: DateTime<Local>) -> CurfewResult<()> {
        self.commit(
            |state| {
                self.guard(state, LockCategory::Schedule, false, now)?;
                state.schedules = schedules;
                Ok(())
            },
            |store, state| store.save(&state.schedules),
        )
    }

    pub fn set_blocklist(
        &self,
        blocklist: BTreeSet<PackageName>,
        now: DateTime<Local>,
    ) -> CurfewResult<()> {
        self.commit(
            |state| {
                self.guard(state, LockCategory::Blocklist, false, now)?;
                state.blocklist = blocklist;
                Ok(())
            },
            |store, state| store.save(&Blocklist(state.blocklist.clone())),
        )
    }

    /// Create or replace the limit for `limit.package`.
    ///
    /// An existing strict rule governs the check, so a strict limit cannot be
    /// loosened by overwriting it.
    pub fn upsert_app_limit(&self, limit: AppLimit, now: DateTime<Local>) -> CurfewResult<()> {
        self.commit(
            |state| {
                let existing = state
                    .app_limits
                    .iter()
                    .position(|l| l.package == limit.package);
                let rule_is_strict = existing.is_some_and(|i| state.app_limits[i].is_strict);
                self.guard(state, LockCategory::AppLimit, rule_is_strict, now)?;

                match existing {
                    Some(i) => state.app_limits[i] = limit,
                    None => state.app_limits.push(limit),
                }
                Ok(())
            },
            |store, state| store.save(&state.app_limits),
        )
    }

    pub fn remove_app_limit(&self, package: &str, now: DateTime<Local>) -> CurfewResult<()> {
        self.commit(
            |state| {
                let index = state
                    .app_limits
                    .iter()
                    .position(|l| l.package.as_str() == package)
                    .ok_or_else(|| CurfewError::UnknownPackage(PackageName::new(package)))?;
                let rule_is_strict = state.app_limits[index].is_strict;
                self.guard(state, LockCategory::AppLimit, rule_is_strict, now)?;
                state.app_limits.remove(index);
                Ok(())
            },
            |store, state| store.save(&state.app_limits),
        )
    }

    pub fn upsert_group_limit(&self, group: GroupLimit, now: DateTime<Local>) -> CurfewResult<()> {
        self.commit(
            |state| {
                let rule_is_strict = state.group(&group.id).is_some_and(|g| g.is_strict);
                self.guard(state, LockCategory::GroupLimit, rule_is_strict, now)?;

                let mut groups = state.group_limits.clone();
                match groups.iter().position(|g| g.id == group.id) {
                    Some(i) => groups[i] = group,
                    None => groups.push(group),
                }
                state.set_group_limits(groups);
                Ok(())
            },
            |store, state| store.save(&state.group_limits),
        )
    }

    pub fn remove_group_limit(&self, id: &GroupId, now: DateTime<Local>) -> CurfewResult<()> {
        self.commit(
            |state| {
                let group = state
                    .group(id)
                    .ok_or_else(|| CurfewError::validation(format!("unknown group: {}", id)))?;
                self.guard(state, LockCategory::GroupLimit, group.is_strict, now)?;

                let groups = state
                    .group_limits
                    .iter()
                    .filter(|g| &g.id != id)
                    .cloned()
                    .collect();
                state.set_group_limits(groups);
                Ok(())
            },
            |store, state| store.save(&state.group_limits),
        )
    }

    pub fn set_calendar_block_enabled(
        &self,
        id: &str,
        enabled: bool,
        now: DateTime<Local>,
    ) -> CurfewResult<()> {
        self.commit(
            |state| {
                let index = state
                    .calendar
                    .iter()
                    .position(|b| b.id == id)
                    .ok_or_else(|| CurfewError::validation(format!("unknown calendar block: {}", id)))?;
                if !enabled {
                    self.guard(state, LockCategory::Calendar, false, now)?;
                }
                state.calendar[index].enabled = enabled;
                Ok(())
            },
            |store, state| store.save(&state.calendar),
        )
    }

    /// Change which categories apply to a package or domain.
    ///
    /// Opting out of a category is checked against that category's lock;
    /// opting in never is.
    pub fn set_target_modes(
        &self,
        target: &str,
        modes: TargetModes,
        now: DateTime<Local>,
    ) -> CurfewResult<()> {
        self.commit(
            |state| {
                let current = state.modes_for(target);
                for (was, is, category) in [
                    (current.bedtime, modes.bedtime, LockCategory::Bedtime),
                    (current.calendar, modes.calendar, LockCategory::Calendar),
                    (current.auto_focus, modes.auto_focus, LockCategory::Schedule),
                ] {
                    if was && !is {
                        self.guard(state, category, false, now)?;
                    }
                }

                if modes == TargetModes::default() {
                    state.target_modes.0.remove(target);
                } else {
                    state.target_modes.0.insert(target.to_string(), modes);
                }
                Ok(())
            },
            |store, state| store.save(&state.target_modes),
        )
    }

    // Unguarded: sessions and host-reported facts

    /// Start a focus session; `ends_at` of None runs until stopped
    pub fn start_focus(
        &self,
        mode: FocusMode,
        selected: BTreeSet<PackageName>,
        blocked_domains: BTreeSet<String>,
        ends_at: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) -> CurfewResult<SessionId> {
        if ends_at.is_some_and(|end| end <= now) {
            return Err(CurfewError::validation("focus session must end in the future"));
        }

        let session_id = SessionId::new();
        self.commit(
            |state| {
                state.focus = FocusSession {
                    active: true,
                    session_id: Some(session_id.clone()),
                    ends_at,
                    mode,
                    selected,
                    blocked_domains,
                };
                Ok::<_, CurfewError>(())
            },
            |store, state| store.save(&state.focus),
        )?;

        info!(session_id = %session_id, ?mode, ends_at = ?ends_at, "Focus session started");
        self.audit(
            AuditEventType::FocusStarted {
                session_id: session_id.clone(),
                ends_at,
            },
            now,
        );
        Ok(session_id)
    }

    pub fn stop_focus(&self, now: DateTime<Local>) -> CurfewResult<Option<SessionId>> {
        let ended = self.commit(
            |state| {
                let ended = state.focus.active.then(|| state.focus.session_id.take()).flatten();
                state.focus.active = false;
                state.focus.ends_at = None;
                Ok::<_, CurfewError>(ended)
            },
            |store, state| store.save(&state.focus),
        )?;

        info!(session_id = ?ended, "Focus session stopped");
        self.audit(
            AuditEventType::FocusEnded {
                session_id: ended.clone(),
            },
            now,
        );
        Ok(ended)
    }

    /// Replace the calendar cache from a sync, keeping blocks the user
    /// switched off
    pub fn sync_calendar(&self, blocks: Vec<CalendarBlock>) -> CurfewResult<()> {
        self.commit(
            |state| {
                let disabled: BTreeSet<&str> = state
                    .calendar
                    .iter()
                    .filter(|b| !b.enabled)
                    .map(|b| b.id.as_str())
                    .collect();
                let merged = blocks
                    .into_iter()
                    .map(|mut b| {
                        if disabled.contains(b.id.as_str()) {
                            b.enabled = false;
                        }
                        b
                    })
                    .collect();
                state.calendar = merged;
                Ok::<_, CurfewError>(())
            },
            |store, state| store.save(&state.calendar),
        )
    }

    pub fn set_installed(&self, installed: BTreeSet<PackageName>) -> CurfewResult<()> {
        self.commit(
            |state| {
                state.installed = installed;
                Ok::<_, CurfewError>(())
            },
            |store, state| store.save(&InstalledPackages(state.installed.clone())),
        )
    }

    pub fn set_system_packages(&self, system: SystemPackages) -> CurfewResult<()> {
        self.commit(
            |state| {
                state.system = system;
                Ok::<_, CurfewError>(())
            },
            |store, state| store.save(&state.system),
        )
    }

    // Strict mode

    pub fn enable_strict(
        &self,
        unlock: UnlockSetup,
        locks: LockFlags,
        now: DateTime<Local>,
    ) -> Result<(), StrictError> {
        self.commit(
            |state| state.strict.enable(unlock, locks, now),
            |store, state| store.save(state.strict.config()),
        )?;

        let unlock = match &self.snapshot().strict.config().unlock {
            curfew_api::UnlockMode::None => "none",
            curfew_api::UnlockMode::Timer { .. } => "timer",
            curfew_api::UnlockMode::Password { .. } => "password",
        };
        self.audit(
            AuditEventType::StrictEnabled {
                unlock: unlock.into(),
                locks,
            },
            now,
        );
        Ok(())
    }

    pub fn disable_strict(
        &self,
        attempt: UnlockAttempt<'_>,
        now: DateTime<Local>,
    ) -> Result<DisabledVia, StrictError> {
        let result = self.commit(
            |state| state.strict.disable(attempt, now),
            |store, state| store.save(state.strict.config()),
        );

        match &result {
            Ok(via) => self.audit(
                AuditEventType::StrictDisabled {
                    via: via.as_str().into(),
                },
                now,
            ),
            Err(StrictError::Store(_)) => {}
            Err(e) => self.audit(
                AuditEventType::UnlockRejected {
                    reason: e.to_string(),
                },
                now,
            ),
        }
        result
    }

    pub fn start_forgot_password(&self, now: DateTime<Local>) -> Result<DateTime<Local>, StrictError> {
        let until = self.commit(
            |state| state.strict.start_forgot_password(now),
            |store, state| store.save(state.strict.config()),
        )?;
        self.audit(AuditEventType::ForgotPasswordStarted { until }, now);
        Ok(until)
    }

    pub fn set_strict_locks(&self, locks: LockFlags, now: DateTime<Local>) -> Result<(), StrictError> {
        self.commit(
            |state| state.strict.set_locks(locks, now),
            |store, state| store.save(state.strict.config()),
        )
    }

    // Emergency bypass

    pub fn activate_emergency(&self, now: DateTime<Local>) -> Result<SessionId, EmergencyError> {
        let session_id = self.commit(
            |state| self.emergency.activate(&mut state.emergency, now),
            |store, state| store.save(&state.emergency),
        )?;

        let state = self.snapshot();
        let bypass = &state.emergency;
        if let Some(ends_at) = bypass.session_ends_at {
            self.audit(
                AuditEventType::EmergencyActivated {
                    session_id: session_id.clone(),
                    ends_at,
                    uses_remaining: bypass.uses_remaining,
                },
                now,
            );
        }
        Ok(session_id)
    }

    /// Clear sessions whose end has passed and refill the daily emergency
    /// allowance. Nothing is written when nothing changed.
    pub fn expire_sessions(&self, now: DateTime<Local>) -> CurfewResult<Vec<CoreEvent>> {
        let current = self.snapshot();
        let focus_due = current.focus.is_expired(now);
        let emergency_due = current
            .emergency
            .session_ends_at
            .is_some_and(|end| now >= end);
        let refill_due = current
            .emergency
            .last_reset
            .is_none_or(|day| day < now.date_naive());
        if !focus_due && !emergency_due && !refill_due {
            return Ok(Vec::new());
        }

        let events = self.commit(
            |state| {
                let mut events = Vec::new();
                if state.focus.is_expired(now) {
                    state.focus.active = false;
                    state.focus.ends_at = None;
                    events.push(CoreEvent::FocusEnded {
                        session_id: state.focus.session_id.take(),
                    });
                }
                if let Some(ended) = self.emergency.expire(&mut state.emergency, now) {
                    events.push(CoreEvent::EmergencyEnded {
                        session_id: ended.session_id,
                    });
                }
                if self.emergency.refill(&mut state.emergency, now.date_naive()) {
                    debug!(
                        uses = state.emergency.uses_remaining,
                        "Emergency allowance refilled"
                    );
                }
                Ok::<_, CurfewError>(events)
            },
            |store, state| {
                if focus_due {
                    store.save(&state.focus)?;
                }
                store.save(&state.emergency)
            },
        )?;

        for event in &events {
            match event {
                CoreEvent::FocusEnded { session_id } => {
                    info!(session_id = ?session_id, "Focus session ended");
                    self.audit(
                        AuditEventType::FocusEnded {
                            session_id: session_id.clone(),
                        },
                        now,
                    );
                }
                CoreEvent::EmergencyEnded { session_id } => {
                    info!(session_id = ?session_id, "Emergency bypass ended");
                    self.audit(
                        AuditEventType::EmergencyEnded {
                            session_id: session_id.clone(),
                        },
                        now,
                    );
                }
                CoreEvent::PolicyActivityChanged { .. } => {}
            }
        }
        Ok(events)
    }
}

/// Whether a strict rule in `current` is edited or missing in `next`
fn changes_strict_rule<T: PartialEq>(
    current: &[T],
    next: &[T],
    is_strict: impl Fn(&T) -> bool,
) -> bool {
    current
        .iter()
        .any(|rule| is_strict(rule) && !next.contains(rule))
}

/// Categories some target stops opting into between two states
fn opted_out_categories(current: &PolicyState, next: &PolicyState) -> Vec<LockCategory> {
    let targets: BTreeSet<&String> = current
        .target_modes
        .0
        .keys()
        .chain(next.target_modes.0.keys())
        .collect();

    let mut categories = Vec::new();
    for target in targets {
        let (was, is) = (current.modes_for(target), next.modes_for(target));
        for (before, after, category) in [
            (was.bedtime, is.bedtime, LockCategory::Bedtime),
            (was.calendar, is.calendar, LockCategory::Calendar),
            (was.auto_focus, is.auto_focus, LockCategory::Schedule),
        ] {
            if before && !after && !categories.contains(&category) {
                categories.push(category);
            }
        }
    }
    categories
}
