//! Rebuild: turns policies and usage into a decision snapshot
//!
//! Categories are checked in a fixed order. Whitelist, an active emergency
//! bypass and the maintenance window short-circuit to "allowed"; after that
//! every matching category is recorded, highest priority first:
//! focus, bedtime, calendar, schedule, app limit, group limit.

use chrono::{DateTime, Local};
use curfew_api::{BlockMatch, BlockReason, Decision, FocusMode};
use curfew_config::EngineConfig;
use curfew_util::{next_local_midnight, GroupId, PackageName, MAINTENANCE_WINDOW};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::{DecisionCache, PolicyState, UsageAccumulator};

/// Per-run view of which time-windowed categories are on
struct ActiveCategories {
    focus: Option<BlockMatch>,
    bedtime: Option<BlockMatch>,
    calendar: Option<BlockMatch>,
    schedule: Option<BlockMatch>,
}

impl ActiveCategories {
    fn at(policy: &PolicyState, now: DateTime<Local>) -> Self {
        let focus = policy.focus.is_active(now).then(|| BlockMatch {
            reason: BlockReason::Focus,
            until: policy.focus.ends_at,
        });

        let bedtime = policy.bedtime.active_until(now).map(|until| BlockMatch {
            reason: BlockReason::Bedtime,
            until: Some(until),
        });

        let calendar = policy
            .calendar
            .iter()
            .filter(|block| block.covers(now))
            .max_by_key(|block| block.end)
            .map(|block| BlockMatch {
                reason: BlockReason::Calendar {
                    title: block.title.clone(),
                },
                until: Some(block.end),
            });

        let schedule = policy
            .schedules
            .iter()
            .filter_map(|s| s.active_until(now).map(|until| (s, until)))
            .max_by_key(|(_, until)| *until)
            .map(|(s, until)| BlockMatch {
                reason: BlockReason::Schedule {
                    title: s.title.clone(),
                },
                until: Some(until),
            });

        Self {
            focus,
            bedtime,
            calendar,
            schedule,
        }
    }

    fn any(&self) -> bool {
        self.focus.is_some()
            || self.bedtime.is_some()
            || self.calendar.is_some()
            || self.schedule.is_some()
    }
}

/// Computes decision snapshots
#[derive(Debug, Clone)]
pub struct Evaluator {
    whitelist: BTreeSet<PackageName>,
}

impl Evaluator {
    pub fn new(config: &EngineConfig) -> Self {
        let mut whitelist = config.whitelist.clone();
        whitelist.insert(config.engine.self_package.clone());
        Self { whitelist }
    }

    /// Static whitelist plus the host-reported launcher and keyboard
    fn whitelist_for(&self, policy: &PolicyState) -> HashSet<PackageName> {
        self.whitelist
            .iter()
            .chain(policy.system.launcher.iter())
            .chain(policy.system.keyboard.iter())
            .cloned()
            .collect()
    }

    pub fn rebuild(
        &self,
        policy: &PolicyState,
        usage: &UsageAccumulator,
        now: DateTime<Local>,
    ) -> DecisionCache {
        let whitelist = self.whitelist_for(policy);
        let mut cache = DecisionCache::empty(now);

        let emergency = policy
            .emergency
            .session_ends_at
            .filter(|_| policy.emergency.is_active(now));
        let maintenance = MAINTENANCE_WINDOW.active_until(&now);
        if emergency.is_some() || maintenance.is_some() {
            debug!(?emergency, ?maintenance, "Blocking suspended");
            cache.whitelist = whitelist;
            cache.suspended_until = emergency.into_iter().chain(maintenance).min();
            return cache;
        }

        let active = ActiveCategories::at(policy, now);
        let midnight = next_local_midnight(now);

        let app_hits: HashMap<&PackageName, BlockMatch> = policy
            .app_limits
            .iter()
            .filter(|limit| limit.limit_minutes > 0 && limit.active_periods.is_active(&now))
            .filter_map(|limit| {
                let used = usage.usage(limit.package.as_str(), now);
                (used >= limit.limit()).then(|| {
                    (
                        &limit.package,
                        BlockMatch {
                            reason: BlockReason::AppLimit {
                                used,
                                limit: limit.limit(),
                            },
                            until: Some(midnight),
                        },
                    )
                })
            })
            .collect();

        let group_hits: HashMap<&GroupId, BlockMatch> = policy
            .group_limits
            .iter()
            .filter(|group| group.limit_minutes > 0 && group.active_periods.is_active(&now))
            .filter_map(|group| {
                let used = usage.group_usage(group, now);
                (used >= group.limit()).then(|| {
                    (
                        &group.id,
                        BlockMatch {
                            reason: BlockReason::GroupLimit {
                                group: group.id.clone(),
                                name: group.name.clone(),
                                used,
                                limit: group.limit(),
                            },
                            until: Some(midnight),
                        },
                    )
                })
            })
            .collect();

        let mut candidates: BTreeSet<&PackageName> = BTreeSet::new();
        candidates.extend(&policy.installed);
        candidates.extend(&policy.blocklist);
        candidates.extend(&policy.bedtime.packages);
        candidates.extend(&policy.focus.selected);
        candidates.extend(policy.app_limits.iter().map(|l| &l.package));
        candidates.extend(policy.group_index.packages());

        for package in candidates {
            if whitelist.contains(package) {
                continue;
            }

            let modes = policy.modes_for(package.as_str());
            let mut matches = Vec::new();

            if let Some(m) = &active.focus
                && modes.focus
                && policy.focus.targets(package)
            {
                matches.push(m.clone());
            }
            if let Some(m) = &active.bedtime
                && modes.bedtime
                && policy.bedtime.packages.contains(package)
            {
                matches.push(m.clone());
            }
            if let Some(m) = &active.calendar
                && modes.calendar
                && policy.blocklist.contains(package)
            {
                matches.push(m.clone());
            }
            if let Some(m) = &active.schedule
                && modes.auto_focus
                && policy.blocklist.contains(package)
            {
                matches.push(m.clone());
            }
            if let Some(m) = app_hits.get(package) {
                matches.push(m.clone());
            }
            for group in policy.group_index.groups_of(package.as_str()) {
                if let Some(m) = group_hits.get(group) {
                    matches.push(m.clone());
                }
            }

            cache.entries.insert(package.clone(), Decision { matches });
        }

        // Anything never seen is outside the selection, so blocked
        if let Some(m) = &active.focus
            && policy.focus.mode == FocusMode::BlockAllExceptSelected
        {
            cache.fallback = Decision {
                matches: vec![m.clone()],
            };
        }

        if let Some(m) = &active.focus {
            for domain in &policy.focus.blocked_domains {
                let domain = normalize_domain(domain);
                if !domain.is_empty() && policy.modes_for(&domain).focus {
                    cache.domains.insert(
                        domain,
                        Decision {
                            matches: vec![m.clone()],
                        },
                    );
                }
            }
        }

        cache.whitelist = whitelist;
        cache.any_policy_active = active.any();

        debug!(
            entries = cache.entries.len(),
            domains = cache.domains.len(),
            any_policy_active = cache.any_policy_active,
            "Decisions evaluated"
        );
        cache
    }
}

/// Lowercase, without scheme, path, port or trailing dot
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next().unwrap_or_default();
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use curfew_api::{
        ActivePeriods, AppLimit, BedtimeWindow, BlockCategory, CalendarBlock, EmergencyBypass,
        FocusSession, GroupLimit, Schedule, SystemPackages, TargetModes,
    };
    use curfew_util::{DaysOfWeek, MinuteOfDay, TimeWindow};
    use std::sync::Arc;

    use crate::GroupIndex;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        // March 2025: the 10th is a Monday
        Local.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
    }

    fn pkg(name: &str) -> PackageName {
        PackageName::new(name)
    }

    fn set(names: &[&str]) -> BTreeSet<PackageName> {
        names.iter().map(|n| pkg(n)).collect()
    }

    fn m(minutes: u16) -> MinuteOfDay {
        MinuteOfDay::new(minutes).unwrap()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(&EngineConfig::default())
    }

    fn reason(cache: &DecisionCache, package: &str) -> Option<String> {
        cache
            .decision(package)
            .primary()
            .map(|m| m.reason.message())
    }

    fn focus_on(mode: FocusMode, selected: &[&str], ends_at: Option<DateTime<Local>>) -> FocusSession {
        FocusSession {
            active: true,
            session_id: None,
            ends_at,
            mode,
            selected: set(selected),
            blocked_domains: BTreeSet::new(),
        }
    }

    fn app_limit(package: &str, minutes: u32, periods: ActivePeriods) -> AppLimit {
        AppLimit {
            package: pkg(package),
            limit_minutes: minutes,
            is_strict: false,
            active_periods: periods,
        }
    }

    #[test]
    fn scenario_a_focus_block_only_selected() {
        let policy = PolicyState {
            focus: focus_on(FocusMode::BlockOnlySelected, &["com.x"], None),
            installed: set(&["com.x", "com.y"]),
            ..Default::default()
        };
        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), at(12, 14, 0));

        assert!(cache.decision("com.x").is_blocked());
        assert_eq!(reason(&cache, "com.x").as_deref(), Some("Focus Mode Active"));
        assert!(!cache.decision("com.y").is_blocked());
        assert!(!cache.decision("com.never.seen").is_blocked());
        assert!(cache.any_policy_active());
    }

    #[test]
    fn focus_block_all_except_selected_uses_fallback() {
        let ends = at(12, 15, 0);
        let policy = PolicyState {
            focus: focus_on(FocusMode::BlockAllExceptSelected, &["com.notes"], Some(ends)),
            installed: set(&["com.notes", "com.game"]),
            ..Default::default()
        };
        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), at(12, 14, 0));

        assert!(!cache.decision("com.notes").is_blocked());
        assert!(cache.decision("com.game").is_blocked());
        assert!(cache.decision("com.installed.later").is_blocked());
        assert_eq!(cache.decision("com.game").blocked_until(), Some(ends));
    }

    #[test]
    fn scenario_b_bedtime_wraps_midnight() {
        let policy = PolicyState {
            bedtime: BedtimeWindow {
                enabled: true,
                start: m(1320),
                end: m(420),
                packages: set(&["com.game"]),
            },
            ..Default::default()
        };
        let usage = UsageAccumulator::new();

        let late = evaluator().rebuild(&policy, &usage, at(12, 23, 30));
        assert_eq!(reason(&late, "com.game").as_deref(), Some("Bedtime"));
        assert_eq!(late.decision("com.game").blocked_until(), Some(at(13, 7, 0)));

        let early = evaluator().rebuild(&policy, &usage, at(13, 6, 0));
        assert!(early.decision("com.game").is_blocked());

        let noon = evaluator().rebuild(&policy, &usage, at(13, 12, 0));
        assert!(!noon.decision("com.game").is_blocked());
        assert!(!noon.any_policy_active());
    }

    #[test]
    fn scenario_c_app_limit() {
        let now = at(12, 16, 0);
        let policy = PolicyState {
            app_limits: vec![app_limit("com.video", 60, ActivePeriods::Windows { windows: vec![] })],
            ..Default::default()
        };

        let usage = UsageAccumulator::new();
        usage.add(&pkg("com.video"), std::time::Duration::from_secs(59 * 60), now);
        let cache = evaluator().rebuild(&policy, &usage, now);
        assert!(!cache.decision("com.video").is_blocked());

        usage.add(&pkg("com.video"), std::time::Duration::from_secs(2 * 60), now);
        let cache = evaluator().rebuild(&policy, &usage, now);
        assert_eq!(reason(&cache, "com.video").as_deref(), Some("Daily Limit Reached"));
        assert_eq!(cache.decision("com.video").blocked_until(), Some(at(13, 0, 0)));
        // Limits do not count as a time-windowed policy
        assert!(!cache.any_policy_active());
    }

    #[test]
    fn zero_limit_never_blocks() {
        let now = at(12, 16, 0);
        let policy = PolicyState {
            app_limits: vec![app_limit("com.video", 0, ActivePeriods::Always)],
            ..Default::default()
        };
        let usage = UsageAccumulator::new();
        usage.add(&pkg("com.video"), std::time::Duration::from_secs(3600), now);
        let cache = evaluator().rebuild(&policy, &usage, now);
        assert!(!cache.decision("com.video").is_blocked());
    }

    #[test]
    fn scenario_d_emergency_overrides_everything() {
        let now = at(12, 23, 0);
        let policy = PolicyState {
            focus: focus_on(FocusMode::BlockAllExceptSelected, &[], None),
            bedtime: BedtimeWindow {
                enabled: true,
                start: m(1320),
                end: m(420),
                packages: set(&["com.game"]),
            },
            blocklist: set(&["com.game"]),
            emergency: EmergencyBypass {
                session_ends_at: Some(now + Duration::milliseconds(60_000)),
                ..Default::default()
            },
            installed: set(&["com.game", "com.chat"]),
            ..Default::default()
        };
        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), now);

        assert!(!cache.decision("com.game").is_blocked());
        assert!(!cache.decision("com.chat").is_blocked());
        assert!(!cache.decision("com.unknown").is_blocked());
        assert!(!cache.any_policy_active());
        assert_eq!(cache.suspended_until(), Some(now + Duration::milliseconds(60_000)));
    }

    #[test]
    fn maintenance_window_suspends_blocking() {
        let policy = PolicyState {
            focus: focus_on(FocusMode::BlockOnlySelected, &["com.x"], None),
            ..Default::default()
        };
        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), at(12, 0, 5));
        assert!(!cache.decision("com.x").is_blocked());
        assert!(!cache.any_policy_active());
        assert_eq!(cache.suspended_until(), Some(at(12, 0, 10)));

        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), at(12, 0, 10));
        assert!(cache.decision("com.x").is_blocked());
        assert_eq!(cache.suspended_until(), None);
    }

    #[test]
    fn whitelist_short_circuits_every_category() {
        let now = at(10, 23, 0); // Monday night
        let dialer = "com.android.dialer";
        let usage = UsageAccumulator::new();
        usage.add(&pkg(dialer), std::time::Duration::from_secs(7200), now);

        let groups = vec![GroupLimit {
            id: GroupId::new("all"),
            name: "All".into(),
            limit_minutes: 1,
            members: set(&[dialer, "com.launcher"]),
            is_strict: true,
            active_periods: ActivePeriods::Always,
        }];
        let policy = PolicyState {
            focus: focus_on(FocusMode::BlockAllExceptSelected, &[], None),
            bedtime: BedtimeWindow {
                enabled: true,
                start: m(1320),
                end: m(420),
                packages: set(&[dialer, "com.launcher"]),
            },
            blocklist: set(&[dialer, "com.launcher"]),
            schedules: vec![Schedule {
                id: "s".into(),
                title: "Night".into(),
                start: m(1320),
                end: m(1439),
                repeat_days: DaysOfWeek::ALL_DAYS,
                reminder: false,
            }],
            app_limits: vec![app_limit(dialer, 1, ActivePeriods::Always)],
            group_index: Arc::new(GroupIndex::build(&groups)),
            group_limits: groups,
            system: SystemPackages {
                launcher: Some(pkg("com.launcher")),
                keyboard: None,
            },
            ..Default::default()
        };

        let cache = evaluator().rebuild(&policy, &usage, now);
        assert!(cache.is_whitelisted(dialer));
        assert!(cache.is_whitelisted("com.launcher"));
        assert!(cache.blocked_packages().is_empty());
    }

    #[test]
    fn all_matches_recorded_in_priority_order() {
        let now = at(10, 23, 0); // Monday night
        let usage = UsageAccumulator::new();
        usage.add(&pkg("com.game"), std::time::Duration::from_secs(7200), now);

        let groups = vec![GroupLimit {
            id: GroupId::new("games"),
            name: "Games".into(),
            limit_minutes: 30,
            members: set(&["com.game"]),
            is_strict: false,
            active_periods: ActivePeriods::Always,
        }];
        let policy = PolicyState {
            bedtime: BedtimeWindow {
                enabled: true,
                start: m(1320),
                end: m(420),
                packages: set(&["com.game"]),
            },
            blocklist: set(&["com.game"]),
            calendar: vec![CalendarBlock {
                id: "c".into(),
                title: "Revision".into(),
                start: at(10, 22, 0),
                end: at(10, 23, 30),
                enabled: true,
            }],
            schedules: vec![Schedule {
                id: "s".into(),
                title: "Wind down".into(),
                start: m(1380),
                end: m(60),
                repeat_days: DaysOfWeek::WEEKDAYS,
                reminder: false,
            }],
            app_limits: vec![app_limit("com.game", 60, ActivePeriods::Always)],
            group_index: Arc::new(GroupIndex::build(&groups)),
            group_limits: groups,
            ..Default::default()
        };

        let cache = evaluator().rebuild(&policy, &usage, now);
        let categories: Vec<_> = cache
            .decision("com.game")
            .reasons()
            .map(|r| r.category())
            .collect();
        assert_eq!(
            categories,
            vec![
                BlockCategory::Bedtime,
                BlockCategory::Calendar,
                BlockCategory::Schedule,
                BlockCategory::AppLimit,
                BlockCategory::GroupLimit,
            ]
        );
        assert_eq!(reason(&cache, "com.game").as_deref(), Some("Bedtime"));
        assert_eq!(cache.decision("com.game").blocked_until(), Some(at(11, 7, 0)));
    }

    #[test]
    fn target_modes_opt_out() {
        let now = at(10, 23, 0);
        let mut modes = curfew_store::TargetModeTable::default();
        modes.0.insert(
            "com.chat".into(),
            TargetModes {
                bedtime: false,
                ..Default::default()
            },
        );
        let policy = PolicyState {
            bedtime: BedtimeWindow {
                enabled: true,
                start: m(1320),
                end: m(420),
                packages: set(&["com.chat", "com.game"]),
            },
            target_modes: modes,
            ..Default::default()
        };

        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), now);
        assert!(!cache.decision("com.chat").is_blocked());
        assert!(cache.decision("com.game").is_blocked());
    }

    #[test]
    fn schedule_applies_blocklist_on_repeat_days() {
        let policy = PolicyState {
            blocklist: set(&["com.feed"]),
            schedules: vec![Schedule {
                id: "work".into(),
                title: "Work".into(),
                start: m(540),
                end: m(1020),
                repeat_days: DaysOfWeek::WEEKDAYS,
                reminder: true,
            }],
            ..Default::default()
        };
        let usage = UsageAccumulator::new();

        let monday = evaluator().rebuild(&policy, &usage, at(10, 10, 0));
        assert_eq!(reason(&monday, "com.feed").as_deref(), Some("Scheduled Block: Work"));
        assert!(monday.any_policy_active());

        let saturday = evaluator().rebuild(&policy, &usage, at(15, 10, 0));
        assert!(!saturday.decision("com.feed").is_blocked());
    }

    #[test]
    fn corrupted_periods_fail_open() {
        let now = at(12, 12, 0);
        let usage = UsageAccumulator::new();
        usage.add(&pkg("com.video"), std::time::Duration::from_secs(3600), now);

        let morning_only = ActivePeriods::Windows {
            windows: vec![TimeWindow::new(m(480), m(600))],
        };
        let policy = PolicyState {
            app_limits: vec![app_limit("com.video", 30, morning_only)],
            ..Default::default()
        };
        let cache = evaluator().rebuild(&policy, &usage, now);
        assert!(!cache.decision("com.video").is_blocked(), "outside its period");

        let corrupted = curfew_store::decode_periods(r#"[{"start":"08:00","#);
        let policy = PolicyState {
            app_limits: vec![app_limit("com.video", 30, corrupted)],
            ..Default::default()
        };
        let cache = evaluator().rebuild(&policy, &usage, now);
        assert!(cache.decision("com.video").is_blocked());
    }

    #[test]
    fn focus_blocks_domains() {
        let mut focus = focus_on(FocusMode::BlockOnlySelected, &[], None);
        focus.blocked_domains = ["News.Example.com".to_string()].into_iter().collect();
        let policy = PolicyState {
            focus,
            ..Default::default()
        };

        let cache = evaluator().rebuild(&policy, &UsageAccumulator::new(), at(12, 12, 0));
        assert!(cache
            .domain_decision("news.example.com")
            .is_some_and(Decision::is_blocked));
        assert!(cache.domain_decision("example.com").is_none());
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://WWW.Example.com:443/path?q=1"), "www.example.com");
        assert_eq!(normalize_domain("example.com."), "example.com");
        assert_eq!(normalize_domain("user@host.org/x"), "host.org");
        assert_eq!(normalize_domain("  "), "");
    }
}
