//! Hot-path gate consulted on every foreground change

use chrono::{DateTime, Local};
use curfew_api::Verdict;
use curfew_util::PackageName;
use std::sync::Arc;

use crate::{normalize_domain, SnapshotCell};

/// Answers "is this blocked?" from the published snapshot.
///
/// Never touches the store or recomputes policy; the only shared state read
/// is the snapshot pointer.
#[derive(Debug, Clone)]
pub struct HotPathGate {
    cell: Arc<SnapshotCell>,
    self_package: PackageName,
}

impl HotPathGate {
    pub fn new(cell: Arc<SnapshotCell>, self_package: PackageName) -> Self {
        Self { cell, self_package }
    }

    pub fn evaluate(&self, package: &str, now: DateTime<Local>) -> Verdict {
        if package == self.self_package.as_str() {
            return Verdict::allow(package);
        }

        let snapshot = self.cell.get();
        if snapshot.is_whitelisted(package) {
            return Verdict::allow(package);
        }

        Verdict::from_decision(package, snapshot.decision(package), now)
    }

    /// Checks the domain and each parent domain, most specific first
    pub fn evaluate_domain(&self, domain: &str, now: DateTime<Local>) -> Verdict {
        let normalized = normalize_domain(domain);
        let snapshot = self.cell.get();

        let mut candidate = normalized.as_str();
        loop {
            if let Some(decision) = snapshot.domain_decision(candidate) {
                let verdict = Verdict::from_decision(domain, decision, now);
                if verdict.blocked {
                    return verdict;
                }
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => break,
            }
        }

        Verdict::allow(domain)
    }

    pub fn is_any_policy_active(&self) -> bool {
        self.cell.get().any_policy_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use curfew_api::{BlockMatch, BlockReason, Decision};

    use crate::DecisionCache;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 12, 14, 0, 0).unwrap()
    }

    fn focus(until: Option<DateTime<Local>>) -> Decision {
        Decision {
            matches: vec![BlockMatch {
                reason: BlockReason::Focus,
                until,
            }],
        }
    }

    fn gate_with(cache: DecisionCache) -> HotPathGate {
        HotPathGate::new(
            Arc::new(SnapshotCell::new(cache)),
            PackageName::new("dev.curfew.app"),
        )
    }

    #[test]
    fn own_package_always_allowed() {
        let mut cache = DecisionCache::empty(now());
        cache.fallback = focus(None);
        let gate = gate_with(cache);

        assert!(!gate.evaluate("dev.curfew.app", now()).blocked);
        assert!(gate.evaluate("com.other", now()).blocked);
    }

    #[test]
    fn whitelist_beats_entries() {
        let mut cache = DecisionCache::empty(now());
        cache
            .entries
            .insert(PackageName::new("com.android.dialer"), focus(None));
        cache.whitelist.insert(PackageName::new("com.android.dialer"));
        let gate = gate_with(cache);

        let verdict = gate.evaluate("com.android.dialer", now());
        assert!(!verdict.blocked);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn stale_entry_expires_without_rebuild() {
        let end = now() + Duration::minutes(5);
        let mut cache = DecisionCache::empty(now());
        cache.entries.insert(PackageName::new("com.x"), focus(Some(end)));
        let gate = gate_with(cache);

        let verdict = gate.evaluate("com.x", now());
        assert!(verdict.blocked);
        assert_eq!(verdict.blocked_until, Some(end));
        assert!(!gate.evaluate("com.x", end).blocked);
    }

    #[test]
    fn domain_matches_parent_domains() {
        let mut cache = DecisionCache::empty(now());
        cache.domains.insert("example.com".into(), focus(None));
        let gate = gate_with(cache);

        assert!(gate.evaluate_domain("example.com", now()).blocked);
        assert!(gate.evaluate_domain("https://News.Example.com/today", now()).blocked);
        assert!(!gate.evaluate_domain("example.org", now()).blocked);
        assert!(!gate.evaluate_domain("com", now()).blocked);
    }

    #[test]
    fn verdict_keeps_original_target() {
        let mut cache = DecisionCache::empty(now());
        cache.domains.insert("example.com".into(), focus(None));
        let gate = gate_with(cache);

        let verdict = gate.evaluate_domain("WWW.example.com", now());
        assert_eq!(verdict.target, "WWW.example.com");
    }
}
