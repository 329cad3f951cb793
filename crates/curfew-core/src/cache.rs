//! The published decision snapshot and the cell holding it

use chrono::{DateTime, Local};
use curfew_api::Decision;
use curfew_util::PackageName;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable decision map produced by one evaluator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCache {
    pub(crate) entries: HashMap<PackageName, Decision>,
    pub(crate) domains: HashMap<String, Decision>,
    /// Decision for packages with no entry
    pub(crate) fallback: Decision,
    pub(crate) whitelist: HashSet<PackageName>,
    pub(crate) any_policy_active: bool,
    /// End of the emergency bypass or maintenance window this snapshot was
    /// built in; blocking resumes only after a rebuild past it
    pub(crate) suspended_until: Option<DateTime<Local>>,
    pub(crate) built_at: DateTime<Local>,
    pub(crate) generation: u64,
}

impl DecisionCache {
    /// Snapshot that blocks nothing
    pub fn empty(built_at: DateTime<Local>) -> Self {
        Self {
            entries: HashMap::new(),
            domains: HashMap::new(),
            fallback: Decision::ALLOWED,
            whitelist: HashSet::new(),
            any_policy_active: false,
            suspended_until: None,
            built_at,
            generation: 0,
        }
    }

    pub fn decision(&self, package: &str) -> &Decision {
        self.entries.get(package).unwrap_or(&self.fallback)
    }

    /// Decision for an exact, normalized domain
    pub fn domain_decision(&self, domain: &str) -> Option<&Decision> {
        self.domains.get(domain)
    }

    pub fn is_whitelisted(&self, package: &str) -> bool {
        self.whitelist.contains(package)
    }

    pub fn any_policy_active(&self) -> bool {
        self.any_policy_active
    }

    pub fn suspended_until(&self) -> Option<DateTime<Local>> {
        self.suspended_until
    }

    pub fn built_at(&self) -> DateTime<Local> {
        self.built_at
    }

    /// Publication number, assigned by [`SnapshotCell::publish`]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fallback(&self) -> &Decision {
        &self.fallback
    }

    /// Packages with a blocking entry, sorted
    pub fn blocked_packages(&self) -> BTreeSet<&PackageName> {
        self.entries
            .iter()
            .filter(|(_, d)| d.is_blocked())
            .map(|(p, _)| p)
            .collect()
    }

    pub fn blocked_domains(&self) -> BTreeSet<&str> {
        self.domains
            .iter()
            .filter(|(_, d)| d.is_blocked())
            .map(|(d, _)| d.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holder of the current snapshot.
///
/// Readers clone the `Arc` under a read lock that is held for a pointer
/// copy only; the writer swaps in a fully built snapshot, so a reader sees
/// either the previous snapshot or the new one.
#[derive(Debug)]
pub struct SnapshotCell {
    current: RwLock<Arc<DecisionCache>>,
    generation: AtomicU64,
}

impl SnapshotCell {
    pub fn new(initial: DecisionCache) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> Arc<DecisionCache> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current snapshot, returning the one it replaced
    pub fn publish(&self, mut cache: DecisionCache) -> Arc<DecisionCache> {
        cache.generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let next = Arc::new(cache);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, next)
    }
}
