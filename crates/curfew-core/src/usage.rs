//! Per-package foreground time since local midnight
//!
//! Each package owns one atomic word packing the day it was last written
//! (days since the common era, high 20 bits) with the milliseconds
//! accumulated that day (low 44 bits). A counter whose day is older than
//! today reads as zero and restarts on the next write, so there is no
//! reset job. Increments never take the table lock once a package is known.

use chrono::{DateTime, Datelike, Local, NaiveDate};
use curfew_api::GroupLimit;
use curfew_store::{Store, StoreResult};
use curfew_util::PackageName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

const MS_BITS: u32 = 44;
const MS_MASK: u64 = (1 << MS_BITS) - 1;

fn day_stamp(day: NaiveDate) -> u64 {
    day.num_days_from_ce().max(0) as u64
}

fn pack(day: u64, ms: u64) -> u64 {
    (day << MS_BITS) | ms.min(MS_MASK)
}

fn unpack(word: u64) -> (u64, u64) {
    (word >> MS_BITS, word & MS_MASK)
}

#[derive(Debug, Default)]
struct UsageCounter {
    word: AtomicU64,
}

impl UsageCounter {
    fn add(&self, today: u64, ms: u64) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (day, total) = unpack(word);
                if day < today {
                    Some(pack(today, ms))
                } else {
                    Some(pack(day, total.saturating_add(ms)))
                }
            });
    }

    /// Raise the total to at least `ms` (restore path)
    fn restore(&self, today: u64, ms: u64) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (day, total) = unpack(word);
                if day < today {
                    Some(pack(today, ms))
                } else {
                    Some(pack(day, total.max(ms)))
                }
            });
    }

    fn read(&self, today: u64) -> u64 {
        let (day, total) = unpack(self.word.load(Ordering::Acquire));
        if day < today { 0 } else { total }
    }
}

/// Usage counters for every package seen today
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    counters: RwLock<HashMap<PackageName, Arc<UsageCounter>>>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, package: &PackageName) -> Arc<UsageCounter> {
        if let Some(counter) = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(package)
        {
            return counter.clone();
        }

        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(package.clone())
            .or_default()
            .clone()
    }

    /// Record foreground time for a package
    pub fn add(&self, package: &PackageName, elapsed: Duration, now: DateTime<Local>) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.counter(package).add(day_stamp(now.date_naive()), ms);
        debug!(package = %package, elapsed_ms = ms, "Usage recorded");
    }

    /// Time used today; unknown packages have used nothing
    pub fn usage(&self, package: &str, now: DateTime<Local>) -> Duration {
        let today = day_stamp(now.date_naive());
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(package)
            .map(|c| Duration::from_millis(c.read(today)))
            .unwrap_or(Duration::ZERO)
    }

    /// Time used today summed over a group's members
    pub fn group_usage(&self, group: &GroupLimit, now: DateTime<Local>) -> Duration {
        let today = day_stamp(now.date_naive());
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        group
            .members
            .iter()
            .filter_map(|member| counters.get(member.as_str()))
            .map(|c| Duration::from_millis(c.read(today)))
            .sum()
    }

    /// Non-zero totals for today, sorted by package
    pub fn totals(&self, now: DateTime<Local>) -> Vec<(PackageName, Duration)> {
        let today = day_stamp(now.date_naive());
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let mut totals: Vec<_> = counters
            .iter()
            .map(|(package, c)| (package.clone(), c.read(today)))
            .filter(|(_, ms)| *ms > 0)
            .map(|(package, ms)| (package, Duration::from_millis(ms)))
            .collect();
        totals.sort();
        totals
    }

    /// Load today's persisted totals; in-memory counts that are already
    /// higher are kept
    pub fn restore(&self, store: &dyn Store, now: DateTime<Local>) -> StoreResult<usize> {
        let day = now.date_naive();
        let today = day_stamp(day);
        let persisted = store.usage_for_day(day)?;
        let count = persisted.len();

        for (package, total) in persisted {
            let ms = u64::try_from(total.as_millis()).unwrap_or(u64::MAX);
            self.counter(&package).restore(today, ms);
        }

        debug!(day = %day, packages = count, "Usage restored");
        Ok(count)
    }

    /// Persist today's totals
    pub fn flush(&self, store: &dyn Store, now: DateTime<Local>) -> StoreResult<usize> {
        let day = now.date_naive();
        let totals = self.totals(now);
        for (package, total) in &totals {
            store.set_usage(package, day, *total)?;
        }

        debug!(day = %day, packages = totals.len(), "Usage flushed");
        Ok(totals.len())
    }
}
