//! Store trait definitions

use chrono::NaiveDate;
use curfew_util::PackageName;
use std::time::Duration;

use crate::{AuditEvent, Entity, StoreResult};

/// Main store trait
///
/// Object safe so the daemon can hold an `Arc<dyn Store>`; typed entity
/// access goes through [`StoreExt`].
pub trait Store: Send + Sync {
    // Policy entities

    /// Load the JSON document stored under `key`
    fn load_document(&self, key: &str) -> StoreResult<Option<String>>;

    /// Replace the JSON document stored under `key`
    fn save_document(&self, key: &str, json: &str) -> StoreResult<()>;

    // Usage totals

    /// Get total usage for a package on a specific day
    fn get_usage(&self, package: &PackageName, day: NaiveDate) -> StoreResult<Duration>;

    /// Overwrite total usage for a package on a specific day
    fn set_usage(&self, package: &PackageName, day: NaiveDate, total: Duration) -> StoreResult<()>;

    /// All usage totals recorded for a day
    fn usage_for_day(&self, day: NaiveDate) -> StoreResult<Vec<(PackageName, Duration)>>;

    // Audit log

    /// Append an audit event, returning its assigned id
    fn append_audit(&self, event: AuditEvent) -> StoreResult<i64>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Typed entity access on top of [`Store`]
pub trait StoreExt: Store {
    /// Load an entity, or its default when nothing has been saved yet
    fn load<E: Entity>(&self) -> StoreResult<E> {
        match self.load_document(E::KEY)? {
            Some(json) => {
                let stored: E::Stored = serde_json::from_str(&json)?;
                Ok(E::from_stored(stored))
            }
            None => Ok(E::default()),
        }
    }

    /// Whether an entity has ever been saved
    fn contains<E: Entity>(&self) -> StoreResult<bool> {
        Ok(self.load_document(E::KEY)?.is_some())
    }

    fn save<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        let json = serde_json::to_string(&entity.to_stored())?;
        self.save_document(E::KEY, &json)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
