//! SQLite-based store implementation

use chrono::{DateTime, Local, NaiveDate};
use curfew_util::PackageName;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AuditEvent, AuditEventType, Store, StoreError, StoreResult};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Policy entities, one JSON document per key
            CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                json TEXT NOT NULL
            );

            -- Usage totals
            CREATE TABLE IF NOT EXISTS usage (
                package TEXT NOT NULL,
                day TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (package, day)
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_day ON usage(day);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn load_document(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let json = conn
            .query_row("SELECT json FROM documents WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(json)
    }

    fn save_document(&self, key: &str, json: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO documents (key, json)
            VALUES (?, ?)
            ON CONFLICT(key)
            DO UPDATE SET json = excluded.json
            "#,
            params![key, json],
        )?;

        debug!(key, "Document saved");
        Ok(())
    }

    fn get_usage(&self, package: &PackageName, day: NaiveDate) -> StoreResult<Duration> {
        let conn = self.conn()?;
        let day_str = day.format(DAY_FORMAT).to_string();

        let ms: Option<i64> = conn
            .query_row(
                "SELECT duration_ms FROM usage WHERE package = ? AND day = ?",
                params![package.as_str(), day_str],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Duration::from_millis(ms.unwrap_or(0).max(0) as u64))
    }

    fn set_usage(&self, package: &PackageName, day: NaiveDate, total: Duration) -> StoreResult<()> {
        let conn = self.conn()?;
        let day_str = day.format(DAY_FORMAT).to_string();
        let ms = i64::try_from(total.as_millis()).unwrap_or(i64::MAX);

        conn.execute(
            r#"
            INSERT INTO usage (package, day, duration_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(package, day)
            DO UPDATE SET duration_ms = excluded.duration_ms
            "#,
            params![package.as_str(), day_str, ms],
        )?;

        debug!(package = %package, day = %day_str, total_ms = ms, "Usage stored");
        Ok(())
    }

    fn usage_for_day(&self, day: NaiveDate) -> StoreResult<Vec<(PackageName, Duration)>> {
        let conn = self.conn()?;
        let day_str = day.format(DAY_FORMAT).to_string();

        let mut stmt =
            conn.prepare("SELECT package, duration_ms FROM usage WHERE day = ? ORDER BY package")?;
        let rows = stmt.query_map([day_str], |row| {
            let package: String = row.get(0)?;
            let ms: i64 = row.get(1)?;
            Ok((PackageName::new(package), Duration::from_millis(ms.max(0) as u64)))
        })?;

        let mut totals = Vec::new();
        for row in rows {
            totals.push(row?);
        }
        Ok(totals)
    }

    fn append_audit(&self, event: AuditEvent) -> StoreResult<i64> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        let id = conn.last_insert_rowid();
        debug!(event_id = id, "Audit event appended");

        Ok(id)
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| curfew_util::now());
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
