//! Persisted form of limit rules and their active periods
//!
//! Active periods are stored as a JSON string,
//! `[{"start":"HH:MM","end":"HH:MM"}, ...]`, with an empty string meaning
//! "all day". Decoding maps anything unreadable to
//! [`ActivePeriods::Unparseable`], which is enforced as all day, so a
//! corrupted rule keeps blocking instead of aborting the rebuild.
//!
//! The field itself accepts any JSON value: `null` reads as all day, and a
//! bare array or any other shape is re-serialized and decoded like a string.

use curfew_api::{ActivePeriods, AppLimit, GroupLimit};
use curfew_util::{GroupId, MinuteOfDay, PackageName, TimeWindow};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct PeriodRecord {
    start: String,
    end: String,
}

/// Encode active periods to their stored string
pub fn encode_periods(periods: &ActivePeriods) -> String {
    match periods {
        ActivePeriods::Always => String::new(),
        ActivePeriods::Windows { windows } => {
            let records: Vec<PeriodRecord> = windows
                .iter()
                .map(|w| PeriodRecord {
                    start: w.start.to_string(),
                    end: w.end.to_string(),
                })
                .collect();
            serde_json::to_string(&records).unwrap_or_default()
        }
        // Keep what was there so a later fix can recover it
        ActivePeriods::Unparseable { raw } => raw.clone(),
    }
}

/// Decode a stored period string; never fails
pub fn decode_periods(raw: &str) -> ActivePeriods {
    if raw.trim().is_empty() {
        return ActivePeriods::Always;
    }

    match parse_records(raw) {
        Ok(windows) => ActivePeriods::Windows { windows },
        Err(error) => {
            warn!(raw, error = %error, "Unreadable active periods, enforcing all day");
            ActivePeriods::Unparseable { raw: raw.to_string() }
        }
    }
}

/// Read a stored period field of any JSON shape as its string form
fn lenient_periods<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(raw) => raw,
        other => other.to_string(),
    })
}

fn parse_records(raw: &str) -> Result<Vec<TimeWindow>, String> {
    let records: Vec<PeriodRecord> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    records
        .iter()
        .map(|r| {
            let start: MinuteOfDay = r.start.parse()?;
            let end: MinuteOfDay = r.end.parse()?;
            Ok(TimeWindow::new(start, end))
        })
        .collect()
}

/// App limit as written to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAppLimit {
    pub package: PackageName,
    pub limit_minutes: u32,
    #[serde(default)]
    pub is_strict: bool,
    #[serde(default, deserialize_with = "lenient_periods")]
    pub active_periods: String,
}

impl From<&AppLimit> for StoredAppLimit {
    fn from(limit: &AppLimit) -> Self {
        Self {
            package: limit.package.clone(),
            limit_minutes: limit.limit_minutes,
            is_strict: limit.is_strict,
            active_periods: encode_periods(&limit.active_periods),
        }
    }
}

impl From<StoredAppLimit> for AppLimit {
    fn from(stored: StoredAppLimit) -> Self {
        Self {
            active_periods: decode_periods(&stored.active_periods),
            package: stored.package,
            limit_minutes: stored.limit_minutes,
            is_strict: stored.is_strict,
        }
    }
}

/// Group limit as written to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGroupLimit {
    pub id: GroupId,
    pub name: String,
    pub limit_minutes: u32,
    #[serde(default)]
    pub members: BTreeSet<PackageName>,
    #[serde(default)]
    pub is_strict: bool,
    #[serde(default, deserialize_with = "lenient_periods")]
    pub active_periods: String,
}

impl From<&GroupLimit> for StoredGroupLimit {
    fn from(group: &GroupLimit) -> Self {
        Self {
            id: group.id.clone(),
            name: group.name.clone(),
            limit_minutes: group.limit_minutes,
            members: group.members.clone(),
            is_strict: group.is_strict,
            active_periods: encode_periods(&group.active_periods),
        }
    }
}

impl From<StoredGroupLimit> for GroupLimit {
    fn from(stored: StoredGroupLimit) -> Self {
        Self {
            active_periods: decode_periods(&stored.active_periods),
            id: stored.id,
            name: stored.name,
            limit_minutes: stored.limit_minutes,
            members: stored.members,
            is_strict: stored.is_strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(minutes: u16) -> MinuteOfDay {
        MinuteOfDay::new(minutes).unwrap()
    }

    #[test]
    fn empty_string_is_all_day() {
        assert_eq!(decode_periods(""), ActivePeriods::Always);
        assert_eq!(decode_periods("   "), ActivePeriods::Always);
    }

    #[test]
    fn decodes_window_list() {
        let periods = decode_periods(r#"[{"start":"08:00","end":"12:30"},{"start":"22:00","end":"02:00"}]"#);
        assert_eq!(
            periods,
            ActivePeriods::Windows {
                windows: vec![TimeWindow::new(m(480), m(750)), TimeWindow::new(m(1320), m(120))],
            }
        );
    }

    #[test]
    fn empty_list_is_kept_as_windows() {
        let periods = decode_periods("[]");
        assert_eq!(periods, ActivePeriods::Windows { windows: vec![] });
    }

    #[test]
    fn garbage_fails_open() {
        for raw in [r#"[{"start":"08:00""#, r#"[{"start":"25:00","end":"12:00"}]"#, "not json"] {
            assert_eq!(
                decode_periods(raw),
                ActivePeriods::Unparseable { raw: raw.to_string() },
                "{raw}"
            );
        }
    }

    #[test]
    fn unparseable_is_written_back_unchanged() {
        let periods = ActivePeriods::Unparseable { raw: "{oops".into() };
        assert_eq!(encode_periods(&periods), "{oops");
    }

    #[test]
    fn period_field_of_any_shape_loads() {
        let null: StoredAppLimit = serde_json::from_str(
            r#"{"package":"com.x","limit_minutes":60,"active_periods":null}"#,
        )
        .unwrap();
        assert_eq!(AppLimit::from(null).active_periods, ActivePeriods::Always);

        let missing: StoredAppLimit =
            serde_json::from_str(r#"{"package":"com.x","limit_minutes":60}"#).unwrap();
        assert_eq!(AppLimit::from(missing).active_periods, ActivePeriods::Always);

        let bare_array: StoredAppLimit = serde_json::from_str(
            r#"{"package":"com.x","limit_minutes":60,"active_periods":[{"start":"08:00","end":"10:00"}]}"#,
        )
        .unwrap();
        assert_eq!(
            AppLimit::from(bare_array).active_periods,
            ActivePeriods::Windows {
                windows: vec![TimeWindow::new(m(480), m(600))],
            }
        );

        let number: StoredGroupLimit = serde_json::from_str(
            r#"{"id":"g","name":"G","limit_minutes":5,"active_periods":42}"#,
        )
        .unwrap();
        assert_eq!(
            GroupLimit::from(number).active_periods,
            ActivePeriods::Unparseable { raw: "42".into() }
        );
    }

    #[test]
    fn stored_group_keeps_members() {
        let group = GroupLimit {
            id: GroupId::new("social"),
            name: "Social".into(),
            limit_minutes: 30,
            members: [PackageName::new("com.a"), PackageName::new("com.b")].into_iter().collect(),
            is_strict: true,
            active_periods: ActivePeriods::Windows {
                windows: vec![TimeWindow::new(m(540), m(1020))],
            },
        };

        let stored = StoredGroupLimit::from(&group);
        assert_eq!(stored.active_periods, r#"[{"start":"09:00","end":"17:00"}]"#);
        assert_eq!(GroupLimit::from(stored), group);
    }
}
