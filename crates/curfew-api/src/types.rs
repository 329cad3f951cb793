//! Policy entities

use chrono::{DateTime, Datelike, Local, NaiveDate};
use curfew_util::{
    in_window, window_end, DaysOfWeek, GroupId, MinuteOfDay, PackageName, SessionId, TimeWindow,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Which packages a focus session blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    /// Everything is blocked except the selected packages
    BlockAllExceptSelected,
    /// Only the selected packages are blocked
    #[default]
    BlockOnlySelected,
}

/// Manual focus session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FocusSession {
    pub active: bool,
    pub session_id: Option<SessionId>,
    /// None means the session runs until stopped
    pub ends_at: Option<DateTime<Local>>,
    pub mode: FocusMode,
    #[serde(default)]
    pub selected: BTreeSet<PackageName>,
    #[serde(default)]
    pub blocked_domains: BTreeSet<String>,
}

impl FocusSession {
    pub fn is_active(&self, now: DateTime<Local>) -> bool {
        self.active && self.ends_at.is_none_or(|end| now < end)
    }

    /// Active flag still set but the end timestamp has passed
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        self.active && self.ends_at.is_some_and(|end| now >= end)
    }

    /// Whether the membership rule selects this package for blocking
    pub fn targets(&self, package: &PackageName) -> bool {
        match self.mode {
            FocusMode::BlockOnlySelected => self.selected.contains(package),
            FocusMode::BlockAllExceptSelected => !self.selected.contains(package),
        }
    }
}

/// Recurring nightly bedtime window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedtimeWindow {
    pub enabled: bool,
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
    #[serde(default)]
    pub packages: BTreeSet<PackageName>,
}

impl Default for BedtimeWindow {
    fn default() -> Self {
        Self {
            enabled: false,
            start: MinuteOfDay::from_hm(22, 0).unwrap_or(MinuteOfDay::MIDNIGHT),
            end: MinuteOfDay::from_hm(7, 0).unwrap_or(MinuteOfDay::MIDNIGHT),
            packages: BTreeSet::new(),
        }
    }
}

impl BedtimeWindow {
    /// End of the current bedtime occurrence, if bedtime is on right now
    pub fn active_until(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        if !self.enabled {
            return None;
        }
        TimeWindow::new(self.start, self.end).active_until(&now)
    }
}

/// Named, repeat-day-aware window applying the universal blocklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub title: String,
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
    pub repeat_days: DaysOfWeek,
    #[serde(default)]
    pub reminder: bool,
}

impl Schedule {
    /// End of the current occurrence, if the schedule is running at `now`.
    ///
    /// The part of a wrapping window that falls after midnight belongs to the
    /// occurrence that started the previous day.
    pub fn active_until(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let minute = MinuteOfDay::of(&now);
        if !in_window(minute, self.start, self.end) {
            return None;
        }

        let started_yesterday = self.start > self.end && minute < self.end;
        let occurrence_day = if started_yesterday {
            now.date_naive().pred_opt()?
        } else {
            now.date_naive()
        };

        self.repeat_days
            .contains(occurrence_day.weekday())
            .then(|| window_end(now, self.start, self.end))
    }
}

/// Calendar-synced absolute block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarBlock {
    pub id: String,
    pub title: String,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub enabled: bool,
}

impl CalendarBlock {
    pub fn covers(&self, now: DateTime<Local>) -> bool {
        self.enabled && self.start <= now && now < self.end
    }
}

/// Decoded active-period list of a limit rule
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivePeriods {
    /// The rule applies all day
    #[default]
    Always,
    /// The rule applies inside any of these windows; an empty list means all day
    Windows { windows: Vec<TimeWindow> },
    /// Persisted data could not be decoded; enforced as all day
    Unparseable { raw: String },
}

impl ActivePeriods {
    pub fn is_active(&self, now: &DateTime<Local>) -> bool {
        match self {
            ActivePeriods::Always | ActivePeriods::Unparseable { .. } => true,
            ActivePeriods::Windows { windows } => {
                windows.is_empty() || windows.iter().any(|w| w.contains(now))
            }
        }
    }
}

/// Per-app daily usage quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLimit {
    pub package: PackageName,
    pub limit_minutes: u32,
    #[serde(default)]
    pub is_strict: bool,
    #[serde(default)]
    pub active_periods: ActivePeriods,
}

impl AppLimit {
    pub fn limit(&self) -> Duration {
        Duration::from_secs(self.limit_minutes as u64 * 60)
    }
}

/// Daily usage quota shared by a group of packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLimit {
    pub id: GroupId,
    pub name: String,
    pub limit_minutes: u32,
    #[serde(default)]
    pub members: BTreeSet<PackageName>,
    #[serde(default)]
    pub is_strict: bool,
    #[serde(default)]
    pub active_periods: ActivePeriods,
}

impl GroupLimit {
    pub fn limit(&self) -> Duration {
        Duration::from_secs(self.limit_minutes as u64 * 60)
    }
}

/// Bounded-use, time-limited global suspension of all blocking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyBypass {
    pub uses_remaining: u8,
    /// Day the use counter was last refilled
    pub last_reset: Option<NaiveDate>,
    pub session_id: Option<SessionId>,
    pub session_ends_at: Option<DateTime<Local>>,
}

/// Uses granted per calendar day unless configured otherwise
pub const DEFAULT_EMERGENCY_USES: u8 = 3;

impl Default for EmergencyBypass {
    fn default() -> Self {
        Self {
            uses_remaining: DEFAULT_EMERGENCY_USES,
            last_reset: None,
            session_id: None,
            session_ends_at: None,
        }
    }
}

impl EmergencyBypass {
    pub fn is_active(&self, now: DateTime<Local>) -> bool {
        self.session_ends_at.is_some_and(|end| now < end)
    }
}

/// Which policy categories apply to a package or domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetModes {
    #[serde(default = "enabled")]
    pub focus: bool,
    #[serde(default = "enabled")]
    pub auto_focus: bool,
    #[serde(default = "enabled")]
    pub bedtime: bool,
    #[serde(default = "enabled")]
    pub calendar: bool,
}

fn enabled() -> bool {
    true
}

impl Default for TargetModes {
    fn default() -> Self {
        Self {
            focus: true,
            auto_focus: true,
            bedtime: true,
            calendar: true,
        }
    }
}

/// Host-reported packages that must always stay usable
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemPackages {
    pub launcher: Option<PackageName>,
    pub keyboard: Option<PackageName>,
}
