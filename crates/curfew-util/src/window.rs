//! Time-of-day window arithmetic
//!
//! Windows are expressed in minutes since local midnight. A window with
//! `start < end` lies within a single day, `start > end` wraps past
//! midnight, and `start == end` is never active.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minutes in a day
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Fixed daily interval during which every strict lock lifts.
pub const MAINTENANCE_WINDOW: TimeWindow = TimeWindow {
    start: MinuteOfDay(0),
    end: MinuteOfDay(10),
};

/// A minute of the local day, 0..1440
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: MinuteOfDay = MinuteOfDay(0);

    pub fn new(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn from_hm(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour as u16 * 60 + minute as u16))
        } else {
            None
        }
    }

    /// Minute of day of a local timestamp (seconds are truncated)
    pub fn of(dt: &DateTime<Local>) -> Self {
        Self((dt.hour() * 60 + dt.minute()) as u16)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }
}

impl TryFrom<u16> for MinuteOfDay {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("minute of day out of range: {}", value))
    }
}

impl From<MinuteOfDay> for u16 {
    fn from(m: MinuteOfDay) -> Self {
        m.0
    }
}

/// Parses `HH:MM`
impl FromStr for MinuteOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{}'", s))?;
        let hour: u8 = hour.parse().map_err(|_| format!("invalid hour in '{}'", s))?;
        let minute: u8 = minute
            .parse()
            .map_err(|_| format!("invalid minute in '{}'", s))?;
        Self::from_hm(hour, minute).ok_or_else(|| format!("time out of range: '{}'", s))
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Whether `now` lies in the window `[start, end)`, honouring midnight wraparound
pub fn in_window(now: MinuteOfDay, start: MinuteOfDay, end: MinuteOfDay) -> bool {
    if start < end {
        start <= now && now < end
    } else if start > end {
        now >= start || now < end
    } else {
        false
    }
}

/// Absolute timestamp of the window's next end boundary as seen from `now`.
///
/// The end is placed on the current day; when that instant is not after
/// `now` (the window wraps and we are still before midnight, or the window
/// has already closed today), a full day is added.
pub fn window_end(now: DateTime<Local>, _start: MinuteOfDay, end: MinuteOfDay) -> DateTime<Local> {
    let now_minute = MinuteOfDay::of(&now).as_u16() as i64;
    let mut delta = end.as_u16() as i64 - now_minute;
    if delta <= 0 {
        delta += MINUTES_PER_DAY as i64;
    }
    start_of_minute(now) + Duration::minutes(delta)
}

/// The next local midnight strictly after `now`
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .succ_opt()
        .map(|tomorrow| tomorrow.and_time(NaiveTime::MIN))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| {
            let remaining = MINUTES_PER_DAY as i64 - MinuteOfDay::of(&now).as_u16() as i64;
            start_of_minute(now) + Duration::minutes(remaining)
        })
}

fn start_of_minute(dt: DateTime<Local>) -> DateTime<Local> {
    dt - Duration::seconds(dt.second() as i64) - Duration::nanoseconds(dt.nanosecond() as i64)
}

/// A daily time-of-day window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

impl TimeWindow {
    pub fn new(start: MinuteOfDay, end: MinuteOfDay) -> Self {
        Self { start, end }
    }

    /// Check if the given local datetime falls within this window
    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        in_window(MinuteOfDay::of(dt), self.start, self.end)
    }

    /// End of the current occurrence of this window, if `dt` is inside it
    pub fn active_until(&self, dt: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.contains(dt).then(|| window_end(*dt, self.start, self.end))
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
