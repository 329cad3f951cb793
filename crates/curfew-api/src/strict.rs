//! Strict-mode configuration

use bitflags::bitflags;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Configuration areas that strict mode can lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockCategory {
    Blocklist,
    Bedtime,
    AppLimit,
    GroupLimit,
    Schedule,
    NightlyLimit,
    Gamification,
    AntiUninstall,
    AppInfoProtection,
    TimeCheatProtection,
    Emergency,
    AutoDnd,
    SleepMode,
    AccessibilityProtection,
    Calendar,
}

impl LockCategory {
    pub const ALL: [LockCategory; 15] = [
        LockCategory::Blocklist,
        LockCategory::Bedtime,
        LockCategory::AppLimit,
        LockCategory::GroupLimit,
        LockCategory::Schedule,
        LockCategory::NightlyLimit,
        LockCategory::Gamification,
        LockCategory::AntiUninstall,
        LockCategory::AppInfoProtection,
        LockCategory::TimeCheatProtection,
        LockCategory::Emergency,
        LockCategory::AutoDnd,
        LockCategory::SleepMode,
        LockCategory::AccessibilityProtection,
        LockCategory::Calendar,
    ];

    pub fn flag(self) -> LockFlags {
        match self {
            LockCategory::Blocklist => LockFlags::BLOCKLIST,
            LockCategory::Bedtime => LockFlags::BEDTIME,
            LockCategory::AppLimit => LockFlags::APP_LIMIT,
            LockCategory::GroupLimit => LockFlags::GROUP_LIMIT,
            LockCategory::Schedule => LockFlags::SCHEDULE,
            LockCategory::NightlyLimit => LockFlags::NIGHTLY_LIMIT,
            LockCategory::Gamification => LockFlags::GAMIFICATION,
            LockCategory::AntiUninstall => LockFlags::ANTI_UNINSTALL,
            LockCategory::AppInfoProtection => LockFlags::APP_INFO_PROTECTION,
            LockCategory::TimeCheatProtection => LockFlags::TIME_CHEAT_PROTECTION,
            LockCategory::Emergency => LockFlags::EMERGENCY,
            LockCategory::AutoDnd => LockFlags::AUTO_DND,
            LockCategory::SleepMode => LockFlags::SLEEP_MODE,
            LockCategory::AccessibilityProtection => LockFlags::ACCESSIBILITY_PROTECTION,
            LockCategory::Calendar => LockFlags::CALENDAR,
        }
    }
}

bitflags! {
    /// Per-category lock switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LockFlags: u16 {
        const BLOCKLIST = 1 << 0;
        const BEDTIME = 1 << 1;
        const APP_LIMIT = 1 << 2;
        const GROUP_LIMIT = 1 << 3;
        const SCHEDULE = 1 << 4;
        const NIGHTLY_LIMIT = 1 << 5;
        const GAMIFICATION = 1 << 6;
        const ANTI_UNINSTALL = 1 << 7;
        const APP_INFO_PROTECTION = 1 << 8;
        const TIME_CHEAT_PROTECTION = 1 << 9;
        const EMERGENCY = 1 << 10;
        const AUTO_DND = 1 << 11;
        const SLEEP_MODE = 1 << 12;
        const ACCESSIBILITY_PROTECTION = 1 << 13;
        const CALENDAR = 1 << 14;
    }
}

impl LockFlags {
    pub fn locks(&self, category: LockCategory) -> bool {
        self.contains(category.flag())
    }
}

/// How global strict mode may be turned off mid-session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UnlockMode {
    /// Only the maintenance window lifts strict mode
    #[default]
    None,
    /// Unlockable once the timer has elapsed
    Timer { unlock_at: DateTime<Local> },
    /// Unlockable with the password; `hash` is `salt$hex(sha256(salt || password))`
    Password { hash: String },
}

/// Unlock method chosen when turning strict mode on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UnlockRequest {
    None,
    Timer { unlock_at: DateTime<Local> },
    Password { password: String },
}

/// Global strict-mode state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrictModeConfig {
    pub enabled: bool,
    #[serde(default)]
    pub unlock: UnlockMode,
    /// Set once by the forgot-password flow; never cleared while enabled
    #[serde(default)]
    pub forgot_password_until: Option<DateTime<Local>>,
    #[serde(default)]
    pub locks: LockFlags,
}
