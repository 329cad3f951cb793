//! Validated engine configuration

use crate::schema::{RawConfig, RawEmergency, RawEngineConfig, RawWhitelist};
use curfew_api::DEFAULT_EMERGENCY_USES;
use curfew_util::{default_data_dir, PackageName};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Package name the blocker runs under unless configured
pub const DEFAULT_SELF_PACKAGE: &str = "dev.curfew.app";

pub const DEFAULT_REBUILD_INTERVAL: Duration = Duration::from_secs(180);
pub const DEFAULT_USAGE_POLL: Duration = Duration::from_secs(5);
pub const DEFAULT_USAGE_FLUSH: Duration = Duration::from_secs(60);
pub const DEFAULT_EMERGENCY_SESSION: Duration = Duration::from_secs(5 * 60);

/// System packages that stay usable regardless of policy
pub const BUILTIN_WHITELIST: &[&str] = &[
    "com.android.systemui",
    "com.android.settings",
    "com.android.dialer",
    "com.google.android.dialer",
    "com.android.phone",
    "com.android.emergency",
    "com.android.calculator2",
    "com.google.android.calculator",
    "com.android.deskclock",
    "com.google.android.deskclock",
    "com.android.packageinstaller",
    "com.google.android.packageinstaller",
];

/// Validated configuration (immutable for the daemon's lifetime)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    /// Static whitelist; the host adds launcher and keyboard at runtime
    pub whitelist: BTreeSet<PackageName>,
    pub emergency: EmergencySettings,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub self_package: PackageName,
    pub rebuild_interval: Duration,
    pub usage_poll: Duration,
    pub usage_flush: Duration,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct EmergencySettings {
    pub daily_uses: u8,
    pub session_length: Duration,
}

impl EngineConfig {
    /// Convert from a raw config that has already passed validation
    pub fn from_raw(raw: RawConfig) -> Self {
        let engine = EngineSettings::from_raw(raw.engine);

        let mut whitelist = whitelist_from_raw(raw.whitelist);
        whitelist.insert(engine.self_package.clone());

        Self {
            engine,
            whitelist,
            emergency: EmergencySettings::from_raw(raw.emergency),
        }
    }

    /// Whether a package is on the static whitelist
    pub fn is_whitelisted(&self, package: &str) -> bool {
        self.whitelist.contains(package)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_raw(RawConfig {
            config_version: crate::CURRENT_CONFIG_VERSION,
            engine: RawEngineConfig::default(),
            whitelist: RawWhitelist::default(),
            emergency: RawEmergency::default(),
        })
    }
}

impl EngineSettings {
    fn from_raw(raw: RawEngineConfig) -> Self {
        Self {
            self_package: PackageName::new(
                raw.self_package
                    .unwrap_or_else(|| DEFAULT_SELF_PACKAGE.to_string()),
            ),
            rebuild_interval: raw
                .rebuild_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REBUILD_INTERVAL),
            usage_poll: raw
                .usage_poll_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_USAGE_POLL),
            usage_flush: raw
                .usage_flush_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_USAGE_FLUSH),
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
        }
    }
}

impl EmergencySettings {
    fn from_raw(raw: RawEmergency) -> Self {
        Self {
            daily_uses: raw.daily_uses.unwrap_or(DEFAULT_EMERGENCY_USES),
            session_length: raw
                .session_minutes
                .map(|m| Duration::from_secs(m as u64 * 60))
                .unwrap_or(DEFAULT_EMERGENCY_SESSION),
        }
    }
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self::from_raw(RawEmergency::default())
    }
}

fn whitelist_from_raw(raw: RawWhitelist) -> BTreeSet<PackageName> {
    let builtin: &[&str] = if raw.replace_builtin {
        &[]
    } else {
        BUILTIN_WHITELIST
    };

    builtin
        .iter()
        .map(|p| PackageName::new(*p))
        .chain(raw.packages.into_iter().map(PackageName::new))
        .collect()
}
