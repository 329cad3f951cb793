//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Engine timing and identity
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Packages that are never blocked
    #[serde(default)]
    pub whitelist: RawWhitelist,

    /// Emergency bypass allowance
    #[serde(default)]
    pub emergency: RawEmergency,
}

/// Engine-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEngineConfig {
    /// Package name of the blocker itself
    pub self_package: Option<String>,

    /// Period of the background recompute (default: 180)
    pub rebuild_interval_seconds: Option<u64>,

    /// Foreground sampling period of the host (default: 5)
    pub usage_poll_seconds: Option<u64>,

    /// How often usage counters are persisted (default: 60)
    pub usage_flush_seconds: Option<u64>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWhitelist {
    #[serde(default)]
    pub packages: Vec<String>,

    /// Drop the built-in system package list
    #[serde(default)]
    pub replace_builtin: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEmergency {
    pub daily_uses: Option<u8>,
    pub session_minutes: Option<u32>,
}
