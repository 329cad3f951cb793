//! Keyed policy entities

use curfew_api::{
    AppLimit, BedtimeWindow, CalendarBlock, EmergencyBypass, FocusSession, GroupLimit, Schedule,
    StrictModeConfig, SystemPackages, TargetModes,
};
use curfew_util::PackageName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{StoredAppLimit, StoredGroupLimit};

/// An independently persisted policy entity
pub trait Entity: Default {
    /// Document key
    const KEY: &'static str;

    /// Shape written to the store
    type Stored: Serialize + DeserializeOwned;

    fn to_stored(&self) -> Self::Stored;

    fn from_stored(stored: Self::Stored) -> Self;
}

/// Entities stored exactly as modelled
macro_rules! plain_entity {
    ($($ty:ty => $key:literal),* $(,)?) => {
        $(
            impl Entity for $ty {
                const KEY: &'static str = $key;
                type Stored = $ty;

                fn to_stored(&self) -> Self::Stored {
                    self.clone()
                }

                fn from_stored(stored: Self::Stored) -> Self {
                    stored
                }
            }
        )*
    };
}

plain_entity! {
    FocusSession => "focus",
    BedtimeWindow => "bedtime",
    Vec<Schedule> => "schedules",
    Vec<CalendarBlock> => "calendar_blocks",
    StrictModeConfig => "strict_mode",
    EmergencyBypass => "emergency",
    SystemPackages => "system_packages",
    Blocklist => "blocklist",
    InstalledPackages => "installed_packages",
    TargetModeTable => "target_modes",
}

impl Entity for Vec<AppLimit> {
    const KEY: &'static str = "app_limits";
    type Stored = Vec<StoredAppLimit>;

    fn to_stored(&self) -> Self::Stored {
        self.iter().map(StoredAppLimit::from).collect()
    }

    fn from_stored(stored: Self::Stored) -> Self {
        stored.into_iter().map(AppLimit::from).collect()
    }
}

impl Entity for Vec<GroupLimit> {
    const KEY: &'static str = "group_limits";
    type Stored = Vec<StoredGroupLimit>;

    fn to_stored(&self) -> Self::Stored {
        self.iter().map(StoredGroupLimit::from).collect()
    }

    fn from_stored(stored: Self::Stored) -> Self {
        stored.into_iter().map(GroupLimit::from).collect()
    }
}

/// Universal target list applied by schedules and calendar blocks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blocklist(pub BTreeSet<PackageName>);

/// Packages the host last reported as installed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstalledPackages(pub BTreeSet<PackageName>);

/// Per-package and per-domain category opt-ins
///
/// Targets without an entry opt into every category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetModeTable(pub BTreeMap<String, TargetModes>);

impl TargetModeTable {
    pub fn modes_for(&self, target: &str) -> TargetModes {
        self.0.get(target).copied().unwrap_or_default()
    }
}
