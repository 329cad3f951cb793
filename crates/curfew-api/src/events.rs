//! Host protocol: events from the platform bridge and replies to it
//!
//! Both directions are newline-delimited JSON objects tagged by `type`.

use chrono::{DateTime, Local};
use curfew_util::{GroupId, PackageName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    AppLimit, BedtimeWindow, CalendarBlock, FocusMode, GroupLimit, LockFlags, Schedule,
    SystemPackages, TargetModes, UnlockRequest, Verdict, API_VERSION,
};

/// Events sent by the host platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A different application came to the foreground
    ForegroundChanged { package: PackageName },

    /// The browser navigated to a domain
    DomainVisited { domain: String },

    /// Foreground time observed by the usage poller
    UsageTick { package: PackageName, elapsed_ms: u64 },

    /// Installed package inventory changed
    PackagesChanged { installed: Vec<PackageName> },

    /// Default launcher or active keyboard changed
    SystemPackages(SystemPackages),

    /// Policies were written to the store elsewhere; reload and recompute
    RebuildRequested,

    // Policy commands, answered with `accepted` or `rejected`
    StartFocus {
        mode: FocusMode,
        #[serde(default)]
        selected: BTreeSet<PackageName>,
        #[serde(default)]
        blocked_domains: BTreeSet<String>,
        /// None runs until stopped
        #[serde(default)]
        minutes: Option<u32>,
    },

    StopFocus,

    ActivateEmergency,

    EnableStrict {
        unlock: UnlockRequest,
        #[serde(default)]
        locks: LockFlags,
    },

    DisableStrict {
        #[serde(default)]
        password: Option<String>,
    },

    StartForgotPassword,

    SetStrictLocks { locks: LockFlags },

    SetBedtime { bedtime: BedtimeWindow },

    SetSchedules { schedules: Vec<Schedule> },

    SetBlocklist { packages: BTreeSet<PackageName> },

    UpsertAppLimit { limit: AppLimit },

    RemoveAppLimit { package: PackageName },

    UpsertGroupLimit { group: GroupLimit },

    RemoveGroupLimit { id: GroupId },

    SyncCalendar { blocks: Vec<CalendarBlock> },

    SetCalendarBlockEnabled { id: String, enabled: bool },

    SetTargetModes { target: String, modes: TargetModes },
}

/// Replies written back to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyPayload {
    /// Decision for a foreground package or visited domain
    Decision(Verdict),

    /// Whether any time-windowed policy is active (drives Do-Not-Disturb)
    PolicyActivity { active: bool },

    /// Focus session ran out
    FocusEnded,

    /// Emergency bypass ran out
    EmergencyEnded,

    /// A policy command was applied
    Accepted { command: String },

    /// A policy command or external write was refused, usually by strict mode
    Rejected { command: String, message: String },

    /// The host sent a line that could not be decoded
    Error { message: String },
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReply {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: ReplyPayload,
}

impl HostReply {
    pub fn new(payload: ReplyPayload, timestamp: DateTime<Local>) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_foreground_event() {
        let line = r#"{"type":"foreground_changed","package":"com.x"}"#;
        let event: HostEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            HostEvent::ForegroundChanged {
                package: PackageName::new("com.x")
            }
        );
    }

    #[test]
    fn parse_system_packages_event() {
        let line = r#"{"type":"system_packages","launcher":"com.launcher","keyboard":null}"#;
        let event: HostEvent = serde_json::from_str(line).unwrap();
        assert!(matches!(
            event,
            HostEvent::SystemPackages(SystemPackages { launcher: Some(_), keyboard: None })
        ));
    }

    #[test]
    fn parse_commands() {
        let line = r#"{"type":"start_focus","mode":"block_only_selected","selected":["com.x"],"minutes":25}"#;
        match serde_json::from_str::<HostEvent>(line).unwrap() {
            HostEvent::StartFocus {
                mode,
                selected,
                blocked_domains,
                minutes,
            } => {
                assert_eq!(mode, FocusMode::BlockOnlySelected);
                assert!(selected.contains("com.x"));
                assert!(blocked_domains.is_empty());
                assert_eq!(minutes, Some(25));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let line = r#"{"type":"enable_strict","unlock":{"mode":"password","password":"hunter2"}}"#;
        let event: HostEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            HostEvent::EnableStrict {
                unlock: UnlockRequest::Password {
                    password: "hunter2".into()
                },
                locks: LockFlags::empty(),
            }
        );

        let line = r#"{"type":"disable_strict"}"#;
        let event: HostEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event, HostEvent::DisableStrict { password: None });
    }

    #[test]
    fn reply_is_tagged() {
        let reply = HostReply::new(
            ReplyPayload::PolicyActivity { active: true },
            curfew_util::now(),
        );
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains(r#""type":"policy_activity""#));
        assert!(json.contains(r#""api_version":1"#));
    }
}
