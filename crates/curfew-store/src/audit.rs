//! Audit event types

use chrono::{DateTime, Local};
use curfew_api::{LockCategory, LockFlags};
use curfew_util::SessionId;
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Daemon started
    DaemonStarted,

    /// Daemon stopped
    DaemonStopped,

    /// Configuration loaded
    ConfigLoaded { whitelist_size: usize },

    /// A configuration mutation was checked against strict mode
    MutationChecked {
        category: LockCategory,
        rule_is_strict: bool,
        allowed: bool,
    },

    /// Global strict mode switched on
    StrictEnabled { unlock: String, locks: LockFlags },

    /// Global strict mode switched off
    StrictDisabled { via: String },

    /// Unlock attempt refused
    UnlockRejected { reason: String },

    /// Forgot-password wait started
    ForgotPasswordStarted { until: DateTime<Local> },

    /// Focus session started
    FocusStarted {
        session_id: SessionId,
        ends_at: Option<DateTime<Local>>,
    },

    /// Focus session stopped or ran out
    FocusEnded { session_id: Option<SessionId> },

    /// Emergency bypass activated
    EmergencyActivated {
        session_id: SessionId,
        ends_at: DateTime<Local>,
        uses_remaining: u8,
    },

    /// Emergency bypass ran out
    EmergencyEnded { session_id: Option<SessionId> },

    /// Recompute failed; previous snapshot kept
    RebuildFailed { error: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType, timestamp: DateTime<Local>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
