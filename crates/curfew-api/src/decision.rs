//! Block decisions

use chrono::{DateTime, Local};
use curfew_util::GroupId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Blocking categories in evaluation priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    Focus,
    Bedtime,
    Calendar,
    Schedule,
    AppLimit,
    GroupLimit,
}

/// Structured reason a target is blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum BlockReason {
    /// Manual focus session
    Focus,
    /// Nightly bedtime window
    Bedtime,
    /// Calendar-synced block
    Calendar { title: String },
    /// Recurring schedule
    Schedule { title: String },
    /// Per-app daily quota reached
    AppLimit { used: Duration, limit: Duration },
    /// Group daily quota reached
    GroupLimit {
        group: GroupId,
        name: String,
        used: Duration,
        limit: Duration,
    },
}

impl BlockReason {
    pub fn category(&self) -> BlockCategory {
        match self {
            BlockReason::Focus => BlockCategory::Focus,
            BlockReason::Bedtime => BlockCategory::Bedtime,
            BlockReason::Calendar { .. } => BlockCategory::Calendar,
            BlockReason::Schedule { .. } => BlockCategory::Schedule,
            BlockReason::AppLimit { .. } => BlockCategory::AppLimit,
            BlockReason::GroupLimit { .. } => BlockCategory::GroupLimit,
        }
    }

    /// Human-readable text shown on the block screen
    pub fn message(&self) -> String {
        match self {
            BlockReason::Focus => "Focus Mode Active".into(),
            BlockReason::Bedtime => "Bedtime".into(),
            BlockReason::Calendar { title } => format!("Calendar Event: {}", title),
            BlockReason::Schedule { title } => format!("Scheduled Block: {}", title),
            BlockReason::AppLimit { .. } => "Daily Limit Reached".into(),
            BlockReason::GroupLimit { name, .. } => format!("Group Limit Reached: {}", name),
        }
    }
}

/// A category match recorded during evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMatch {
    pub reason: BlockReason,
    /// When this category stops applying; None for open-ended sessions
    pub until: Option<DateTime<Local>>,
}

/// Cached decision for one package or domain
///
/// Matches are kept in priority order; the first one is the reported reason.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Decision {
    pub matches: Vec<BlockMatch>,
}

impl Decision {
    pub const ALLOWED: Decision = Decision {
        matches: Vec::new(),
    };

    pub fn is_blocked(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn primary(&self) -> Option<&BlockMatch> {
        self.matches.first()
    }

    pub fn reasons(&self) -> impl Iterator<Item = &BlockReason> {
        self.matches.iter().map(|m| &m.reason)
    }

    pub fn blocked_until(&self) -> Option<DateTime<Local>> {
        self.primary().and_then(|m| m.until)
    }

    /// Highest-priority match still in force at `now`.
    ///
    /// A snapshot can outlive the sessions and windows it was built from;
    /// matches whose `until` has passed no longer count.
    pub fn primary_at(&self, now: DateTime<Local>) -> Option<&BlockMatch> {
        self.matches
            .iter()
            .find(|m| m.until.is_none_or(|until| now < until))
    }
}

/// Answer returned to the host for a foreground change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub target: String,
    pub blocked: bool,
    pub reason: Option<String>,
    pub blocked_until: Option<DateTime<Local>>,
}

impl Verdict {
    pub fn allow(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            blocked: false,
            reason: None,
            blocked_until: None,
        }
    }

    /// Verdict for `decision` as seen at `now`
    pub fn from_decision(
        target: impl Into<String>,
        decision: &Decision,
        now: DateTime<Local>,
    ) -> Self {
        match decision.primary_at(now) {
            Some(m) => Self {
                target: target.into(),
                blocked: true,
                reason: Some(m.reason.message()),
                blocked_until: m.until,
            },
            None => Self::allow(target),
        }
    }
}
