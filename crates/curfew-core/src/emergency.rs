//! Emergency bypass: a few short, daily-bounded suspensions of all blocking

use chrono::{DateTime, Local, NaiveDate};
use curfew_api::EmergencyBypass;
use curfew_config::EmergencySettings;
use curfew_store::StoreError;
use curfew_util::SessionId;
use thiserror::Error;
use tracing::info;

use crate::EndedSession;

#[derive(Debug, Error)]
pub enum EmergencyError {
    #[error("No emergency uses left today")]
    NoUsesLeft,

    #[error("Emergency bypass already active until {until}")]
    AlreadyActive { until: DateTime<Local> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies the configured allowance to the persisted bypass state
#[derive(Debug, Clone, Copy)]
pub struct EmergencyController {
    settings: EmergencySettings,
}

impl EmergencyController {
    pub fn new(settings: EmergencySettings) -> Self {
        Self { settings }
    }

    /// Refill the daily allowance if it has not been refilled today.
    ///
    /// Returns true when a refill happened. A clock set backwards does not
    /// earn a second refill.
    pub fn refill(&self, bypass: &mut EmergencyBypass, today: NaiveDate) -> bool {
        if bypass.last_reset.is_some_and(|day| day >= today) {
            return false;
        }
        bypass.uses_remaining = self.settings.daily_uses;
        bypass.last_reset = Some(today);
        true
    }

    /// Start a bypass session, spending one use
    pub fn activate(
        &self,
        bypass: &mut EmergencyBypass,
        now: DateTime<Local>,
    ) -> Result<SessionId, EmergencyError> {
        self.refill(bypass, now.date_naive());

        if let Some(until) = bypass.session_ends_at.filter(|_| bypass.is_active(now)) {
            return Err(EmergencyError::AlreadyActive { until });
        }
        if bypass.uses_remaining == 0 {
            return Err(EmergencyError::NoUsesLeft);
        }

        let session_id = SessionId::new();
        let ends_at = now + self.session_length();
        bypass.uses_remaining -= 1;
        bypass.session_id = Some(session_id.clone());
        bypass.session_ends_at = Some(ends_at);

        info!(
            session_id = %session_id,
            ends_at = %ends_at,
            uses_remaining = bypass.uses_remaining,
            "Emergency bypass activated"
        );
        Ok(session_id)
    }

    /// Clear a session whose end has passed, returning its id
    pub fn expire(&self, bypass: &mut EmergencyBypass, now: DateTime<Local>) -> Option<EndedSession> {
        let ended = bypass.session_ends_at.is_some_and(|end| now >= end);
        if !ended {
            return None;
        }
        bypass.session_ends_at = None;
        Some(EndedSession {
            session_id: bypass.session_id.take(),
        })
    }

    fn session_length(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.session_length)
            .unwrap_or_else(|_| chrono::Duration::minutes(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
    }

    fn controller() -> EmergencyController {
        EmergencyController::new(EmergencySettings {
            daily_uses: 3,
            session_length: Duration::from_secs(5 * 60),
        })
    }

    #[test]
    fn uses_are_bounded_per_day() {
        let emergency = controller();
        let mut bypass = EmergencyBypass::default();

        for minute in [0, 10, 20] {
            emergency.activate(&mut bypass, at(12, 9, minute)).unwrap();
        }
        assert_eq!(bypass.uses_remaining, 0);
        assert!(matches!(
            emergency.activate(&mut bypass, at(12, 9, 30)),
            Err(EmergencyError::NoUsesLeft)
        ));

        // Next day the allowance is back
        emergency.activate(&mut bypass, at(13, 9, 0)).unwrap();
        assert_eq!(bypass.uses_remaining, 2);
    }

    #[test]
    fn refill_happens_once_per_day() {
        let emergency = controller();
        let mut bypass = EmergencyBypass {
            uses_remaining: 0,
            last_reset: None,
            session_id: None,
            session_ends_at: None,
        };
        let today = at(12, 8, 0).date_naive();

        assert!(emergency.refill(&mut bypass, today));
        bypass.uses_remaining = 1;
        assert!(!emergency.refill(&mut bypass, today));
        assert_eq!(bypass.uses_remaining, 1);

        // Clock moved back a day: no extra refill
        let yesterday = at(11, 8, 0).date_naive();
        assert!(!emergency.refill(&mut bypass, yesterday));
    }

    #[test]
    fn cannot_stack_sessions() {
        let emergency = controller();
        let mut bypass = EmergencyBypass::default();
        emergency.activate(&mut bypass, at(12, 9, 0)).unwrap();

        assert!(matches!(
            emergency.activate(&mut bypass, at(12, 9, 2)),
            Err(EmergencyError::AlreadyActive { .. })
        ));
        assert_eq!(bypass.uses_remaining, 2);
    }

    #[test]
    fn session_expires() {
        let emergency = controller();
        let mut bypass = EmergencyBypass::default();
        let id = emergency.activate(&mut bypass, at(12, 9, 0)).unwrap();

        assert!(bypass.is_active(at(12, 9, 4)));
        assert_eq!(emergency.expire(&mut bypass, at(12, 9, 4)), None);
        assert_eq!(
            emergency.expire(&mut bypass, at(12, 9, 5)),
            Some(EndedSession {
                session_id: Some(id)
            })
        );
        assert!(!bypass.is_active(at(12, 9, 5)));
        assert_eq!(emergency.expire(&mut bypass, at(12, 9, 6)), None);
    }
}
