//! Strict-mode lock controller
//!
//! Decides whether a configuration mutation is permitted, and owns the
//! transitions of the global strict-mode switch. The maintenance window is
//! checked first and unconditionally; nothing else can open it.

use chrono::{DateTime, Duration, Local};
use curfew_api::{LockCategory, LockFlags, StrictModeConfig, UnlockMode, UnlockRequest};
use curfew_store::StoreError;
use curfew_util::MAINTENANCE_WINDOW;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Length of the forgot-password wait
pub const FORGOT_PASSWORD_WAIT: Duration = Duration::hours(24);

#[derive(Debug, Error)]
pub enum StrictError {
    #[error("Strict mode is not enabled")]
    NotEnabled,

    #[error("Strict mode is already enabled")]
    AlreadyEnabled,

    #[error("Strict mode can only be turned off during the maintenance window")]
    MaintenanceOnly,

    #[error("Unlock timer still running until {until}")]
    TimerRunning { until: DateTime<Local> },

    #[error("Unlock time {0} is not in the future")]
    TimerInPast(DateTime<Local>),

    #[error("Incorrect password")]
    WrongPassword,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Strict mode is not password protected")]
    NoPassword,

    #[error("Lock flags can only be cleared during the maintenance window")]
    LocksFrozen,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How the user wants to be able to turn strict mode off
#[derive(Debug, Clone)]
pub enum UnlockSetup {
    None,
    Timer { unlock_at: DateTime<Local> },
    Password { password: String },
}

impl From<UnlockRequest> for UnlockSetup {
    fn from(request: UnlockRequest) -> Self {
        match request {
            UnlockRequest::None => UnlockSetup::None,
            UnlockRequest::Timer { unlock_at } => UnlockSetup::Timer { unlock_at },
            UnlockRequest::Password { password } => UnlockSetup::Password { password },
        }
    }
}

/// Credentials offered when turning strict mode off
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlockAttempt<'a> {
    pub password: Option<&'a str>,
}

/// What lifted strict mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledVia {
    MaintenanceWindow,
    Timer,
    Password,
    ForgotPassword,
}

impl DisabledVia {
    pub fn as_str(self) -> &'static str {
        match self {
            DisabledVia::MaintenanceWindow => "maintenance_window",
            DisabledVia::Timer => "timer",
            DisabledVia::Password => "password",
            DisabledVia::ForgotPassword => "forgot_password",
        }
    }
}

/// Strict-mode state plus the rules for changing it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrictLockController {
    config: StrictModeConfig,
}

impl StrictLockController {
    pub fn new(config: StrictModeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrictModeConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether a mutation in `category` is currently permitted.
    ///
    /// In order: maintenance window allows, strict mode off allows, a strict
    /// rule denies, a locked category denies, otherwise allow.
    pub fn can_mutate(
        &self,
        category: LockCategory,
        rule_is_strict: bool,
        now: DateTime<Local>,
    ) -> bool {
        if MAINTENANCE_WINDOW.contains(&now) {
            return true;
        }
        if !self.config.enabled {
            return true;
        }
        if rule_is_strict {
            return false;
        }
        !self.config.locks.locks(category)
    }

    /// Turn strict mode on
    pub fn enable(
        &mut self,
        unlock: UnlockSetup,
        locks: LockFlags,
        now: DateTime<Local>,
    ) -> Result<(), StrictError> {
        if self.config.enabled {
            return Err(StrictError::AlreadyEnabled);
        }

        let unlock = match unlock {
            UnlockSetup::None => UnlockMode::None,
            UnlockSetup::Timer { unlock_at } => {
                if unlock_at <= now {
                    return Err(StrictError::TimerInPast(unlock_at));
                }
                UnlockMode::Timer { unlock_at }
            }
            UnlockSetup::Password { password } => {
                if password.is_empty() {
                    return Err(StrictError::EmptyPassword);
                }
                UnlockMode::Password {
                    hash: hash_password(&password),
                }
            }
        };

        self.config = StrictModeConfig {
            enabled: true,
            unlock,
            forgot_password_until: None,
            locks,
        };

        info!(locks = ?locks, "Strict mode enabled");
        Ok(())
    }

    /// Turn strict mode off. A rejected attempt leaves the state untouched.
    pub fn disable(
        &mut self,
        attempt: UnlockAttempt<'_>,
        now: DateTime<Local>,
    ) -> Result<DisabledVia, StrictError> {
        if !self.config.enabled {
            return Err(StrictError::NotEnabled);
        }

        let via = self.unlock_route(attempt, now)?;

        self.config.enabled = false;
        self.config.unlock = UnlockMode::None;
        self.config.forgot_password_until = None;

        info!(via = via.as_str(), "Strict mode disabled");
        Ok(via)
    }

    fn unlock_route(
        &self,
        attempt: UnlockAttempt<'_>,
        now: DateTime<Local>,
    ) -> Result<DisabledVia, StrictError> {
        if MAINTENANCE_WINDOW.contains(&now) {
            return Ok(DisabledVia::MaintenanceWindow);
        }

        if self
            .config
            .forgot_password_until
            .is_some_and(|until| now >= until)
        {
            return Ok(DisabledVia::ForgotPassword);
        }

        match &self.config.unlock {
            UnlockMode::None => Err(StrictError::MaintenanceOnly),
            UnlockMode::Timer { unlock_at } => {
                if now >= *unlock_at {
                    Ok(DisabledVia::Timer)
                } else {
                    Err(StrictError::TimerRunning { until: *unlock_at })
                }
            }
            UnlockMode::Password { hash } => match attempt.password {
                Some(password) if verify_password(password, hash) => Ok(DisabledVia::Password),
                _ => {
                    warn!("Strict mode unlock rejected: wrong password");
                    Err(StrictError::WrongPassword)
                }
            },
        }
    }

    /// Start the 24-hour forgot-password wait.
    ///
    /// Once started the deadline is fixed: calling again returns the same
    /// deadline and nothing cancels it while strict mode stays on.
    pub fn start_forgot_password(
        &mut self,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, StrictError> {
        if !self.config.enabled {
            return Err(StrictError::NotEnabled);
        }
        if !matches!(self.config.unlock, UnlockMode::Password { .. }) {
            return Err(StrictError::NoPassword);
        }

        if let Some(until) = self.config.forgot_password_until {
            return Ok(until);
        }

        let until = now + FORGOT_PASSWORD_WAIT;
        self.config.forgot_password_until = Some(until);
        info!(until = %until, "Forgot-password wait started");
        Ok(until)
    }

    /// Replace the per-category lock flags.
    ///
    /// Adding locks is always allowed; removing one while strict mode is on
    /// needs the maintenance window.
    pub fn set_locks(&mut self, locks: LockFlags, now: DateTime<Local>) -> Result<(), StrictError> {
        let removed = self.config.locks - locks;
        if self.config.enabled && !removed.is_empty() && !MAINTENANCE_WINDOW.contains(&now) {
            return Err(StrictError::LocksFrozen);
        }
        self.config.locks = locks;
        Ok(())
    }
}

/// Salted SHA-256: `salt$hex(sha256(salt || password))`
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected)) => digest(salt, password) == expected,
        None => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn category() -> impl Strategy<Value = LockCategory> {
        (0..LockCategory::ALL.len()).prop_map(|i| LockCategory::ALL[i])
    }

    proptest! {
        /// Property: strict mode off allows every mutation
        #[test]
        fn disabled_allows_all(
            cat in category(),
            rule_is_strict in any::<bool>(),
            bits in any::<u16>(),
            hour in 0u32..24,
            minute in 0u32..60,
        ) {
            let strict = StrictLockController::new(StrictModeConfig {
                enabled: false,
                locks: LockFlags::from_bits_truncate(bits),
                ..Default::default()
            });
            let now = Local.with_ymd_and_hms(2025, 3, 12, hour, minute, 0).unwrap();
            prop_assert!(strict.can_mutate(cat, rule_is_strict, now));
        }

        /// Property: a strict rule is denied exactly outside 00:00-00:10
        #[test]
        fn strict_rule_only_in_maintenance(
            cat in category(),
            bits in any::<u16>(),
            hour in 0u32..24,
            minute in 0u32..60,
        ) {
            let strict = StrictLockController::new(StrictModeConfig {
                enabled: true,
                locks: LockFlags::from_bits_truncate(bits),
                ..Default::default()
            });
            let now = Local.with_ymd_and_hms(2025, 3, 12, hour, minute, 0).unwrap();
            let in_maintenance = hour == 0 && minute < 10;
            prop_assert_eq!(strict.can_mutate(cat, true, now), in_maintenance);
        }
    }
}
