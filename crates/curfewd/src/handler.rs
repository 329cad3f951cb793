//! Translation between host protocol lines and engine calls

use chrono::{DateTime, Local};
use curfew_api::{HostEvent, ReplyPayload};
use curfew_core::{CoreEngine, CoreEvent, UnlockAttempt};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handle one NDJSON line from the host
pub fn handle_line(engine: &CoreEngine, line: &str, now: DateTime<Local>) -> Vec<ReplyPayload> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<HostEvent>(line) {
        Ok(event) => handle_event(engine, event, now),
        Err(e) => {
            warn!(error = %e, "Malformed host event");
            vec![ReplyPayload::Error {
                message: format!("invalid event: {}", e),
            }]
        }
    }
}

pub fn handle_event(engine: &CoreEngine, event: HostEvent, now: DateTime<Local>) -> Vec<ReplyPayload> {
    match event {
        HostEvent::ForegroundChanged { package } => {
            vec![ReplyPayload::Decision(engine.evaluate(package.as_str(), now))]
        }

        HostEvent::DomainVisited { domain } => {
            vec![ReplyPayload::Decision(engine.evaluate_domain(&domain, now))]
        }

        HostEvent::UsageTick { package, elapsed_ms } => {
            engine.record_usage(&package, Duration::from_millis(elapsed_ms), now);
            Vec::new()
        }

        HostEvent::PackagesChanged { installed } => {
            let count = installed.len();
            match engine.set_installed(installed.into_iter().collect()) {
                Ok(()) => debug!(count, "Installed packages updated"),
                Err(e) => error!(error = %e, "Failed to store installed packages"),
            }
            Vec::new()
        }

        HostEvent::SystemPackages(system) => {
            if let Err(e) = engine.set_system_packages(system) {
                error!(error = %e, "Failed to store system packages");
            }
            Vec::new()
        }

        HostEvent::RebuildRequested => match engine.reload_policies(now) {
            Ok(refused) if refused.is_empty() => Vec::new(),
            Ok(refused) => vec![ReplyPayload::Rejected {
                command: "rebuild_requested".into(),
                message: format!("locked by strict mode: {:?}", refused),
            }],
            Err(e) => {
                error!(error = %e, "Failed to reload policies, rebuilding from memory");
                engine.request_rebuild();
                Vec::new()
            }
        },

        HostEvent::StartFocus {
            mode,
            selected,
            blocked_domains,
            minutes,
        } => {
            let ends_at = minutes.map(|m| now + chrono::Duration::minutes(i64::from(m)));
            let result = engine
                .apply(|p| p.start_focus(mode, selected, blocked_domains, ends_at, now));
            vec![outcome("start_focus", result)]
        }

        HostEvent::StopFocus => {
            vec![outcome("stop_focus", engine.apply(|p| p.stop_focus(now)))]
        }

        HostEvent::ActivateEmergency => vec![outcome(
            "activate_emergency",
            engine.apply(|p| p.activate_emergency(now)),
        )],

        HostEvent::EnableStrict { unlock, locks } => vec![outcome(
            "enable_strict",
            engine.apply(|p| p.enable_strict(unlock.into(), locks, now)),
        )],

        HostEvent::DisableStrict { password } => {
            let attempt = UnlockAttempt {
                password: password.as_deref(),
            };
            vec![outcome(
                "disable_strict",
                engine.apply(|p| p.disable_strict(attempt, now)),
            )]
        }

        HostEvent::StartForgotPassword => vec![outcome(
            "start_forgot_password",
            engine.apply(|p| p.start_forgot_password(now)),
        )],

        HostEvent::SetStrictLocks { locks } => vec![outcome(
            "set_strict_locks",
            engine.apply(|p| p.set_strict_locks(locks, now)),
        )],

        HostEvent::SetBedtime { bedtime } => vec![outcome(
            "set_bedtime",
            engine.apply(|p| p.set_bedtime(bedtime, now)),
        )],

        HostEvent::SetSchedules { schedules } => vec![outcome(
            "set_schedules",
            engine.apply(|p| p.set_schedules(schedules, now)),
        )],

        HostEvent::SetBlocklist { packages } => vec![outcome(
            "set_blocklist",
            engine.apply(|p| p.set_blocklist(packages, now)),
        )],

        HostEvent::UpsertAppLimit { limit } => vec![outcome(
            "upsert_app_limit",
            engine.apply(|p| p.upsert_app_limit(limit, now)),
        )],

        HostEvent::RemoveAppLimit { package } => vec![outcome(
            "remove_app_limit",
            engine.apply(|p| p.remove_app_limit(package.as_str(), now)),
        )],

        HostEvent::UpsertGroupLimit { group } => vec![outcome(
            "upsert_group_limit",
            engine.apply(|p| p.upsert_group_limit(group, now)),
        )],

        HostEvent::RemoveGroupLimit { id } => vec![outcome(
            "remove_group_limit",
            engine.apply(|p| p.remove_group_limit(&id, now)),
        )],

        HostEvent::SyncCalendar { blocks } => vec![outcome(
            "sync_calendar",
            engine.apply(|p| p.sync_calendar(blocks)),
        )],

        HostEvent::SetCalendarBlockEnabled { id, enabled } => vec![outcome(
            "set_calendar_block_enabled",
            engine.apply(|p| p.set_calendar_block_enabled(&id, enabled, now)),
        )],

        HostEvent::SetTargetModes { target, modes } => vec![outcome(
            "set_target_modes",
            engine.apply(|p| p.set_target_modes(&target, modes, now)),
        )],
    }
}

/// Reply for a policy command
fn outcome<T, E: Display>(command: &str, result: Result<T, E>) -> ReplyPayload {
    match result {
        Ok(_) => {
            info!(command, "Command applied");
            ReplyPayload::Accepted {
                command: command.into(),
            }
        }
        Err(e) => {
            warn!(command, error = %e, "Command rejected");
            ReplyPayload::Rejected {
                command: command.into(),
                message: e.to_string(),
            }
        }
    }
}

/// Reply announcing a core event to the host
pub fn reply_for_core_event(event: CoreEvent) -> ReplyPayload {
    match event {
        CoreEvent::FocusEnded { .. } => ReplyPayload::FocusEnded,
        CoreEvent::EmergencyEnded { .. } => ReplyPayload::EmergencyEnded,
        CoreEvent::PolicyActivityChanged { active } => ReplyPayload::PolicyActivity { active },
    }
}
