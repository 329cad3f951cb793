//! Integration tests for curfewd
//!
//! These tests drive the engine the way the daemon wires it: configuration
//! from a file, a file-backed store, and the recompute actor on tokio.

use chrono::{DateTime, Local, TimeZone};
use curfew_api::{FocusMode, LockFlags};
use curfew_config::{load_config, EngineConfig};
use curfew_core::{CoreEngine, CoreEvent, UnlockAttempt, UnlockSetup};
use curfew_store::{AuditEventType, SqliteStore, Store};
use curfew_util::PackageName;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
}

fn packages(names: &[&str]) -> BTreeSet<PackageName> {
    names.iter().map(|n| PackageName::new(*n)).collect()
}

fn open_store(dir: &tempfile::TempDir) -> Arc<dyn Store> {
    Arc::new(SqliteStore::open(dir.path().join("curfew.db")).unwrap())
}

#[test]
fn test_config_whitelist_applies() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
config_version = 1

[engine]
self_package = "org.example.curfew"
rebuild_interval_seconds = 60

[whitelist]
packages = ["com.bank.app"]

[emergency]
daily_uses = 1
session_minutes = 2
"#,
    )
    .unwrap();
    let config = load_config(&config_path).unwrap();

    let now = at(12, 14, 0);
    let (engine, scheduler) = CoreEngine::new(&config, open_store(&dir), now).unwrap();
    engine
        .apply(|p| {
            p.start_focus(
                FocusMode::BlockAllExceptSelected,
                BTreeSet::new(),
                BTreeSet::new(),
                None,
                now,
            )
        })
        .unwrap();
    scheduler.rebuild_now(now);

    assert!(engine.evaluate("com.game", now).blocked);
    assert!(!engine.evaluate("com.bank.app", now).blocked);
    assert!(!engine.evaluate("org.example.curfew", now).blocked);
    assert!(!engine.evaluate("com.android.dialer", now).blocked);

    // One use per day, two minutes long
    engine.apply(|p| p.activate_emergency(now)).unwrap();
    assert!(engine.apply(|p| p.activate_emergency(now)).is_err());
    let ends = engine.policies().snapshot().emergency.session_ends_at;
    assert_eq!(ends, Some(now + chrono::Duration::minutes(2)));
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default();
    let now = at(12, 9, 0);

    {
        let (engine, _) = CoreEngine::new(&config, open_store(&dir), now).unwrap();
        engine
            .apply(|p| {
                p.start_focus(
                    FocusMode::BlockOnlySelected,
                    packages(&["com.x"]),
                    BTreeSet::new(),
                    Some(at(12, 11, 0)),
                    now,
                )
            })
            .unwrap();
        engine
            .apply(|p| {
                p.enable_strict(
                    UnlockSetup::Password {
                        password: "hunter2".into(),
                    },
                    LockFlags::BLOCKLIST,
                    now,
                )
            })
            .unwrap();
        engine.record_usage(&PackageName::new("com.x"), Duration::from_secs(5), now);
        engine.flush_usage(now).unwrap();
    }

    let later = at(12, 10, 0);
    let (engine, _) = CoreEngine::new(&config, open_store(&dir), later).unwrap();
    assert!(engine.evaluate("com.x", later).blocked);
    assert_eq!(engine.usage().usage("com.x", later), Duration::from_secs(5));

    // Strict mode came back with its lock and password
    let denied = engine.apply(|p| p.set_blocklist(packages(&[]), later));
    assert!(denied.is_err());
    let wrong = engine.apply(|p| {
        p.disable_strict(
            UnlockAttempt {
                password: Some("nope"),
            },
            later,
        )
    });
    assert!(wrong.is_err());
    engine
        .apply(|p| {
            p.disable_strict(
                UnlockAttempt {
                    password: Some("hunter2"),
                },
                later,
            )
        })
        .unwrap();
    engine
        .apply(|p| p.set_blocklist(packages(&[]), later))
        .unwrap();
}

#[test]
fn test_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let now = at(12, 9, 0);
    let (engine, _) = CoreEngine::new(&EngineConfig::default(), store.clone(), now).unwrap();

    engine
        .apply(|p| p.enable_strict(UnlockSetup::None, LockFlags::BEDTIME, now))
        .unwrap();
    let _ = engine.apply(|p| p.set_bedtime(Default::default(), at(12, 9, 5)));

    let audits = store.get_recent_audits(10).unwrap();
    assert!(matches!(
        audits[0].event,
        AuditEventType::MutationChecked { allowed: false, .. }
    ));
    assert!(
        audits
            .iter()
            .any(|a| matches!(a.event, AuditEventType::StrictEnabled { .. }))
    );
    assert!(
        audits
            .iter()
            .any(|a| matches!(a.event, AuditEventType::ConfigLoaded { .. }))
    );
}

#[tokio::test]
async fn test_actor_reports_focus_end() {
    let dir = tempfile::tempdir().unwrap();
    let now = curfew_util::now();
    let (engine, scheduler) = CoreEngine::new(&EngineConfig::default(), open_store(&dir), now).unwrap();

    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let actor = tokio::spawn(scheduler.run(events_tx, shutdown_rx));

    let ends_at = now + chrono::Duration::milliseconds(200);
    engine
        .apply(|p| {
            p.start_focus(
                FocusMode::BlockOnlySelected,
                packages(&["com.x"]),
                BTreeSet::new(),
                Some(ends_at),
                now,
            )
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.request_rebuild();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events_rx.recv().await {
            if matches!(event, CoreEvent::FocusEnded { .. }) {
                return true;
            }
        }
        false
    })
    .await
    .expect("no FocusEnded event");
    assert!(ended);
    assert!(!engine.policies().snapshot().focus.active);

    shutdown_tx.send(true).unwrap();
    actor.await.unwrap();
}
