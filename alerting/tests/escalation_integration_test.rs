//! Integration tests for the alert pipeline
//!
//! Drives the full gate → store → engine → summarizer flow through the
//! public `AlertPipeline` API with a manual clock.

use std::sync::Arc;
use std::thread;

use alerting::config::{BypassConfig, TierDurations};
use alerting::{
    AlertPipeline, AlertPolicyConfig, CategoryCode, ClassifiedEvent, DecisionKind, GroupKey,
    LevelTier, MalformedReason, ManualClock, PipelineOutcome, Rejection, Severity,
};
use chrono::{DateTime, Duration, Utc};

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::default() + Duration::seconds(secs)
}

fn policy(threshold: u32, window: u64) -> AlertPolicyConfig {
    AlertPolicyConfig {
        windows: TierDurations {
            p0: window,
            p1: window,
            p2: window,
        },
        min_hits_to_send: threshold,
        ..Default::default()
    }
}

/// Windows P0=100s, P1=200s, P2=600s; bypass only at S4.
fn tiered_policy(threshold: u32, escalate_on_level_upgrade: bool) -> AlertPolicyConfig {
    AlertPolicyConfig {
        windows: TierDurations {
            p0: 100,
            p1: 200,
            p2: 600,
        },
        min_hits_to_send: threshold,
        escalate_on_level_upgrade,
        bypass: BypassConfig {
            tier: Severity::S4,
            cooldown_secs: 60,
        },
        ..Default::default()
    }
}

fn push_fail_key() -> GroupKey {
    GroupKey {
        room_id: "R1".to_string(),
        category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
        severity: None,
    }
}

fn push_fail(severity: Severity, at: DateTime<Utc>) -> ClassifiedEvent {
    let mut event = ClassifiedEvent::new(
        "R1",
        at,
        severity,
        CategoryCode::new("STREAMING", "PUSH_FAIL"),
    );
    event.short_label = Some("push failure".to_string());
    event.phenomenon = Some(format!("stream dropped at {}", at.timestamp()));
    event
}

fn kind_at(pipeline: &AlertPipeline, severity: Severity, secs: i64) -> Option<DecisionKind> {
    pipeline
        .process_at(&push_fail(severity, t(secs)), t(secs))
        .unwrap()
        .decision_kind()
}

/// Test: three sub-bypass events reach a threshold of three on the third
#[test]
fn test_threshold_scenario() {
    let pipeline = AlertPipeline::new(policy(3, 600), Arc::new(ManualClock::at_epoch())).unwrap();

    let kinds: Vec<_> = [0, 10, 20]
        .into_iter()
        .map(|s| kind_at(&pipeline, Severity::S2, s))
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(DecisionKind::Suppressed),
            Some(DecisionKind::Suppressed),
            Some(DecisionKind::Emit)
        ]
    );
}

/// Test: bypass tier S1 with a 60s cooldown emits at 0 and 70, not at 30
#[test]
fn test_severity_bypass_scenario() {
    let mut config = policy(3, 600);
    config.bypass = BypassConfig {
        tier: Severity::S1,
        cooldown_secs: 60,
    };
    config.gate.min_severity = Severity::S1;
    let pipeline = AlertPipeline::new(config, Arc::new(ManualClock::at_epoch())).unwrap();

    assert_eq!(
        kind_at(&pipeline, Severity::S1, 0),
        Some(DecisionKind::EmitSeverityBypass)
    );
    assert_eq!(
        kind_at(&pipeline, Severity::S1, 30),
        Some(DecisionKind::Suppressed)
    );
    assert_eq!(
        kind_at(&pipeline, Severity::S1, 70),
        Some(DecisionKind::EmitSeverityBypass)
    );
}

/// Test: missing category is malformed, a low-severity event is routine
#[test]
fn test_malformed_distinct_from_routine() {
    let pipeline = AlertPipeline::new(policy(1, 600), Arc::new(ManualClock::at_epoch())).unwrap();

    let mut missing = push_fail(Severity::S3, t(0));
    missing.category_l1 = None;
    let outcome = pipeline.process_at(&missing, t(0)).unwrap();
    assert_eq!(
        outcome,
        PipelineOutcome::Rejected(Rejection::Malformed(MalformedReason::MissingField {
            field: "category_l1".to_string()
        }))
    );

    let routine = pipeline
        .process_at(&push_fail(Severity::S0, t(0)), t(0))
        .unwrap();
    assert!(matches!(
        routine,
        PipelineOutcome::Rejected(Rejection::Routine { .. })
    ));

    let stats = pipeline.gate_stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.routine, 1);
    assert_eq!(stats.admitted, 0);
}

/// Test: an event after the window starts a fresh group with one hit
#[test]
fn test_window_expiry_starts_fresh_group() {
    let pipeline = AlertPipeline::new(policy(3, 600), Arc::new(ManualClock::at_epoch())).unwrap();
    for s in [0, 10, 20, 30] {
        kind_at(&pipeline, Severity::S2, s);
    }
    let key = GroupKey {
        room_id: "R1".to_string(),
        category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
        severity: None,
    };
    assert_eq!(pipeline.group(&key).unwrap().unwrap().hit_count, 4);

    assert_eq!(
        kind_at(&pipeline, Severity::S2, 600),
        Some(DecisionKind::Suppressed)
    );
    let group = pipeline.group(&key).unwrap().unwrap();
    assert_eq!(group.hit_count, 1);
    assert_eq!(group.window_start, t(600));
    assert!(group.last_notified_at.is_none());

    // The new window gets its own threshold emission.
    assert_eq!(kind_at(&pipeline, Severity::S2, 610), Some(DecisionKind::Suppressed));
    assert_eq!(kind_at(&pipeline, Severity::S2, 620), Some(DecisionKind::Emit));
}

/// Test: re-delivering the same event counts it again
#[test]
fn test_redelivery_counts_each_delivery() {
    let pipeline = AlertPipeline::new(policy(5, 600), Arc::new(ManualClock::at_epoch())).unwrap();
    let event = push_fail(Severity::S2, t(0));
    for _ in 0..3 {
        pipeline.process_at(&event, t(5)).unwrap();
    }
    let key = GroupKey {
        room_id: "R1".to_string(),
        category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
        severity: None,
    };
    assert_eq!(pipeline.group(&key).unwrap().unwrap().hit_count, 3);
}

/// Test: different rooms and categories never share a group
#[test]
fn test_keys_isolate_groups() {
    let pipeline = AlertPipeline::new(policy(2, 600), Arc::new(ManualClock::at_epoch())).unwrap();
    let mut other_room = push_fail(Severity::S2, t(0));
    other_room.room_id = "R2".to_string();
    let mut other_category = push_fail(Severity::S2, t(0));
    other_category.category_l2 = Some("PULL_FAIL".to_string());

    for event in [push_fail(Severity::S2, t(0)), other_room, other_category] {
        assert_eq!(
            pipeline.process_at(&event, t(0)).unwrap().decision_kind(),
            Some(DecisionKind::Suppressed)
        );
    }
    assert_eq!(pipeline.live_groups().unwrap(), 3);
}

/// Test: concurrent deliveries for one group emit exactly once
#[test]
fn test_concurrent_paths_emit_once() {
    let pipeline = Arc::new(
        AlertPipeline::new(policy(4, 600), Arc::new(ManualClock::at_epoch())).unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                (0..25)
                    .filter(|j| {
                        let at = t(i * 25 + j);
                        pipeline
                            .process_at(&push_fail(Severity::S2, at), t(100))
                            .unwrap()
                            .notification()
                            .is_some()
                    })
                    .count()
            })
        })
        .collect();

    let emitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(emitted, 1);

    let key = GroupKey {
        room_id: "R1".to_string(),
        category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
        severity: None,
    };
    let group = pipeline.group(&key).unwrap().unwrap();
    assert_eq!(group.hit_count, 200);
    assert_eq!(group.notifications, 1);
}

/// Test: state survives a save/restore cycle without re-emitting
#[test]
fn test_restart_preserves_dedup_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alert-state.json");
    let clock = Arc::new(ManualClock::new(t(0)));

    let pipeline = AlertPipeline::new(policy(2, 600), clock.clone()).unwrap();
    kind_at(&pipeline, Severity::S2, 0);
    assert_eq!(kind_at(&pipeline, Severity::S2, 10), Some(DecisionKind::Emit));
    clock.set(t(20));
    pipeline.save_snapshot(&path).unwrap();
    drop(pipeline);

    clock.set(t(30));
    let restored = AlertPipeline::restore(policy(2, 600), &path, clock.clone()).unwrap();
    assert_eq!(
        kind_at(&restored, Severity::S2, 30),
        Some(DecisionKind::Suppressed)
    );

    // Past the window the restored group is dropped on load.
    clock.set(t(700));
    let expired = AlertPipeline::restore(policy(2, 600), &path, clock).unwrap();
    assert_eq!(expired.live_groups().unwrap(), 0);
}

/// Test: the emitted payload aggregates the ring, newest evidence first
#[test]
fn test_payload_reflects_recent_events() {
    let mut config = policy(3, 600);
    config.summary.evidence_limit = 2;
    let pipeline = AlertPipeline::new(config, Arc::new(ManualClock::at_epoch())).unwrap();

    kind_at(&pipeline, Severity::S2, 0);
    kind_at(&pipeline, Severity::S3, 10);
    let outcome = pipeline
        .process_at(&push_fail(Severity::S2, t(20)), t(20))
        .unwrap();
    let notification = outcome.notification().unwrap();

    assert_eq!(notification.kind, DecisionKind::Emit);
    let payload = &notification.payload;
    assert_eq!(payload.occurrence_count, 3);
    assert_eq!(payload.first_seen, t(0));
    assert_eq!(payload.last_seen, t(20));
    assert_eq!(payload.peak_severity, Some(Severity::S3));
    assert_eq!(
        payload.evidence,
        vec!["- stream dropped at 20", "- stream dropped at 10"]
    );
}

/// Test: a more urgent event inside a live P2 window joins that window
#[test]
fn test_mixed_levels_share_the_creating_window() {
    let pipeline = AlertPipeline::new(tiered_policy(1, false), Arc::new(ManualClock::at_epoch()))
        .unwrap();

    let kinds: Vec<_> = [(Severity::S2, 0), (Severity::S2, 150), (Severity::S3, 250)]
        .into_iter()
        .map(|(severity, s)| kind_at(&pipeline, severity, s))
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(DecisionKind::Emit),
            Some(DecisionKind::Suppressed),
            Some(DecisionKind::Suppressed)
        ]
    );

    let group = pipeline.group(&push_fail_key()).unwrap().unwrap();
    assert_eq!(group.hit_count, 3);
    assert_eq!(group.window_start, t(0));
    assert_eq!(group.window_tier, LevelTier::P2);
    assert_eq!(group.notifications, 1);
}

/// Test: each window runs on the tier of the event that opened it
#[test]
fn test_window_length_follows_opening_tier() {
    let pipeline = AlertPipeline::new(tiered_policy(1, false), Arc::new(ManualClock::at_epoch()))
        .unwrap();
    let mut emits = 0;
    let mut send = |severity, s| {
        if kind_at(&pipeline, severity, s) == Some(DecisionKind::Emit) {
            emits += 1;
        }
    };

    // P2 window [0, 600).
    send(Severity::S2, 0);
    send(Severity::S3, 599);
    // P1 window [600, 800): opened by an S3 event, later S2 events count in it.
    send(Severity::S3, 600);
    send(Severity::S2, 750);
    send(Severity::S2, 799);
    // P2 window from 800.
    send(Severity::S2, 800);
    assert_eq!(emits, 3);

    let group = pipeline.group(&push_fail_key()).unwrap().unwrap();
    assert_eq!(group.window_start, t(800));
    assert_eq!(group.window_tier, LevelTier::P2);
    assert_eq!(group.hit_count, 1);
}

/// Test: prune and restore expire each group on its own window
#[test]
fn test_prune_and_restore_respect_group_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alert-state.json");
    let clock = Arc::new(ManualClock::new(t(0)));
    let pipeline = AlertPipeline::new(tiered_policy(5, false), clock.clone()).unwrap();

    let mut urgent = push_fail(Severity::S3, t(0));
    urgent.room_id = "R2".to_string();
    pipeline.process_at(&urgent, t(0)).unwrap();
    kind_at(&pipeline, Severity::S2, 0);
    pipeline.save_snapshot(&path).unwrap();

    // 300s in, the P1 group (200s) is over and the P2 group (600s) is live.
    clock.set(t(300));
    let restored = AlertPipeline::restore(tiered_policy(5, false), &path, clock.clone()).unwrap();
    assert_eq!(restored.live_groups().unwrap(), 1);
    assert!(restored.group(&push_fail_key()).unwrap().is_some());

    assert_eq!(pipeline.prune().unwrap(), 1);
    assert_eq!(pipeline.live_groups().unwrap(), 1);
    clock.set(t(600));
    assert_eq!(pipeline.prune().unwrap(), 1);
    assert_eq!(pipeline.live_groups().unwrap(), 0);
}
