//! Determinism tests.
//!
//! Hosts fed the same inputs must agree on every keyframe no matter when those inputs
//! arrive, checksums must be stable, and checked verification must catch games that
//! keep state outside what they save.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::stubs::{scripted_input, ForgetfulGameStub, GameStub, StateStub, StubInput};
use crate::common::{genesis, scripted_host, Outbox, StubKeyframe};
use keyframe_rollback::checksum::compute_checksum;
use keyframe_rollback::telemetry::{CollectingObserver, ViolationKind, ViolationSeverity};
use keyframe_rollback::{
    EngineBuilder, Frame, Game, KeyframeState, PlayerId, RollbackEvent, SyncHealth,
    VerificationMode,
};

/// Runs a two-player host for `frames` frames, delivering each remote input `lag` steps
/// after its frame was simulated. Returns the broadcast keyframes and the final state.
fn run_host(frames: i32, lag: i32) -> (Vec<StubKeyframe>, StateStub) {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 16, &outbox);
    for step in 1..=frames + lag {
        if step <= frames {
            host.update().unwrap();
        }
        let frame = step - lag;
        if (1..=frames).contains(&frame) {
            host.on_remote_input(
                Frame::new(frame),
                PlayerId::new(1),
                scripted_input(1, Frame::new(frame)),
            )
            .unwrap();
        }
    }
    assert_eq!(host.confirmed_frame(), Frame::new(frames));
    (outbox.keyframes(), host.game().save_state())
}

#[test]
fn lagging_inputs_produce_the_same_keyframes() {
    let (prompt, prompt_state) = run_host(20, 0);
    for lag in [1, 3, 7] {
        let (late, late_state) = run_host(20, lag);
        assert_eq!(late_state, prompt_state, "lag {}", lag);
        assert_eq!(late.last().unwrap().frame, Frame::new(20));
        for keyframe in &late {
            let same_frame = prompt
                .iter()
                .find(|other| other.frame == keyframe.frame)
                .unwrap();
            assert_eq!(keyframe, same_frame, "lag {} frame {}", lag, keyframe.frame);
        }
    }
}

#[test]
fn identical_runs_produce_identical_checksums() {
    let (first, _) = run_host(12, 2);
    let (second, _) = run_host(12, 2);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_eq!(a.checksum().unwrap(), compute_checksum(&a.state).unwrap());
    }
}

#[test]
fn checksums_tell_states_apart() {
    let a = StateStub { frame: 3, state: 10 };
    let b = StateStub { frame: 3, state: 11 };
    let c = StateStub { frame: 4, state: 10 };
    let sums = [a, b, c].map(|state| compute_checksum(&state).unwrap());
    assert_ne!(sums[0], sums[1]);
    assert_ne!(sums[0], sums[2]);
    assert_ne!(sums[1], sums[2]);
    assert_eq!(sums[0], compute_checksum(&a).unwrap());
}

#[test]
fn checked_mode_catches_state_outside_the_snapshot() {
    let observer = Arc::new(CollectingObserver::new());
    let mut host = EngineBuilder::<ForgetfulGameStub>::new()
        .with_verification(VerificationMode::Checked)
        .with_violation_observer(observer.clone())
        .with_state_broadcast(|_| {})
        .start_host(ForgetfulGameStub::default(), PlayerId::new(0), None)
        .unwrap();
    host.update().unwrap();

    let reports = observer.violations_of_kind(ViolationKind::Determinism);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].severity, ViolationSeverity::Error);
}

#[test]
fn unchecked_mode_trusts_the_game() {
    let observer = Arc::new(CollectingObserver::new());
    let mut host = EngineBuilder::<ForgetfulGameStub>::new()
        .with_verification(VerificationMode::Off)
        .with_violation_observer(observer.clone())
        .with_state_broadcast(|_| {})
        .start_host(ForgetfulGameStub::default(), PlayerId::new(0), None)
        .unwrap();
    for _ in 0..3 {
        host.update().unwrap();
    }
    assert!(!observer.has_violation(ViolationKind::Determinism));
}

#[test]
fn checked_mode_is_silent_for_deterministic_rollbacks() {
    let observer = Arc::new(CollectingObserver::new());
    let outbox = Outbox::new();
    let mut host = crate::common::scripted_builder(0, &outbox)
        .with_verification(VerificationMode::Checked)
        .with_violation_observer(observer.clone())
        .start_host(GameStub::new(), PlayerId::new(0), Some(genesis(2)))
        .unwrap();
    for f in 1..=10 {
        host.update().unwrap();
        if f > 3 {
            let late = Frame::new(f - 3);
            host.on_remote_input(late, PlayerId::new(1), scripted_input(1, late))
                .unwrap();
        }
    }
    let rollbacks = host
        .events()
        .filter(|event| matches!(event, RollbackEvent::Rollback { .. }))
        .count();
    assert_eq!(rollbacks, 7);
    assert!(observer.is_empty(), "{:?}", observer.violations());
}

#[test]
fn divergent_client_refuses_the_keyframe() {
    let observer = Arc::new(CollectingObserver::new());
    let mut client = EngineBuilder::<GameStub>::new()
        .with_verification(VerificationMode::Off)
        .with_violation_observer(observer.clone())
        .start_client(GameStub::new(), PlayerId::new(1), Some(genesis(2)))
        .unwrap();
    client.update().unwrap();
    client.update().unwrap();
    client
        .on_remote_input(Frame::new(1), PlayerId::new(0), StubInput::default())
        .unwrap();
    assert_eq!(client.confirmed_frame(), Frame::new(1));
    let local = client.history().head().state;

    let foreign = StateStub {
        frame: 1,
        state: 12_345,
    };
    client
        .on_state_sync(KeyframeState {
            frame: Frame::new(1),
            state: foreign,
            player_inputs: vec![StubInput::default(); 2],
        })
        .unwrap();

    let reports = observer.violations_of_kind(ViolationKind::ChecksumMismatch);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].severity, ViolationSeverity::Critical);
    assert_eq!(reports[0].frame, Some(Frame::new(1)));
    assert_eq!(client.history().head().state, local);
    assert_eq!(
        client.sync_health(),
        SyncHealth::DesyncDetected {
            frame: Frame::new(1),
            local_checksum: compute_checksum(&local).unwrap(),
            remote_checksum: compute_checksum(&foreign).unwrap(),
        }
    );
}
