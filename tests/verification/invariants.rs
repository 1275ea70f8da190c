//! Tests for `InvariantChecker` implementations across whole sessions.
//!
//! Every engine here runs with checked verification and a [`CollectingObserver`], so
//! any invariant the engine checks after an operation, any determinism mismatch and any
//! checksum disagreement ends up in the observer.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::stubs::GameStub;
use crate::common::{deliver, genesis, scripted_builder, DelayLine, Outbox};
use keyframe_rollback::__internal::PlayerRegistry;
use keyframe_rollback::telemetry::{CollectingObserver, InvariantChecker};
use keyframe_rollback::{
    Frame, PlayerId, PlayerType, RollbackEngine, RollbackError, VerificationMode,
};

fn checked_peer(
    player: usize,
    host: bool,
    outbox: &Outbox,
    observer: &Arc<CollectingObserver>,
) -> RollbackEngine<GameStub> {
    let builder = scripted_builder(player, outbox)
        .with_verification(VerificationMode::Checked)
        .with_max_predicted_frames(16)
        .with_violation_observer(observer.clone());
    if host {
        builder
            .start_host(GameStub::new(), PlayerId::new(player), Some(genesis(2)))
            .unwrap()
    } else {
        builder
            .start_client(GameStub::new(), PlayerId::new(player), Some(genesis(2)))
            .unwrap()
    }
}

#[test]
fn wired_session_reports_nothing() {
    for delay in [0, 1, 3] {
        let observer = Arc::new(CollectingObserver::new());
        let host_outbox = Outbox::new();
        let client_outbox = Outbox::new();
        let mut host = checked_peer(0, true, &host_outbox, &observer);
        let mut client = checked_peer(1, false, &client_outbox, &observer);

        let mut to_client = DelayLine::new(delay);
        let mut to_host = DelayLine::new(delay);
        for _ in 0..30 {
            host.update().unwrap();
            client.update().unwrap();
            deliver(&mut client, &to_client.step(host_outbox.take())).unwrap();
            deliver(&mut host, &to_host.step(client_outbox.take())).unwrap();

            assert!(host.check_invariants().is_ok());
            assert!(client.check_invariants().is_ok());
        }
        assert!(
            observer.is_empty(),
            "delay {}: {:?}",
            delay,
            observer.violations()
        );
        assert!(client.confirmed_frame() > Frame::new(0));
    }
}

#[test]
fn stalled_host_keeps_invariants() {
    let observer = Arc::new(CollectingObserver::new());
    let outbox = Outbox::new();
    let mut host = checked_peer(0, true, &outbox, &observer);
    for _ in 0..40 {
        host.update().unwrap();
        assert!(host.check_invariants().is_ok());
    }
    assert!(host.should_stall());
    assert_eq!(host.history().len(), 17);
    assert!(observer.is_empty(), "{:?}", observer.violations());
}

#[test]
fn registry_invariants_track_joins() {
    let mut registry =
        PlayerRegistry::<u8>::with_players(2, PlayerId::new(0), Frame::new(0)).unwrap();
    assert!(registry.check_invariants().is_ok());
    assert_eq!(registry.player_type(PlayerId::new(1)), Some(PlayerType::Remote));

    let id = registry.next_id();
    registry.add_remote(id, Frame::new(5));
    assert_eq!(id, PlayerId::new(2));
    assert_eq!(registry.len(), 3);
    assert!(registry.check_invariants().is_ok());
}

#[test]
fn registry_rejects_local_outside_roster() {
    let result = PlayerRegistry::<u8>::with_players(2, PlayerId::new(2), Frame::new(0));
    assert!(matches!(result, Err(RollbackError::InvalidRequest { .. })));
}
