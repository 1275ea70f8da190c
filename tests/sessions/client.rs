//! Client-side engine tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::stubs::{scripted_input, GameStub, StubInput};
use crate::common::{genesis, scripted_builder, scripted_client, scripted_host, Outbox};
use keyframe_rollback::checksum::compute_checksum;
use keyframe_rollback::telemetry::{CollectingObserver, InvariantChecker, ViolationKind};
use keyframe_rollback::{
    EngineBuilder, Frame, Game, KeyframeState, PlayerId, RollbackError, RollbackEvent, SyncHealth,
};

#[test]
fn keyframe_trims_history_and_ticking_continues() {
    let host_outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 8, &host_outbox);
    for f in 1..=4 {
        host.on_remote_input(Frame::new(f), PlayerId::new(1), scripted_input(1, Frame::new(f)))
            .unwrap();
    }
    while host.current_frame() < Frame::new(4) {
        host.update().unwrap();
    }
    assert_eq!(host.history().len(), 1);
    let keyframe = host_outbox.keyframes().last().cloned().unwrap();
    assert_eq!(keyframe.frame, Frame::new(4));

    let client_outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &client_outbox);
    client.update().unwrap();
    client.update().unwrap();
    assert_eq!(client.current_frame(), Frame::new(2));
    assert_eq!(client.history().len(), 3);
    client.events().for_each(drop);

    client.on_state_sync(keyframe.clone()).unwrap();
    assert_eq!(client.history().len(), 1);
    assert_eq!(client.confirmed_frame(), Frame::new(4));
    assert_eq!(client.game().save_state(), keyframe.state);
    assert_eq!(
        client.events().collect::<Vec<_>>(),
        vec![RollbackEvent::KeyframeApplied {
            frame: Frame::new(4),
            resimulated: 0,
        }]
    );

    client.update().unwrap();
    assert_eq!(client.current_frame(), Frame::new(5));
}

#[test]
fn keyframe_resimulates_newer_entries() {
    let outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &outbox);
    for _ in 0..5 {
        client.update().unwrap();
    }

    let mut reference = GameStub::new();
    reference.tick(&[StubInput { inp: 3 }, scripted_input(1, Frame::new(1))]);
    reference.tick(&[StubInput { inp: 3 }, scripted_input(1, Frame::new(2))]);
    let keyframe = KeyframeState {
        frame: Frame::new(2),
        state: reference.save_state(),
        player_inputs: vec![StubInput { inp: 3 }, scripted_input(1, Frame::new(2))],
    };
    client.on_state_sync(keyframe).unwrap();

    // newer entries replay their recorded inputs on top of the keyframe
    for f in 3..=5 {
        reference.tick(&[StubInput::default(), scripted_input(1, Frame::new(f))]);
    }
    assert_eq!(client.history().len(), 4);
    assert_eq!(client.game().save_state(), reference.save_state());
    assert_eq!(client.history().tail().state, reference.save_state());
    assert!(client.check_invariants().is_ok());
}

#[test]
fn checksum_match_advances_frontier() {
    let outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &outbox);
    client.update().unwrap();
    client.update().unwrap();
    client
        .on_remote_input(Frame::new(1), PlayerId::new(0), StubInput::default())
        .unwrap();
    client
        .on_remote_input(Frame::new(2), PlayerId::new(0), StubInput::default())
        .unwrap();
    assert_eq!(client.confirmed_frame(), Frame::new(1));
    assert_eq!(client.sync_health(), SyncHealth::InSync);

    let checksum = compute_checksum(&client.history().head().state).unwrap();
    client.on_state_sync_hash(Frame::new(1), checksum).unwrap();
    // attaching a checksum never touches the game
    assert_eq!(client.confirmed_frame(), Frame::new(1));
    client.update().unwrap();
    assert_eq!(client.confirmed_frame(), Frame::new(2));
}

#[test]
fn wrong_checksum_is_a_terminal_desync() {
    let observer = Arc::new(CollectingObserver::new());
    let mut client = EngineBuilder::<GameStub>::new()
        .with_violation_observer(observer.clone())
        .start_client(GameStub::new(), PlayerId::new(1), Some(genesis(2)))
        .unwrap();
    client.on_state_sync_hash(Frame::new(2), 0xbad).unwrap();
    for _ in 0..3 {
        client.update().unwrap();
    }
    for f in 1..=3 {
        client
            .on_remote_input(Frame::new(f), PlayerId::new(0), StubInput::default())
            .unwrap();
    }
    // frame 1 hashes correctly, so the frontier reaches frame 2
    let frame_one = compute_checksum(&client.history().head().state).unwrap();
    client.on_state_sync_hash(Frame::new(1), frame_one).unwrap();
    client.flush_history_keyframes().unwrap();

    let local = compute_checksum(&client.history().head().state).unwrap();
    assert_eq!(
        client.sync_health(),
        SyncHealth::DesyncDetected {
            frame: Frame::new(2),
            local_checksum: local,
            remote_checksum: 0xbad,
        }
    );
    assert_eq!(client.confirmed_frame(), Frame::new(2));
    let desyncs: Vec<_> = client
        .events()
        .filter(|event| matches!(event, RollbackEvent::DesyncDetected { .. }))
        .collect();
    assert_eq!(desyncs.len(), 1);
    assert_eq!(
        observer.violations_of_kind(ViolationKind::ChecksumMismatch).len(),
        1
    );

    // the engine keeps simulating but the frontier stays put
    let len = client.history().len();
    client.update().unwrap();
    client
        .on_remote_input(Frame::new(4), PlayerId::new(0), StubInput::default())
        .unwrap();
    assert_eq!(client.confirmed_frame(), Frame::new(2));
    assert_eq!(client.history().len(), len + 1);
    assert!(client.sync_health().is_desynced());
}

#[test]
fn older_keyframe_is_ignored() {
    let outbox = Outbox::new();
    let start = KeyframeState {
        frame: Frame::new(10),
        state: Default::default(),
        player_inputs: vec![StubInput::default(); 2],
    };
    let observer = Arc::new(CollectingObserver::new());
    let mut client = scripted_builder(1, &outbox)
        .with_max_predicted_frames(8)
        .with_violation_observer(observer.clone())
        .start_client(GameStub::new(), PlayerId::new(1), Some(start))
        .unwrap();
    client.update().unwrap();
    let before = client.game().save_state();

    client.on_state_sync(genesis(2)).unwrap();
    assert_eq!(client.confirmed_frame(), Frame::new(10));
    assert_eq!(client.current_frame(), Frame::new(11));
    assert_eq!(client.game().save_state(), before);
    assert_eq!(client.events().count(), 0);
    let stale = observer.violations_of_kind(ViolationKind::Keyframe);
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].frame, Some(Frame::new(0)));
    assert_eq!(client.sync_health(), SyncHealth::Pending);
}

#[test]
fn keyframe_beyond_tail_jumps_ahead() {
    let outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &outbox);
    client.update().unwrap();
    let far = KeyframeState {
        frame: Frame::new(30),
        state: Default::default(),
        player_inputs: vec![StubInput::default(); 2],
    };
    client.on_state_sync(far).unwrap();
    assert_eq!(client.history().len(), 1);
    assert_eq!(client.current_frame(), Frame::new(30));

    // inputs for frames the keyframe settled are stale now
    client
        .on_remote_input(Frame::new(12), PlayerId::new(0), StubInput { inp: 1 })
        .unwrap();
    assert_eq!(client.network_stats().queued_inputs, 0);
}

#[test]
fn keyframe_drops_settled_queued_inputs() {
    let outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &outbox);
    for f in 1..=4 {
        client
            .on_remote_input(Frame::new(f), PlayerId::new(0), StubInput { inp: 2 })
            .unwrap();
    }
    assert_eq!(client.network_stats().queued_inputs, 4);

    let keyframe = KeyframeState {
        frame: Frame::new(2),
        state: Default::default(),
        player_inputs: vec![StubInput { inp: 2 }; 2],
    };
    client.on_state_sync(keyframe).unwrap();
    assert_eq!(client.network_stats().queued_inputs, 2);
    client.update().unwrap();
    assert_eq!(client.current_frame(), Frame::new(4));
}

#[test]
fn own_player_input_is_rejected() {
    let outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &outbox);
    assert!(matches!(
        client.on_remote_input(Frame::new(1), PlayerId::new(1), StubInput::default()),
        Err(RollbackError::InvalidRequest { .. })
    ));
}

#[test]
fn client_needs_keyframe_and_membership() {
    assert!(matches!(
        EngineBuilder::<GameStub>::new().start_client(GameStub::new(), PlayerId::new(1), None),
        Err(RollbackError::MissingKeyframe)
    ));
    assert!(matches!(
        EngineBuilder::<GameStub>::new().start_client(
            GameStub::new(),
            PlayerId::new(3),
            Some(genesis(2))
        ),
        Err(RollbackError::InvalidRequest { .. })
    ));
}

#[test]
fn checksum_for_future_frame_waits_for_tick() {
    let outbox = Outbox::new();
    let mut client = scripted_client(1, genesis(2), 8, &outbox);
    client.on_state_sync_hash(Frame::new(1), 42).unwrap();
    assert!(client.history().head().host_checksum.is_some());
    client.update().unwrap();
    assert_eq!(client.history().tail().host_checksum, Some(42));
}
