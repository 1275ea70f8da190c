//! Host-side engine tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{scripted_input, simulate, GameStub, StateStub, StubInput};
use crate::common::{genesis, scripted_builder, scripted_host, Outbox};
use keyframe_rollback::telemetry::InvariantChecker;
use keyframe_rollback::{
    EngineBuilder, Frame, Game, Message, PlayerId, PlayerType, RollbackError, RollbackEvent,
};

#[test]
fn late_input_rewinds_and_repredicts() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 10, &outbox);
    for _ in 0..6 {
        assert_eq!(host.update().unwrap(), 1);
    }
    assert_eq!(host.current_frame(), Frame::new(6));
    host.events().for_each(drop);

    let late = StubInput { inp: 9 };
    host.on_remote_input(Frame::new(3), PlayerId::new(1), late)
        .unwrap();

    let frames: Vec<Vec<StubInput>> = (1..=6)
        .map(|f| {
            let remote = if f >= 3 { late } else { StubInput::default() };
            vec![scripted_input(0, Frame::new(f)), remote]
        })
        .collect();
    let expected = simulate(StateStub::default(), &frames);
    assert_eq!(host.history().entry(Frame::new(6)).unwrap().state, expected);
    assert_eq!(host.game().save_state(), expected);

    for f in 4..=6 {
        let slot = host
            .history()
            .entry(Frame::new(f))
            .unwrap()
            .input(PlayerId::new(1))
            .unwrap();
        assert_eq!(slot.input, late);
        assert!(slot.is_predicted());
    }

    let events: Vec<_> = host.events().collect();
    assert!(events.contains(&RollbackEvent::Rollback {
        frame: Frame::new(3),
        depth: 4,
    }));
    assert!(events.contains(&RollbackEvent::KeyframeBroadcast {
        frame: Frame::new(3)
    }));
    assert_eq!(outbox.keyframes().last().unwrap().frame, Frame::new(3));
}

#[test]
fn inputs_arriving_in_order_confirm_the_timeline() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 8, &outbox);
    for _ in 0..5 {
        host.update().unwrap();
    }
    for f in 1..=5 {
        host.on_remote_input(Frame::new(f), PlayerId::new(1), scripted_input(1, Frame::new(f)))
            .unwrap();
    }

    assert_eq!(host.history().len(), 1);
    assert_eq!(host.confirmed_frame(), Frame::new(5));
    assert_eq!(host.last_broadcast_keyframe(), Frame::new(5));
    assert_eq!(
        host.game().save_state(),
        crate::common::scripted_state(2, Frame::new(5))
    );
    let broadcast: Vec<_> = outbox.keyframes().iter().map(|kf| kf.frame).collect();
    assert_eq!(
        broadcast,
        (0..=5).map(Frame::new).collect::<Vec<_>>()
    );
}

#[test]
fn history_spans_last_keyframe_to_tail() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 8, &outbox);
    for step in 1..=7 {
        host.update().unwrap();
        if step % 3 == 0 {
            let frame = host.confirmed_frame() + 1;
            host.on_remote_input(frame, PlayerId::new(1), StubInput { inp: step })
                .unwrap();
        }
        let expected = host.current_frame() - host.last_broadcast_keyframe() + 1;
        assert_eq!(host.history().len() as i32, expected);
        assert!(host.history().head().is_fully_confirmed());
        assert!(host.check_invariants().is_ok());
    }
}

#[test]
fn update_stalls_beyond_prediction_window() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 4, &outbox);
    let mut advanced = 0;
    for _ in 0..20 {
        advanced += host.update().unwrap();
        assert!(host.history().len() <= 5);
    }
    assert_eq!(advanced, 4);
    assert!(host.should_stall());

    host.on_remote_input(Frame::new(1), PlayerId::new(1), StubInput::default())
        .unwrap();
    assert!(!host.should_stall());
    assert_eq!(host.update().unwrap(), 1);
}

#[test]
fn early_input_is_queued_and_consumed() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 8, &outbox);
    host.on_remote_input(Frame::new(1), PlayerId::new(1), StubInput { inp: 4 })
        .unwrap();
    assert_eq!(host.network_stats().queued_inputs, 1);

    assert_eq!(host.update().unwrap(), 1);
    let slot = host
        .history()
        .head()
        .input(PlayerId::new(1))
        .unwrap()
        .clone();
    assert_eq!(slot.input, StubInput { inp: 4 });
    assert!(!slot.is_predicted());
    assert_eq!(host.confirmed_frame(), Frame::new(1));
}

#[test]
fn unknown_player_changes_nothing() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 8, &outbox);
    host.update().unwrap();
    let before = host.game().save_state();

    let err = host
        .on_remote_input(Frame::new(1), PlayerId::new(7), StubInput { inp: 1 })
        .unwrap_err();
    assert_eq!(
        err,
        RollbackError::UnknownPlayer {
            player: PlayerId::new(7)
        }
    );
    assert_eq!(host.game().save_state(), before);
    assert_eq!(host.current_frame(), Frame::new(1));
}

#[test]
fn local_player_input_is_rejected() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 8, &outbox);
    assert!(matches!(
        host.on_remote_input(Frame::new(1), PlayerId::new(0), StubInput::default()),
        Err(RollbackError::InvalidRequest { .. })
    ));
}

#[test]
fn host_rejects_client_operations() {
    let outbox = Outbox::new();
    let mut host = scripted_host(None, 8, &outbox);
    assert!(matches!(
        host.on_state_sync(genesis(1)),
        Err(RollbackError::InvalidRequest { .. })
    ));
    assert!(matches!(
        host.on_state_sync_hash(Frame::new(0), 0),
        Err(RollbackError::InvalidRequest { .. })
    ));
    assert!(matches!(
        host.handle_message(Message::State(genesis(1))),
        Err(RollbackError::InvalidRequest { .. })
    ));
}

#[test]
fn added_player_contributes_from_next_frame() {
    let outbox = Outbox::new();
    let mut host = scripted_host(None, 8, &outbox);
    assert_eq!(host.num_players(), 1);
    host.update().unwrap();

    let joined = host.add_player();
    assert_eq!(joined, PlayerId::new(1));
    assert_eq!(host.player_type(joined), Some(PlayerType::Remote));

    // the seeded default input confirms frame 2 on its own
    host.update().unwrap();
    let keyframe = outbox.keyframes().last().cloned().unwrap();
    assert_eq!(keyframe.frame, Frame::new(2));
    assert_eq!(
        keyframe.player_inputs,
        vec![scripted_input(0, Frame::new(2)), StubInput::default()]
    );

    // inputs up to the seeded frame are stale
    let before = host.game().save_state();
    host.on_remote_input(Frame::new(2), joined, StubInput { inp: 50 })
        .unwrap();
    assert_eq!(host.game().save_state(), before);
    assert!(host.check_invariants().is_ok());
}

#[test]
fn host_without_local_poll_repeats_default() {
    let outbox = Outbox::new();
    let mut host = EngineBuilder::<GameStub>::new()
        .with_state_broadcast(outbox.state_sink())
        .start_host(GameStub::new(), PlayerId::new(0), None)
        .unwrap();
    host.update().unwrap();
    host.update().unwrap();
    assert_eq!(host.game().gs.frame, 2);
    assert_eq!(
        host.game().save_state(),
        simulate(
            StateStub::default(),
            &[vec![StubInput::default()], vec![StubInput::default()]]
        )
    );
}

#[test]
fn host_can_bootstrap_a_client_mid_session() {
    let outbox = Outbox::new();
    let mut host = scripted_builder(0, &outbox)
        .start_host(GameStub::new(), PlayerId::new(0), Some(genesis(2)))
        .unwrap();
    for f in 1..=3 {
        host.update().unwrap();
        host.on_remote_input(Frame::new(f), PlayerId::new(1), StubInput::default())
            .unwrap();
    }
    let keyframe = host.history().head().to_keyframe();
    let client_outbox = Outbox::new();
    let client = scripted_builder(1, &client_outbox)
        .start_client(GameStub::new(), PlayerId::new(1), Some(keyframe))
        .unwrap();
    assert_eq!(client.current_frame(), host.current_frame());
    assert_eq!(client.game().save_state(), host.game().save_state());
}
