//! Host and clients wired together through in-memory outboxes.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{
    scripted_input, simulate, DriftingGameStub, GameStub, StateStub, StubInput,
};
use crate::common::{
    deliver, genesis, init_tracing, scripted_builder_for, scripted_client, scripted_host,
    scripted_state, DelayLine, Outbox, StubMessage,
};
use keyframe_rollback::network::codec::{decode, encode};
use keyframe_rollback::telemetry::InvariantChecker;
use keyframe_rollback::{Frame, Message, PlayerId, RollbackEngine, RollbackEvent, SyncHealth};

/// State after `frame` when the host played alone for `solo` frames, then a client
/// joined with a default input and sent scripted input from the frame after.
fn joined_state(solo: i32, frame: Frame) -> StateStub {
    let frames: Vec<Vec<StubInput>> = (1..=frame.as_i32())
        .map(|f| {
            let host = scripted_input(0, Frame::new(f));
            if f <= solo {
                vec![host]
            } else if f == solo + 1 {
                vec![host, StubInput::default()]
            } else {
                vec![host, scripted_input(1, Frame::new(f))]
            }
        })
        .collect();
    simulate(StateStub::default(), &frames)
}

fn assert_keyframes(batch: &[StubMessage], reference: impl Fn(Frame) -> StateStub) {
    for message in batch {
        if let Message::State(keyframe) = message {
            assert_eq!(
                keyframe.state,
                reference(keyframe.frame),
                "keyframe {} diverged",
                keyframe.frame
            );
        }
    }
}

fn assert_confirmed_entries(
    engine: &RollbackEngine<GameStub>,
    reference: impl Fn(Frame) -> StateStub,
) {
    for entry in engine.history().iter().filter(|entry| entry.is_fully_confirmed()) {
        assert_eq!(entry.state, reference(entry.frame), "frame {} diverged", entry.frame);
    }
    assert_eq!(engine.game().gs, engine.history().tail().state);
    assert!(engine.check_invariants().is_ok());
}

/// Host plays `solo` frames alone, adds a player and bootstraps a client from the next
/// keyframe, then both run for `steps` with `delay` steps of latency each way.
fn run_join(solo: i32, delay: usize, steps: usize) {
    init_tracing();
    let host_outbox = Outbox::new();
    let mut host = scripted_host(None, 16, &host_outbox);
    for _ in 0..solo {
        host.update().unwrap();
    }
    let joined = host.add_player();
    assert_eq!(joined, PlayerId::new(1));
    host.update().unwrap();

    let bootstrap = host_outbox.keyframes().last().cloned().unwrap();
    assert_eq!(bootstrap.frame, Frame::new(solo + 1));
    assert_eq!(bootstrap.player_inputs.len(), 2);
    let _ = host_outbox.take();

    let client_outbox = Outbox::new();
    let mut client = scripted_client(1, bootstrap, 16, &client_outbox);
    let reference = |frame| joined_state(solo, frame);

    let mut to_client = DelayLine::new(delay);
    let mut to_host = DelayLine::new(delay);
    for _ in 0..steps {
        host.update().unwrap();
        client.update().unwrap();

        let from_host = host_outbox.take();
        assert_keyframes(&from_host, reference);
        deliver(&mut client, &to_client.step(from_host)).unwrap();
        deliver(&mut host, &to_host.step(client_outbox.take())).unwrap();
    }

    // settle everything still in flight
    let mut pending = to_host.drain();
    pending.extend(client_outbox.take());
    deliver(&mut host, &pending).unwrap();
    let mut pending = to_client.drain();
    let from_host = host_outbox.take();
    assert_keyframes(&from_host, reference);
    pending.extend(from_host);
    deliver(&mut client, &pending).unwrap();

    let settled = (solo + steps as i32) - 2 * delay as i32 - 2;
    assert!(host.confirmed_frame().as_i32() >= settled);
    assert!(client.confirmed_frame().as_i32() >= settled);
    assert!(!client.sync_health().is_desynced());
    assert_confirmed_entries(&host, reference);
    assert_confirmed_entries(&client, reference);
}

#[test]
fn client_joins_at_start_without_latency() {
    run_join(0, 0, 40);
}

#[test]
fn client_joins_at_start_with_latency() {
    run_join(0, 2, 40);
}

#[test]
fn client_joins_running_session() {
    run_join(10, 1, 40);
}

#[test]
fn three_peers_agree_on_keyframes() {
    init_tracing();
    let host_outbox = Outbox::new();
    let first_outbox = Outbox::new();
    let second_outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(3)), 16, &host_outbox);
    let mut first = scripted_client(1, genesis(3), 16, &first_outbox);
    let mut second = scripted_client(2, genesis(3), 16, &second_outbox);
    let reference = |frame| scripted_state(3, frame);

    let mut to_host = DelayLine::new(1);
    let mut to_first = DelayLine::new(1);
    let mut to_second = DelayLine::new(1);
    for _ in 0..30 {
        host.update().unwrap();
        first.update().unwrap();
        second.update().unwrap();

        let from_host = host_outbox.take();
        assert_keyframes(&from_host, reference);
        let from_first = first_outbox.take();
        let from_second = second_outbox.take();

        let mut for_first = from_host.clone();
        for_first.extend(from_second.iter().cloned());
        let mut for_second = from_host;
        for_second.extend(from_first.iter().cloned());
        let mut for_host = from_first;
        for_host.extend(from_second);

        deliver(&mut first, &to_first.step(for_first)).unwrap();
        deliver(&mut second, &to_second.step(for_second)).unwrap();
        deliver(&mut host, &to_host.step(for_host)).unwrap();
    }

    deliver(&mut host, &to_host.drain()).unwrap();
    let from_host = host_outbox.take();
    assert_keyframes(&from_host, reference);
    for (client, line) in [(&mut first, &mut to_first), (&mut second, &mut to_second)] {
        let mut pending = line.drain();
        pending.extend(from_host.iter().cloned());
        deliver(client, &pending).unwrap();
    }

    assert!(host.confirmed_frame() >= Frame::new(25));
    for client in [&first, &second] {
        assert!(client.confirmed_frame() >= Frame::new(25));
        assert!(!client.sync_health().is_desynced());
        assert_confirmed_entries(client, reference);
    }
    assert_confirmed_entries(&host, reference);
}

#[test]
fn drifting_client_detects_desync() {
    init_tracing();
    let host_outbox = Outbox::new();
    let client_outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 16, &host_outbox);
    let mut client = scripted_builder_for::<DriftingGameStub>(1, &client_outbox)
        .with_max_predicted_frames(16)
        .start_client(DriftingGameStub::default(), PlayerId::new(1), Some(genesis(2)))
        .unwrap();

    for _ in 0..30 {
        host.update().unwrap();
        client.update().unwrap();
        deliver(&mut client, &host_outbox.take()).unwrap();
        deliver(&mut host, &client_outbox.take()).unwrap();
    }

    let SyncHealth::DesyncDetected { frame, .. } = client.sync_health() else {
        panic!("client never noticed it drifted: {:?}", client.sync_health());
    };
    assert_eq!(frame, client.confirmed_frame());
    let desyncs: Vec<_> = client
        .events()
        .filter(|event| matches!(event, RollbackEvent::DesyncDetected { .. }))
        .collect();
    assert_eq!(desyncs.len(), 1);
    // a desynced client stops trimming, so it ends up stalled
    assert!(client.should_stall());
    assert_eq!(host.sync_health(), SyncHealth::InSync);
}

#[test]
fn checksums_alone_advance_the_client() {
    let host_outbox = Outbox::new();
    let client_outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 16, &host_outbox);
    let mut client = scripted_client(1, genesis(2), 16, &client_outbox);

    for _ in 0..20 {
        host.update().unwrap();
        client.update().unwrap();
        let without_keyframes: Vec<_> = host_outbox
            .take()
            .into_iter()
            .filter(|message| !matches!(message, Message::State(_)))
            .collect();
        deliver(&mut client, &without_keyframes).unwrap();
        deliver(&mut host, &client_outbox.take()).unwrap();
    }

    assert!(client.confirmed_frame() >= Frame::new(15));
    assert_eq!(client.sync_health(), SyncHealth::InSync);
    assert_eq!(
        client.history().head().state,
        scripted_state(2, client.confirmed_frame())
    );
    assert!(!client
        .events()
        .any(|event| matches!(event, RollbackEvent::KeyframeApplied { .. })));
}

fn through_wire(batch: Vec<StubMessage>) -> Vec<StubMessage> {
    batch
        .into_iter()
        .map(|message| {
            let bytes = encode(&message).unwrap();
            decode::<StubMessage>(&bytes).unwrap()
        })
        .collect()
}

#[test]
fn session_survives_wire_encoding() {
    let host_outbox = Outbox::new();
    let client_outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 16, &host_outbox);
    let mut client = scripted_client(1, genesis(2), 16, &client_outbox);

    for _ in 0..20 {
        host.update().unwrap();
        client.update().unwrap();
        deliver(&mut client, &through_wire(host_outbox.take())).unwrap();
        deliver(&mut host, &through_wire(client_outbox.take())).unwrap();
    }
    deliver(&mut client, &through_wire(host_outbox.take())).unwrap();

    assert!(client.confirmed_frame() >= Frame::new(18));
    assert_eq!(
        client.history().head().state,
        scripted_state(2, client.confirmed_frame())
    );
}

#[test]
fn ping_round_trip_over_the_wire() {
    let outbox = Outbox::new();
    let mut host = scripted_host(Some(genesis(2)), 16, &outbox);
    let mut client = scripted_client(1, genesis(2), 16, &Outbox::new());

    let ping = through_wire(vec![client.send_ping()]).remove(0);
    let pong = host.handle_message(ping).unwrap().unwrap();
    assert!(matches!(pong, Message::Pong { .. }));
    let pong = through_wire(vec![pong]).remove(0);
    assert!(client.handle_message(pong).unwrap().is_none());

    let stats = client.network_stats();
    assert_eq!(stats.pings_sent, 1);
    assert_eq!(stats.pongs_received, 1);

    // a pong nobody asked for is ignored
    assert!(client
        .handle_message(Message::Pong { nonce: 99 })
        .unwrap()
        .is_none());
    assert_eq!(client.network_stats().pongs_received, 1);
}
