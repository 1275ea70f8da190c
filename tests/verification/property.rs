//! Property-based tests for the rollback engine and its input queues.
//!
//! These tests use proptest to check that invariants hold under random inputs and
//! random delivery schedules, using the exposed `__internal` module where a component
//! is tested on its own.
//!
//! # Properties Tested
//!
//! - Late inputs, however they are scheduled, end in the same state as a straight
//!   simulation of the final inputs
//! - The history never grows past the prediction window
//! - Random operation sequences keep every engine invariant
//! - Future input queues accept only newer frames and hand them out in order

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{scripted_input, simulate, GameStub, StateStub, StubInput};
use crate::common::{genesis, scripted_host, Outbox};
use keyframe_rollback::__internal::FutureInputQueue;
use keyframe_rollback::telemetry::InvariantChecker;
use keyframe_rollback::{Frame, Game, PlayerId, RollbackEngine};
use proptest::prelude::*;

// ============================================================================
// Property Test Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Update,
    /// Input for a remote player, `ahead` frames from the current frame.
    Input {
        player: usize,
        ahead: i32,
        value: u32,
    },
    Join,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Update),
        4 => (0usize..4, -3i32..4, any::<u32>())
            .prop_map(|(player, ahead, value)| Op::Input { player, ahead, value }),
        1 => Just(Op::Join),
    ]
}

fn send_remote(host: &mut RollbackEngine<GameStub>, frame: usize, value: u32) {
    host.on_remote_input(
        Frame::new(frame as i32),
        PlayerId::new(1),
        StubInput { inp: value },
    )
    .unwrap();
}

// ============================================================================
// Engine Properties
// ============================================================================

proptest! {
    /// Rolling back for late inputs reaches the state a lockstep simulation reaches.
    #[test]
    fn prop_late_inputs_match_straight_simulation(
        remote in prop::collection::vec(any::<u32>(), 1..=12),
        lags in prop::collection::vec(0usize..4, 12),
    ) {
        let outbox = Outbox::new();
        let mut host = scripted_host(Some(genesis(2)), 16, &outbox);
        let frames = remote.len();

        // delivery step of each frame, non-decreasing so inputs arrive in order
        let mut due = Vec::with_capacity(frames);
        let mut latest = 0;
        for (index, lag) in lags.iter().take(frames).enumerate() {
            latest = latest.max(index + 1 + lag);
            due.push(latest);
        }

        let mut next = 0;
        for step in 1..=frames {
            host.update().unwrap();
            while next < frames && due[next] == step {
                send_remote(&mut host, next + 1, remote[next]);
                next += 1;
            }
        }
        while next < frames {
            send_remote(&mut host, next + 1, remote[next]);
            next += 1;
        }

        let expected: Vec<Vec<StubInput>> = (1..=frames)
            .map(|f| {
                vec![
                    scripted_input(0, Frame::new(f as i32)),
                    StubInput { inp: remote[f - 1] },
                ]
            })
            .collect();
        prop_assert_eq!(host.history().len(), 1);
        prop_assert_eq!(host.confirmed_frame(), Frame::new(frames as i32));
        prop_assert_eq!(host.game().save_state(), simulate(StateStub::default(), &expected));
    }

    /// Without remote input the host predicts exactly `max_predicted_frames` ahead.
    #[test]
    fn prop_history_never_exceeds_window(
        max_predicted in 1usize..10,
        updates in 0usize..40,
    ) {
        let outbox = Outbox::new();
        let mut host = scripted_host(Some(genesis(2)), max_predicted, &outbox);
        let mut advanced = 0;
        for _ in 0..updates {
            advanced += host.update().unwrap();
            prop_assert!(host.history().len() <= max_predicted + 1);
        }
        prop_assert_eq!(advanced, updates.min(max_predicted));
        prop_assert_eq!(host.should_stall(), updates >= max_predicted);
    }

    /// Any mix of ticks, inputs (stale, current or early) and joins keeps the engine
    /// consistent and never errors.
    #[test]
    fn prop_random_operations_keep_invariants(
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let outbox = Outbox::new();
        let mut host = scripted_host(Some(genesis(2)), 16, &outbox);
        for op in ops {
            match op {
                Op::Update => {
                    host.update().unwrap();
                },
                Op::Input { player, ahead, value } => {
                    let remote = 1 + player % (host.num_players() - 1);
                    let frame = Frame::new((host.current_frame().as_i32() + ahead).max(0));
                    host.on_remote_input(frame, PlayerId::new(remote), StubInput { inp: value })
                        .unwrap();
                },
                Op::Join => {
                    host.add_player();
                },
            }
            let result = host.check_invariants();
            prop_assert!(result.is_ok(), "invariants failed: {:?}", result.err());
            prop_assert_eq!(host.game().save_state(), host.history().tail().state);
        }
    }
}

// ============================================================================
// FutureInputQueue Properties
// ============================================================================

proptest! {
    /// Only frames newer than everything received are queued, and consuming frames in
    /// order hands every queued input out once.
    #[test]
    fn prop_future_queue_accepts_only_newer_frames(
        frames in prop::collection::vec(0i32..50, 0..40),
    ) {
        let mut queue = FutureInputQueue::<u32>::new();
        let mut newest = Frame::NULL;
        for (value, f) in frames.iter().enumerate() {
            let frame = Frame::new(*f);
            let accepted = queue.enqueue(frame, value as u32);
            prop_assert_eq!(accepted, frame > newest);
            if accepted {
                newest = frame;
            }
            prop_assert_eq!(queue.last_received(), newest);
            prop_assert!(queue.check_invariants().is_ok());
        }

        let queued = queue.len();
        let taken = (0..50)
            .filter(|f| queue.take_for(Frame::new(*f)).is_some())
            .count();
        prop_assert_eq!(taken, queued);
        prop_assert!(queue.is_empty());
    }

    /// Discarding through a frame leaves only later frames.
    #[test]
    fn prop_future_queue_discard_through(
        count in 0i32..30,
        cut in 0i32..40,
    ) {
        let mut queue = FutureInputQueue::<u32>::new();
        for f in 1..=count {
            queue.enqueue(Frame::new(f), 0);
        }
        queue.discard_through(Frame::new(cut));
        prop_assert_eq!(queue.len() as i32, (count - cut).max(0));
        if let Some(next) = queue.next_frame() {
            prop_assert!(next > Frame::new(cut));
        }
        prop_assert!(queue.check_invariants().is_ok());
    }
}
