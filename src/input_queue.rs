use std::collections::VecDeque;

use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::Frame;

pub mod prediction;

/// Inputs that arrived for frames this peer has not simulated yet.
///
/// One queue exists per remote player. Entries are kept in strictly increasing frame
/// order and consumed by `tick` when their frame comes up. The queue also remembers the
/// newest frame ever received for the player, which is what stale and duplicate
/// messages are rejected against.
#[derive(Debug, Clone)]
pub struct FutureInputQueue<I> {
    pending: VecDeque<(Frame, I)>,
    last_received: Frame,
}

impl<I> Default for FutureInputQueue<I> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            last_received: Frame::NULL,
        }
    }
}

impl<I> FutureInputQueue<I> {
    /// Creates an empty queue that has received nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue that treats everything up to `frame` as already received.
    #[must_use]
    pub fn received_through(frame: Frame) -> Self {
        Self {
            pending: VecDeque::new(),
            last_received: frame,
        }
    }

    /// The newest frame received for this player, or [`Frame::NULL`].
    #[must_use]
    pub fn last_received(&self) -> Frame {
        self.last_received
    }

    /// Returns `true` if an input for `frame` would be a duplicate or arrived out of order.
    #[must_use]
    pub fn is_stale(&self, frame: Frame) -> bool {
        frame <= self.last_received
    }

    /// Records that input up to `frame` is settled without queueing anything.
    pub fn advance_last_received(&mut self, frame: Frame) {
        if frame > self.last_received {
            self.last_received = frame;
        }
    }

    /// Queues `input` for `frame`. Returns `false` (and queues nothing) if it is stale.
    pub fn enqueue(&mut self, frame: Frame, input: I) -> bool {
        if self.is_stale(frame) {
            return false;
        }
        self.pending.push_back((frame, input));
        self.last_received = frame;
        true
    }

    /// Pops the queued input for `frame`, if the front of the queue holds it.
    ///
    /// An entry older than `frame` at the front means a frame was skipped without
    /// consuming it; it is dropped and reported.
    pub fn take_for(&mut self, frame: Frame) -> Option<I> {
        while let Some((front, _)) = self.pending.front() {
            if *front >= frame {
                break;
            }
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::InputQueue,
                frame = frame,
                "dropping queued input for frame {} while ticking frame {}",
                front,
                frame
            );
            self.pending.pop_front();
        }
        match self.pending.front() {
            Some((front, _)) if *front == frame => self.pending.pop_front().map(|(_, i)| i),
            _ => None,
        }
    }

    /// Drops queued inputs for `frame` and everything before it.
    pub fn discard_through(&mut self, frame: Frame) {
        while self.pending.front().is_some_and(|(f, _)| *f <= frame) {
            self.pending.pop_front();
        }
    }

    /// Number of queued inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if no input is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The frame of the next queued input.
    #[must_use]
    pub fn next_frame(&self) -> Option<Frame> {
        self.pending.front().map(|(f, _)| *f)
    }
}

impl<I> InvariantChecker for FutureInputQueue<I> {
    /// 1. queued frames are strictly increasing
    /// 2. nothing queued is newer than `last_received`
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut previous = Frame::NULL;
        for (frame, _) in &self.pending {
            if previous.is_valid() && *frame <= previous {
                return Err(InvariantViolation::new(
                    "FutureInputQueue",
                    "queued frames not strictly increasing",
                )
                .with_details(format!("previous={}, next={}", previous, frame)));
            }
            previous = *frame;
        }
        if previous.is_valid() && previous > self.last_received {
            return Err(InvariantViolation::new(
                "FutureInputQueue",
                "queued input newer than last received frame",
            )
            .with_details(format!(
                "newest_queued={}, last_received={}",
                previous, self.last_received
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_accepts_frame_zero() {
        let queue: FutureInputQueue<u8> = FutureInputQueue::new();
        assert!(!queue.is_stale(Frame::new(0)));
        assert!(queue.is_empty());
        assert_eq!(queue.last_received(), Frame::NULL);
    }

    #[test]
    fn enqueue_advances_last_received_and_rejects_duplicates() {
        let mut queue = FutureInputQueue::new();
        assert!(queue.enqueue(Frame::new(3), 'a'));
        assert_eq!(queue.last_received(), Frame::new(3));
        assert!(!queue.enqueue(Frame::new(3), 'b'));
        assert!(!queue.enqueue(Frame::new(2), 'c'));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn take_for_only_pops_matching_frame() {
        let mut queue = FutureInputQueue::new();
        queue.enqueue(Frame::new(5), 50u32);
        queue.enqueue(Frame::new(6), 60u32);

        assert_eq!(queue.take_for(Frame::new(4)), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take_for(Frame::new(5)), Some(50));
        assert_eq!(queue.next_frame(), Some(Frame::new(6)));
    }

    #[test]
    fn take_for_skips_entries_left_behind() {
        let mut queue = FutureInputQueue::new();
        queue.enqueue(Frame::new(2), 1u8);
        queue.enqueue(Frame::new(4), 2u8);
        assert_eq!(queue.take_for(Frame::new(4)), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn discard_through_keeps_newer_entries() {
        let mut queue = FutureInputQueue::new();
        for frame in 1..=5 {
            queue.enqueue(Frame::new(frame), frame);
        }
        queue.discard_through(Frame::new(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_frame(), Some(Frame::new(4)));
        assert_eq!(queue.last_received(), Frame::new(5));
    }

    #[test]
    fn advance_last_received_never_moves_backwards() {
        let mut queue: FutureInputQueue<u8> = FutureInputQueue::received_through(Frame::new(8));
        queue.advance_last_received(Frame::new(4));
        assert_eq!(queue.last_received(), Frame::new(8));
        queue.advance_last_received(Frame::new(10));
        assert!(queue.is_stale(Frame::new(10)));
        assert!(!queue.is_stale(Frame::new(11)));
    }

    #[test]
    fn invariants_hold_after_operations() {
        let mut queue = FutureInputQueue::new();
        queue.enqueue(Frame::new(1), ());
        queue.enqueue(Frame::new(2), ());
        queue.take_for(Frame::new(1));
        assert!(queue.check_invariants().is_ok());
    }
}
