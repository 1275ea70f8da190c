//! The history buffer: every frame between the confirmed frontier and the newest
//! simulated frame.
//!
//! Entries are appended at the tail by ticking, rewritten in place by rollbacks and
//! keyframe resyncs, and removed from the head only once they are confirmed. The head
//! is the confirmed frontier and never holds a predicted input. The buffer is never
//! empty and its frames are contiguous.

use std::collections::VecDeque;

use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::Frame;

mod entry;

pub use entry::HistoryEntry;

/// Contiguous, never-empty sequence of [`HistoryEntry`]s.
#[derive(Debug, Clone)]
pub struct History<I, S> {
    entries: VecDeque<HistoryEntry<I, S>>,
}

impl<I, S> History<I, S> {
    /// Creates a history holding only `frontier`.
    pub fn new(frontier: HistoryEntry<I, S>) -> Self {
        let mut entries = VecDeque::with_capacity(16);
        entries.push_back(frontier);
        Self { entries }
    }

    /// Number of entries, at least 1.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The confirmed frontier.
    #[must_use]
    pub fn head(&self) -> &HistoryEntry<I, S> {
        &self.entries[0]
    }

    /// The confirmed frontier.
    pub fn head_mut(&mut self) -> &mut HistoryEntry<I, S> {
        &mut self.entries[0]
    }

    /// The newest simulated frame.
    #[must_use]
    pub fn tail(&self) -> &HistoryEntry<I, S> {
        &self.entries[self.entries.len() - 1]
    }

    /// The entry at position `index` (0 is the frontier).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&HistoryEntry<I, S>> {
        self.entries.get(index)
    }

    /// The entry at position `index` (0 is the frontier).
    pub fn get_mut(&mut self, index: usize) -> Option<&mut HistoryEntry<I, S>> {
        self.entries.get_mut(index)
    }

    /// Position of `frame`, if it lies between the frontier and the tail.
    #[must_use]
    pub fn index_of(&self, frame: Frame) -> Option<usize> {
        let offset = frame - self.head().frame;
        if offset < 0 {
            return None;
        }
        let index = offset as usize;
        (index < self.entries.len()).then_some(index)
    }

    /// The entry for `frame`.
    #[must_use]
    pub fn entry(&self, frame: Frame) -> Option<&HistoryEntry<I, S>> {
        self.index_of(frame).and_then(|index| self.entries.get(index))
    }

    /// The entry for `frame`.
    pub fn entry_mut(&mut self, frame: Frame) -> Option<&mut HistoryEntry<I, S>> {
        self.index_of(frame)
            .and_then(move |index| self.entries.get_mut(index))
    }

    /// Appends the next frame. Its frame must be `tail + 1`.
    pub(crate) fn push_back(&mut self, entry: HistoryEntry<I, S>) {
        self.entries.push_back(entry);
    }

    /// Drops the frontier, unless it is the only entry.
    pub(crate) fn pop_front(&mut self) -> Option<HistoryEntry<I, S>> {
        if self.entries.len() > 1 {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Drops entries older than `frame`, always keeping at least one. Returns how many
    /// were dropped.
    pub(crate) fn drop_before(&mut self, frame: Frame) -> usize {
        let mut dropped = 0;
        while self.entries.len() > 1 && self.head().frame < frame {
            self.entries.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Drops the first `count` entries, always keeping at least one.
    pub(crate) fn drop_front(&mut self, count: usize) {
        let count = count.min(self.entries.len() - 1);
        self.entries.drain(..count);
    }

    /// Iterates from the frontier to the tail.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry<I, S>> + ExactSizeIterator + '_ {
        self.entries.iter()
    }

    /// Position of the newest entry without predicted inputs. The frontier always
    /// qualifies, so this is never `None` while invariants hold.
    #[must_use]
    pub fn newest_confirmed_index(&self) -> Option<usize> {
        self.entries.iter().rposition(HistoryEntry::is_fully_confirmed)
    }

    /// Number of entries that still hold at least one predicted input.
    #[must_use]
    pub fn predicted_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.is_fully_confirmed())
            .count()
    }
}

impl<I, S> InvariantChecker for History<I, S> {
    /// 1. never empty
    /// 2. the frontier holds no predicted input
    /// 3. frames are contiguous
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let Some(head) = self.entries.front() else {
            return Err(InvariantViolation::new("History", "history is empty"));
        };
        if !head.is_fully_confirmed() {
            return Err(
                InvariantViolation::new("History", "frontier holds a predicted input")
                    .with_details(format!("frame={}", head.frame)),
            );
        }
        for (index, pair) in self.entries.iter().collect::<Vec<_>>().windows(2).enumerate() {
            if pair[1].frame != pair[0].frame + 1 {
                return Err(
                    InvariantViolation::new("History", "frames are not contiguous").with_details(
                        format!(
                            "index={}, previous={}, next={}",
                            index + 1,
                            pair[0].frame,
                            pair[1].frame
                        ),
                    ),
                );
            }
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
    use crate::frame_info::PlayerInput;
    use smallvec::smallvec;

    fn confirmed(frame: i32) -> HistoryEntry<u8, i32> {
        HistoryEntry::new(Frame::new(frame), frame, smallvec![PlayerInput::confirmed(1)])
    }

    fn predicted(frame: i32) -> HistoryEntry<u8, i32> {
        HistoryEntry::new(
            Frame::new(frame),
            frame,
            smallvec![PlayerInput::confirmed(1), PlayerInput::predicted(0)],
        )
    }

    fn build(frames: std::ops::RangeInclusive<i32>) -> History<u8, i32> {
        let mut frames = frames;
        let first = frames.next().unwrap();
        let mut history = History::new(confirmed(first));
        for frame in frames {
            history.push_back(predicted(frame));
        }
        history
    }

    #[test]
    fn index_of_is_relative_to_frontier() {
        let history = build(3..=6);
        assert_eq!(history.index_of(Frame::new(3)), Some(0));
        assert_eq!(history.index_of(Frame::new(6)), Some(3));
        assert_eq!(history.index_of(Frame::new(2)), None);
        assert_eq!(history.index_of(Frame::new(7)), None);
        assert_eq!(history.entry(Frame::new(5)).unwrap().state, 5);
    }

    #[test]
    fn pop_front_never_empties() {
        let mut history = build(0..=1);
        assert!(history.pop_front().is_some());
        assert!(history.pop_front().is_none());
        assert_eq!(history.len(), 1);
        assert_eq!(history.head().frame, Frame::new(1));
    }

    #[test]
    fn drop_before_keeps_last_entry() {
        let mut history = build(0..=2);
        assert_eq!(history.drop_before(Frame::new(2)), 2);
        assert_eq!(history.head().frame, Frame::new(2));

        let mut history = build(0..=2);
        assert_eq!(history.drop_before(Frame::new(10)), 2);
        assert_eq!(history.len(), 1);
        assert_eq!(history.tail().frame, Frame::new(2));
    }

    #[test]
    fn drop_front_clamps() {
        let mut history = build(0..=3);
        history.drop_front(2);
        assert_eq!(history.head().frame, Frame::new(2));
        history.drop_front(10);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn newest_confirmed_scans_from_tail() {
        let mut history = build(0..=4);
        assert_eq!(history.newest_confirmed_index(), Some(0));
        *history.get_mut(2).unwrap() = confirmed(2);
        assert_eq!(history.newest_confirmed_index(), Some(2));
        assert_eq!(history.predicted_count(), 3);
    }

    #[test]
    fn invariants_detect_predicted_frontier() {
        let history: History<u8, i32> = History::new(predicted(0));
        let err = history.check_invariants().unwrap_err();
        assert!(err.invariant.contains("frontier"));
    }

    #[test]
    fn invariants_detect_gaps() {
        let mut history = build(0..=1);
        history.push_back(predicted(3));
        let err = history.check_invariants().unwrap_err();
        assert!(err.invariant.contains("contiguous"));
    }

    #[test]
    fn well_formed_history_passes() {
        assert!(build(0..=5).check_invariants().is_ok());
    }
}
