//! Draining iterator over queued [`RollbackEvent`]s.

use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

use crate::RollbackEvent;

/// Iterator returned by [`RollbackEngine::events`](crate::RollbackEngine::events).
///
/// Events are removed from the engine as they are yielded; dropping the iterator early
/// still removes every remaining event.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a> {
    inner: Drain<'a, RollbackEvent>,
}

impl<'a> EventDrain<'a> {
    pub(crate) fn from_drain(inner: Drain<'a, RollbackEvent>) -> Self {
        Self { inner }
    }
}

impl Iterator for EventDrain<'_> {
    type Item = RollbackEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for EventDrain<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for EventDrain<'_> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for EventDrain<'_> {}

impl std::fmt::Debug for EventDrain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
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
    use crate::{Frame, PlayerId};
    use std::collections::VecDeque;

    fn queue() -> VecDeque<RollbackEvent> {
        let mut events = VecDeque::new();
        events.push_back(RollbackEvent::PlayerJoined {
            player: PlayerId::new(1),
            first_frame: Frame::new(1),
        });
        events.push_back(RollbackEvent::KeyframeBroadcast {
            frame: Frame::new(2),
        });
        events
    }

    #[test]
    fn drains_in_order_and_empties_queue() {
        let mut events = queue();
        let drained: Vec<_> = EventDrain::from_drain(events.drain(..)).collect();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], RollbackEvent::PlayerJoined { .. }));
        assert!(events.is_empty());
    }

    #[test]
    fn reports_exact_len_and_reverses() {
        let mut events = queue();
        let mut drain = EventDrain::from_drain(events.drain(..));
        assert_eq!(drain.len(), 2);
        assert!(matches!(
            drain.next_back(),
            Some(RollbackEvent::KeyframeBroadcast { .. })
        ));
        assert_eq!(drain.len(), 1);
        assert!(format!("{:?}", drain).contains("remaining: 1"));
    }

    #[test]
    fn dropping_early_still_clears() {
        let mut events = queue();
        {
            let mut drain = EventDrain::from_drain(events.drain(..));
            let _ = drain.next();
        }
        assert!(events.is_empty());
    }
}
