//! Player registry: who is in the session and where their inputs come from.
//!
//! Ids are dense and handed out in join order. Every remote player owns a
//! [`FutureInputQueue`] holding inputs that arrived ahead of the local simulation.

use std::collections::BTreeMap;

use crate::error::RollbackError;
use crate::input_queue::FutureInputQueue;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{Frame, PlayerId, PlayerType};

/// Maps player ids to their type and owns the remote players' future input queues.
pub struct PlayerRegistry<I> {
    players: BTreeMap<PlayerId, PlayerType>,
    queues: BTreeMap<PlayerId, FutureInputQueue<I>>,
}

impl<I> std::fmt::Debug for PlayerRegistry<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { players, queues } = self;

        f.debug_struct("PlayerRegistry")
            .field("players", players)
            .field(
                "queued",
                &queues.iter().map(|(id, q)| (*id, q.len())).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<I> Default for PlayerRegistry<I> {
    fn default() -> Self {
        Self {
            players: BTreeMap::new(),
            queues: BTreeMap::new(),
        }
    }
}

impl<I> PlayerRegistry<I> {
    /// Creates a registry with no players.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers ids `0..count`, with `local` as the only local player.
    ///
    /// Remote players' queues treat everything up to `settled_through` as received.
    pub fn with_players(
        count: usize,
        local: PlayerId,
        settled_through: Frame,
    ) -> Result<Self, RollbackError> {
        if local.as_usize() >= count {
            return Err(RollbackError::InvalidRequest {
                info: format!(
                    "local player {} is not among the {} players of the keyframe",
                    local, count
                ),
            });
        }
        let mut registry = Self::new();
        for id in (0..count).map(PlayerId::new) {
            if id == local {
                registry.players.insert(id, PlayerType::Local);
            } else {
                registry.add_remote(id, settled_through);
            }
        }
        Ok(registry)
    }

    /// The id the next joining player receives.
    #[must_use]
    pub fn next_id(&self) -> PlayerId {
        PlayerId::new(self.players.len())
    }

    /// Registers `id` as a remote player whose input is settled through `settled_through`.
    pub fn add_remote(&mut self, id: PlayerId, settled_through: Frame) {
        self.players.insert(id, PlayerType::Remote);
        self.queues
            .insert(id, FutureInputQueue::received_through(settled_through));
        crate::debug_check_invariants!(self, "add_remote");
    }

    /// Number of registered players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Returns `true` if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// The type of `id`, or `None` if it was never registered.
    #[must_use]
    pub fn player_type(&self, id: PlayerId) -> Option<PlayerType> {
        self.players.get(&id).copied()
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// Ids and types in id order.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, PlayerType)> + '_ {
        self.players.iter().map(|(id, ty)| (*id, *ty))
    }

    /// Ids of remote players.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn remote_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.queues.keys().copied()
    }

    /// The future input queue of a remote player.
    #[must_use]
    pub fn queue(&self, id: PlayerId) -> Option<&FutureInputQueue<I>> {
        self.queues.get(&id)
    }

    /// The future input queue of a remote player.
    pub fn queue_mut(&mut self, id: PlayerId) -> Option<&mut FutureInputQueue<I>> {
        self.queues.get_mut(&id)
    }

    /// All remote queues.
    pub fn queues_mut(&mut self) -> impl Iterator<Item = &mut FutureInputQueue<I>> + '_ {
        self.queues.values_mut()
    }

    /// Returns `true` if any remote player has input queued for a future frame.
    #[must_use]
    pub fn any_queued(&self) -> bool {
        self.queues.values().any(|q| !q.is_empty())
    }
}

impl<I> InvariantChecker for PlayerRegistry<I> {
    /// 1. ids are dense (`0..len`)
    /// 2. exactly the remote players own a queue
    /// 3. every queue is internally consistent
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (expected, id) in self.players.keys().enumerate() {
            if id.as_usize() != expected {
                return Err(
                    InvariantViolation::new("PlayerRegistry", "player ids are not dense")
                        .with_details(format!("expected={}, found={}", expected, id)),
                );
            }
        }
        for (id, ty) in &self.players {
            if (*ty == PlayerType::Remote) != self.queues.contains_key(id) {
                return Err(InvariantViolation::new(
                    "PlayerRegistry",
                    "remote players and input queues out of step",
                )
                .with_details(format!("player={}, type={:?}", id, ty)));
            }
        }
        for queue in self.queues.values() {
            queue.check_invariants()?;
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
    fn with_players_marks_only_local_as_local() {
        let registry: PlayerRegistry<u8> =
            PlayerRegistry::with_players(3, PlayerId::new(1), Frame::new(0)).unwrap();
        let types: Vec<_> = registry.iter().map(|(_, ty)| ty).collect();
        assert_eq!(
            types,
            vec![PlayerType::Remote, PlayerType::Local, PlayerType::Remote]
        );
        assert_eq!(
            registry.remote_ids().collect::<Vec<_>>(),
            vec![PlayerId::new(0), PlayerId::new(2)]
        );
        assert!(registry.check_invariants().is_ok());
    }

    #[test]
    fn with_players_rejects_uncovered_local_id() {
        let result: Result<PlayerRegistry<u8>, _> =
            PlayerRegistry::with_players(2, PlayerId::new(2), Frame::new(0));
        assert!(matches!(result, Err(RollbackError::InvalidRequest { .. })));
    }

    #[test]
    fn remote_queues_start_settled() {
        let registry: PlayerRegistry<u8> =
            PlayerRegistry::with_players(2, PlayerId::new(0), Frame::new(7)).unwrap();
        let queue = registry.queue(PlayerId::new(1)).unwrap();
        assert!(queue.is_stale(Frame::new(7)));
        assert!(!queue.is_stale(Frame::new(8)));
        assert!(registry.queue(PlayerId::new(0)).is_none());
    }

    #[test]
    fn next_id_follows_join_order() {
        let mut registry: PlayerRegistry<u8> =
            PlayerRegistry::with_players(1, PlayerId::new(0), Frame::new(0)).unwrap();
        let id = registry.next_id();
        assert_eq!(id, PlayerId::new(1));
        registry.add_remote(id, Frame::new(4));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.player_type(id), Some(PlayerType::Remote));
        assert_eq!(registry.next_id(), PlayerId::new(2));
    }

    #[test]
    fn any_queued_tracks_pending_input() {
        let mut registry: PlayerRegistry<u8> =
            PlayerRegistry::with_players(2, PlayerId::new(0), Frame::new(0)).unwrap();
        assert!(!registry.any_queued());
        registry
            .queue_mut(PlayerId::new(1))
            .unwrap()
            .enqueue(Frame::new(3), 1);
        assert!(registry.any_queued());
    }

    #[test]
    fn debug_lists_queue_lengths() {
        let registry: PlayerRegistry<u8> =
            PlayerRegistry::with_players(2, PlayerId::new(0), Frame::new(0)).unwrap();
        let debug = format!("{:?}", registry);
        assert!(debug.contains("PlayerRegistry"));
        assert!(debug.contains("queued"));
    }
}
