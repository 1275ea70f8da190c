//! Wire messages exchanged between the host and its clients.
//!
//! The transport is up to the application: encode a [`Message`] with
//! [`codec::encode`](crate::network::codec::encode), send the bytes over any reliable
//! ordered channel, and hand the decoded message to
//! [`RollbackEngine::handle_message`](crate::RollbackEngine::handle_message).

use serde::{Deserialize, Serialize};

use crate::frame_info::KeyframeState;
use crate::{Frame, PlayerId};

/// One player's input for one frame, broadcast by the peer that owns the player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage<I> {
    /// The frame the input belongs to.
    pub frame: Frame,
    /// The player who produced it.
    pub player_id: PlayerId,
    /// The input itself.
    pub input: I,
    /// The sender's confirmed frontier when it sent this input. Receivers do not use
    /// it; it is carried for diagnostics.
    pub frame_sync: Frame,
}

/// Everything that travels between peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message<I, S> {
    /// A player's input for one frame.
    Input(InputMessage<I>),
    /// A new authoritative baseline. Host to clients only.
    State(KeyframeState<I, S>),
    /// Checksum of the host's state at `frame`, without the state itself.
    StateHash {
        /// The frame the checksum belongs to.
        frame: Frame,
        /// Checksum as computed by [`compute_checksum`](crate::checksum::compute_checksum).
        checksum: u128,
    },
    /// Latency measurement. Answered with a `Pong` carrying the same nonce.
    Ping {
        /// Opaque value echoed back by the receiver.
        nonce: u64,
    },
    /// Answer to a `Ping`.
    Pong {
        /// The nonce of the answered ping.
        nonce: u64,
    },
}

impl<I, S> Message<I, S> {
    /// Short name of the variant, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::State(_) => "state",
            Self::StateHash { .. } => "state_hash",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }
}

impl<I, S> From<InputMessage<I>> for Message<I, S> {
    fn from(input: InputMessage<I>) -> Self {
        Self::Input(input)
    }
}

impl<I, S> From<KeyframeState<I, S>> for Message<I, S> {
    fn from(keyframe: KeyframeState<I, S>) -> Self {
        Self::State(keyframe)
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
    fn conversions_pick_the_right_variant() {
        let input = InputMessage {
            frame: Frame::new(2),
            player_id: PlayerId::new(1),
            input: 5u8,
            frame_sync: Frame::new(0),
        };
        let msg: Message<u8, u32> = input.into();
        assert_eq!(msg.kind(), "input");

        let keyframe = KeyframeState {
            frame: Frame::new(3),
            state: 9u32,
            player_inputs: vec![0u8, 1],
        };
        let msg: Message<u8, u32> = keyframe.into();
        assert!(matches!(msg, Message::State(ref k) if k.frame == Frame::new(3)));
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            Message::<u8, u8>::StateHash {
                frame: Frame::new(0),
                checksum: 0,
            }
            .kind(),
            Message::<u8, u8>::Ping { nonce: 1 }.kind(),
            Message::<u8, u8>::Pong { nonce: 1 }.kind(),
        ];
        assert_eq!(kinds, ["state_hash", "ping", "pong"]);
    }
}
