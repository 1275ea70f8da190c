use serde::{Deserialize, Serialize};

use crate::checksum::compute_checksum;
use crate::network::codec::CodecError;
use crate::{Frame, InputStatus};

/// One player's input for one frame, together with whether it was guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInput<I> {
    /// The input value handed to the game.
    pub input: I,
    /// Whether `input` is known or predicted.
    pub status: InputStatus,
}

impl<I> PlayerInput<I> {
    /// A known input.
    pub const fn confirmed(input: I) -> Self {
        Self {
            input,
            status: InputStatus::Confirmed,
        }
    }

    /// A guessed input that a rollback may replace.
    pub const fn predicted(input: I) -> Self {
        Self {
            input,
            status: InputStatus::Predicted,
        }
    }

    /// Returns `true` if this input is a prediction.
    #[must_use]
    pub fn is_predicted(&self) -> bool {
        self.status == InputStatus::Predicted
    }
}

impl<I: Default> Default for PlayerInput<I> {
    fn default() -> Self {
        Self::confirmed(I::default())
    }
}

/// The wire form of a fully confirmed frame.
///
/// Hosts broadcast these as new authoritative baselines; clients also bootstrap from one.
/// `player_inputs[id]` is the input player `id` contributed to `frame`, so the vector's
/// length is the number of players the keyframe knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyframeState<I, S> {
    /// The frame this state belongs to.
    pub frame: Frame,
    /// The game state after `frame` was simulated.
    pub state: S,
    /// Every player's confirmed input for `frame`.
    pub player_inputs: Vec<I>,
}

impl<I, S: Serialize> KeyframeState<I, S> {
    /// Checksum of the contained state, comparable with
    /// [`compute_checksum`] of a locally simulated state for the same frame.
    pub fn checksum(&self) -> Result<u128, CodecError> {
        compute_checksum(&self.state)
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
    fn constructors_set_status() {
        assert!(!PlayerInput::confirmed(3u8).is_predicted());
        assert!(PlayerInput::predicted(3u8).is_predicted());
    }

    #[test]
    fn default_input_is_confirmed() {
        let input: PlayerInput<u16> = PlayerInput::default();
        assert_eq!(input.input, 0);
        assert_eq!(input.status, InputStatus::Confirmed);
    }

    #[test]
    fn keyframe_checksum_ignores_inputs() {
        let a = KeyframeState {
            frame: Frame::new(4),
            state: (10u32, 20u32),
            player_inputs: vec![1u8, 2],
        };
        let b = KeyframeState {
            player_inputs: vec![9u8, 9],
            ..a.clone()
        };
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_eq!(
            a.checksum().unwrap(),
            compute_checksum(&(10u32, 20u32)).unwrap()
        );
    }
}
