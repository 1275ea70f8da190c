//! Input prediction for remote players whose real input has not arrived yet.
//!
//! # Determinism Requirement
//!
//! Rollbacks regenerate predictions from the previous frame's (possibly corrected)
//! input, so a strategy must return the same value for the same arguments every time,
//! on every peer. No clocks, no randomness, no hidden state.
//!
//! # Built-in Strategies
//!
//! - [`RepeatLastInput`]: repeats the player's previous input (default)
//! - [`BlankPrediction`]: always returns the default input
//!
//! # Custom Strategies
//!
//! ```
//! use keyframe_rollback::{Frame, PlayerId, PredictionStrategy};
//!
//! #[derive(Clone, Copy, Default, PartialEq, Debug)]
//! struct Stick {
//!     x: i8,
//!     fire: bool,
//! }
//!
//! /// Keeps the stick direction but never predicts a shot.
//! struct HoldDirection;
//!
//! impl PredictionStrategy<Stick> for HoldDirection {
//!     fn predict_next(&self, previous: &Stick, _frame: Frame, _player: PlayerId) -> Stick {
//!         Stick { x: previous.x, fire: false }
//!     }
//! }
//!
//! let guess = HoldDirection.predict_next(&Stick { x: -1, fire: true }, Frame::new(3), PlayerId::new(1));
//! assert_eq!(guess, Stick { x: -1, fire: false });
//! ```

use crate::{Frame, PlayerId};

/// Produces a guess for `player`'s input at `frame` from the input it used one frame earlier.
pub trait PredictionStrategy<I>: Send + Sync {
    /// Predicts the input for `frame`. `previous` is the input (real or predicted)
    /// recorded for `player` at `frame - 1`.
    fn predict_next(&self, previous: &I, frame: Frame, player: PlayerId) -> I;
}

/// Assumes a player keeps doing whatever they did last frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatLastInput;

impl<I: Clone> PredictionStrategy<I> for RepeatLastInput {
    fn predict_next(&self, previous: &I, _frame: Frame, _player: PlayerId) -> I {
        previous.clone()
    }
}

/// Always predicts the neutral input.
///
/// Suits games where inputs are mostly idle and a wrong "nothing" is cheaper to correct
/// than a wrong repeated action.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlankPrediction;

impl<I: Default> PredictionStrategy<I> for BlankPrediction {
    fn predict_next(&self, _previous: &I, _frame: Frame, _player: PlayerId) -> I {
        I::default()
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

    #[derive(Clone, PartialEq, Default, Debug)]
    struct Pad {
        buttons: u8,
        name: String,
    }

    #[test]
    fn repeat_last_input_clones_previous() {
        let previous = Pad {
            buttons: 0b101,
            name: "p1".to_owned(),
        };
        let predicted = RepeatLastInput.predict_next(&previous, Frame::new(7), PlayerId::new(1));
        assert_eq!(predicted, previous);
    }

    #[test]
    fn blank_prediction_ignores_previous() {
        let previous = Pad {
            buttons: 0xFF,
            name: "p2".to_owned(),
        };
        let predicted = BlankPrediction.predict_next(&previous, Frame::new(7), PlayerId::new(2));
        assert_eq!(predicted, Pad::default());
    }

    #[test]
    fn strategies_are_stable_across_frames_and_players() {
        for frame in 0..5 {
            for player in 0..3 {
                let guess: u32 =
                    RepeatLastInput.predict_next(&42, Frame::new(frame), PlayerId::new(player));
                assert_eq!(guess, 42);
            }
        }
    }

    #[test]
    fn strategies_work_as_trait_objects() {
        let strategies: Vec<Box<dyn PredictionStrategy<u8>>> =
            vec![Box::new(RepeatLastInput), Box::new(BlankPrediction)];
        let guesses: Vec<u8> = strategies
            .iter()
            .map(|s| s.predict_next(&9, Frame::new(1), PlayerId::new(0)))
            .collect();
        assert_eq!(guesses, vec![9, 0]);
    }
}
