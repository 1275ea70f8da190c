use crate::frame_info::{KeyframeState, PlayerInput};
use crate::{Frame, InputVec, PlayerId};

/// One simulated frame: the state after ticking it and the inputs that produced it.
///
/// `inputs[id]` belongs to player `id`. Entries simulated before a player joined are
/// shorter than later ones.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry<I, S> {
    /// The frame this entry describes.
    pub frame: Frame,
    /// Game state after `frame` was simulated.
    pub state: S,
    /// Per-player inputs, each marked confirmed or predicted.
    pub inputs: InputVec<PlayerInput<I>>,
    /// Checksum received from the host for this frame, if any. Only clients use it.
    pub host_checksum: Option<u128>,
}

impl<I, S> HistoryEntry<I, S> {
    /// Creates an entry with no host checksum.
    pub fn new(frame: Frame, state: S, inputs: InputVec<PlayerInput<I>>) -> Self {
        Self {
            frame,
            state,
            inputs,
            host_checksum: None,
        }
    }

    /// Returns `true` if no player's input for this frame is a prediction.
    #[must_use]
    pub fn is_fully_confirmed(&self) -> bool {
        self.inputs.iter().all(|input| !input.is_predicted())
    }

    /// The recorded input of `player`, if the player was present for this frame.
    #[must_use]
    pub fn input(&self, player: PlayerId) -> Option<&PlayerInput<I>> {
        self.inputs.get(player.as_usize())
    }

    /// Mutable access to the recorded input of `player`.
    pub fn input_mut(&mut self, player: PlayerId) -> Option<&mut PlayerInput<I>> {
        self.inputs.get_mut(player.as_usize())
    }
}

impl<I: Clone, S> HistoryEntry<I, S> {
    /// The bare input values, in player order, as handed to the game.
    #[must_use]
    pub fn input_values(&self) -> InputVec<I> {
        self.inputs.iter().map(|input| input.input.clone()).collect()
    }
}

impl<I: Clone, S: Clone> HistoryEntry<I, S> {
    /// Converts the entry into its wire form. Prediction flags are not carried.
    #[must_use]
    pub fn to_keyframe(&self) -> KeyframeState<I, S> {
        KeyframeState {
            frame: self.frame,
            state: self.state.clone(),
            player_inputs: self.input_values().into_vec(),
        }
    }
}

impl<I, S> From<KeyframeState<I, S>> for HistoryEntry<I, S> {
    fn from(keyframe: KeyframeState<I, S>) -> Self {
        Self::new(
            keyframe.frame,
            keyframe.state,
            keyframe
                .player_inputs
                .into_iter()
                .map(PlayerInput::confirmed)
                .collect(),
        )
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
    use smallvec::smallvec;

    #[test]
    fn fully_confirmed_requires_every_input() {
        let mut entry = HistoryEntry::new(
            Frame::new(2),
            0u32,
            smallvec![PlayerInput::confirmed(1u8), PlayerInput::predicted(0u8)],
        );
        assert!(!entry.is_fully_confirmed());
        *entry.input_mut(PlayerId::new(1)).unwrap() = PlayerInput::confirmed(4);
        assert!(entry.is_fully_confirmed());
    }

    #[test]
    fn input_lookup_by_player() {
        let entry = HistoryEntry::new(
            Frame::new(0),
            (),
            smallvec![PlayerInput::confirmed('a'), PlayerInput::predicted('b')],
        );
        assert_eq!(entry.input(PlayerId::new(1)).unwrap().input, 'b');
        assert!(entry.input(PlayerId::new(2)).is_none());
        assert_eq!(entry.input_values().as_slice(), &['a', 'b']);
    }

    #[test]
    fn keyframe_conversion_confirms_everything() {
        let keyframe = KeyframeState {
            frame: Frame::new(9),
            state: "state".to_owned(),
            player_inputs: vec![3u8, 4, 5],
        };
        let entry = HistoryEntry::from(keyframe.clone());
        assert_eq!(entry.frame, Frame::new(9));
        assert!(entry.is_fully_confirmed());
        assert!(entry.host_checksum.is_none());
        assert_eq!(entry.to_keyframe(), keyframe);
    }
}
