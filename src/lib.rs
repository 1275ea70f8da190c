//! # Keyframe Rollback
//!
//! Rollback netcode for a host plus clients star. Every peer runs the same deterministic
//! simulation; the local player's input is applied immediately while remote inputs are
//! predicted. When a real remote input arrives late, the engine rewinds to the frame
//! before it and resimulates forward. The host periodically broadcasts an authoritative
//! keyframe (full state plus inputs) so clients can drop speculative history and detect
//! divergence through checksums.
//!
//! The engine is driven by three kinds of calls:
//!
//! - [`RollbackEngine::update`] once per fixed timestep (or [`RollbackEngine::advance`]
//!   with elapsed wall time),
//! - [`RollbackEngine::on_remote_input`] for every input message received from a peer,
//! - [`RollbackEngine::on_state_sync`] / [`RollbackEngine::on_state_sync_hash`] on clients
//!   for keyframes and keyframe checksums received from the host.
//!
//! # Example
//!
//! ```
//! use keyframe_rollback::{EngineBuilder, Game, PlayerId};
//!
//! #[derive(Default)]
//! struct Counter {
//!     total: i64,
//! }
//!
//! impl Game for Counter {
//!     type Input = i8;
//!     type State = i64;
//!
//!     fn tick(&mut self, inputs: &[i8]) {
//!         self.total += inputs.iter().map(|i| i64::from(*i)).sum::<i64>();
//!     }
//!
//!     fn save_state(&self) -> i64 {
//!         self.total
//!     }
//!
//!     fn load_state(&mut self, state: &i64) {
//!         self.total = *state;
//!     }
//! }
//!
//! let mut host = EngineBuilder::<Counter>::new()
//!     .with_local_input(|_frame| Some(1))
//!     .with_state_broadcast(|_keyframe| {})
//!     .start_host(Counter::default(), PlayerId::new(0), None)
//!     .unwrap();
//!
//! host.update().unwrap();
//! assert_eq!(host.current_frame().as_i32(), 1);
//! assert_eq!(host.game().total, 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};
use smallvec::SmallVec;

pub use error::RollbackError;
pub use frame_info::{KeyframeState, PlayerInput};
pub use history::{History, HistoryEntry};
pub use input_queue::prediction::{BlankPrediction, PredictionStrategy, RepeatLastInput};
pub use network::messages::{InputMessage, Message};
pub use network::network_stats::{NetworkStats, PingTracker};
pub use sessions::builder::EngineBuilder;
pub use sessions::config::{EngineConfig, VerificationMode};
pub use sessions::event_drain::EventDrain;
pub use sessions::rollback_engine::RollbackEngine;
pub use sessions::sync_health::SyncHealth;
pub use timestep::FixedTimestep;

pub mod checksum;
#[doc(hidden)]
pub mod error;
#[doc(hidden)]
pub mod frame_info;
pub mod history;
#[doc(hidden)]
pub mod input_queue;
pub mod prelude;
pub mod telemetry;
pub mod timestep;
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    pub mod config;
    #[doc(hidden)]
    pub mod event_drain;
    #[doc(hidden)]
    pub mod player_registry;
    #[doc(hidden)]
    pub mod rollback_engine;
    #[doc(hidden)]
    pub mod sync_health;
}
/// Wire format: messages, their codec and latency bookkeeping.
pub mod network {
    /// Binary codec for wire messages and keyframes.
    ///
    /// Wraps bincode with one fixed configuration so every peer encodes identically.
    pub mod codec;
    pub mod messages;
    pub mod network_stats;
}

/// Internal components exposed for property tests and benchmarks.
///
/// Nothing here is covered by semver guarantees.
#[doc(hidden)]
pub mod __internal {
    pub use crate::input_queue::FutureInputQueue;
    pub use crate::sessions::player_registry::PlayerRegistry;
}

// #############
// # CONSTANTS #
// #############

/// Internally, -1 represents no frame / invalid frame.
pub const NULL_FRAME: i32 = -1;

/// A frame is a single step of game execution.
///
/// Frame 0 is the initial authoritative state. The special value [`Frame::NULL`]
/// represents "no frame", e.g. no keyframe has been broadcast yet.
///
/// # Examples
///
/// ```
/// use keyframe_rollback::Frame;
///
/// let frame = Frame::new(0);
/// assert!(frame.is_valid());
/// assert!(Frame::NULL.is_null());
/// assert_eq!((frame + 1).as_i32(), 1);
/// assert_eq!(Frame::new(7) - Frame::new(3), 4);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Frame(i32);

impl Frame {
    /// The null frame constant, representing "no frame".
    pub const NULL: Self = Self(NULL_FRAME);

    /// Creates a new `Frame` from an `i32` value.
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        Self(frame)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this frame is the null frame.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_FRAME
    }

    /// Returns `true` if this frame is valid (non-negative).
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Returns `Some(self)` if the frame is valid, or `None` if it's null or negative.
    #[inline]
    #[must_use]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_FRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Frame {
    type Output = Self;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i32> for Frame {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<i32> for Frame {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl std::ops::Sub<Self> for Frame {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<i32> for Frame {
    #[inline]
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Frame> for i32 {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

impl PartialEq<i32> for Frame {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Frame {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

/// Identifies a player for the whole session.
///
/// Ids are dense and assigned in join order starting at 0, so they double as indices
/// into the per-frame input slice handed to [`Game::tick`].
///
/// # Examples
///
/// ```
/// use keyframe_rollback::PlayerId;
///
/// let id = PlayerId::new(2);
/// assert_eq!(id.as_usize(), 2);
/// assert_eq!(id.to_string(), "2");
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PlayerId(usize);

impl PlayerId {
    /// Creates a new `PlayerId` from a `usize` value.
    #[inline]
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the underlying `usize` value.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for PlayerId {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<PlayerId> for usize {
    #[inline]
    fn from(id: PlayerId) -> Self {
        id.0
    }
}

/// Per-frame input vector indexed by [`PlayerId`].
///
/// A [`SmallVec`] so that sessions with up to four players never allocate per frame.
pub type InputVec<I> = SmallVec<[I; 4]>;

/// Convenience alias for results returned by this crate.
pub type RollbackResult<T> = Result<T, RollbackError>;

/// The keyframe type of a [`Game`].
pub type Keyframe<G> = KeyframeState<<G as Game>::Input, <G as Game>::State>;

// #############
// #   ENUMS   #
// #############

/// Which side of the star topology this engine is on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Owns the authoritative timeline and broadcasts keyframes.
    Host,
    /// Follows the host; trims history only after checksum validation.
    Client,
}

/// Whether a player is controlled on this peer or on another one.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PlayerType {
    /// Input is polled locally and never predicted.
    #[default]
    Local,
    /// Input arrives over the network and is predicted until it does.
    Remote,
}

/// Whether a recorded input is real or a guess.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InputStatus {
    /// The input is known to be the one the player actually sent.
    Confirmed,
    /// The input was predicted and may be replaced by a rollback.
    Predicted,
}

/// Notifications produced by the engine, drained with [`RollbackEngine::events`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RollbackEvent {
    /// A late remote input replaced a prediction and frames were resimulated.
    Rollback {
        /// The frame whose input was corrected.
        frame: Frame,
        /// Number of frames resimulated (the corrected frame included).
        depth: usize,
    },
    /// The host broadcast a new keyframe.
    KeyframeBroadcast {
        /// Frame of the keyframe.
        frame: Frame,
    },
    /// A client replaced its frontier with a keyframe from the host.
    KeyframeApplied {
        /// Frame of the keyframe.
        frame: Frame,
        /// Number of later entries resimulated on top of it.
        resimulated: usize,
    },
    /// A confirmed frame hashed differently than on the host. History stops shrinking.
    DesyncDetected {
        /// The frame at which the mismatch occurred.
        frame: Frame,
        /// The checksum computed locally.
        local_checksum: u128,
        /// The checksum received from the host.
        remote_checksum: u128,
    },
    /// A new remote player was registered.
    PlayerJoined {
        /// The id assigned to the player.
        player: PlayerId,
        /// First frame the player contributes input to.
        first_frame: Frame,
    },
}

// #############
// #  TRAITS   #
// #############

/// The deterministic simulation driven by the engine.
///
/// Given identical prior state and identical inputs, [`tick`](Game::tick) must produce
/// identical state on every peer. The engine cannot detect a violation of this at
/// runtime except through [`VerificationMode::Checked`] and host checksums.
pub trait Game {
    /// Per-player, per-frame input.
    type Input: Clone + PartialEq + Default + Debug + Serialize + DeserializeOwned;

    /// A full snapshot of the simulation. Checksums are computed over its serialized bytes.
    type State: Clone + Debug + Serialize + DeserializeOwned;

    /// Advances the simulation by one frame. `inputs[id]` is the input of player `id`.
    fn tick(&mut self, inputs: &[Self::Input]);

    /// Produces a snapshot of the current state.
    fn save_state(&self) -> Self::State;

    /// Replaces the current state with `state`. Must overwrite everything.
    fn load_state(&mut self, state: &Self::State);
}

// ###################
// # UNIT TESTS      #
// ###################

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
    fn frame_null_displays_as_null_frame() {
        assert_eq!(Frame::NULL.to_string(), "NULL_FRAME");
        assert_eq!(Frame::new(12).to_string(), "12");
    }

    #[test]
    fn frame_arithmetic() {
        let mut frame = Frame::new(5);
        frame += 2;
        assert_eq!(frame, 7);
        assert_eq!(frame - 3, Frame::new(4));
        assert_eq!(frame - Frame::new(2), 5);
        assert!(Frame::new(3) > 2);
    }

    #[test]
    fn frame_to_option() {
        assert_eq!(Frame::new(0).to_option(), Some(Frame::new(0)));
        assert_eq!(Frame::NULL.to_option(), None);
        assert_eq!(Frame::new(-4).to_option(), None);
    }

    #[test]
    fn frame_conversions_roundtrip() {
        let frame: Frame = 42.into();
        let raw: i32 = frame.into();
        assert_eq!(raw, 42);
    }

    #[test]
    fn player_id_ordering_follows_join_order() {
        let mut ids = vec![PlayerId::new(2), PlayerId::new(0), PlayerId::new(1)];
        ids.sort();
        assert_eq!(ids, vec![PlayerId::new(0), PlayerId::new(1), PlayerId::new(2)]);
        assert_eq!(usize::from(ids[2]), 2);
    }

    #[test]
    fn player_type_defaults_to_local() {
        assert_eq!(PlayerType::default(), PlayerType::Local);
    }

    #[test]
    fn rollback_event_debug_names_variant() {
        let event = RollbackEvent::Rollback {
            frame: Frame::new(3),
            depth: 4,
        };
        let debug = format!("{:?}", event);
        assert!(debug.contains("Rollback"));
        assert!(debug.contains('4'));
    }
}
