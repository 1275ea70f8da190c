//! Convenient re-exports for common usage.
//!
//! ```rust
//! use keyframe_rollback::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Engine**: [`RollbackEngine`], [`EngineBuilder`], [`EngineConfig`], [`VerificationMode`]
//! - **Core traits**: [`Game`], [`PredictionStrategy`]
//! - **Fundamental types**: [`Frame`], [`PlayerId`], [`PlayerType`], [`Role`], [`NULL_FRAME`]
//! - **History**: [`KeyframeState`], [`PlayerInput`], [`InputStatus`], [`InputVec`]
//! - **Events and health**: [`RollbackEvent`], [`SyncHealth`]
//! - **Wire messages**: [`Message`], [`InputMessage`]
//! - **Error handling**: [`RollbackError`], [`RollbackResult`]
//! - **Network monitoring**: [`NetworkStats`]
//!
//! # Example
//!
//! ```rust
//! use keyframe_rollback::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Copy, PartialEq, Default, Debug, Serialize, Deserialize)]
//! struct Buttons(u8);
//!
//! #[derive(Default)]
//! struct Arena {
//!     positions: [i32; 2],
//! }
//!
//! impl Game for Arena {
//!     type Input = Buttons;
//!     type State = [i32; 2];
//!
//!     fn tick(&mut self, inputs: &[Buttons]) {
//!         for (position, input) in self.positions.iter_mut().zip(inputs) {
//!             *position += i32::from(input.0);
//!         }
//!     }
//!
//!     fn save_state(&self) -> [i32; 2] {
//!         self.positions
//!     }
//!
//!     fn load_state(&mut self, state: &[i32; 2]) {
//!         self.positions = *state;
//!     }
//! }
//!
//! let keyframe = KeyframeState {
//!     frame: Frame::new(0),
//!     state: [0, 0],
//!     player_inputs: vec![Buttons::default(); 2],
//! };
//! let client: RollbackResult<RollbackEngine<Arena>> = EngineBuilder::new()
//!     .with_config(EngineConfig::lan())
//!     .start_client(Arena::default(), PlayerId::new(1), Some(keyframe));
//! assert_eq!(client.unwrap().player_type(PlayerId::new(0)), Some(PlayerType::Remote));
//! ```

// Engine and configuration
pub use crate::sessions::builder::EngineBuilder;
pub use crate::sessions::config::{EngineConfig, VerificationMode};
pub use crate::sessions::rollback_engine::RollbackEngine;

// Core traits
pub use crate::input_queue::prediction::PredictionStrategy;
pub use crate::Game;

// Fundamental types and constants
pub use crate::{Frame, PlayerId, PlayerType, Role, NULL_FRAME};

// History and wire types
pub use crate::frame_info::{KeyframeState, PlayerInput};
pub use crate::network::messages::{InputMessage, Message};
pub use crate::{InputStatus, InputVec};

// Events and health
pub use crate::sessions::sync_health::SyncHealth;
pub use crate::RollbackEvent;

// Error handling
pub use crate::{RollbackError, RollbackResult};

// Network monitoring
pub use crate::NetworkStats;
