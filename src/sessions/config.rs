//! Configuration for [`RollbackEngine`](crate::RollbackEngine).
//!
//! | Preset | `max_predicted_frames` | Intended for |
//! |--------|------------------------|--------------|
//! | `default()` | 8 | typical internet play at 60 Hz |
//! | `lan()` | 4 | local networks, keeps rollbacks shallow |
//! | `high_latency()` | 16 | 100-250 ms round trips |
//!
//! # Example
//!
//! ```
//! use keyframe_rollback::{EngineConfig, VerificationMode};
//! use web_time::Duration;
//!
//! let config = EngineConfig {
//!     timestep: Duration::from_micros(33_333),
//!     verification: VerificationMode::Checked,
//!     ..EngineConfig::lan()
//! };
//! assert!(config.validate().is_ok());
//! ```

use web_time::Duration;

use crate::RollbackError;

/// Largest accepted `max_predicted_frames`. Rollbacks resimulate up to this many frames
/// inside one call, so it also bounds the worst-case cost of a late input.
pub const MAX_PREDICTION_WINDOW: usize = 128;

/// Highest frame the engine simulates. Keyframes past it are rejected, so frame
/// arithmetic a prediction window beyond the tail never overflows.
pub const MAX_FRAME: i32 = i32::MAX - 2 * MAX_PREDICTION_WINDOW as i32;

/// Whether the engine double-checks the game while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VerificationMode {
    /// Trust the game. Inputs that match their prediction skip resimulation.
    #[default]
    Off,
    /// Replay every tick from the saved state and compare checksums, and always
    /// resimulate on late input. Reports [`ViolationKind::Determinism`] on mismatch.
    ///
    /// [`ViolationKind::Determinism`]: crate::telemetry::ViolationKind::Determinism
    Checked,
}

impl VerificationMode {
    /// `Checked` when the `paranoid` feature is enabled, otherwise `Off`.
    #[must_use]
    pub const fn from_features() -> Self {
        if cfg!(feature = "paranoid") {
            Self::Checked
        } else {
            Self::Off
        }
    }

    /// Returns `true` for [`VerificationMode::Checked`].
    #[must_use]
    pub const fn is_checked(self) -> bool {
        matches!(self, Self::Checked)
    }
}

/// Tunables of a rollback engine.
///
/// # Forward Compatibility
///
/// Fields may be added in future versions; construct with `..EngineConfig::default()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "EngineConfig has no effect unless passed to EngineBuilder::with_config()"]
pub struct EngineConfig {
    /// History length above which `update` stops ticking until input is confirmed.
    ///
    /// Default: 8
    pub max_predicted_frames: usize,

    /// Wall-clock duration of one frame, used by `advance`.
    ///
    /// Default: 1/60 s
    pub timestep: Duration,

    /// Runtime self-checks.
    ///
    /// Default: [`VerificationMode::Off`], or `Checked` with the `paranoid` feature
    pub verification: VerificationMode,

    /// Tick a second time in one `update` when remote input is already queued for
    /// frames ahead of this peer.
    ///
    /// Default: `true`
    pub catch_up: bool,

    /// Events kept until drained; the oldest are dropped beyond this.
    ///
    /// Default: 100
    pub event_queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_predicted_frames: 8,
            timestep: Duration::from_nanos(16_666_667),
            verification: VerificationMode::from_features(),
            catch_up: true,
            event_queue_size: 100,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for local networks: a short prediction window.
    pub fn lan() -> Self {
        Self {
            max_predicted_frames: 4,
            ..Self::default()
        }
    }

    /// Preset for 100-250 ms round trips: predicts further ahead before stalling.
    pub fn high_latency() -> Self {
        Self {
            max_predicted_frames: 16,
            ..Self::default()
        }
    }

    /// Checks every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), RollbackError> {
        if self.max_predicted_frames == 0 || self.max_predicted_frames > MAX_PREDICTION_WINDOW {
            return Err(RollbackError::InvalidConfig {
                info: format!(
                    "max_predicted_frames must be in 1..={}, got {}",
                    MAX_PREDICTION_WINDOW, self.max_predicted_frames
                ),
            });
        }
        if self.timestep.is_zero() {
            return Err(RollbackError::InvalidConfig {
                info: "timestep must be non-zero".to_owned(),
            });
        }
        if self.timestep > Duration::from_secs(1) {
            return Err(RollbackError::InvalidConfig {
                info: format!(
                    "timestep must be at most 1s, got {}ms",
                    self.timestep.as_millis()
                ),
            });
        }
        if self.event_queue_size == 0 {
            return Err(RollbackError::InvalidConfig {
                info: "event_queue_size must be at least 1".to_owned(),
            });
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
    fn presets_are_valid() {
        for config in [
            EngineConfig::default(),
            EngineConfig::lan(),
            EngineConfig::high_latency(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn presets_only_change_window() {
        let lan = EngineConfig::lan();
        let default = EngineConfig::new();
        assert!(lan.max_predicted_frames < default.max_predicted_frames);
        assert!(EngineConfig::high_latency().max_predicted_frames > default.max_predicted_frames);
        assert_eq!(lan.timestep, default.timestep);
    }

    #[test]
    fn default_verification_follows_feature() {
        assert_eq!(
            EngineConfig::default().verification.is_checked(),
            cfg!(feature = "paranoid")
        );
    }

    #[test]
    fn rejects_zero_window() {
        let config = EngineConfig {
            max_predicted_frames: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_predicted_frames"));
    }

    #[test]
    fn rejects_oversized_window() {
        let config = EngineConfig {
            max_predicted_frames: MAX_PREDICTION_WINDOW + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RollbackError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_bad_timesteps() {
        for timestep in [Duration::ZERO, Duration::from_secs(2)] {
            let config = EngineConfig {
                timestep,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn rejects_empty_event_queue() {
        let config = EngineConfig {
            event_queue_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
