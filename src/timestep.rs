//! Converts wall-clock time into whole simulation steps.
//!
//! ```
//! use keyframe_rollback::FixedTimestep;
//! use web_time::Duration;
//!
//! let mut clock = FixedTimestep::new(Duration::from_millis(10));
//! assert_eq!(clock.accumulate(Duration::from_millis(25)), 2);
//! assert_eq!(clock.accumulate(Duration::from_millis(5)), 1);
//! ```

use web_time::Duration;

/// Steps run per call before the remaining backlog is discarded.
pub const DEFAULT_MAX_STEPS_PER_CALL: u32 = 8;

/// Accumulates elapsed time and releases it in fixed-size steps.
///
/// A long pause (debugger, backgrounded tab) would otherwise release hundreds of steps
/// at once; at most `max_steps_per_call` are released and the rest of the backlog is
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTimestep {
    step: Duration,
    accumulated: Duration,
    max_steps_per_call: u32,
}

impl FixedTimestep {
    /// Creates an accumulator releasing steps of `step`. A zero step never releases.
    #[must_use]
    pub const fn new(step: Duration) -> Self {
        Self {
            step,
            accumulated: Duration::ZERO,
            max_steps_per_call: DEFAULT_MAX_STEPS_PER_CALL,
        }
    }

    /// Caps the steps released by one [`accumulate`](Self::accumulate) call (at least 1).
    #[must_use]
    pub fn with_max_steps_per_call(mut self, max: u32) -> Self {
        self.max_steps_per_call = max.max(1);
        self
    }

    /// The step size.
    #[must_use]
    pub const fn step(&self) -> Duration {
        self.step
    }

    /// Time accumulated but not yet released.
    #[must_use]
    pub const fn pending(&self) -> Duration {
        self.accumulated
    }

    /// Adds `elapsed` and returns how many whole steps are due.
    pub fn accumulate(&mut self, elapsed: Duration) -> u32 {
        if self.step.is_zero() {
            return 0;
        }
        self.accumulated = self.accumulated.saturating_add(elapsed);
        let mut steps = 0;
        while self.accumulated >= self.step && steps < self.max_steps_per_call {
            self.accumulated -= self.step;
            steps += 1;
        }
        if steps == self.max_steps_per_call && self.accumulated >= self.step {
            tracing::debug!(
                backlog_ms = self.accumulated.as_millis() as u64,
                "dropping timestep backlog"
            );
            self.accumulated = Duration::from_nanos(
                (self.accumulated.as_nanos() % self.step.as_nanos()) as u64,
            );
        }
        steps
    }

    /// Forgets any accumulated time.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
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
    fn carries_remainder_between_calls() {
        let mut clock = FixedTimestep::new(Duration::from_millis(16));
        assert_eq!(clock.accumulate(Duration::from_millis(10)), 0);
        assert_eq!(clock.accumulate(Duration::from_millis(10)), 1);
        assert_eq!(clock.pending(), Duration::from_millis(4));
    }

    #[test]
    fn caps_steps_and_drops_backlog() {
        let mut clock = FixedTimestep::new(Duration::from_millis(10)).with_max_steps_per_call(3);
        assert_eq!(clock.accumulate(Duration::from_millis(1_005)), 3);
        assert_eq!(clock.pending(), Duration::from_millis(5));
    }

    #[test]
    fn zero_step_never_releases() {
        let mut clock = FixedTimestep::new(Duration::ZERO);
        assert_eq!(clock.accumulate(Duration::from_secs(1)), 0);
    }

    #[test]
    fn reset_clears_pending() {
        let mut clock = FixedTimestep::new(Duration::from_millis(10));
        clock.accumulate(Duration::from_millis(7));
        clock.reset();
        assert_eq!(clock.pending(), Duration::ZERO);
        assert_eq!(clock.step(), Duration::from_millis(10));
    }

    #[test]
    fn max_steps_is_at_least_one() {
        let mut clock = FixedTimestep::new(Duration::from_millis(10)).with_max_steps_per_call(0);
        assert_eq!(clock.accumulate(Duration::from_millis(30)), 1);
    }
}
