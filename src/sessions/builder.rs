use std::sync::Arc;

use web_time::Duration;

use crate::frame_info::KeyframeState;
use crate::input_queue::prediction::{PredictionStrategy, RepeatLastInput};
use crate::network::messages::InputMessage;
use crate::sessions::config::{EngineConfig, VerificationMode};
use crate::sessions::rollback_engine::{
    InputBroadcastFn, LocalInputFn, RollbackEngine, StateBroadcastFn, StateHashBroadcastFn,
};
use crate::telemetry::ViolationObserver;
use crate::{Frame, Game, Keyframe, PlayerId, Role, RollbackError};

/// Builds a [`RollbackEngine`] for either side of the session.
///
/// A host needs a state broadcast callback; a client needs the keyframe it received
/// from the host. Both usually set a local input poll and an input broadcast callback.
///
/// ```
/// use keyframe_rollback::{EngineBuilder, EngineConfig, Game, PlayerId};
///
/// # #[derive(Default)]
/// # struct Pong { ball: i32 }
/// # impl Game for Pong {
/// #     type Input = i8;
/// #     type State = i32;
/// #     fn tick(&mut self, inputs: &[i8]) { self.ball += inputs.iter().map(|&i| i32::from(i)).sum::<i32>(); }
/// #     fn save_state(&self) -> i32 { self.ball }
/// #     fn load_state(&mut self, state: &i32) { self.ball = *state; }
/// # }
/// let host = EngineBuilder::<Pong>::new()
///     .with_config(EngineConfig::lan())
///     .with_local_input(|_frame| Some(1))
///     .with_input_broadcast(|msg| {
///         let _ = msg; // hand to the transport
///     })
///     .with_state_broadcast(|keyframe| {
///         let _ = keyframe; // hand to the transport
///     })
///     .start_host(Pong::default(), PlayerId::new(0), None)
///     .unwrap();
///
/// let client = EngineBuilder::<Pong>::new()
///     .start_client(Pong::default(), PlayerId::new(0), Some(host.history().head().to_keyframe()))
///     .unwrap();
/// assert_eq!(client.current_frame(), host.current_frame());
/// ```
#[must_use = "EngineBuilder must be consumed by calling start_host or start_client"]
pub struct EngineBuilder<G: Game, P = RepeatLastInput> {
    pub(crate) config: EngineConfig,
    pub(crate) prediction: P,
    pub(crate) local_input: Option<LocalInputFn<G::Input>>,
    pub(crate) input_broadcast: Option<InputBroadcastFn<G::Input>>,
    pub(crate) state_broadcast: Option<StateBroadcastFn<G::Input, G::State>>,
    pub(crate) state_hash_broadcast: Option<StateHashBroadcastFn>,
    pub(crate) violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<G: Game, P: std::fmt::Debug> std::fmt::Debug for EngineBuilder<G, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            config,
            prediction,
            local_input,
            input_broadcast,
            state_broadcast,
            state_hash_broadcast,
            violation_observer,
        } = self;

        f.debug_struct("EngineBuilder")
            .field("config", config)
            .field("prediction", prediction)
            .field("has_local_input", &local_input.is_some())
            .field("has_input_broadcast", &input_broadcast.is_some())
            .field("has_state_broadcast", &state_broadcast.is_some())
            .field("has_state_hash_broadcast", &state_hash_broadcast.is_some())
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl<G: Game> Default for EngineBuilder<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Game> EngineBuilder<G> {
    /// Creates a builder with [`EngineConfig::default`] and [`RepeatLastInput`] prediction.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            prediction: RepeatLastInput,
            local_input: None,
            input_broadcast: None,
            state_broadcast: None,
            state_hash_broadcast: None,
            violation_observer: None,
        }
    }
}

impl<G: Game, P> EngineBuilder<G, P> {
    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how many frames may pile up past the confirmed frontier before `update` stalls.
    pub fn with_max_predicted_frames(mut self, frames: usize) -> Self {
        self.config.max_predicted_frames = frames;
        self
    }

    /// Sets the fixed duration of one frame.
    pub fn with_timestep(mut self, timestep: Duration) -> Self {
        self.config.timestep = timestep;
        self
    }

    /// Sets the runtime verification mode.
    pub fn with_verification(mut self, mode: VerificationMode) -> Self {
        self.config.verification = mode;
        self
    }

    /// Replaces the prediction strategy.
    pub fn with_prediction_strategy<Q>(self, prediction: Q) -> EngineBuilder<G, Q>
    where
        Q: PredictionStrategy<G::Input>,
    {
        EngineBuilder {
            config: self.config,
            prediction,
            local_input: self.local_input,
            input_broadcast: self.input_broadcast,
            state_broadcast: self.state_broadcast,
            state_hash_broadcast: self.state_hash_broadcast,
            violation_observer: self.violation_observer,
        }
    }

    /// Sets the function polled once per tick for the local player's input.
    ///
    /// Returning `None` repeats the previous local input (through the prediction
    /// strategy) and sends nothing to peers for that frame.
    pub fn with_local_input<F>(mut self, poll: F) -> Self
    where
        F: FnMut(Frame) -> Option<G::Input> + Send + 'static,
    {
        self.local_input = Some(Box::new(poll));
        self
    }

    /// Sets the callback that sends each polled local input to every peer.
    pub fn with_input_broadcast<F>(mut self, broadcast: F) -> Self
    where
        F: FnMut(&InputMessage<G::Input>) + Send + 'static,
    {
        self.input_broadcast = Some(Box::new(broadcast));
        self
    }

    /// Sets the callback that sends keyframes to every client. Required on hosts.
    pub fn with_state_broadcast<F>(mut self, broadcast: F) -> Self
    where
        F: FnMut(&KeyframeState<G::Input, G::State>) + Send + 'static,
    {
        self.state_broadcast = Some(Box::new(broadcast));
        self
    }

    /// Sets the callback that sends the checksum of every frame a host confirms, so
    /// clients can validate frames between keyframes. Optional; ignored on clients.
    ///
    /// Send each call as a [`Message::StateHash`](crate::Message::StateHash).
    pub fn with_state_hash_broadcast<F>(mut self, broadcast: F) -> Self
    where
        F: FnMut(Frame, u128) + Send + 'static,
    {
        self.state_hash_broadcast = Some(Box::new(broadcast));
        self
    }

    /// Routes violations to `observer` instead of `tracing`.
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }
}

impl<G: Game, P: PredictionStrategy<G::Input>> EngineBuilder<G, P> {
    /// Starts the authoritative side of the session.
    ///
    /// Without `keyframe`, the host starts from `game`'s current state at frame 0 with a
    /// default input for every id up to `local`.
    ///
    /// # Errors
    ///
    /// - [`RollbackError::MissingStateBroadcast`] if no state broadcast callback was set.
    /// - [`RollbackError::InvalidConfig`] if the configuration does not validate.
    /// - [`RollbackError::InvalidRequest`] if `keyframe` has no input slot for `local`.
    pub fn start_host(
        self,
        game: G,
        local: PlayerId,
        keyframe: Option<Keyframe<G>>,
    ) -> Result<RollbackEngine<G, P>, RollbackError> {
        self.config.validate()?;
        if self.state_broadcast.is_none() {
            return Err(RollbackError::MissingStateBroadcast);
        }
        let keyframe = keyframe.unwrap_or_else(|| KeyframeState {
            frame: Frame::new(0),
            state: game.save_state(),
            player_inputs: vec![G::Input::default(); local.as_usize() + 1],
        });
        RollbackEngine::new(Role::Host, game, local, keyframe, self)
    }

    /// Starts a client from the keyframe the host sent it.
    ///
    /// `local` must be one of the keyframe's players: a client that was added with
    /// [`RollbackEngine::add_player`] on the host waits for the first keyframe that
    /// includes it.
    ///
    /// # Errors
    ///
    /// - [`RollbackError::MissingKeyframe`] if `keyframe` is `None`.
    /// - [`RollbackError::InvalidConfig`] if the configuration does not validate.
    /// - [`RollbackError::InvalidRequest`] if `keyframe` has no input slot for `local`.
    pub fn start_client(
        self,
        game: G,
        local: PlayerId,
        keyframe: Option<Keyframe<G>>,
    ) -> Result<RollbackEngine<G, P>, RollbackError> {
        self.config.validate()?;
        let Some(keyframe) = keyframe else {
            return Err(RollbackError::MissingKeyframe);
        };
        if self.state_broadcast.is_some() {
            tracing::debug!("state broadcast callback is ignored on clients");
        }
        RollbackEngine::new(Role::Client, game, local, keyframe, self)
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
    use crate::sessions::config::MAX_FRAME;
    use crate::BlankPrediction;

    #[derive(Default)]
    struct Sum(i64);

    impl Game for Sum {
        type Input = i8;
        type State = i64;

        fn tick(&mut self, inputs: &[i8]) {
            self.0 += inputs.iter().map(|&i| i64::from(i)).sum::<i64>();
        }

        fn save_state(&self) -> i64 {
            self.0
        }

        fn load_state(&mut self, state: &i64) {
            self.0 = *state;
        }
    }

    fn keyframe(players: usize) -> Keyframe<Sum> {
        KeyframeState {
            frame: Frame::new(10),
            state: 55,
            player_inputs: vec![0; players],
        }
    }

    #[test]
    fn host_requires_state_broadcast() {
        let result = EngineBuilder::<Sum>::new().start_host(Sum::default(), PlayerId::new(0), None);
        assert!(matches!(result, Err(RollbackError::MissingStateBroadcast)));
    }

    #[test]
    fn client_requires_keyframe() {
        let result = EngineBuilder::<Sum>::new().start_client(Sum::default(), PlayerId::new(1), None);
        assert!(matches!(result, Err(RollbackError::MissingKeyframe)));
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let result = EngineBuilder::<Sum>::new()
            .with_max_predicted_frames(0)
            .with_state_broadcast(|_| {})
            .start_host(Sum::default(), PlayerId::new(0), None);
        assert!(matches!(result, Err(RollbackError::InvalidConfig { .. })));
    }

    #[test]
    fn host_without_keyframe_starts_at_zero() {
        let host = EngineBuilder::<Sum>::new()
            .with_state_broadcast(|_| {})
            .start_host(Sum(7), PlayerId::new(1), None)
            .unwrap();
        assert_eq!(host.current_frame(), Frame::new(0));
        assert_eq!(host.num_players(), 2);
        assert_eq!(host.history().head().state, 7);
        assert_eq!(host.role(), Role::Host);
    }

    #[test]
    fn client_adopts_keyframe() {
        let client = EngineBuilder::<Sum>::new()
            .start_client(Sum::default(), PlayerId::new(1), Some(keyframe(2)))
            .unwrap();
        assert_eq!(client.current_frame(), Frame::new(10));
        assert_eq!(client.game().0, 55);
        assert_eq!(client.role(), Role::Client);
    }

    #[test]
    fn client_must_be_in_keyframe() {
        let result = EngineBuilder::<Sum>::new().start_client(
            Sum::default(),
            PlayerId::new(2),
            Some(keyframe(2)),
        );
        assert!(matches!(result, Err(RollbackError::InvalidRequest { .. })));
    }

    #[test]
    fn setters_reach_the_config() {
        let builder = EngineBuilder::<Sum>::new()
            .with_max_predicted_frames(3)
            .with_timestep(Duration::from_millis(20))
            .with_verification(VerificationMode::Checked)
            .with_prediction_strategy(BlankPrediction);
        assert_eq!(builder.config.max_predicted_frames, 3);
        assert_eq!(builder.config.timestep, Duration::from_millis(20));
        assert!(builder.config.verification.is_checked());
        let debug = format!("{:?}", builder);
        assert!(debug.contains("BlankPrediction"));
        assert!(debug.contains("has_state_broadcast: false"));
        assert!(debug.contains("has_state_hash_broadcast: false"));
    }

    #[test]
    fn keyframe_past_the_last_frame_is_rejected() {
        let mut late = keyframe(2);
        late.frame = Frame::new(i32::MAX);
        let result =
            EngineBuilder::<Sum>::new().start_client(Sum::default(), PlayerId::new(1), Some(late));
        assert!(matches!(result, Err(RollbackError::InvalidFrame { .. })));

        let mut negative = keyframe(2);
        negative.frame = Frame::new(-3);
        let result = EngineBuilder::<Sum>::new()
            .with_state_broadcast(|_| {})
            .start_host(Sum::default(), PlayerId::new(0), Some(negative));
        assert!(matches!(result, Err(RollbackError::InvalidFrame { .. })));
    }

    #[test]
    fn client_at_the_last_frame_stops_with_an_error() {
        let mut last = keyframe(2);
        last.frame = Frame::new(MAX_FRAME);
        let mut client = EngineBuilder::<Sum>::new()
            .start_client(Sum::default(), PlayerId::new(1), Some(last))
            .unwrap();
        assert!(matches!(
            client.update(),
            Err(RollbackError::InvalidFrame { .. })
        ));
        assert_eq!(client.current_frame(), Frame::new(MAX_FRAME));
    }
}
