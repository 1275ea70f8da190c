use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};
use web_time::Duration;

use crate::checksum::compute_checksum;
use crate::frame_info::{KeyframeState, PlayerInput};
use crate::history::{History, HistoryEntry};
use crate::input_queue::prediction::{PredictionStrategy, RepeatLastInput};
use crate::input_queue::FutureInputQueue;
use crate::network::messages::{InputMessage, Message};
use crate::network::network_stats::{NetworkStats, PingTracker};
use crate::report_violation_to;
use crate::sessions::builder::EngineBuilder;
use crate::sessions::config::{EngineConfig, MAX_FRAME, MAX_PREDICTION_WINDOW};
use crate::sessions::event_drain::EventDrain;
use crate::sessions::player_registry::PlayerRegistry;
use crate::sessions::sync_health::SyncHealth;
use crate::telemetry::{
    InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::timestep::FixedTimestep;
use crate::{
    Frame, Game, InputStatus, InputVec, Keyframe, PlayerId, PlayerType, Role, RollbackError,
    RollbackEvent, RollbackResult,
};

/// Polls the local player's input for a frame.
pub(crate) type LocalInputFn<I> = Box<dyn FnMut(Frame) -> Option<I> + Send>;
/// Sends a local input to every peer.
pub(crate) type InputBroadcastFn<I> = Box<dyn FnMut(&InputMessage<I>) + Send>;
/// Sends a keyframe to every client.
pub(crate) type StateBroadcastFn<I, S> = Box<dyn FnMut(&KeyframeState<I, S>) + Send>;
/// Sends the checksum of a confirmed frame to every client.
pub(crate) type StateHashBroadcastFn = Box<dyn FnMut(Frame, u128) + Send>;

/// Rejects keyframe frames the engine cannot simulate from.
fn check_keyframe_frame(frame: Frame) -> RollbackResult<()> {
    if !frame.is_valid() || frame > MAX_FRAME {
        return Err(RollbackError::InvalidFrame {
            frame,
            reason: format!("a keyframe must belong to a frame in 0..={}", MAX_FRAME),
        });
    }
    Ok(())
}

/// The rollback engine of one peer.
///
/// Owns the game, the history from the confirmed frontier to the newest simulated frame,
/// and every remote player's queue of early inputs. Hosts and clients share all of it;
/// they only differ in how [`flush_history_keyframes`](Self::flush_history_keyframes)
/// trims the history.
///
/// Created through [`EngineBuilder::start_host`] or [`EngineBuilder::start_client`].
pub struct RollbackEngine<G: Game, P = RepeatLastInput> {
    role: Role,
    game: G,
    config: EngineConfig,
    local_player: PlayerId,
    players: PlayerRegistry<G::Input>,
    history: History<G::Input, G::State>,
    prediction: P,
    local_input: Option<LocalInputFn<G::Input>>,
    input_broadcast: Option<InputBroadcastFn<G::Input>>,
    state_broadcast: Option<StateBroadcastFn<G::Input, G::State>>,
    state_hash_broadcast: Option<StateHashBroadcastFn>,
    last_broadcast_keyframe: Frame,
    /// Players in the last keyframe a host broadcast, i.e. the roster clients know.
    broadcast_players: usize,
    /// Host checksums for frames not simulated yet (clients only).
    pending_host_checksums: BTreeMap<Frame, u128>,
    sync_health: SyncHealth,
    events: VecDeque<RollbackEvent>,
    timestep: FixedTimestep,
    ping: PingTracker,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<G: Game, P: std::fmt::Debug> std::fmt::Debug for RollbackEngine<G, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine")
            .field("role", &self.role)
            .field("local_player", &self.local_player)
            .field("players", &self.players)
            .field("confirmed_frame", &self.history.head().frame)
            .field("current_frame", &self.history.tail().frame)
            .field("last_broadcast_keyframe", &self.last_broadcast_keyframe)
            .field("sync_health", &self.sync_health)
            .field("prediction", &self.prediction)
            .field("config", &self.config)
            .field("queued_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl<G: Game, P: PredictionStrategy<G::Input>> RollbackEngine<G, P> {
    pub(crate) fn new(
        role: Role,
        mut game: G,
        local_player: PlayerId,
        keyframe: Keyframe<G>,
        builder: EngineBuilder<G, P>,
    ) -> Result<Self, RollbackError> {
        check_keyframe_frame(keyframe.frame)?;
        let broadcast_players = keyframe.player_inputs.len();
        let players = PlayerRegistry::with_players(
            keyframe.player_inputs.len(),
            local_player,
            keyframe.frame,
        )?;
        let host_checksum = match role {
            Role::Host => None,
            Role::Client => Some(keyframe.checksum()?),
        };

        game.load_state(&keyframe.state);
        let mut frontier = HistoryEntry::from(keyframe);
        frontier.host_checksum = host_checksum;

        let EngineBuilder {
            config,
            prediction,
            local_input,
            input_broadcast,
            state_broadcast,
            state_hash_broadcast,
            violation_observer,
        } = builder;

        debug!(
            ?role,
            local = %local_player,
            frame = %frontier.frame,
            players = players.len(),
            "rollback engine started"
        );

        let engine = Self {
            role,
            game,
            config,
            local_player,
            players,
            history: History::new(frontier),
            prediction,
            local_input,
            input_broadcast,
            state_broadcast,
            state_hash_broadcast,
            last_broadcast_keyframe: Frame::NULL,
            broadcast_players,
            pending_host_checksums: BTreeMap::new(),
            sync_health: match role {
                Role::Host => SyncHealth::InSync,
                Role::Client => SyncHealth::Pending,
            },
            events: VecDeque::new(),
            timestep: FixedTimestep::new(config.timestep),
            ping: PingTracker::new(),
            violation_observer,
        };
        engine.check_invariants_after("start");
        Ok(engine)
    }

    /// Runs one fixed-timestep cycle and returns how many frames were simulated.
    ///
    /// Nothing is simulated while [`should_stall`](Self::should_stall) holds. Otherwise
    /// one frame is ticked, and a second one if remote input is already queued for
    /// frames this peer has not reached (see [`EngineConfig::catch_up`]).
    pub fn update(&mut self) -> RollbackResult<usize> {
        if self.should_stall() {
            trace!(
                unconfirmed = self.history.len(),
                "waiting for remote input before predicting further"
            );
            return Ok(0);
        }
        self.tick()?;
        let mut advanced = 1;
        if self.config.catch_up && self.players.any_queued() && !self.should_stall() {
            self.tick()?;
            advanced += 1;
        }
        Ok(advanced)
    }

    /// Feeds `elapsed` wall time into the fixed timestep and calls
    /// [`update`](Self::update) once per due step. Returns the frames simulated.
    pub fn advance(&mut self, elapsed: Duration) -> RollbackResult<usize> {
        let steps = self.timestep.accumulate(elapsed);
        let mut advanced = 0;
        for _ in 0..steps {
            advanced += self.update()?;
        }
        Ok(advanced)
    }

    /// Returns `true` when the history holds more than `max_predicted_frames` entries.
    #[must_use]
    pub fn should_stall(&self) -> bool {
        self.history.len() > self.config.max_predicted_frames
    }

    /// Simulates the frame after the tail.
    fn tick(&mut self) -> RollbackResult<()> {
        let tail = self.history.tail().frame;
        if tail >= MAX_FRAME {
            return Err(RollbackError::InvalidFrame {
                frame: tail,
                reason: "frame counter exhausted".to_owned(),
            });
        }
        let frame = tail + 1;
        let roster: InputVec<(PlayerId, PlayerType)> = self.players.iter().collect();
        let mut inputs: InputVec<PlayerInput<G::Input>> = InputVec::with_capacity(roster.len());
        let mut polled = None;

        for (id, kind) in roster {
            let previous = self
                .history
                .tail()
                .input(id)
                .map(|slot| slot.input.clone())
                .unwrap_or_default();
            let slot = match kind {
                PlayerType::Local => match self.local_input.as_mut().and_then(|poll| poll(frame)) {
                    Some(input) => {
                        polled = Some(input.clone());
                        PlayerInput::confirmed(input)
                    },
                    None => PlayerInput::confirmed(self.prediction.predict_next(&previous, frame, id)),
                },
                PlayerType::Remote => {
                    match self.players.queue_mut(id).and_then(|queue| queue.take_for(frame)) {
                        Some(input) => PlayerInput::confirmed(input),
                        None => {
                            PlayerInput::predicted(self.prediction.predict_next(&previous, frame, id))
                        },
                    }
                },
            };
            inputs.push(slot);
        }

        let values: InputVec<G::Input> = inputs.iter().map(|slot| slot.input.clone()).collect();
        self.game.tick(&values);
        let state = self.game.save_state();
        if self.config.verification.is_checked() {
            self.verify_tick(frame, &values, &state)?;
        }

        let mut entry = HistoryEntry::new(frame, state, inputs);
        entry.host_checksum = self.pending_host_checksums.remove(&frame);
        self.history.push_back(entry);

        self.flush_history_keyframes()?;
        if let Some(input) = polled {
            self.broadcast_input(frame, input);
        }
        self.check_invariants_after("tick");
        Ok(())
    }

    /// Replays the tick just run from the previous saved state and compares checksums.
    /// Leaves the game at `state`.
    fn verify_tick(
        &mut self,
        frame: Frame,
        inputs: &[G::Input],
        state: &G::State,
    ) -> RollbackResult<()> {
        let first = compute_checksum(state)?;
        self.game.load_state(&self.history.tail().state);
        self.game.tick(inputs);
        let replayed = compute_checksum(&self.game.save_state())?;
        if replayed != first {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Error,
                ViolationKind::Determinism,
                frame = frame,
                "replaying frame {} produced checksum {:#x}, first run produced {:#x}",
                frame,
                replayed,
                first
            );
        }
        self.game.load_state(state);
        Ok(())
    }

    fn broadcast_input(&mut self, frame: Frame, input: G::Input) {
        let Some(broadcast) = self.input_broadcast.as_mut() else {
            return;
        };
        let message = InputMessage {
            frame,
            player_id: self.local_player,
            input,
            frame_sync: self.history.head().frame,
        };
        broadcast(&message);
    }

    /// Registers a new remote player and returns its id.
    ///
    /// The player's first input, a default one, is queued for the frame after the tail,
    /// so the player takes part from the next tick on. Inputs the player sends for frames
    /// up to and including that one are ignored as stale.
    pub fn add_player(&mut self) -> PlayerId {
        let id = self.players.next_id();
        let tail = self.history.tail().frame;
        self.players.add_remote(id, tail);
        if let Some(queue) = self.players.queue_mut(id) {
            queue.enqueue(tail + 1, G::Input::default());
        }
        debug!(player = %id, first_frame = %(tail + 1), "player joined");
        self.push_event(RollbackEvent::PlayerJoined {
            player: id,
            first_frame: tail + 1,
        });
        self.check_invariants_after("add_player");
        id
    }

    /// Handles a remote player's input for `frame`.
    ///
    /// - Stale or duplicate frames are dropped.
    /// - Frames beyond the tail are queued until `tick` reaches them.
    /// - Frames inside the history replace the prediction and resimulate every later
    ///   frame, unless the prediction was right.
    ///
    /// # Errors
    ///
    /// - [`RollbackError::UnknownPlayer`] if `player` was never registered.
    /// - [`RollbackError::InvalidRequest`] if `player` is local to this peer.
    /// - [`RollbackError::InvalidFrame`] if `frame` is negative or more than
    ///   [`MAX_PREDICTION_WINDOW`] frames beyond the tail.
    pub fn on_remote_input(
        &mut self,
        frame: Frame,
        player: PlayerId,
        input: G::Input,
    ) -> RollbackResult<()> {
        match self.players.player_type(player) {
            None => return Err(RollbackError::UnknownPlayer { player }),
            Some(PlayerType::Local) => {
                return Err(RollbackError::InvalidRequest {
                    info: format!("player {} is local to this peer", player),
                });
            },
            Some(PlayerType::Remote) => {},
        }
        if !frame.is_valid() {
            return Err(RollbackError::InvalidFrame {
                frame,
                reason: "input frames are non-negative".to_owned(),
            });
        }

        let tail = self.history.tail().frame;
        if frame > tail + MAX_PREDICTION_WINDOW as i32 {
            return Err(RollbackError::InvalidFrame {
                frame,
                reason: format!(
                    "more than {} frames ahead of the newest simulated frame {}",
                    MAX_PREDICTION_WINDOW, tail
                ),
            });
        }
        let Some(queue) = self.players.queue_mut(player) else {
            return Err(self.internal_error(
                frame,
                format!("remote player {} has no input queue", player),
            ));
        };
        if queue.is_stale(frame) {
            trace!(
                %frame,
                %player,
                last_received = %queue.last_received(),
                "dropping stale input"
            );
            return Ok(());
        }
        if frame > tail {
            queue.enqueue(frame, input);
            return Ok(());
        }
        queue.advance_last_received(frame);

        let Some(index) = self.history.index_of(frame) else {
            return Ok(());
        };
        if index == 0 {
            return Ok(());
        }
        let Some(slot) = self.history.get(index).and_then(|entry| entry.input(player)) else {
            return Err(RollbackError::InvalidFrame {
                frame,
                reason: format!("player {} has no input slot in this frame", player),
            });
        };
        if !slot.is_predicted() {
            return Ok(());
        }
        let hit = slot.input == input;

        if hit && !self.config.verification.is_checked() {
            trace!(%frame, %player, "prediction confirmed");
            if let Some(slot) = self
                .history
                .get_mut(index)
                .and_then(|entry| entry.input_mut(player))
            {
                slot.status = InputStatus::Confirmed;
            }
        } else {
            self.rollback(index, player, input, hit)?;
        }

        self.flush_history_keyframes()?;
        self.check_invariants_after("on_remote_input");
        Ok(())
    }

    /// Replaces `player`'s input at `index` and resimulates from there to the tail.
    ///
    /// Later predicted inputs of `player` are regenerated from the corrected ones. With
    /// `expect_unchanged`, every resimulated state is compared with the one it replaces.
    fn rollback(
        &mut self,
        index: usize,
        player: PlayerId,
        input: G::Input,
        expect_unchanged: bool,
    ) -> RollbackResult<()> {
        let Some(previous) = self.history.get(index - 1) else {
            return Err(self.internal_error(
                self.history.head().frame,
                format!("no entry before rollback index {}", index),
            ));
        };
        self.game.load_state(&previous.state);

        let Some(entry) = self.history.get_mut(index) else {
            return Err(self.internal_error(
                self.history.head().frame,
                format!("no entry at rollback index {}", index),
            ));
        };
        let frame = entry.frame;
        if let Some(slot) = entry.input_mut(player) {
            *slot = PlayerInput::confirmed(input);
        }

        let depth = self.history.len() - index;
        for position in index..self.history.len() {
            if position > index {
                let previous_input = self
                    .history
                    .get(position - 1)
                    .and_then(|entry| entry.input(player))
                    .map(|slot| slot.input.clone());
                if let (Some(previous_input), Some(entry)) =
                    (previous_input, self.history.get_mut(position))
                {
                    let entry_frame = entry.frame;
                    if let Some(slot) = entry.input_mut(player).filter(|slot| slot.is_predicted()) {
                        *slot = PlayerInput::predicted(self.prediction.predict_next(
                            &previous_input,
                            entry_frame,
                            player,
                        ));
                    }
                }
            }

            let Some(entry) = self.history.get_mut(position) else {
                break;
            };
            self.game.tick(&entry.input_values());
            let state = self.game.save_state();
            if expect_unchanged {
                let before = compute_checksum(&entry.state)?;
                let after = compute_checksum(&state)?;
                if before != after {
                    report_violation_to!(
                        self.violation_observer,
                        ViolationSeverity::Error,
                        ViolationKind::Determinism,
                        frame = entry.frame,
                        "resimulating frame {} with unchanged inputs changed its checksum from {:#x} to {:#x}",
                        entry.frame,
                        before,
                        after
                    );
                }
            }
            entry.state = state;
        }

        debug!(%frame, %player, depth, "rolled back");
        self.push_event(RollbackEvent::Rollback { frame, depth });
        Ok(())
    }

    /// Adopts a keyframe from the host as the new confirmed frontier.
    ///
    /// History older than the keyframe is dropped, the frontier is replaced and every
    /// later entry is resimulated on top of it with its recorded inputs. Player ids the
    /// keyframe introduces are registered as remote players.
    ///
    /// Keyframes older than the frontier are ignored. A keyframe that disagrees with a
    /// frame this client already confirmed is a desync: it is not applied, and neither is
    /// any keyframe after it.
    ///
    /// # Errors
    ///
    /// - [`RollbackError::InvalidRequest`] on a host.
    /// - [`RollbackError::InvalidFrame`] if the keyframe's frame is negative or past
    ///   [`MAX_FRAME`].
    /// - [`RollbackError::Serialization`] if the keyframe state cannot be hashed.
    pub fn on_state_sync(&mut self, keyframe: Keyframe<G>) -> RollbackResult<()> {
        if self.role == Role::Host {
            return Err(RollbackError::InvalidRequest {
                info: "hosts do not accept keyframes".to_owned(),
            });
        }
        check_keyframe_frame(keyframe.frame)?;
        let frame = keyframe.frame;
        if self.sync_health.is_desynced() {
            trace!(%frame, "desynced, ignoring keyframe");
            return Ok(());
        }
        if frame < self.history.head().frame {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Keyframe,
                frame = frame,
                "ignoring keyframe {} older than the frontier {}",
                frame,
                self.history.head().frame
            );
            return Ok(());
        }

        let host_checksum = keyframe.checksum()?;
        let known_players = keyframe.player_inputs.len();
        // entries missing a player the host already had were simulated with other inputs
        if let Some(local) = self.history.entry(frame).filter(|entry| {
            entry.is_fully_confirmed() && entry.inputs.len() == known_players
        }) {
            let local_checksum = compute_checksum(&local.state)?;
            if local_checksum != host_checksum {
                self.declare_desync(frame, local_checksum, host_checksum);
                return Ok(());
            }
        }

        for id in (self.players.len()..known_players).map(PlayerId::new) {
            self.players.add_remote(id, frame);
            debug!(player = %id, %frame, "player joined through keyframe");
            self.push_event(RollbackEvent::PlayerJoined {
                player: id,
                first_frame: frame,
            });
        }
        for queue in self.players.queues_mut() {
            queue.advance_last_received(frame);
            queue.discard_through(frame);
        }
        self.pending_host_checksums.retain(|pending, _| *pending > frame);

        self.history.drop_before(frame);
        self.game.load_state(&keyframe.state);
        let mut frontier = HistoryEntry::from(keyframe);
        frontier.host_checksum = Some(host_checksum);
        *self.history.head_mut() = frontier;

        let resimulated = self.resimulate_from_frontier(known_players);
        debug!(%frame, resimulated, "applied keyframe");
        self.push_event(RollbackEvent::KeyframeApplied { frame, resimulated });
        self.check_invariants_after("on_state_sync");
        Ok(())
    }

    /// Resimulates every entry after the frontier, giving players unknown to an entry a
    /// predicted input. The game must hold the frontier state. Returns the entries
    /// resimulated.
    fn resimulate_from_frontier(&mut self, known_players: usize) -> usize {
        for index in 1..self.history.len() {
            let previous = self
                .history
                .get(index - 1)
                .map(HistoryEntry::input_values)
                .unwrap_or_default();
            let Some(entry) = self.history.get_mut(index) else {
                break;
            };
            let entry_frame = entry.frame;
            while entry.inputs.len() < known_players {
                let id = PlayerId::new(entry.inputs.len());
                let last = previous.get(id.as_usize()).cloned().unwrap_or_default();
                entry.inputs.push(PlayerInput::predicted(self.prediction.predict_next(
                    &last,
                    entry_frame,
                    id,
                )));
            }
            self.game.tick(&entry.input_values());
            entry.state = self.game.save_state();
        }
        self.history.len() - 1
    }

    /// Attaches the host's checksum for `frame` to the matching entry.
    ///
    /// Checksums for frames beyond the tail are kept until `tick` creates the entry.
    /// Game state is never touched; the comparison happens in the next flush.
    ///
    /// # Errors
    ///
    /// [`RollbackError::InvalidRequest`] on a host.
    pub fn on_state_sync_hash(&mut self, frame: Frame, checksum: u128) -> RollbackResult<()> {
        if self.role == Role::Host {
            return Err(RollbackError::InvalidRequest {
                info: "hosts do not accept keyframe checksums".to_owned(),
            });
        }
        if let Some(entry) = self.history.entry_mut(frame) {
            entry.host_checksum = Some(checksum);
        } else if frame > self.history.tail().frame {
            self.pending_host_checksums.insert(frame, checksum);
            while self.pending_host_checksums.len() > MAX_PREDICTION_WINDOW {
                self.pending_host_checksums.pop_first();
            }
        } else {
            trace!(%frame, "ignoring checksum for a frame behind the frontier");
        }
        Ok(())
    }

    /// Trims the history from the head.
    ///
    /// A host moves its frontier to the newest fully confirmed frame and broadcasts it
    /// as a keyframe. A client drops its frontier while the frontier and the entry after
    /// it are fully confirmed and the frontier's state matches the checksum the host sent
    /// for it. A mismatch is a desync: the flush stops and never trims again.
    ///
    /// Called by every operation that can confirm a frame; calling it directly is only
    /// useful after changing nothing else.
    pub fn flush_history_keyframes(&mut self) -> RollbackResult<()> {
        match self.role {
            Role::Host => self.flush_host(),
            Role::Client => self.flush_client(),
        }
    }

    fn flush_host(&mut self) -> RollbackResult<()> {
        let Some(index) = self.history.newest_confirmed_index() else {
            return Ok(());
        };
        let Some(frame) = self.history.get(index).map(|entry| entry.frame) else {
            return Ok(());
        };
        if frame <= self.last_broadcast_keyframe {
            return Ok(());
        }

        // Clients only know the roster of the last keyframe; frames simulated with a
        // player they have not heard of yet would hash differently on their side.
        if let Some(broadcast) = self.state_hash_broadcast.as_mut() {
            for entry in self.history.iter().take(index + 1).skip(1) {
                if entry.is_fully_confirmed() && entry.inputs.len() == self.broadcast_players {
                    broadcast(entry.frame, compute_checksum(&entry.state)?);
                }
            }
        }

        self.history.drop_front(index);
        self.last_broadcast_keyframe = frame;
        let keyframe = self.history.head().to_keyframe();
        self.broadcast_players = keyframe.player_inputs.len();
        if let Some(broadcast) = self.state_broadcast.as_mut() {
            broadcast(&keyframe);
        }
        debug!(%frame, dropped = index, "broadcast keyframe");
        self.push_event(RollbackEvent::KeyframeBroadcast { frame });
        Ok(())
    }

    fn flush_client(&mut self) -> RollbackResult<()> {
        if self.sync_health.is_desynced() {
            return Ok(());
        }
        loop {
            let head = self.history.head();
            let Some(next) = self.history.get(1) else {
                break;
            };
            if !head.is_fully_confirmed() || !next.is_fully_confirmed() {
                break;
            }
            let Some(remote_checksum) = head.host_checksum else {
                break;
            };
            let local_checksum = compute_checksum(&head.state)?;
            let frame = head.frame;

            if local_checksum != remote_checksum {
                self.declare_desync(frame, local_checksum, remote_checksum);
                break;
            }

            self.sync_health = SyncHealth::InSync;
            self.history.pop_front();
        }
        let frontier = self.history.head().frame;
        self.pending_host_checksums
            .retain(|pending, _| *pending > frontier);
        Ok(())
    }

    /// Stops trimming for good and tells the application why.
    fn declare_desync(&mut self, frame: Frame, local_checksum: u128, remote_checksum: u128) {
        self.sync_health = SyncHealth::DesyncDetected {
            frame,
            local_checksum,
            remote_checksum,
        };
        report_violation_to!(
            self.violation_observer,
            ViolationSeverity::Critical,
            ViolationKind::ChecksumMismatch,
            frame = frame,
            "desync at frame {}: local checksum {:#x}, host checksum {:#x}",
            frame,
            local_checksum,
            remote_checksum
        );
        self.push_event(RollbackEvent::DesyncDetected {
            frame,
            local_checksum,
            remote_checksum,
        });
    }

    /// Dispatches a decoded wire message. Returns the reply to send back, if any.
    ///
    /// # Errors
    ///
    /// Whatever the operation the message maps to returns.
    pub fn handle_message(
        &mut self,
        message: Message<G::Input, G::State>,
    ) -> RollbackResult<Option<Message<G::Input, G::State>>> {
        trace!(kind = message.kind(), "handling message");
        match message {
            Message::Input(InputMessage {
                frame,
                player_id,
                input,
                ..
            }) => self.on_remote_input(frame, player_id, input).map(|()| None),
            Message::State(keyframe) => self.on_state_sync(keyframe).map(|()| None),
            Message::StateHash { frame, checksum } => {
                self.on_state_sync_hash(frame, checksum).map(|()| None)
            },
            Message::Ping { nonce } => Ok(Some(Message::Pong { nonce })),
            Message::Pong { nonce } => {
                self.ping.on_pong(nonce);
                Ok(None)
            },
        }
    }

    /// Starts a latency measurement. Send the returned message to the peer.
    pub fn send_ping(&mut self) -> Message<G::Input, G::State> {
        Message::Ping {
            nonce: self.ping.send_ping(),
        }
    }
}

impl<G: Game, P> RollbackEngine<G, P> {
    /// Host or client.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The player whose input is polled on this peer.
    #[must_use]
    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }

    /// The newest simulated frame.
    #[must_use]
    pub fn current_frame(&self) -> Frame {
        self.history.tail().frame
    }

    /// The confirmed frontier.
    #[must_use]
    pub fn confirmed_frame(&self) -> Frame {
        self.history.head().frame
    }

    /// The frame of the last keyframe a host broadcast, or [`Frame::NULL`].
    #[must_use]
    pub fn last_broadcast_keyframe(&self) -> Frame {
        self.last_broadcast_keyframe
    }

    /// The history from the confirmed frontier to the newest simulated frame.
    #[must_use]
    pub fn history(&self) -> &History<G::Input, G::State> {
        &self.history
    }

    /// The game, holding the state of the newest simulated frame.
    #[must_use]
    pub fn game(&self) -> &G {
        &self.game
    }

    /// The configuration the engine was started with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Agreement with the host's checksums.
    #[must_use]
    pub fn sync_health(&self) -> SyncHealth {
        self.sync_health
    }

    /// Number of registered players.
    #[must_use]
    pub fn num_players(&self) -> usize {
        self.players.len()
    }

    /// Whether `player` is local or remote, or `None` if it is unknown.
    #[must_use]
    pub fn player_type(&self, player: PlayerId) -> Option<PlayerType> {
        self.players.player_type(player)
    }

    /// Removes and yields the queued events, oldest first.
    pub fn events(&mut self) -> EventDrain<'_> {
        EventDrain::from_drain(self.events.drain(..))
    }

    /// Latency and backlog figures.
    #[must_use]
    pub fn network_stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::new();
        self.ping.fill(&mut stats);
        stats.unconfirmed_frames = self.history.len() - 1;
        stats.queued_inputs = self
            .players
            .remote_ids()
            .filter_map(|id| self.players.queue(id))
            .map(FutureInputQueue::len)
            .sum();
        stats
    }

    fn internal_error(&self, frame: Frame, context: String) -> RollbackError {
        report_violation_to!(
            self.violation_observer,
            ViolationSeverity::Critical,
            ViolationKind::InternalError,
            frame = frame,
            "{}",
            context
        );
        RollbackError::InternalError { context }
    }

    fn push_event(&mut self, event: RollbackEvent) {
        self.events.push_back(event);
        while self.events.len() > self.config.event_queue_size {
            self.events.pop_front();
        }
    }

    fn check_invariants_after(&self, operation: &str) {
        if !cfg!(any(debug_assertions, feature = "paranoid"))
            && !self.config.verification.is_checked()
        {
            return;
        }
        if let Err(violation) = self.check_invariants() {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Critical,
                ViolationKind::Invariant,
                frame = self.history.tail().frame,
                "{} [after {}]",
                violation,
                operation
            );
        }
    }
}

impl<G: Game, P> InvariantChecker for RollbackEngine<G, P> {
    /// 1. history and registry invariants hold
    /// 2. the local player is registered as local
    /// 3. no entry records more players than are registered
    /// 4. host: the history spans exactly the last keyframe to the tail
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.history.check_invariants()?;
        self.players.check_invariants()?;

        if self.players.player_type(self.local_player) != Some(PlayerType::Local) {
            return Err(InvariantViolation::new(
                "RollbackEngine",
                "local player is not registered as local",
            )
            .with_details(format!("local_player={}", self.local_player)));
        }
        if let Some(entry) = self
            .history
            .iter()
            .find(|entry| entry.inputs.len() > self.players.len())
        {
            return Err(InvariantViolation::new(
                "RollbackEngine",
                "entry records more players than are registered",
            )
            .with_details(format!(
                "frame={}, inputs={}, players={}",
                entry.frame,
                entry.inputs.len(),
                self.players.len()
            )));
        }
        if self.role == Role::Host && self.last_broadcast_keyframe.is_valid() {
            let expected = self.history.tail().frame - self.last_broadcast_keyframe + 1;
            if self.history.len() as i32 != expected {
                return Err(InvariantViolation::new(
                    "RollbackEngine",
                    "host history does not start at the last keyframe",
                )
                .with_details(format!(
                    "len={}, tail={}, last_broadcast_keyframe={}",
                    self.history.len(),
                    self.history.tail().frame,
                    self.last_broadcast_keyframe
                )));
            }
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
    use crate::sessions::config::VerificationMode;
    use crate::telemetry::CollectingObserver;

    #[derive(Default)]
    struct Mix {
        total: i64,
    }

    impl Game for Mix {
        type Input = u8;
        type State = i64;

        fn tick(&mut self, inputs: &[u8]) {
            let frame_sum = inputs
                .iter()
                .enumerate()
                .map(|(id, input)| i64::from(*input) * (id as i64 + 1))
                .sum::<i64>();
            self.total = self.total.wrapping_mul(3).wrapping_add(frame_sum + 1);
        }

        fn save_state(&self) -> i64 {
            self.total
        }

        fn load_state(&mut self, state: &i64) {
            self.total = *state;
        }
    }

    /// Keeps a counter outside its saved state, so replays diverge.
    #[derive(Default)]
    struct Leaky {
        total: i64,
        hidden: i64,
    }

    impl Game for Leaky {
        type Input = u8;
        type State = i64;

        fn tick(&mut self, _inputs: &[u8]) {
            self.hidden += 1;
            self.total += self.hidden;
        }

        fn save_state(&self) -> i64 {
            self.total
        }

        fn load_state(&mut self, state: &i64) {
            self.total = *state;
        }
    }

    fn two_player_keyframe() -> Keyframe<Mix> {
        KeyframeState {
            frame: Frame::new(0),
            state: 0,
            player_inputs: vec![0, 0],
        }
    }

    fn host() -> RollbackEngine<Mix> {
        EngineBuilder::<Mix>::new()
            .with_verification(VerificationMode::Off)
            .with_local_input(|_| Some(1))
            .with_state_broadcast(|_| {})
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap()
    }

    fn client() -> RollbackEngine<Mix> {
        EngineBuilder::<Mix>::new()
            .with_verification(VerificationMode::Off)
            .with_local_input(|_| Some(2))
            .start_client(Mix::default(), PlayerId::new(1), Some(two_player_keyframe()))
            .unwrap()
    }

    #[test]
    fn tick_predicts_missing_remote_input() {
        let mut host = host();
        assert_eq!(host.update().unwrap(), 1);
        let tail = host.history().tail();
        assert_eq!(tail.frame, Frame::new(1));
        assert!(!tail.input(PlayerId::new(0)).unwrap().is_predicted());
        assert!(tail.input(PlayerId::new(1)).unwrap().is_predicted());
    }

    #[test]
    fn queued_input_is_consumed_and_triggers_catch_up() {
        let mut host = host();
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 7).unwrap();
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 7).unwrap();
        assert_eq!(host.network_stats().queued_inputs, 2);

        assert_eq!(host.update().unwrap(), 2);
        assert_eq!(host.current_frame(), Frame::new(2));
        assert_eq!(host.confirmed_frame(), Frame::new(2));
        assert_eq!(host.network_stats().queued_inputs, 0);
    }

    #[test]
    fn catch_up_can_be_disabled() {
        let mut host = EngineBuilder::<Mix>::new()
            .with_config(EngineConfig {
                catch_up: false,
                ..EngineConfig::default()
            })
            .with_state_broadcast(|_| {})
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 7).unwrap();
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 7).unwrap();
        assert_eq!(host.update().unwrap(), 1);
    }

    #[test]
    fn stale_input_is_dropped() {
        let mut host = host();
        host.update().unwrap();
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 3).unwrap();
        let state = host.game().total;
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 9).unwrap();
        host.on_remote_input(Frame::new(0), PlayerId::new(1), 9).unwrap();
        assert_eq!(host.game().total, state);
    }

    #[test]
    fn rejects_unknown_and_local_players() {
        let mut host = host();
        assert!(matches!(
            host.on_remote_input(Frame::new(1), PlayerId::new(5), 0),
            Err(RollbackError::UnknownPlayer { player }) if player == PlayerId::new(5)
        ));
        assert!(matches!(
            host.on_remote_input(Frame::new(1), PlayerId::new(0), 0),
            Err(RollbackError::InvalidRequest { .. })
        ));
        assert!(matches!(
            host.on_remote_input(Frame::new(-3), PlayerId::new(1), 0),
            Err(RollbackError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn hosts_reject_keyframes_and_checksums() {
        let mut host = host();
        assert!(matches!(
            host.on_state_sync(two_player_keyframe()),
            Err(RollbackError::InvalidRequest { .. })
        ));
        assert!(matches!(
            host.on_state_sync_hash(Frame::new(0), 1),
            Err(RollbackError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn prediction_hit_only_clears_flag() {
        let mut host = host();
        host.update().unwrap();
        host.update().unwrap();
        host.events().for_each(drop);
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 0).unwrap();
        assert!(!host
            .events()
            .any(|event| matches!(event, RollbackEvent::Rollback { .. })));
        assert_eq!(host.confirmed_frame(), Frame::new(1));
    }

    #[test]
    fn misprediction_rolls_back() {
        let mut host = host();
        for _ in 0..4 {
            host.update().unwrap();
        }
        host.events().for_each(drop);
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 4).unwrap();

        let events: Vec<_> = host.events().collect();
        assert!(events.contains(&RollbackEvent::Rollback {
            frame: Frame::new(2),
            depth: 3,
        }));
        let repredicted = host.history().entry(Frame::new(4)).unwrap();
        assert_eq!(repredicted.input(PlayerId::new(1)).unwrap().input, 4);
        assert!(repredicted.input(PlayerId::new(1)).unwrap().is_predicted());
        assert_eq!(host.game().total, host.history().tail().state);
    }

    #[test]
    fn host_broadcasts_newest_confirmed_frame() {
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let mut host = EngineBuilder::<Mix>::new()
            .with_state_broadcast(move |keyframe| sink.lock().push(keyframe.frame))
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        for _ in 0..3 {
            host.update().unwrap();
        }
        assert_eq!(*sent.lock(), vec![Frame::new(0)]);
        assert_eq!(host.last_broadcast_keyframe(), Frame::new(0));

        host.on_remote_input(Frame::new(1), PlayerId::new(1), 0).unwrap();
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 0).unwrap();
        assert_eq!(*sent.lock(), vec![Frame::new(0), Frame::new(1), Frame::new(2)]);
        assert_eq!(host.history().len(), 2);
        assert!(host.check_invariants().is_ok());
    }

    #[test]
    fn local_input_is_broadcast_with_frontier() {
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let mut host = EngineBuilder::<Mix>::new()
            .with_local_input(|frame| (frame.as_i32() != 2).then_some(5))
            .with_input_broadcast(move |msg| sink.lock().push(msg.clone()))
            .with_state_broadcast(|_| {})
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        for _ in 0..3 {
            host.update().unwrap();
        }
        let sent = sent.lock();
        let frames: Vec<_> = sent.iter().map(|msg| msg.frame).collect();
        assert_eq!(frames, vec![Frame::new(1), Frame::new(3)]);
        assert!(sent.iter().all(|msg| msg.player_id == PlayerId::new(0)));
        assert_eq!(sent[0].frame_sync, Frame::new(0));

        // the missing poll repeats the previous input without predicting it
        let skipped = host.history().entry(Frame::new(2)).unwrap();
        let local = skipped.input(PlayerId::new(0)).unwrap();
        assert_eq!(local.input, 5);
        assert!(!local.is_predicted());
    }

    #[test]
    fn update_stalls_at_prediction_window() {
        let mut host = EngineBuilder::<Mix>::new()
            .with_max_predicted_frames(3)
            .with_state_broadcast(|_| {})
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        let advanced: usize = (0..10).map(|_| host.update().unwrap()).sum();
        assert_eq!(advanced, 3);
        assert!(host.should_stall());
        assert_eq!(host.history().len(), 4);
        assert_eq!(host.update().unwrap(), 0);
    }

    #[test]
    fn advance_runs_due_steps() {
        let mut host = host();
        let step = host.config().timestep;
        assert_eq!(host.advance(step * 3).unwrap(), 3);
        assert_eq!(host.advance(step / 2).unwrap(), 0);
        assert_eq!(host.current_frame(), Frame::new(3));
    }

    #[test]
    fn add_player_seeds_default_input() {
        let mut host = host();
        host.update().unwrap();
        let id = host.add_player();
        assert_eq!(id, PlayerId::new(2));
        assert_eq!(host.player_type(id), Some(PlayerType::Remote));
        assert!(host.events().any(|event| event
            == RollbackEvent::PlayerJoined {
                player: id,
                first_frame: Frame::new(2),
            }));

        host.update().unwrap();
        let entry = host.history().entry(Frame::new(2)).unwrap();
        assert_eq!(entry.inputs.len(), 3);
        assert!(!entry.input(id).unwrap().is_predicted());
        assert!(host.check_invariants().is_ok());
    }

    #[test]
    fn client_keyframe_registers_new_players() {
        let mut client = client();
        client.update().unwrap();
        let keyframe = KeyframeState {
            frame: Frame::new(1),
            state: 40,
            player_inputs: vec![0, 2, 0],
        };
        client.on_state_sync(keyframe).unwrap();
        assert_eq!(client.num_players(), 3);
        assert_eq!(client.player_type(PlayerId::new(2)), Some(PlayerType::Remote));

        client.update().unwrap();
        let entry = client.history().tail();
        assert_eq!(entry.inputs.len(), 3);
        assert!(entry.input(PlayerId::new(2)).unwrap().is_predicted());
    }

    #[test]
    fn old_keyframes_are_ignored() {
        let mut client = client();
        client.update().unwrap();
        client.on_remote_input(Frame::new(1), PlayerId::new(0), 0).unwrap();
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        client.events().for_each(drop);

        client.on_state_sync(two_player_keyframe()).unwrap();
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        assert_eq!(client.events().count(), 0);
    }

    #[test]
    fn client_flush_needs_checksum() {
        let mut client = client();
        client.update().unwrap();
        client.update().unwrap();
        client.on_remote_input(Frame::new(1), PlayerId::new(0), 0).unwrap();
        client.on_remote_input(Frame::new(2), PlayerId::new(0), 0).unwrap();
        // frame 0 carries the bootstrap checksum, frame 1 has none yet
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        assert_eq!(client.sync_health(), SyncHealth::InSync);

        let checksum = compute_checksum(&client.history().head().state).unwrap();
        client.on_state_sync_hash(Frame::new(1), checksum).unwrap();
        client.flush_history_keyframes().unwrap();
        assert_eq!(client.confirmed_frame(), Frame::new(2));
    }

    #[test]
    fn checksum_mismatch_is_terminal() {
        let observer = Arc::new(CollectingObserver::new());
        let mut client = EngineBuilder::<Mix>::new()
            .with_verification(VerificationMode::Off)
            .with_violation_observer(observer.clone())
            .start_client(Mix::default(), PlayerId::new(1), Some(two_player_keyframe()))
            .unwrap();
        client.on_state_sync_hash(Frame::new(1), 0xdead).unwrap();
        client.update().unwrap();
        client.update().unwrap();
        client.on_remote_input(Frame::new(1), PlayerId::new(0), 0).unwrap();
        client.on_remote_input(Frame::new(2), PlayerId::new(0), 0).unwrap();

        assert!(client.sync_health().is_desynced());
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        let desyncs = client
            .events()
            .filter(|event| matches!(event, RollbackEvent::DesyncDetected { .. }))
            .count();
        assert_eq!(desyncs, 1);
        assert!(observer.has_violation(ViolationKind::ChecksumMismatch));

        client.update().unwrap();
        client.on_remote_input(Frame::new(3), PlayerId::new(0), 0).unwrap();
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        assert_eq!(client.events().count(), 0);
    }

    #[test]
    fn conflicting_keyframe_is_a_terminal_desync() {
        let observer = Arc::new(CollectingObserver::new());
        let mut client = EngineBuilder::<Mix>::new()
            .with_verification(VerificationMode::Off)
            .with_local_input(|_| Some(2))
            .with_violation_observer(observer.clone())
            .start_client(Mix::default(), PlayerId::new(1), Some(two_player_keyframe()))
            .unwrap();
        client.update().unwrap();
        client.on_remote_input(Frame::new(1), PlayerId::new(0), 0).unwrap();
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        // 0 * 3 + (0 * 1 + 2 * 2) + 1
        assert_eq!(client.history().head().state, 5);
        client.events().for_each(drop);

        let conflicting = KeyframeState {
            frame: Frame::new(1),
            state: 99,
            player_inputs: vec![0, 2],
        };
        client.on_state_sync(conflicting).unwrap();
        assert!(matches!(
            client.sync_health(),
            SyncHealth::DesyncDetected { frame, .. } if frame == Frame::new(1)
        ));
        assert_eq!(client.history().head().state, 5);
        assert!(matches!(
            client.events().collect::<Vec<_>>()[..],
            [RollbackEvent::DesyncDetected { .. }]
        ));
        assert_eq!(
            observer.violations_of_kind(ViolationKind::ChecksumMismatch)[0].severity,
            ViolationSeverity::Critical
        );

        // later keyframes are not applied either
        client.update().unwrap();
        let matching = KeyframeState {
            frame: Frame::new(2),
            state: client.history().tail().state,
            player_inputs: vec![0, 2],
        };
        client.on_state_sync(matching).unwrap();
        assert_eq!(client.confirmed_frame(), Frame::new(1));
        assert_eq!(client.events().count(), 0);
    }

    #[test]
    fn matching_keyframe_keeps_client_in_sync() {
        let mut client = client();
        client.update().unwrap();
        client.on_remote_input(Frame::new(1), PlayerId::new(0), 0).unwrap();
        let matching = KeyframeState {
            frame: Frame::new(1),
            state: 5,
            player_inputs: vec![0, 2],
        };
        client.on_state_sync(matching).unwrap();
        assert!(!client.sync_health().is_desynced());
        assert_eq!(client.confirmed_frame(), Frame::new(1));
    }

    #[test]
    fn host_sends_checksums_of_confirmed_frames() {
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let mut host = EngineBuilder::<Mix>::new()
            .with_local_input(|_| Some(1))
            .with_state_broadcast(|_| {})
            .with_state_hash_broadcast(move |frame, checksum| sink.lock().push((frame, checksum)))
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        for _ in 0..3 {
            host.update().unwrap();
        }
        assert!(sent.lock().is_empty());

        host.on_remote_input(Frame::new(1), PlayerId::new(1), 0).unwrap();
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 0).unwrap();
        // 0 * 3 + (1 * 1 + 0 * 2) + 1
        let frame_one = compute_checksum(&2_i64).unwrap();
        let frame_two = compute_checksum(&host.history().head().state).unwrap();
        assert_eq!(
            *sent.lock(),
            vec![(Frame::new(1), frame_one), (Frame::new(2), frame_two)]
        );
    }

    #[test]
    fn host_withholds_checksums_until_clients_know_the_roster() {
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let mut host = EngineBuilder::<Mix>::new()
            .with_local_input(|_| Some(1))
            .with_state_broadcast(|_| {})
            .with_state_hash_broadcast(move |frame, _| sink.lock().push(frame))
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        let joined = host.add_player();
        host.update().unwrap();
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 0).unwrap();
        // frame 1 includes the new player, which only the frame 1 keyframe announces
        assert_eq!(host.last_broadcast_keyframe(), Frame::new(1));
        assert!(sent.lock().is_empty());

        host.update().unwrap();
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 0).unwrap();
        host.on_remote_input(Frame::new(2), joined, 0).unwrap();
        assert_eq!(*sent.lock(), vec![Frame::new(2)]);
    }

    #[test]
    fn input_beyond_the_prediction_window_is_rejected() {
        let mut host = host();
        let too_far = Frame::new(MAX_PREDICTION_WINDOW as i32 + 1);
        assert!(matches!(
            host.on_remote_input(too_far, PlayerId::new(1), 0),
            Err(RollbackError::InvalidFrame { frame, .. }) if frame == too_far
        ));

        // the rejected frame did not make earlier input stale
        host.update().unwrap();
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 3).unwrap();
        assert!(host
            .events()
            .any(|event| matches!(event, RollbackEvent::Rollback { .. })));

        let edge = Frame::new(1 + MAX_PREDICTION_WINDOW as i32);
        host.on_remote_input(edge, PlayerId::new(1), 3).unwrap();
        assert_eq!(host.network_stats().queued_inputs, 1);
    }

    #[test]
    fn keyframe_past_the_last_frame_is_rejected() {
        let mut client = client();
        let keyframe = KeyframeState {
            frame: Frame::new(i32::MAX),
            state: 0,
            player_inputs: vec![0, 0],
        };
        assert!(matches!(
            client.on_state_sync(keyframe),
            Err(RollbackError::InvalidFrame { .. })
        ));
        assert_eq!(client.confirmed_frame(), Frame::new(0));
    }

    #[test]
    fn checked_mode_reports_hidden_state() {
        let observer = Arc::new(CollectingObserver::new());
        let mut host = EngineBuilder::<Leaky>::new()
            .with_verification(VerificationMode::Checked)
            .with_violation_observer(observer.clone())
            .with_state_broadcast(|_| {})
            .start_host(Leaky::default(), PlayerId::new(0), None)
            .unwrap();
        host.update().unwrap();
        assert!(observer.has_violation(ViolationKind::Determinism));
    }

    #[test]
    fn checked_mode_is_quiet_for_deterministic_games() {
        let observer = Arc::new(CollectingObserver::new());
        let mut host = EngineBuilder::<Mix>::new()
            .with_verification(VerificationMode::Checked)
            .with_violation_observer(observer.clone())
            .with_state_broadcast(|_| {})
            .start_host(Mix::default(), PlayerId::new(0), Some(two_player_keyframe()))
            .unwrap();
        for _ in 0..4 {
            host.update().unwrap();
        }
        host.on_remote_input(Frame::new(1), PlayerId::new(1), 0).unwrap();
        host.on_remote_input(Frame::new(2), PlayerId::new(1), 6).unwrap();
        assert!(observer.is_empty(), "{:?}", observer.violations());
    }

    #[test]
    fn event_queue_is_bounded() {
        let mut host = EngineBuilder::<Mix>::new()
            .with_config(EngineConfig {
                event_queue_size: 2,
                ..EngineConfig::default()
            })
            .with_state_broadcast(|_| {})
            .start_host(Mix::default(), PlayerId::new(0), None)
            .unwrap();
        for _ in 0..5 {
            host.update().unwrap();
        }
        let events: Vec<_> = host.events().collect();
        assert_eq!(
            events,
            vec![
                RollbackEvent::KeyframeBroadcast {
                    frame: Frame::new(4)
                },
                RollbackEvent::KeyframeBroadcast {
                    frame: Frame::new(5)
                },
            ]
        );
    }

    #[test]
    fn ping_is_answered_and_measured() {
        let mut host = host();
        let mut client = client();
        let ping = client.send_ping();
        let pong = host.handle_message(ping).unwrap().unwrap();
        assert!(matches!(pong, Message::Pong { nonce: 0 }));
        assert!(client.handle_message(pong).unwrap().is_none());

        let stats = client.network_stats();
        assert_eq!(stats.pings_sent, 1);
        assert_eq!(stats.pongs_received, 1);
    }

    #[test]
    fn handle_message_routes_inputs() {
        let mut host = host();
        host.update().unwrap();
        let message = Message::Input(InputMessage {
            frame: Frame::new(1),
            player_id: PlayerId::new(1),
            input: 0,
            frame_sync: Frame::new(0),
        });
        assert!(host.handle_message(message).unwrap().is_none());
        assert_eq!(host.confirmed_frame(), Frame::new(1));
    }

    #[test]
    fn debug_output_names_role() {
        let debug = format!("{:?}", host());
        assert!(debug.contains("Host"));
        assert!(debug.contains("RepeatLastInput"));
    }
}
