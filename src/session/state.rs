//! Hosted Session State Machine
//!
//! Owns one hosted match lifecycle: the waiting room, the running match and
//! the hand-over between them. [`HostSession::tick`] is called once per tick
//! period by the [runner](crate::session::runner) and performs exactly one
//! action, picked in this order:
//!
//! 1. running with ticks left: broadcast the time remaining, advance the match
//! 2. running with no ticks left: end the match
//! 3. waiting and the connected count moved: report the new count
//! 4. waiting, nothing changed: keep-alive
//!
//! Transport failures never escape a tick. They are written to the observable
//! `errorMessage` and the session carries on.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::game::simulation::{Simulation, SimulationFactory};
use crate::network::protocol::ServerMessage;
use crate::network::transport::{CommunicationError, Transport, TransportFactory, TransportId};
use crate::session::observable::SessionObserver;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting room, admitting players.
    Waiting,
    /// Match in progress.
    Running,
    /// Shut down; no further ticks or transitions.
    Terminated,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Broadcast the time remaining and advanced the match.
    Advanced {
        /// Ticks that were left before this advance.
        remaining_ticks: u32,
    },
    /// The match ran out of ticks and was stopped.
    MatchOver,
    /// The waiting room roster changed.
    PlayersChanged {
        /// Newly observed connected count.
        connected: u32,
    },
    /// Nothing changed; sent a keep-alive.
    KeepAlive,
    /// No admitting transport, and reopening or recreating it failed again.
    TransportUnavailable,
    /// The session has been shut down.
    Terminated,
}

/// Result of [`HostSession::start_or_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// A match was started.
    Started,
    /// The running match was stopped.
    Stopped,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Nobody to play with.
    #[error("Cannot start a match with no connected players")]
    NoPlayers,

    /// A match is already running.
    #[error("A match is already running")]
    AlreadyRunning,

    /// The session has been shut down.
    #[error("Session has been shut down")]
    Terminated,

    /// The simulation could not be prepared.
    #[error("Could not prepare the match: {0}")]
    Simulation(#[source] CommunicationError),
}

/// Phase plus the data that only exists in it.
///
/// Keeping the simulation inside `Running` makes "simulation present if and
/// only if running" hold by construction.
enum Phase<S> {
    Waiting,
    Running(S),
    Terminated,
}

/// One hosted match lifecycle.
pub struct HostSession<F, S>
where
    F: TransportFactory,
    S: SimulationFactory<F::Transport>,
{
    /// Builds a transport per match generation.
    transport_factory: F,
    /// Builds a simulation per match.
    simulation_factory: S,
    /// Current transport; absent only after a failed replacement.
    transport: Option<F::Transport>,
    /// Lifecycle phase.
    phase: Phase<S::Simulation>,
    /// Last observed connected count, frozen while running.
    connected_players: u32,
    /// Tick period, used to convert ticks to seconds.
    tick_period: Duration,
    /// Shared view for the UI layer.
    observer: Arc<SessionObserver>,
    /// Matches started so far.
    matches_started: u64,
}

impl<F, S> HostSession<F, S>
where
    F: TransportFactory,
    S: SimulationFactory<F::Transport>,
{
    /// Create a session in the waiting room.
    ///
    /// The first transport is created here; a host that cannot listen has no
    /// session.
    pub fn new(
        mut transport_factory: F,
        simulation_factory: S,
        tick_period: Duration,
    ) -> Result<Self, CommunicationError> {
        let transport = transport_factory.create()?;
        info!("Session hosting on transport {}", transport.id());

        Ok(Self {
            transport_factory,
            simulation_factory,
            transport: Some(transport),
            phase: Phase::Waiting,
            connected_players: 0,
            tick_period,
            observer: Arc::new(SessionObserver::new()),
            matches_started: 0,
        })
    }

    /// Shared observable state.
    pub fn observer(&self) -> Arc<SessionObserver> {
        self.observer.clone()
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        match self.phase {
            Phase::Waiting => SessionPhase::Waiting,
            Phase::Running(_) => SessionPhase::Running,
            Phase::Terminated => SessionPhase::Terminated,
        }
    }

    /// Whether a match is running.
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    /// Whether a simulation exists.
    pub fn has_simulation(&self) -> bool {
        self.simulation().is_some()
    }

    /// The running simulation, if any.
    pub fn simulation(&self) -> Option<&S::Simulation> {
        match &self.phase {
            Phase::Running(simulation) => Some(simulation),
            _ => None,
        }
    }

    /// Last observed connected count.
    pub fn connected_players(&self) -> u32 {
        self.connected_players
    }

    /// Current transport, if one is installed.
    pub fn transport(&self) -> Option<&F::Transport> {
        self.transport.as_ref()
    }

    /// Identity of the current transport.
    pub fn transport_id(&self) -> Option<TransportId> {
        self.transport.as_ref().map(Transport::id)
    }

    /// Tick period.
    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// Matches started since the session was created.
    pub fn matches_started(&self) -> u64 {
        self.matches_started
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Run one tick. Never fails; failures land in `errorMessage`.
    pub fn tick(&mut self) -> TickOutcome {
        let remaining = match &self.phase {
            Phase::Terminated => return TickOutcome::Terminated,
            Phase::Running(simulation) => Some(simulation.remaining_ticks()),
            Phase::Waiting => None,
        };

        match remaining {
            Some(0) => {
                self.stop_match();
                TickOutcome::MatchOver
            }
            Some(remaining_ticks) => {
                self.play_tick(remaining_ticks);
                TickOutcome::Advanced { remaining_ticks }
            }
            None => self.waiting_tick(),
        }
    }

    fn play_tick(&mut self, remaining_ticks: u32) {
        let seconds = self.tick_period.saturating_mul(remaining_ticks).as_secs_f64();
        // A failed send must not hold the match back.
        self.send(&ServerMessage::TimeRemaining { seconds });

        if let Phase::Running(simulation) = &mut self.phase {
            simulation.advance();
        }
    }

    fn waiting_tick(&mut self) -> TickOutcome {
        if !self.ensure_admitting() {
            return TickOutcome::TransportUnavailable;
        }

        let observed = self.observed_count();
        if observed != self.connected_players {
            debug!("Waiting room: {} -> {} players", self.connected_players, observed);
            self.connected_players = observed;
            self.observer.set_connected_players(observed);
            self.send(&ServerMessage::Waiting { connected: observed });
            TickOutcome::PlayersChanged { connected: observed }
        } else {
            self.send(&ServerMessage::KeepAlive);
            TickOutcome::KeepAlive
        }
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Start a match with the players currently connected.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Waiting => {}
            Phase::Running(_) => return Err(self.reject(SessionError::AlreadyRunning)),
            Phase::Terminated => return Err(SessionError::Terminated),
        }

        if self.observed_count() == 0 {
            return Err(self.reject(SessionError::NoPlayers));
        }

        let (connected, prepared) = match self.transport.as_mut() {
            Some(transport) => {
                transport.stop_accepting();
                // Counted after admission closes, so nobody joins unseen.
                let connected = transport.connected_count();
                (connected, self.simulation_factory.create(transport))
            }
            None => (0, Err(CommunicationError::EmptyRoster)),
        };

        // On failure the transport and its players stay; the next waiting
        // tick reopens admission.
        match prepared {
            Ok(simulation) if connected > 0 => {
                self.connected_players = connected;
                self.observer.set_connected_players(connected);
                self.phase = Phase::Running(simulation);
                self.matches_started += 1;
                self.observer.set_running(true);
                self.observer.set_error_message("");
                info!(
                    "Match {} started with {} players",
                    self.matches_started, self.connected_players
                );
                Ok(())
            }
            Ok(_) => Err(self.reject(SessionError::NoPlayers)),
            Err(e) => Err(self.reject(SessionError::Simulation(e))),
        }
    }

    /// Stop the running match. Does nothing while waiting.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Running(_) => {
                self.stop_match();
                Ok(())
            }
            Phase::Waiting => Ok(()),
            Phase::Terminated => Err(SessionError::Terminated),
        }
    }

    /// Start if waiting, stop if running.
    pub fn start_or_stop(&mut self) -> Result<Toggle, SessionError> {
        if self.is_running() {
            self.stop().map(|()| Toggle::Stopped)
        } else {
            self.start().map(|()| Toggle::Started)
        }
    }

    /// Shut the session down for good.
    pub fn shutdown(&mut self) {
        if matches!(self.phase, Phase::Terminated) {
            return;
        }
        if self.is_running() {
            self.end_match();
        }

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.disconnect_all() {
                // Nobody is left to show this to.
                debug!("Ignoring disconnect failure on shutdown: {}", e);
            }
        }

        self.phase = Phase::Terminated;
        info!("Session terminated after {} matches", self.matches_started);
    }

    /// Stop transition: end the match and open a fresh waiting room.
    fn stop_match(&mut self) {
        self.end_match();
        self.install_transport();
    }

    /// End the match and release its transport.
    fn end_match(&mut self) {
        let final_connected = self.connected_players;

        self.phase = Phase::Waiting;
        self.observer.set_running(false);

        self.send(&ServerMessage::Stop { final_connected });

        self.connected_players = 0;
        self.observer.set_connected_players(0);

        self.release_transport();
        info!("Match ended with {} players", final_connected);
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    /// Make sure the waiting room has a transport that admits players.
    fn ensure_admitting(&mut self) -> bool {
        let reopened = match self.transport.as_mut() {
            None => return self.install_transport(),
            Some(transport) if transport.is_accepting() => return true,
            Some(transport) => transport.resume_accepting(),
        };

        match reopened {
            Ok(()) => {
                info!("Waiting room open again");
                true
            }
            Err(e) => {
                self.report(&e);
                false
            }
        }
    }

    /// Disconnect and drop the current transport.
    ///
    /// The old transport is gone before any replacement exists, so no send
    /// can reach a stale generation.
    fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let id = transport.id();
            if let Err(e) = transport.disconnect_all() {
                self.report(&e);
            }
            drop(transport);
            debug!("Released transport {}", id);
        }
    }

    /// Create a fresh transport. Returns false if creation failed.
    fn install_transport(&mut self) -> bool {
        match self.transport_factory.create() {
            Ok(transport) => {
                info!("Installed transport {}", transport.id());
                self.transport = Some(transport);
                true
            }
            Err(e) => {
                self.report(&e);
                false
            }
        }
    }

    fn observed_count(&self) -> u32 {
        self.transport.as_ref().map_or(0, Transport::connected_count)
    }

    /// Broadcast through the current transport, recording any failure.
    fn send(&mut self, message: &ServerMessage) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.broadcast(message) {
            self.report(&e);
        }
    }

    fn report(&self, error: &CommunicationError) {
        warn!("Transport failure: {}", error);
        self.observer.set_error_message(error.to_string());
    }

    fn reject(&self, error: SessionError) -> SessionError {
        warn!("Session request rejected: {}", error);
        self.observer.set_error_message(error.to_string());
        error
    }
}
