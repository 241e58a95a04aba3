//! Simulation Contract
//!
//! The session loop only needs two things from the game engine: how many
//! ticks are left and a way to advance by one. Board layout, bombs and
//! collision live behind [`Simulation`] and are not modelled here.

use tracing::info;

use crate::network::transport::{CommunicationError, Transport};

/// An authoritative game stepper, advanced once per session tick.
pub trait Simulation: Send {
    /// Ticks left before the match is over.
    fn remaining_ticks(&self) -> u32;

    /// Advance the game by one tick.
    fn advance(&mut self);
}

/// Prepares a simulation bound to the transport it will play over.
pub trait SimulationFactory<T: Transport>: Send {
    /// Simulation type produced.
    type Simulation: Simulation;

    /// Prepare a match over `transport`.
    ///
    /// Fails if the transport is not ready for play.
    fn create(&mut self, transport: &mut T) -> Result<Self::Simulation, CommunicationError>;
}

/// A timed arena match over a frozen roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaMatch {
    /// Players in the match, fixed at creation.
    player_count: u32,
    /// Match length.
    duration_ticks: u32,
    /// Ticks played so far.
    elapsed_ticks: u32,
}

impl ArenaMatch {
    /// Create a match for `player_count` players lasting `duration_ticks`.
    pub fn new(player_count: u32, duration_ticks: u32) -> Self {
        Self {
            player_count,
            duration_ticks,
            elapsed_ticks: 0,
        }
    }

    /// Players in the match.
    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    /// Ticks played so far.
    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed_ticks
    }

    /// Whether the match has run out of time.
    pub fn is_over(&self) -> bool {
        self.elapsed_ticks >= self.duration_ticks
    }
}

impl Simulation for ArenaMatch {
    fn remaining_ticks(&self) -> u32 {
        self.duration_ticks.saturating_sub(self.elapsed_ticks)
    }

    fn advance(&mut self) {
        if !self.is_over() {
            self.elapsed_ticks += 1;
        }
    }
}

/// Builds [`ArenaMatch`]es of a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct ArenaMatchFactory {
    duration_ticks: u32,
}

impl ArenaMatchFactory {
    /// Matches last `duration_ticks` ticks.
    pub fn new(duration_ticks: u32) -> Self {
        Self { duration_ticks }
    }

    /// Configured match length.
    pub fn duration_ticks(&self) -> u32 {
        self.duration_ticks
    }
}

impl<T: Transport> SimulationFactory<T> for ArenaMatchFactory {
    type Simulation = ArenaMatch;

    fn create(&mut self, transport: &mut T) -> Result<ArenaMatch, CommunicationError> {
        if transport.is_accepting() {
            return Err(CommunicationError::StillAccepting);
        }

        let player_count = transport.connected_count();
        if player_count == 0 {
            return Err(CommunicationError::EmptyRoster);
        }

        info!(
            "Prepared arena match: {} players, {} ticks",
            player_count, self.duration_ticks
        );
        Ok(ArenaMatch::new(player_count, self.duration_ticks))
    }
}
