//! Game Module
//!
//! The simulation contract the session loop drives, and the timed arena
//! match the host plays. Board rules live behind the contract.

pub mod simulation;

pub use simulation::{ArenaMatch, ArenaMatchFactory, Simulation, SimulationFactory};
