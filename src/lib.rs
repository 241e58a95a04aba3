//! # Blastzone Host
//!
//! Authoritative LAN host for Blastzone arena matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BLASTZONE HOST                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  session/        - Authoritative session loop                │
//! │  ├── state.rs    - Waiting / running state machine           │
//! │  ├── runner.rs   - Fixed-period tick task + operator handle  │
//! │  └── observable.rs - Fields the view layer subscribes to     │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── transport.rs - Transport contract + errors              │
//! │  ├── server.rs   - WebSocket transport                       │
//! │  └── protocol.rs - Message types                             │
//! │                                                              │
//! │  game/           - Simulation contract                       │
//! │  └── simulation.rs - Timed arena match                       │
//! │                                                              │
//! │  config.rs       - Host configuration                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Loop
//!
//! Once per tick the loop does exactly one thing: advance the match and
//! broadcast the time left, end an exhausted match, report a changed
//! waiting-room roster, or send a keep-alive. Ending a match discards the
//! transport and opens a fresh one so the next match starts clean.
//!
//! Transport failures never stop the loop. They are surfaced through the
//! observable `errorMessage` field and play continues.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use config::{ConfigError, HostConfig};
pub use game::simulation::{ArenaMatch, ArenaMatchFactory, Simulation, SimulationFactory};
pub use network::protocol::{ServerMessage, WireFormat};
pub use network::server::{WebSocketTransport, WebSocketTransportFactory};
pub use network::transport::{CommunicationError, Transport, TransportFactory, TransportId};
pub use session::{HostSession, SessionError, SessionField, SessionHandle, SessionObserver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
