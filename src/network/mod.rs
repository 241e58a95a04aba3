//! Network Layer
//!
//! WebSocket transport for LAN clients and the messages the host sends them.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{ServerMessage, WireFormat};
pub use server::{WebSocketTransport, WebSocketTransportFactory};
pub use transport::{CommunicationError, Transport, TransportFactory, TransportId};
