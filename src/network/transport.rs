//! Transport Contract
//!
//! What the session loop needs from the network: a connected-client count,
//! broadcast, and control over accepting and dropping clients. The WebSocket
//! implementation lives in [`server`](crate::network::server); tests plug in
//! in-memory doubles.

use std::fmt;
use std::net::SocketAddr;

use uuid::Uuid;

use crate::network::protocol::ServerMessage;

/// Identity of one transport instance.
///
/// Every transport mints a fresh id, so a replaced transport can always be
/// told apart from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(Uuid);

impl TransportId {
    /// Mint a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group is enough to tell generations apart in logs.
        let text = self.0.to_string();
        f.write_str(&text[..8])
    }
}

/// A handle over accepting, tracking and messaging clients.
///
/// No method may block: sends are queued and a slow client shows up as an
/// error, not a stall.
pub trait Transport: Send {
    /// Identity of this instance.
    fn id(&self) -> TransportId;

    /// Number of clients currently connected.
    fn connected_count(&self) -> u32;

    /// Whether new clients are still admitted.
    fn is_accepting(&self) -> bool;

    /// Queue a message for every connected client.
    ///
    /// Every client is attempted even if an earlier one fails; the first
    /// failure is returned.
    fn broadcast(&mut self, message: &ServerMessage) -> Result<(), CommunicationError>;

    /// Stop admitting new clients. Existing clients stay connected.
    fn stop_accepting(&mut self);

    /// Admit new clients again after [`stop_accepting`](Self::stop_accepting).
    ///
    /// May have to reopen a listener, which can fail.
    fn resume_accepting(&mut self) -> Result<(), CommunicationError>;

    /// Drop every client and stop accepting.
    fn disconnect_all(&mut self) -> Result<(), CommunicationError>;
}

/// Builds fresh transports, one per match generation.
pub trait TransportFactory: Send {
    /// Transport type produced.
    type Transport: Transport;

    /// Create a new transport that is accepting clients.
    fn create(&mut self) -> Result<Self::Transport, CommunicationError>;
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    /// Could not bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Transport was created outside a tokio runtime.
    #[error("No async runtime available for the transport")]
    NoRuntime,

    /// A client's outbound queue is full.
    #[error("Outbound queue full for client {0}")]
    QueueFull(SocketAddr),

    /// A client's connection task has already gone away.
    #[error("Connection to client {0} is closed")]
    ChannelClosed(SocketAddr),

    /// Message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Message could not be encoded as a binary frame.
    #[error("Failed to encode binary message: {0}")]
    EncodeBinary(#[from] bincode::Error),

    /// Tried to prepare a match while still admitting clients.
    #[error("Transport is still accepting connections")]
    StillAccepting,

    /// Tried to prepare a match with nobody connected.
    #[error("No clients connected to play")]
    EmptyRoster,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_ids_are_unique() {
        let a = TransportId::new();
        let b = TransportId::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn test_transport_id_display_is_short() {
        let id = TransportId::new();
        assert_eq!(id.to_string().len(), 8);
        assert!(id.as_uuid().to_string().starts_with(&id.to_string()));
    }

    #[test]
    fn test_error_messages() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            CommunicationError::QueueFull(addr).to_string(),
            "Outbound queue full for client 127.0.0.1:9000"
        );
        assert_eq!(
            CommunicationError::EmptyRoster.to_string(),
            "No clients connected to play"
        );
    }
}
