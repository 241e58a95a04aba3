//! Protocol Messages
//!
//! Wire format for host-to-client communication over WebSocket.
//! Messages go out as JSON text frames by default for debugging ease, or as
//! bincode binary frames when the host is configured for [`WireFormat::Binary`].

use serde::{Deserialize, Serialize};

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the host to every connected client.
///
/// Exactly one of these is emitted per session tick (see
/// [`HostSession::tick`](crate::session::HostSession::tick)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Match in progress, this many seconds of play remain.
    TimeRemaining {
        /// Wall-clock seconds left (`tick_period * remaining_ticks`).
        seconds: f64,
    },

    /// Waiting room update.
    Waiting {
        /// Clients currently connected to the host.
        connected: u32,
    },

    /// Match ended.
    Stop {
        /// Roster size the match was played with.
        final_connected: u32,
    },

    /// Presence signal while waiting with no roster change.
    KeepAlive,
}

impl ServerMessage {
    /// Short name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::TimeRemaining { .. } => "time_remaining",
            ServerMessage::Waiting { .. } => "waiting",
            ServerMessage::Stop { .. } => "stop",
            ServerMessage::KeepAlive => "keep_alive",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

/// Frame encoding used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// bincode binary frames.
    Binary,
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&WireFrame::from(self))
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize::<WireFrame>(data).map(ServerMessage::from)
    }
}

/// Externally tagged mirror of [`ServerMessage`].
///
/// bincode cannot drive internally tagged enums (`#[serde(tag = "type")]`),
/// so the binary codec goes through this flat shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireFrame {
    TimeRemaining(f64),
    Waiting(u32),
    Stop(u32),
    KeepAlive,
}

impl From<&ServerMessage> for WireFrame {
    fn from(msg: &ServerMessage) -> Self {
        match *msg {
            ServerMessage::TimeRemaining { seconds } => WireFrame::TimeRemaining(seconds),
            ServerMessage::Waiting { connected } => WireFrame::Waiting(connected),
            ServerMessage::Stop { final_connected } => WireFrame::Stop(final_connected),
            ServerMessage::KeepAlive => WireFrame::KeepAlive,
        }
    }
}

impl From<WireFrame> for ServerMessage {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::TimeRemaining(seconds) => ServerMessage::TimeRemaining { seconds },
            WireFrame::Waiting(connected) => ServerMessage::Waiting { connected },
            WireFrame::Stop(final_connected) => ServerMessage::Stop { final_connected },
            WireFrame::KeepAlive => ServerMessage::KeepAlive,
        }
    }
}
