//! In-memory transport and simulation doubles for session tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::game::simulation::SimulationFactory;
use crate::network::protocol::ServerMessage;
use crate::network::transport::{CommunicationError, Transport, TransportFactory, TransportId};

/// Knobs and recordings shared by every transport a [`ScriptFactory`] creates.
#[derive(Debug, Default)]
pub struct Script {
    /// Ids of every transport created, oldest first.
    pub created: Vec<TransportId>,
    /// Every successful broadcast, with the transport it went through.
    pub sent: Vec<(TransportId, ServerMessage)>,
    /// Ids of transports that had `disconnect_all` called.
    pub disconnected: Vec<TransportId>,
    /// Ids of transports that were dropped.
    pub dropped: Vec<TransportId>,
    /// Clients connected to the current transport.
    pub connected: u32,
    /// Whether the current transport admits clients.
    pub accepting: bool,
    /// Next broadcasts fail.
    pub fail_broadcast: bool,
    /// Next `disconnect_all` fails.
    pub fail_disconnect: bool,
    /// Next `create` fails.
    pub fail_create: bool,
    /// Next `resume_accepting` fails.
    pub fail_resume: bool,
    /// Clients that slip in while admission is being closed.
    pub late_joiners: u32,
    /// Successful `resume_accepting` calls.
    pub resumed: usize,
}

/// Shared handle onto a [`Script`].
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn set_connected(&self, connected: u32) {
        self.lock().connected = connected;
    }

    /// Messages sent through any transport, in order.
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.lock().sent.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn stop_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|m| matches!(m, ServerMessage::Stop { .. }))
            .count()
    }
}

pub fn failure_addr() -> SocketAddr {
    "10.0.0.7:4000".parse().unwrap()
}

pub struct ScriptTransport {
    id: TransportId,
    script: ScriptHandle,
}

impl Transport for ScriptTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connected_count(&self) -> u32 {
        self.script.lock().connected
    }

    fn is_accepting(&self) -> bool {
        self.script.lock().accepting
    }

    fn broadcast(&mut self, message: &ServerMessage) -> Result<(), CommunicationError> {
        let mut script = self.script.lock();
        if script.fail_broadcast {
            return Err(CommunicationError::QueueFull(failure_addr()));
        }
        script.sent.push((self.id, message.clone()));
        Ok(())
    }

    fn stop_accepting(&mut self) {
        let mut script = self.script.lock();
        if script.accepting {
            let late = std::mem::take(&mut script.late_joiners);
            script.connected += late;
        }
        script.accepting = false;
    }

    fn resume_accepting(&mut self) -> Result<(), CommunicationError> {
        let mut script = self.script.lock();
        if script.fail_resume {
            return Err(CommunicationError::Bind {
                addr: failure_addr(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            });
        }
        script.accepting = true;
        script.resumed += 1;
        Ok(())
    }

    fn disconnect_all(&mut self) -> Result<(), CommunicationError> {
        let mut script = self.script.lock();
        script.disconnected.push(self.id);
        script.accepting = false;
        script.connected = 0;
        if script.fail_disconnect {
            return Err(CommunicationError::ChannelClosed(failure_addr()));
        }
        Ok(())
    }
}

impl Drop for ScriptTransport {
    fn drop(&mut self) {
        self.script.lock().dropped.push(self.id);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptFactory {
    pub script: ScriptHandle,
}

impl TransportFactory for ScriptFactory {
    type Transport = ScriptTransport;

    fn create(&mut self) -> Result<ScriptTransport, CommunicationError> {
        let mut script = self.script.lock();
        if script.fail_create {
            return Err(CommunicationError::Bind {
                addr: failure_addr(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            });
        }
        let id = TransportId::new();
        script.created.push(id);
        script.connected = 0;
        script.accepting = true;
        Ok(ScriptTransport {
            id,
            script: self.script.clone(),
        })
    }
}

/// Simulation factory that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenSimulationFactory;

impl<T: Transport> SimulationFactory<T> for BrokenSimulationFactory {
    type Simulation = crate::game::simulation::ArenaMatch;

    fn create(&mut self, _transport: &mut T) -> Result<Self::Simulation, CommunicationError> {
        Err(CommunicationError::ChannelClosed(failure_addr()))
    }
}
