//! WebSocket Transport
//!
//! Async WebSocket listener for LAN clients. One [`WebSocketTransport`] serves
//! one match generation: it admits players while the host is waiting, stops
//! admitting when a match starts, and is discarded when the match ends.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::network::protocol::{ServerMessage, WireFormat};
use crate::network::transport::{CommunicationError, Transport, TransportFactory, TransportId};

/// How long a closing connection may take to flush its writer.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Frames queued for a client's writer task.
#[derive(Debug)]
enum Outbound {
    /// Encoded server message.
    Frame(Message),
    /// Send a close frame and stop.
    Close,
}

/// Connected client state.
struct ClientLink {
    /// Queue to the client's writer task.
    sender: mpsc::Sender<Outbound>,
    /// Connection time.
    connected_at: Instant,
}

type Roster = Arc<Mutex<BTreeMap<SocketAddr, ClientLink>>>;

fn lock_roster(roster: &Roster) -> MutexGuard<'_, BTreeMap<SocketAddr, ClientLink>> {
    // A panicking connection task must not take the whole host down with it.
    roster.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode a message as a WebSocket frame in the chosen format.
fn encode(format: WireFormat, message: &ServerMessage) -> Result<Message, CommunicationError> {
    Ok(match format {
        WireFormat::Json => Message::Text(message.to_json()?),
        WireFormat::Binary => Message::Binary(message.to_bytes()?),
    })
}

/// Bind a non-blocking listener and register it with `runtime`.
fn listen(
    runtime: &Handle,
    addr: SocketAddr,
) -> Result<(TcpListener, SocketAddr), CommunicationError> {
    let bind_err = |source| CommunicationError::Bind { addr, source };

    let std_listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
    std_listener.set_nonblocking(true).map_err(bind_err)?;
    let local_addr = std_listener.local_addr().map_err(bind_err)?;

    let _guard = runtime.enter();
    let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
    Ok((listener, local_addr))
}

/// Creates a [`WebSocketTransport`] per match generation.
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    /// Address each new transport binds.
    bind_addr: SocketAddr,
    /// Maximum concurrent clients.
    max_players: u32,
    /// Per-client outbound queue length.
    outbound_queue: usize,
    /// Frame encoding for broadcasts.
    wire_format: WireFormat,
}

impl WebSocketTransportFactory {
    /// Create a factory sending JSON text frames.
    pub fn new(bind_addr: SocketAddr, max_players: u32, outbound_queue: usize) -> Self {
        Self {
            bind_addr,
            max_players,
            outbound_queue: outbound_queue.max(1),
            wire_format: WireFormat::Json,
        }
    }

    /// Create a factory from host configuration.
    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.bind_addr, config.max_players, config.outbound_queue)
            .with_wire_format(config.wire_format)
    }

    /// Use `wire_format` for every transport created from now on.
    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    /// Address new transports bind.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

impl TransportFactory for WebSocketTransportFactory {
    type Transport = WebSocketTransport;

    fn create(&mut self) -> Result<WebSocketTransport, CommunicationError> {
        let transport =
            WebSocketTransport::bind(self.bind_addr, self.max_players, self.outbound_queue)?;
        Ok(transport.with_wire_format(self.wire_format))
    }
}

/// WebSocket transport for one match generation.
pub struct WebSocketTransport {
    /// Instance identity.
    id: TransportId,
    /// Bound listener address.
    local_addr: SocketAddr,
    /// Frame encoding for broadcasts.
    wire_format: WireFormat,
    /// Roster, admission flag and limits shared with connection tasks.
    admission: Admission,
    /// Accept loop, present while a listener is open.
    accept_task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Bind a listener and start accepting clients.
    ///
    /// Binding is synchronous so the session can replace a transport without
    /// awaiting; the accept loop itself runs on the current tokio runtime.
    pub fn bind(
        bind_addr: SocketAddr,
        max_players: u32,
        outbound_queue: usize,
    ) -> Result<Self, CommunicationError> {
        let runtime = Handle::try_current().map_err(|_| CommunicationError::NoRuntime)?;
        let (listener, local_addr) = listen(&runtime, bind_addr)?;

        let id = TransportId::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let admission = Admission {
            clients: Arc::new(Mutex::new(BTreeMap::new())),
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
            max_players: max_players as usize,
            outbound_queue: outbound_queue.max(1),
        };
        let accept_task = runtime.spawn(run_accept_loop(listener, admission.clone()));

        info!("Transport {} listening on {}", id, local_addr);

        Ok(Self {
            id,
            local_addr,
            wire_format: WireFormat::Json,
            admission,
            accept_task: Some(accept_task),
        })
    }

    /// Send broadcasts as `wire_format` frames.
    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    /// Frame encoding in use.
    pub fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Addresses of connected clients with how long each has been connected.
    pub fn client_ages(&self) -> Vec<(SocketAddr, Duration)> {
        lock_roster(&self.admission.clients)
            .iter()
            .map(|(addr, link)| (*addr, link.connected_at.elapsed()))
            .collect()
    }
}

impl Transport for WebSocketTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connected_count(&self) -> u32 {
        let count = lock_roster(&self.admission.clients).len();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn is_accepting(&self) -> bool {
        self.admission.accepting.load(Ordering::SeqCst)
    }

    fn broadcast(&mut self, message: &ServerMessage) -> Result<(), CommunicationError> {
        let frame = encode(self.wire_format, message)?;
        let clients = lock_roster(&self.admission.clients);

        let mut first_failure = None;
        for (addr, link) in clients.iter() {
            let failure = match link.sender.try_send(Outbound::Frame(frame.clone())) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => CommunicationError::QueueFull(*addr),
                Err(TrySendError::Closed(_)) => CommunicationError::ChannelClosed(*addr),
            };
            debug!("Broadcast of {} to {} failed: {}", message.kind(), addr, failure);
            if first_failure.is_none() {
                first_failure = Some(failure);
            }
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn stop_accepting(&mut self) {
        self.admission.accepting.store(false, Ordering::SeqCst);
        if let Some(task) = self.accept_task.take() {
            // The listener is released once the runtime drops the aborted task.
            task.abort();
            info!("Transport {} stopped accepting", self.id);
        }
    }

    fn resume_accepting(&mut self) -> Result<(), CommunicationError> {
        if self.accept_task.is_none() {
            let runtime = Handle::try_current().map_err(|_| CommunicationError::NoRuntime)?;
            // Same port as before, so clients keep the address they were given.
            let (listener, _) = listen(&runtime, self.local_addr)?;
            let accept_task = runtime.spawn(run_accept_loop(listener, self.admission.clone()));
            self.accept_task = Some(accept_task);
            info!("Transport {} accepting again on {}", self.id, self.local_addr);
        }
        self.admission.accepting.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect_all(&mut self) -> Result<(), CommunicationError> {
        self.stop_accepting();

        let drained = std::mem::take(&mut *lock_roster(&self.admission.clients));
        let mut first_failure = None;
        for (addr, link) in drained {
            match link.sender.try_send(Outbound::Close) {
                // A closed channel means the client already left.
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => {
                    if first_failure.is_none() {
                        first_failure = Some(CommunicationError::QueueFull(addr));
                    }
                }
            }
        }

        // Also reaches connections still in their handshake.
        let _ = self.admission.shutdown_tx.send(());
        info!("Transport {} disconnected all clients", self.id);

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.admission.accepting.store(false, Ordering::SeqCst);
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        lock_roster(&self.admission.clients).clear();
        let _ = self.admission.shutdown_tx.send(());
        debug!("Transport {} detached", self.id);
    }
}

/// State the accept loop hands to every connection.
#[derive(Clone)]
struct Admission {
    clients: Roster,
    accepting: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    max_players: usize,
    outbound_queue: usize,
}

impl Admission {
    /// Register a client if the transport still admits and has room.
    fn admit(&self, addr: SocketAddr, sender: mpsc::Sender<Outbound>) -> bool {
        let mut clients = lock_roster(&self.clients);
        if !self.accepting.load(Ordering::SeqCst) || clients.len() >= self.max_players {
            return false;
        }
        clients.insert(addr, ClientLink {
            sender,
            connected_at: Instant::now(),
        });
        true
    }

    fn release(&self, addr: &SocketAddr) {
        lock_roster(&self.clients).remove(addr);
    }
}

async fn run_accept_loop(listener: TcpListener, admission: Admission) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if !admission.accepting.load(Ordering::SeqCst) {
                    debug!("Not accepting, dropping connection from {}", addr);
                    continue;
                }
                if lock_roster(&admission.clients).len() >= admission.max_players {
                    warn!("Player limit reached, rejecting {}", addr);
                    continue;
                }

                info!("New connection from {}", addr);
                let shutdown_rx = admission.shutdown_tx.subscribe();
                tokio::spawn(handle_connection(stream, addr, admission.clone(), shutdown_rx));
            }
            Err(e) => {
                error!("Accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Drive one WebSocket client until it leaves or the transport closes it.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    admission: Admission,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<Outbound>(admission.outbound_queue);

    if !admission.admit(addr, msg_tx.clone()) {
        debug!("Closing {}: transport no longer admitting", addr);
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let mut writer = tokio::spawn(async move {
        while let Some(out) = msg_rx.recv().await {
            match out {
                Outbound::Frame(frame) => {
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Player input belongs to the simulation layer.
                        debug!("Ignoring {} byte text frame from {}", text.len(), addr);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", addr, e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = msg_tx.try_send(Outbound::Close);
                break;
            }
        }
    }

    // Cleanup
    admission.release(&addr);
    drop(msg_tx);
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!("Client {} cleaned up", addr);
}
