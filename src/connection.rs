//! Per-connection state and the read loop that feeds the executor.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, DecodeError};
use crate::executor::CommandExecutor;
use crate::protocol::{Command, FrameCodec};
use crate::report::Stats;
use crate::status::StatusListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One accepted controller
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: u64,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub opened_at: Instant,
    pub last_activity: Instant,
}

/// The set of live connections
#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<u64, Connection>>,
    next_id: AtomicU64,
}

impl Registry {
    fn register(&self, peer: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        self.connections.lock().insert(
            id,
            Connection {
                id,
                peer,
                state: ConnectionState::Connecting,
                opened_at: now,
                last_activity: now,
            },
        );
        id
    }

    fn set_state(&self, id: u64, state: ConnectionState) {
        if let Some(connection) = self.connections.lock().get_mut(&id) {
            connection.state = state;
        }
    }

    fn touch(&self, id: u64) {
        if let Some(connection) = self.connections.lock().get_mut(&id) {
            connection.last_activity = Instant::now();
        }
    }

    fn remove(&self, id: u64) -> Option<Connection> {
        self.connections.lock().remove(&id)
    }

    /// Live connections ordered by accept time
    pub fn snapshot(&self) -> Vec<Connection> {
        let mut connections: Vec<_> = self.connections.lock().values().cloned().collect();
        connections.sort_by_key(|c| c.id);
        connections
    }
}

/// Everything a connection task needs from the server
pub(crate) struct Shared {
    pub(crate) executor: Arc<CommandExecutor>,
    pub(crate) status: Arc<dyn StatusListener>,
    pub(crate) registry: Registry,
    pub(crate) stats: Arc<Stats>,
    pub(crate) codec: FrameCodec,
    pub(crate) read_timeout: Option<Duration>,
}

/// Removes the connection from the registry and reports the close on every
/// exit path of the handler.
struct ConnectionGuard {
    shared: Arc<Shared>,
    id: u64,
    peer: SocketAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shared.registry.set_state(self.id, ConnectionState::Closed);
        if self.shared.registry.remove(self.id).is_none() {
            debug!("Connection {} was already gone from the registry", self.peer);
        }
        self.shared.status.on_connection_closed(self.peer);
    }
}

pub(crate) struct ConnectionHandler {
    id: u64,
    peer: SocketAddr,
    framed: FramedRead<TcpStream, FrameCodec>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    /// Registers the connection in the `Connecting` state
    pub(crate) fn new(
        socket: TcpStream,
        peer: SocketAddr,
        shared: Arc<Shared>,
        shutdown: CancellationToken,
    ) -> Self {
        let id = shared.registry.register(peer);
        ConnectionHandler {
            id,
            peer,
            framed: FramedRead::new(socket, shared.codec),
            shared,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let _guard = ConnectionGuard {
            shared: Arc::clone(&self.shared),
            id: self.id,
            peer: self.peer,
        };
        self.shared.registry.set_state(self.id, ConnectionState::Open);
        self.shared.status.on_connection_opened(self.peer);

        let result = self.read_loop().await;
        self.shared.registry.set_state(self.id, ConnectionState::Closing);

        match result {
            Ok(()) => debug!("Closing connection {} for shutdown", self.peer),
            Err(ConnectionError::PeerClosed) => info!("Client {} disconnected", self.peer),
            Err(e) => {
                warn!("Connection {} failed: {}", self.peer, e);
                self.shared.status.on_connection_error(Some(self.peer), &e);
            }
        }

        // Release the socket before the guard reports the close
        drop(self.framed);
    }

    /// Returns `Ok` only when stopped by shutdown.
    async fn read_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                next = next_frame(
                    &mut self.framed,
                    self.shared.read_timeout,
                    &self.shared.registry,
                    self.id,
                ) => next?,
            };

            match next {
                None => return Err(ConnectionError::PeerClosed),
                Some(Ok(command)) => self.dispatch(command),
                Some(Err(e)) => self.reject(e),
            }
        }
    }

    fn dispatch(&self, command: Command) {
        trace!("Command from {}: {:?}", self.peer, command);
        self.shared.stats.record_frame();
        self.shared.registry.touch(self.id);
        if let Err(e) = self.shared.executor.execute(command) {
            warn!("Command {:?} from {} not applied: {}", command, self.peer, e);
        }
    }

    fn reject(&self, error: DecodeError) {
        self.shared.stats.record_rejected();
        self.shared.registry.touch(self.id);
        warn!("Dropping frame from {}: {}", self.peer, error);
        self.shared.status.on_frame_rejected(self.peer, &error);
    }
}

/// Next decoded frame. With a read timeout, the connection only counts as
/// idle when no bytes at all arrived within `limit`, so a frame trickling in
/// a byte at a time keeps it alive.
async fn next_frame(
    framed: &mut FramedRead<TcpStream, FrameCodec>,
    read_timeout: Option<Duration>,
    registry: &Registry,
    id: u64,
) -> Result<Option<Result<Command, DecodeError>>, ConnectionError> {
    let Some(limit) = read_timeout else {
        return framed.next().await.transpose();
    };
    loop {
        let buffered = framed.read_buffer().len();
        match tokio::time::timeout(limit, framed.next()).await {
            Ok(next) => return next.transpose(),
            // Bytes of a partial frame arrived; the buffer only grows until a
            // whole frame is decoded
            Err(_) if framed.read_buffer().len() != buffered => registry.touch(id),
            Err(_) => return Err(ConnectionError::IdleTimeout(limit)),
        }
    }
}
