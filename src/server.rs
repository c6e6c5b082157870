use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionHandler, Registry, Shared};
use crate::error::{ConnectionError, ServerError};
use crate::executor::CommandExecutor;
use crate::protocol::FrameCodec;
use crate::report::{self, Stats};
use crate::status::StatusListener;

/// Back-off after a failed accept (e.g. out of file descriptors)
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP front end of the simulator. `start` and `stop` may be called any
/// number of times, in any order.
pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

/// Resources owned while the server is listening
struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    stats_task: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        executor: Arc<CommandExecutor>,
        status: Arc<dyn StatusListener>,
    ) -> Self {
        let codec = FrameCodec::new(executor.grid().layout());
        let shared = Arc::new(Shared {
            executor,
            status,
            registry: Registry::default(),
            stats: Arc::new(Stats::default()),
            codec,
            read_timeout: config.read_timeout(),
        });
        Server {
            config,
            shared,
            running: Mutex::new(None),
        }
    }

    /// Bind `port` on the configured host and start accepting controllers.
    ///
    /// Port 0 binds an ephemeral port. If the server is already running this
    /// returns the address it is bound to.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            info!("Server already running on {}", current.local_addr);
            return Ok(current.local_addr);
        }

        let addr = format!("{}:{}", self.config.host, port);
        let bind_failure = |source: std::io::Error| ServerError::BindFailure {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_failure)?;
        let local_addr = listener.local_addr().map_err(bind_failure)?;

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            shutdown.clone(),
        ));
        let stats_task = self.config.stats_interval().map(|period| {
            tokio::spawn(report::run_stats(
                Arc::clone(&self.shared.stats),
                Arc::clone(self.shared.executor.grid()),
                period,
                shutdown.clone(),
            ))
        });

        info!("✓ LED simulator listening on {}", local_addr);
        self.shared.status.on_server_started(local_addr.port());

        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
            stats_task,
        });
        Ok(local_addr)
    }

    /// Close the listener and every connection, cancel running effects and
    /// wait for all of it to finish. No-op when already stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(current) = running.take() else {
            debug!("Stop requested but server is not running");
            return;
        };

        info!("Shutting down server on {}...", current.local_addr);
        current.shutdown.cancel();
        if let Err(e) = current.accept_task.await {
            error!("Accept loop panicked: {e:?}");
        }
        if let Some(stats_task) = current.stats_task {
            if let Err(e) = stats_task.await {
                error!("Stats task panicked: {e:?}");
            }
        }
        self.shared.executor.cancel_all().await;

        self.shared.status.on_server_stopped();
        info!("✓ Server stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Snapshot of the live connections
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.registry.snapshot()
    }

    pub fn stats(&self) -> &Stats {
        &self.shared.stats
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.shared.executor
    }
}

/// A server dropped while running releases its port and stops the running
/// effect. The tasks wind down on their own; use `stop` to wait for them.
impl Drop for Server {
    fn drop(&mut self) {
        let Some(current) = self.running.get_mut().take() else {
            return;
        };
        debug!("Server on {} dropped while running", current.local_addr);
        current.shutdown.cancel();
        if let Some(stats_task) = current.stats_task {
            stats_task.abort();
        }
        // The accept loop drops the listener and closes every connection
        // once it observes the cancellation
        drop(current.accept_task);
        self.shared.executor.cancel_current();
    }
}

/// Accept controllers until `shutdown` fires, then wait for every
/// connection task to finish.
async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, shutdown: CancellationToken) {
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((socket, peer)) => {
                    info!("✓ Client connected from {}", peer);
                    let handler = ConnectionHandler::new(
                        socket,
                        peer,
                        Arc::clone(&shared),
                        shutdown.child_token(),
                    );
                    let span = info_span!("connection", %peer);
                    connections.spawn(handler.run().instrument(span));
                }
                Err(e) => {
                    let e = ConnectionError::AcceptFailure(e);
                    error!("Error accepting connection: {}", e);
                    shared.status.on_connection_error(None, &e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    drop(listener);
    connections.close();
    connections.wait().await;
    debug!("All connections closed");
}
