//! Tracing-backed collaborators for running headless, plus throughput
//! statistics.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::color::{hex_dump, Rgb};
use crate::error::{ConnectionError, DecodeError};
use crate::grid::{GridObserver, LedGrid};
use crate::status::StatusListener;

/// Logs every grid update at trace level as a hex dump
pub struct LogRenderer;

impl GridObserver for LogRenderer {
    fn on_grid_updated(&self, snapshot: &[Rgb]) {
        trace!(
            "Grid updated ({} LEDs): {}",
            snapshot.len(),
            hex_dump(snapshot)
        );
    }
}

/// Reports lifecycle events through tracing
pub struct LogStatus;

impl StatusListener for LogStatus {
    fn on_server_started(&self, port: u16) {
        info!("Server started on port {}", port);
    }

    fn on_server_stopped(&self) {
        info!("Server stopped");
    }

    fn on_connection_opened(&self, peer: SocketAddr) {
        info!("Connected: {} port {}", peer.ip(), peer.port());
    }

    fn on_connection_closed(&self, peer: SocketAddr) {
        info!("Disconnected: {} port {}", peer.ip(), peer.port());
    }

    fn on_connection_error(&self, peer: Option<SocketAddr>, error: &ConnectionError) {
        match peer {
            Some(peer) => warn!("Connection {} failed: {}", peer, error),
            None => warn!("Accept failed: {}", error),
        }
    }

    fn on_frame_rejected(&self, peer: SocketAddr, error: &DecodeError) {
        warn!("Rejected frame from {}: {}", peer, error);
    }
}

/// Frame counters shared by every connection
#[derive(Debug, Default)]
pub struct Stats {
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
}

impl Stats {
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }
}

/// Log frame and update rates every `period` until `shutdown` is cancelled.
pub async fn run_stats(
    stats: Arc<Stats>,
    grid: Arc<LedGrid>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    let mut last_received = stats.frames_received();
    let mut last_rejected = stats.frames_rejected();
    let mut last_updates = grid.generation();
    let seconds = period.as_secs_f64();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let received = stats.frames_received();
        let rejected = stats.frames_rejected();
        let updates = grid.generation();

        info!(
            "[Stats] Received: {:.1} fps, rejected: {}, grid updates: {:.1}/s",
            (received - last_received) as f64 / seconds,
            rejected - last_rejected,
            (updates - last_updates) as f64 / seconds,
        );

        last_received = received;
        last_rejected = rejected;
        last_updates = updates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridLayout, NullObserver};

    #[test]
    fn test_counters() {
        let stats = Stats::default();
        stats.record_frame();
        stats.record_frame();
        stats.record_rejected();
        assert_eq!(stats.frames_received(), 2);
        assert_eq!(stats.frames_rejected(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_task_exits_on_shutdown() {
        let stats = Arc::new(Stats::default());
        let grid = Arc::new(LedGrid::new(
            GridLayout::default(),
            Rgb::BLACK,
            Arc::new(NullObserver),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_stats(
            stats.clone(),
            grid,
            Duration::from_secs(5),
            shutdown.clone(),
        ));

        stats.record_frame();
        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
