use std::net::SocketAddr;

use crate::error::{ConnectionError, DecodeError};

/// Receives server and connection lifecycle events.
///
/// Called from connection tasks; implementations must not block.
pub trait StatusListener: Send + Sync {
    fn on_server_started(&self, port: u16);
    fn on_server_stopped(&self);
    fn on_connection_opened(&self, peer: SocketAddr);
    fn on_connection_closed(&self, peer: SocketAddr);

    /// A connection failed, or an accept failed when `peer` is `None`
    fn on_connection_error(&self, _peer: Option<SocketAddr>, _error: &ConnectionError) {}

    /// A frame was dropped; the connection stays open
    fn on_frame_rejected(&self, _peer: SocketAddr, _error: &DecodeError) {}
}
