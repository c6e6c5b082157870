//! Error types for the codec, the grid model and the connection manager.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// A frame that could not be turned into a [`Command`](crate::protocol::Command).
///
/// All variants are recoverable: the frame is dropped and the connection
/// stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("index {index} out of range for opcode {opcode} (limit {limit})")]
    IndexOutOfRange { opcode: u8, index: u8, limit: usize },

    #[error("incomplete frame: {received} of {expected} bytes")]
    IncompleteFrame { received: usize, expected: usize },

    #[error("oversized frame: {received} bytes, expected {expected}")]
    OversizedFrame { received: usize, expected: usize },
}

/// Failures of the LED grid model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("stripe {index} out of range ({stripes} stripes)")]
    StripeOutOfRange { index: usize, stripes: usize },

    #[error("row {index} out of range ({rows} rows)")]
    RowOutOfRange { index: usize, rows: usize },

    #[error("LED {index} out of range ({led_count} LEDs)")]
    LedOutOfRange { index: usize, led_count: usize },

    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Failures scoped to a single connection (or a single accept).
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection closed by peer")]
    PeerClosed,

    #[error("read failed: {0}")]
    ReadFailure(#[from] io::Error),

    #[error("accept failed: {0}")]
    AcceptFailure(#[source] io::Error),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
}

/// Failures that abort `Server::start`.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: io::Error,
    },
}
