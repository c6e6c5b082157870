//! Network-controlled LED strip simulator.
//!
//! Controllers connect over TCP and send fixed 7-byte command frames; the
//! decoded commands are applied to a shared in-memory LED grid.

pub mod client;
pub mod color;
pub mod config;
pub mod connection;
pub mod effects;
pub mod error;
pub mod executor;
pub mod grid;
pub mod protocol;
pub mod report;
pub mod server;
pub mod status;

pub use color::Rgb;
pub use config::Config;
pub use error::{ConnectionError, DecodeError, GridError, ServerError};
pub use executor::CommandExecutor;
pub use grid::{GridLayout, GridObserver, LedGrid};
pub use protocol::Command;
pub use server::Server;
pub use status::StatusListener;
