//! Minimal controller: sends command frames to a running simulator.

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::error::ConnectionError;
use crate::protocol::{Command, FrameCodec};

/// Connect to `addr`, write `commands` in order and close the connection.
pub async fn send<A: ToSocketAddrs>(addr: A, commands: &[Command]) -> Result<(), ConnectionError> {
    let stream = TcpStream::connect(addr).await?;
    let peer = stream.peer_addr()?;
    let mut framed = FramedWrite::new(stream, FrameCodec::default());

    for command in commands {
        debug!("Sending {:?} to {}", command, peer);
        framed.feed(*command).await?;
    }
    framed.flush().await?;

    framed.into_inner().shutdown().await?;
    Ok(())
}
