//! Transport over turmoil's simulated TCP.
//!
//! Each send opens a connection to the recipient's host and writes one
//! length-prefixed CBOR frame. [`serve`] accepts connections on the local
//! host and feeds every decoded frame to an executor.
//!
//! ```text
//! SEND ──▶ encode_frame ──▶ TcpStream ══ sim link ══▶ TcpListener ──▶ receive
//! ```

use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr},
};

use async_trait::async_trait;
use tandem_core::{
    ExecutorConfig, InstructionExecutor, error::TransportError, transport::Transport,
};
use tandem_proto::{
    Address, ClientActionMessage,
    frame::{PREFIX_SIZE, body_length, encode_frame, from_cbor},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use turmoil::net::{TcpListener, TcpStream};

/// Port every party listens on.
pub const PORT: u16 = 7400;

/// Routes envelopes to simulated hosts by recipient address.
#[derive(Debug, Clone)]
pub struct SimTransport {
    hosts: HashMap<Address, String>,
    max_frame_size: usize,
}

impl SimTransport {
    /// Transport that reaches each address at the named turmoil host,
    /// framing with the limit in `config`.
    pub fn new(hosts: HashMap<Address, String>, config: &ExecutorConfig) -> Self {
        Self { hosts, max_frame_size: config.max_frame_size }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&self, message: ClientActionMessage) -> Result<(), TransportError> {
        let host = self
            .hosts
            .get(&message.to)
            .ok_or_else(|| TransportError::Send(format!("no host for {}", message.to)))?;
        let frame = encode_frame(&message, self.max_frame_size)
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let mut stream = TcpStream::connect((host.as_str(), PORT))
            .await
            .map_err(|e| TransportError::Send(format!("connect {host}: {e}")))?;
        stream.write_all(&frame).await.map_err(|e| TransportError::Send(e.to_string()))?;
        stream.flush().await.map_err(|e| TransportError::Send(e.to_string()))?;

        debug!(
            %host,
            protocol = %message.protocol,
            seq = message.seq,
            bytes = frame.len(),
            "frame sent"
        );
        Ok(())
    }
}

/// Accept connections on [`PORT`] and hand every frame to `executor`.
///
/// Runs until the listener fails. A connection that sends a malformed frame,
/// or one larger than the executor's configured `max_frame_size`, is closed;
/// others are unaffected.
pub async fn serve(executor: InstructionExecutor) -> io::Result<()> {
    let max_frame_size = executor.config().max_frame_size;
    let listener = TcpListener::bind((IpAddr::from(Ipv4Addr::UNSPECIFIED), PORT)).await?;
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let executor = executor.clone();
        tokio::spawn(async move {
            if let Err(error) = read_frames(&mut stream, &executor, max_frame_size).await {
                warn!(%peer, %error, "closing connection");
            }
        });
    }
}

async fn read_frames(
    stream: &mut TcpStream,
    executor: &InstructionExecutor,
    max_frame_size: usize,
) -> io::Result<()> {
    loop {
        let mut prefix = [0u8; PREFIX_SIZE];
        match stream.read_exact(&mut prefix).await {
            Ok(_) => {},
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        let size = body_length(prefix, max_frame_size)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut body = vec![0u8; size];
        stream.read_exact(&mut body).await?;

        let message =
            from_cbor(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        executor.receive(message);
    }
}
