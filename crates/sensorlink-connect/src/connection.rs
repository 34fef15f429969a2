//! Connection: one TCP socket to the remote collector

use crate::error::ConnectError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{Encoder, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How each `send` is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Payload bytes only; the collector relies on stream timing to split frames
    #[default]
    Raw,

    /// 4-byte big-endian length before every payload
    LengthPrefixed,
}

/// Options applied when establishing a connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound on resolve + connect (None = transport default)
    pub connect_timeout: Option<Duration>,

    /// Frame delimiting for outbound payloads
    pub framing: Framing,

    /// Disable Nagle's algorithm
    pub nodelay: bool,

    /// Maximum bytes returned by one `receive`
    pub receive_buffer_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            framing: Framing::Raw,
            nodelay: true,
            receive_buffer_size: 4096,
        }
    }
}

/// A connected TCP socket with cancellable send/receive
///
/// Sends are serialized by an internal lock, so a second `send` only starts
/// writing after the previous one has resolved. `disconnect` cancels any
/// operation still waiting on the socket.
///
/// # Example
///
/// ```rust,no_run
/// use sensorlink_connect::{ConnectOptions, Connection};
///
/// # async fn example() -> Result<(), sensorlink_connect::ConnectError> {
/// let conn = Connection::connect("10.0.0.5", 9000, &ConnectOptions::default()).await?;
/// conn.send(b"Hello Server").await?;
/// let reply = conn.receive().await?;
/// println!("collector said {} bytes", reply.len());
/// conn.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection {
    remote: SocketAddr,
    framing: Framing,
    receive_buffer_size: usize,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    shutdown: CancellationToken,
    open: AtomicBool,
}

impl Connection {
    /// Resolve `address` and open a TCP connection to `address:port`
    ///
    /// Every resolved address is tried in turn; the last failure is reported.
    pub async fn connect(
        address: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConnectError::InvalidAddress(
                "empty collector address".to_string(),
            ));
        }
        let target = format!("{}:{}", address, port);

        debug!("Connecting to collector at {}", target);

        let attempt = Self::open_stream(address, port, &target);
        let stream = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| ConnectError::Timeout {
                    address: target.clone(),
                })??,
            None => attempt.await?,
        };

        if let Err(e) = stream.set_nodelay(options.nodelay) {
            warn!("Failed to set TCP_NODELAY on {}: {}", target, e);
        }

        let remote = stream.peer_addr().map_err(|e| ConnectError::Connect {
            address: target.clone(),
            source: e,
        })?;
        let (reader, writer) = stream.into_split();

        info!(remote = %remote, framing = ?options.framing, "Connected to collector");

        Ok(Self {
            remote,
            framing: options.framing,
            receive_buffer_size: options.receive_buffer_size.max(1),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            shutdown: CancellationToken::new(),
            open: AtomicBool::new(true),
        })
    }

    async fn open_stream(address: &str, port: u16, target: &str) -> Result<TcpStream, ConnectError> {
        let candidates = lookup_host((address, port))
            .await
            .map_err(|e| ConnectError::Connect {
                address: target.to_string(),
                source: e,
            })?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect attempt to {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ConnectError::Connect {
            address: target.to_string(),
            source: last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
            }),
        })
    }

    /// Write one whole frame, retrying partial writes until done
    pub async fn send(&self, payload: &[u8]) -> Result<(), ConnectError> {
        if !self.is_open() {
            return Err(ConnectError::Disconnected);
        }
        let frame = self.encode(payload)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectError::Disconnected)?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ConnectError::Disconnected),
            result = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            } => {
                result.map_err(ConnectError::Send)?;
                debug!(remote = %self.remote, bytes = payload.len(), "Frame sent");
                Ok(())
            }
        }
    }

    /// Read the next chunk of inbound bytes
    ///
    /// A clean close by the peer is reported as `ConnectError::Closed`.
    pub async fn receive(&self) -> Result<Bytes, ConnectError> {
        if !self.is_open() {
            return Err(ConnectError::Disconnected);
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ConnectError::Disconnected)?;
        let mut buf = BytesMut::with_capacity(self.receive_buffer_size);

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ConnectError::Disconnected),
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => Err(ConnectError::Closed),
                Ok(n) => {
                    debug!(remote = %self.remote, bytes = n, "Received from collector");
                    Ok(buf.freeze())
                }
                Err(e) => Err(ConnectError::Receive(e)),
            },
        }
    }

    /// Close the socket and cancel pending operations. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Write shutdown to {} failed: {}", self.remote, e);
            }
        }
        self.reader.lock().await.take();

        info!(remote = %self.remote, "Disconnected from collector");
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn encode(&self, payload: &[u8]) -> Result<Bytes, ConnectError> {
        match self.framing {
            Framing::Raw => Ok(Bytes::copy_from_slice(payload)),
            Framing::LengthPrefixed => {
                let mut codec = length_prefix_codec();
                let mut buf = BytesMut::with_capacity(payload.len() + 4);
                codec
                    .encode(Bytes::copy_from_slice(payload), &mut buf)
                    .map_err(ConnectError::Send)?;
                Ok(buf.freeze())
            }
        }
    }
}

/// Codec matching `Framing::LengthPrefixed` (u32 big-endian length, no cap below u32)
pub fn length_prefix_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(u32::MAX as usize)
        .new_codec()
}
