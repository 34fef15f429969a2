//! Collector: a minimal remote end for the sensor stream
//!
//! Accepts one sender, optionally answers its first chunk with an
//! acknowledgment, and records everything until the sender closes.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use sensorlink_connect::{length_prefix_codec, Framing};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

const READ_CHUNK: usize = 64 * 1024;

/// How the collector reads and answers a sender
#[derive(Debug, Clone, Default)]
pub struct CollectorOptions {
    /// Expected frame delimiting
    pub framing: Framing,

    /// Reply sent after the first chunk or frame (None = stay silent)
    pub ack: Option<String>,
}

/// Everything one sender delivered
#[derive(Debug, Clone)]
pub struct Collected {
    pub peer: SocketAddr,

    /// Raw chunks as read (raw framing) or decoded frames (length-prefixed)
    pub frames: Vec<Bytes>,
}

impl Collected {
    /// All received bytes in arrival order
    pub fn concatenated(&self) -> Bytes {
        let mut all = BytesMut::with_capacity(self.total_bytes());
        for frame in &self.frames {
            all.extend_from_slice(frame);
        }
        all.freeze()
    }

    pub fn total_bytes(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}

/// Listening collector
pub struct Collector {
    listener: TcpListener,
    options: CollectorOptions,
}

impl Collector {
    pub async fn bind(address: impl ToSocketAddrs, options: CollectorOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        info!(local = %listener.local_addr()?, framing = ?options.framing, "Collector listening");
        Ok(Self { listener, options })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one sender and read until it closes
    pub async fn collect_one(&self) -> io::Result<Collected> {
        self.collect_one_with(|_, _| {}).await
    }

    /// Accept one sender, calling `on_frame(index, bytes)` for each chunk or frame
    pub async fn collect_one_with<F>(&self, mut on_frame: F) -> io::Result<Collected>
    where
        F: FnMut(usize, &Bytes),
    {
        let (socket, peer) = self.listener.accept().await?;
        info!(peer = %peer, "Sender connected");

        let (mut reader, mut writer) = socket.into_split();
        let mut frames = Vec::new();
        let mut pending_ack = self.options.ack.as_deref();

        match self.options.framing {
            Framing::Raw => loop {
                let mut buf = BytesMut::with_capacity(READ_CHUNK);
                if reader.read_buf(&mut buf).await? == 0 {
                    break;
                }
                let chunk = buf.freeze();
                on_frame(frames.len(), &chunk);
                frames.push(chunk);
                send_ack(&mut writer, &mut pending_ack).await?;
            },
            Framing::LengthPrefixed => {
                let mut framed = FramedRead::new(reader, length_prefix_codec());
                while let Some(frame) = framed.next().await {
                    let frame = frame?.freeze();
                    on_frame(frames.len(), &frame);
                    frames.push(frame);
                    send_ack(&mut writer, &mut pending_ack).await?;
                }
            }
        }

        info!(peer = %peer, frames = frames.len(), "Sender closed");
        Ok(Collected { peer, frames })
    }
}

/// Write the acknowledgment once, after the first chunk
async fn send_ack(writer: &mut OwnedWriteHalf, pending: &mut Option<&str>) -> io::Result<()> {
    if let Some(ack) = pending.take() {
        writer.write_all(ack.as_bytes()).await?;
        writer.flush().await?;
        debug!(bytes = ack.len(), "Acknowledgment sent");
    }
    Ok(())
}
