//! A single framed channel to one peer.
//!
//! A [`Connection`] wraps any bidirectional byte stream (TCP, Unix socket or
//! an in-process pipe) and exchanges whole [`Msg`] values over it. It can be
//! split into a [`ConnectionReader`] and a [`ConnectionWriter`] so that reads
//! and writes progress independently.

use crate::codec::{encode_msg, FrameDecoder};
use crate::greeting::{Greeting, GREETING_LEN};
use bytes::{Bytes, BytesMut};
use std::io::ErrorKind;
use tandem_types::{ConnectionId, Msg, SocketType, TandemError, TandemResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

/// Bytes reserved in the read buffer before each physical read.
const READ_CHUNK: usize = 8 * 1024;

/// Any transport stream a connection can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

type BoxStream = Box<dyn ByteStream>;

/// Map an I/O error, folding the "peer went away" kinds into `PeerDisconnected`.
fn io_error(e: std::io::Error) -> TandemError {
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => TandemError::PeerDisconnected,
        _ => TandemError::Io(e),
    }
}

/// Read side of a connection. Buffers across reads until a message completes.
pub struct ConnectionReader {
    id: ConnectionId,
    inner: ReadHalf<BoxStream>,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl ConnectionReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Read the next message.
    ///
    /// Fails with `PeerDisconnected` on a clean EOF between messages and with
    /// `MalformedFrame` when the stream ends in the middle of one. Safe to
    /// cancel: partially read bytes stay buffered for the next call.
    pub async fn recv(&mut self) -> TandemResult<Msg> {
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.buf)? {
                return Ok(msg);
            }
            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Err(TandemError::PeerDisconnected);
                }
                return Err(TandemError::MalformedFrame(format!(
                    "stream ended mid-message ({} bytes buffered)",
                    self.buf.len()
                )));
            }
        }
    }

    /// Read exactly `n` bytes through the buffer.
    async fn read_raw(&mut self, n: usize) -> TandemResult<Bytes> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(TandemError::PeerDisconnected);
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    async fn fill(&mut self) -> TandemResult<usize> {
        self.buf.reserve(READ_CHUNK);
        self.inner.read_buf(&mut self.buf).await.map_err(io_error)
    }
}

/// Write side of a connection.
pub struct ConnectionWriter {
    id: ConnectionId,
    inner: WriteHalf<BoxStream>,
    closed: bool,
}

impl ConnectionWriter {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write one framed message and flush it.
    pub async fn send(&mut self, msg: &Msg) -> TandemResult<()> {
        self.write_raw(&encode_msg(msg)?).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> TandemResult<()> {
        if self.closed {
            return Err(TandemError::Closed);
        }
        self.inner.write_all(bytes).await.map_err(io_error)?;
        self.inner.flush().await.map_err(io_error)
    }

    /// Shut down the write side. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.shutdown().await {
            debug!(conn = %self.id, error = %e, "shutdown after close");
        }
    }
}

/// A single established channel to one peer.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl Connection {
    /// Wrap an established stream. `peer` is a human-readable label for logs.
    pub fn new(stream: impl ByteStream, peer: impl Into<String>, decoder: FrameDecoder) -> Self {
        let id = ConnectionId::new();
        let boxed: BoxStream = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        Self {
            id,
            peer: peer.into(),
            reader: ConnectionReader {
                id,
                inner: read_half,
                buf: BytesMut::with_capacity(READ_CHUNK),
                decoder,
            },
            writer: ConnectionWriter {
                id,
                inner: write_half,
                closed: false,
            },
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Label of the remote end (address, path or inproc name).
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.writer.closed
    }

    /// Exchange greetings and return the peer's socket type.
    ///
    /// Fails with `HandshakeFailed` if the peer is not a compatible Tandem
    /// socket.
    pub async fn handshake(&mut self, local: SocketType) -> TandemResult<SocketType> {
        self.writer.write_raw(&Greeting::new(local).encode()).await?;
        let raw = self.reader.read_raw(GREETING_LEN).await.map_err(|e| match e {
            TandemError::PeerDisconnected => {
                TandemError::HandshakeFailed("peer closed during greeting".to_string())
            }
            other => other,
        })?;
        let peer = Greeting::decode(&raw)?;
        Greeting::accept_peer(local, &peer)?;
        debug!(
            conn = %self.id,
            peer = %self.peer,
            peer_type = %peer.socket_type,
            "greeting complete"
        );
        Ok(peer.socket_type)
    }

    pub async fn send(&mut self, msg: &Msg) -> TandemResult<()> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> TandemResult<Msg> {
        if self.writer.closed {
            return Err(TandemError::Closed);
        }
        self.reader.recv().await
    }

    /// Close the connection. Idempotent; later operations fail with `Closed`.
    pub async fn close(&mut self) {
        self.writer.close().await;
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.writer.closed)
            .finish()
    }
}
