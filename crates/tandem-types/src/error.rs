//! Shared error types for Tandem sockets.

use thiserror::Error;

/// Top-level error type for every Tandem operation.
#[derive(Error, Debug)]
pub enum TandemError {
    /// The endpoint could not be bound (in use, malformed, already bound).
    #[error("could not bind {endpoint}: {reason}")]
    Bind {
        /// The endpoint as given by the caller.
        endpoint: String,
        /// Why binding failed.
        reason: String,
    },

    /// The peer could not be reached or the greeting failed.
    #[error("could not connect to {endpoint}: {reason}")]
    Connect {
        /// The endpoint as given by the caller.
        endpoint: String,
        /// Why connecting failed.
        reason: String,
    },

    /// The endpoint string is not `scheme://location`.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The caller broke the send/recv alternation of the socket.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The remote peer closed or died mid-exchange.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// Codec-level corruption on the byte stream.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A message declared a payload larger than the configured limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Declared payload size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// The connection greeting was rejected.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A deadline elapsed before the operation could complete.
    #[error("operation timed out")]
    Timeout,

    /// The socket's cancel signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The socket or connection has been closed.
    #[error("socket closed")]
    Closed,

    /// No connected peer became free before the send deadline.
    #[error("no available peer")]
    NoAvailablePeer,

    /// A message must carry at least one frame.
    #[error("message has no frames")]
    EmptyMessage,

    /// A configuration error occurred.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Tandem results.
pub type TandemResult<T> = Result<T, TandemError>;

impl TandemError {
    /// Build a [`TandemError::ProtocolViolation`].
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }

    /// Whether this error means the connection it came from is unusable.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::PeerDisconnected
                | Self::Io(_)
                | Self::MalformedFrame(_)
                | Self::MessageTooLarge { .. }
        )
    }
}
