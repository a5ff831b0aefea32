//! Socket configuration.
//!
//! All durations are stored as milliseconds so the struct maps directly onto a
//! TOML table:
//!
//! ```toml
//! queue_capacity = 1000
//! recv_timeout_ms = 5000
//! ```

use crate::error::{TandemError, TandemResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum single message size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Maximum number of frames in one message.
pub const DEFAULT_MAX_FRAMES: u32 = 4096;

/// Default bound of the shared inbound queue and of each outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default time allowed for the connection greeting.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Per-socket tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Bound on queued inbound messages; producers wait when it is full.
    pub queue_capacity: usize,
    /// Deadline for `send`. `None` blocks until a peer is free; `Some(0)` never blocks.
    pub send_timeout_ms: Option<u64>,
    /// Deadline for `recv`. `None` blocks until a message arrives.
    pub recv_timeout_ms: Option<u64>,
    /// Deadline for establishing a dialed connection, greeting included.
    pub dial_timeout_ms: Option<u64>,
    /// Deadline for the greeting on accepted connections.
    pub handshake_timeout_ms: u64,
    /// Largest accepted total payload per message.
    pub max_message_size: u64,
    /// Largest accepted frame count per message.
    pub max_frames: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout_ms: None,
            recv_timeout_ms: None,
            dial_timeout_ms: None,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl SocketConfig {
    /// Parse a TOML document into a validated config.
    pub fn from_toml_str(s: &str) -> TandemResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| TandemError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the sockets cannot work with.
    pub fn validate(&self) -> TandemResult<()> {
        if self.queue_capacity == 0 {
            return Err(TandemError::Config("queue_capacity must be > 0".into()));
        }
        if self.max_frames == 0 {
            return Err(TandemError::Config("max_frames must be > 0".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(TandemError::Config(
                "handshake_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_ms.map(Duration::from_millis)
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
