//! Connection greeting.
//!
//! Right after a connection is established both ends write an 8-byte
//! greeting and read the peer's: the magic `TNDM`, the protocol version, the
//! sender's socket type and two reserved zero bytes.

use tandem_types::{SocketType, TandemError, TandemResult};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Encoded greeting length.
pub const GREETING_LEN: usize = 8;

const MAGIC: &[u8; 4] = b"TNDM";

/// The preamble one end announces to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    pub socket_type: SocketType,
}

impl Greeting {
    /// Greeting for a local socket of the given type.
    pub fn new(socket_type: SocketType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            socket_type,
        }
    }

    pub fn encode(&self) -> [u8; GREETING_LEN] {
        let mut out = [0u8; GREETING_LEN];
        out[..4].copy_from_slice(MAGIC);
        out[4] = self.version;
        out[5] = self.socket_type.as_byte();
        out
    }

    pub fn decode(bytes: &[u8]) -> TandemResult<Self> {
        if bytes.len() != GREETING_LEN || &bytes[..4] != MAGIC {
            return Err(TandemError::HandshakeFailed(
                "peer did not send a Tandem greeting".to_string(),
            ));
        }
        let socket_type = SocketType::from_byte(bytes[5]).ok_or_else(|| {
            TandemError::HandshakeFailed(format!("unknown peer socket type {}", bytes[5]))
        })?;
        Ok(Self {
            version: bytes[4],
            socket_type,
        })
    }

    /// Check that a peer's greeting is acceptable to a local socket of type `local`.
    pub fn accept_peer(local: SocketType, peer: &Greeting) -> TandemResult<()> {
        if peer.version != PROTOCOL_VERSION {
            return Err(TandemError::HandshakeFailed(format!(
                "protocol version mismatch: local={PROTOCOL_VERSION}, remote={}",
                peer.version
            )));
        }
        if !local.is_compatible(peer.socket_type) {
            return Err(TandemError::HandshakeFailed(format!(
                "{local} socket cannot talk to a {} peer",
                peer.socket_type
            )));
        }
        Ok(())
    }
}
