//! Socket roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The exchange role of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    /// Requester: send, then receive, repeat.
    Req,
    /// Replier: receive from any peer, reply to that peer.
    Rep,
}

impl SocketType {
    /// Byte used for this role in the connection greeting.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Req => 3,
            Self::Rep => 4,
        }
    }

    /// Inverse of [`SocketType::as_byte`].
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            3 => Some(Self::Req),
            4 => Some(Self::Rep),
            _ => None,
        }
    }

    /// Whether a socket of this role may talk to a peer of role `peer`.
    pub fn is_compatible(self, peer: SocketType) -> bool {
        matches!((self, peer), (Self::Req, Self::Rep) | (Self::Rep, Self::Req))
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Req => f.write_str("REQ"),
            Self::Rep => f.write_str("REP"),
        }
    }
}
