//! Tandem wire layer — framing, connections and transports.
//!
//! Everything here is pattern-agnostic: it moves [`Msg`](tandem_types::Msg)
//! values between two ends of a byte stream and knows nothing about REQ/REP
//! alternation.
//!
//! ## Architecture
//!
//! - **codec**: frame-count + length-prefixed frames, decoded incrementally
//! - **greeting**: fixed 8-byte preamble exchanged after connect
//! - **Connection**: one framed, bidirectional channel to a peer
//! - **transport**: `listen`/`dial` for `tcp://`, `ipc://` and `inproc://`

pub mod codec;
pub mod connection;
pub mod greeting;
pub mod inproc;
pub mod transport;

pub use codec::{encode_msg, FrameDecoder};
pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use greeting::{Greeting, PROTOCOL_VERSION};
pub use transport::{dial, listen, Listener};
