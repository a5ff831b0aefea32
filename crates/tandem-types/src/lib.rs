//! Core types for Tandem request-reply sockets.
//!
//! This crate defines the data structures shared by the wire layer and the
//! socket state machines: messages, endpoints, socket roles, configuration and
//! the error taxonomy. It contains no I/O.

pub mod config;
pub mod connection_id;
pub mod endpoint;
pub mod error;
pub mod msg;
pub mod socket_type;

pub use config::SocketConfig;
pub use connection_id::ConnectionId;
pub use endpoint::{Endpoint, Scheme};
pub use error::{TandemError, TandemResult};
pub use msg::Msg;
pub use socket_type::SocketType;
