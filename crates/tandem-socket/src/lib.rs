//! Tandem sockets — strict request/reply messaging.
//!
//! A [`Req`] socket sends a request and must read the reply before it may
//! send again. A [`Rep`] socket reads a request and must answer it before it
//! may read the next. Either kind can listen and dial at the same time and
//! talk to many peers over `tcp://`, `ipc://` and `inproc://` endpoints.
//!
//! ## Architecture
//!
//! - **Multiplexer**: per-socket connection set, shared inbound queue and
//!   round-robin pool of free peers
//! - **Req / Rep**: the two alternation state machines on top of it
//! - **Socket**: the async trait both implement
//!
//! ```no_run
//! use tandem_socket::{Msg, Rep, Req, Socket};
//!
//! # async fn demo() -> tandem_socket::TandemResult<()> {
//! let rep = Rep::new();
//! rep.listen("tcp://127.0.0.1:5555").await?;
//!
//! let req = Req::new();
//! req.dial("tcp://127.0.0.1:5555").await?;
//! req.send(Msg::from("NAME")).await?;
//!
//! let request = rep.recv().await?;
//! rep.send(request).await?;
//! let reply = req.recv().await?;
//! assert_eq!(reply, Msg::from("NAME"));
//! # Ok(())
//! # }
//! ```

pub mod config;
mod mux;
pub mod rep;
pub mod req;
pub mod socket;

pub use rep::Rep;
pub use req::Req;
pub use socket::Socket;
pub use tandem_types::{
    ConnectionId, Endpoint, Msg, Scheme, SocketConfig, SocketType, TandemError, TandemResult,
};
