//! The common socket interface.

use async_trait::async_trait;
use tandem_types::{Endpoint, Msg, SocketType, TandemResult};

/// Operations shared by every Tandem socket.
///
/// All methods take `&self`, so a socket can be shared through an `Arc` and
/// driven from several tasks. Calls that would break the socket's send/recv
/// alternation fail with `ProtocolViolation` without touching its state.
#[async_trait]
pub trait Socket: Send + Sync {
    /// The socket's pattern role.
    fn socket_type(&self) -> SocketType;

    /// Bind to an endpoint and accept peers on it. At most once per socket.
    async fn listen(&self, endpoint: &str) -> TandemResult<()>;

    /// Connect to a listening peer. May be called any number of times.
    async fn dial(&self, endpoint: &str) -> TandemResult<()>;

    /// Send one message.
    async fn send(&self, msg: Msg) -> TandemResult<()>;

    /// Receive one message.
    async fn recv(&self) -> TandemResult<Msg>;

    /// The resolved listening endpoint, `None` until `listen` succeeds.
    fn addr(&self) -> Option<Endpoint>;

    /// Close every connection and the listener. Idempotent.
    async fn close(&self) -> TandemResult<()>;
}
