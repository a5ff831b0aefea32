//! Replier socket.
//!
//! A REP alternates strictly the other way round: `recv` a request, then
//! `send` its reply, which goes back on the connection the request came from.
//! Requests from all connected peers are served in arrival order.

use crate::mux::{self, Inbound, Multiplexer};
use crate::socket::Socket;
use async_trait::async_trait;
use tandem_types::{
    ConnectionId, Endpoint, Msg, SocketConfig, SocketType, TandemError, TandemResult,
};
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// The replying side of a request/reply exchange.
pub struct Rep {
    mux: Multiplexer,
    /// Connection owed a reply, if any.
    current: Mutex<Option<ConnectionId>>,
}

impl Rep {
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    pub fn with_config(config: SocketConfig) -> Self {
        Self::build(config, None)
    }

    /// A REP socket whose blocked and future calls fail with `Cancelled` once
    /// `cancel` turns true.
    pub fn with_cancel(config: SocketConfig, cancel: watch::Receiver<bool>) -> Self {
        Self::build(config, Some(cancel))
    }

    fn build(config: SocketConfig, cancel: Option<watch::Receiver<bool>>) -> Self {
        Self {
            mux: Multiplexer::new(SocketType::Rep, config, cancel),
            current: Mutex::new(None),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.mux.peer_count()
    }
}

impl Default for Rep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Socket for Rep {
    fn socket_type(&self) -> SocketType {
        SocketType::Rep
    }

    async fn listen(&self, endpoint: &str) -> TandemResult<()> {
        self.mux.listen(endpoint).await.map(|_| ())
    }

    async fn dial(&self, endpoint: &str) -> TandemResult<()> {
        self.mux.dial(endpoint).await.map(|_| ())
    }

    async fn send(&self, msg: Msg) -> TandemResult<()> {
        self.mux.ensure_open()?;
        let mut current = self.current.lock().await;
        let Some(id) = *current else {
            return Err(TandemError::protocol("REP: no request to reply to"));
        };
        self.mux.check_outgoing(&msg)?;

        let deadline = mux::deadline(self.mux.config().send_timeout());
        match self.mux.reserve_outbound(id, deadline).await {
            Ok(permit) => {
                permit.send(msg);
                self.mux.open_gate(id);
                *current = None;
                debug!(conn = %id, "reply sent");
                Ok(())
            }
            Err(TandemError::PeerDisconnected) => {
                *current = None;
                debug!(conn = %id, "requester left; dropping reply");
                Err(TandemError::PeerDisconnected)
            }
            Err(e) => Err(e),
        }
    }

    async fn recv(&self) -> TandemResult<Msg> {
        self.mux.ensure_open()?;
        let mut current = self.current.lock().await;
        if current.is_some() {
            return Err(TandemError::protocol(
                "REP: cannot receive before replying to the current request",
            ));
        }

        let deadline = mux::deadline(self.mux.config().recv_timeout());
        loop {
            match self.mux.next_inbound(deadline).await? {
                Inbound::Message(id, msg) if self.mux.is_connected(id) => {
                    *current = Some(id);
                    return Ok(msg);
                }
                Inbound::Message(id, _) => {
                    debug!(conn = %id, "dropping request from departed peer");
                }
                Inbound::Disconnected(_) => {}
            }
        }
    }

    fn addr(&self) -> Option<Endpoint> {
        self.mux.local_endpoint()
    }

    async fn close(&self) -> TandemResult<()> {
        self.mux.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::req::Req;

    fn inproc(prefix: &str) -> String {
        format!("inproc://{prefix}-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_send_before_recv_is_violation() {
        let rep = Rep::new();
        assert!(matches!(
            rep.send(Msg::from("nobody asked")).await,
            Err(TandemError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_double_recv_is_violation() {
        let rep = Rep::new();
        let endpoint = inproc("rep-double");
        rep.listen(&endpoint).await.unwrap();
        let req = Req::new();
        req.dial(&endpoint).await.unwrap();
        req.send(Msg::from("q")).await.unwrap();

        assert_eq!(rep.recv().await.unwrap(), Msg::from("q"));
        assert!(matches!(
            rep.recv().await,
            Err(TandemError::ProtocolViolation(_))
        ));
        rep.send(Msg::from("a")).await.unwrap();
        assert_eq!(req.recv().await.unwrap(), Msg::from("a"));
    }

    #[tokio::test]
    async fn test_listen_twice_is_bind_error() {
        let rep = Rep::new();
        rep.listen(&inproc("rep-once")).await.unwrap();
        assert!(matches!(
            rep.listen(&inproc("rep-twice")).await,
            Err(TandemError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let rep = Rep::with_config(SocketConfig {
            recv_timeout_ms: Some(20),
            ..Default::default()
        });
        rep.listen(&inproc("rep-timeout")).await.unwrap();
        assert!(matches!(rep.recv().await, Err(TandemError::Timeout)));
        // Still ready for a request.
        assert!(matches!(
            rep.send(Msg::from("x")).await,
            Err(TandemError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_reply_keeps_request_pending() {
        let config = SocketConfig {
            max_frames: 2,
            ..Default::default()
        };
        let rep = Rep::with_config(config.clone());
        let endpoint = inproc("rep-oversize");
        rep.listen(&endpoint).await.unwrap();
        let req = Req::with_config(config);
        req.dial(&endpoint).await.unwrap();
        req.send(Msg::from("q")).await.unwrap();
        rep.recv().await.unwrap();

        assert!(matches!(
            rep.send(Msg::from_frames(["a", "b", "c"]).unwrap()).await,
            Err(TandemError::MalformedFrame(_))
        ));
        // Still owes the reply on the same connection.
        rep.send(Msg::from_frames(["a", "b"]).unwrap()).await.unwrap();
        assert_eq!(req.recv().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rep_can_dial_a_listening_req() {
        let req = Req::new();
        let endpoint = inproc("req-listens");
        req.listen(&endpoint).await.unwrap();
        let rep = Rep::new();
        rep.dial(&endpoint).await.unwrap();

        // Blocks until the accepted connection has been greeted.
        req.send(Msg::from("reverse")).await.unwrap();
        let request = rep.recv().await.unwrap();
        rep.send(request).await.unwrap();
        assert_eq!(req.recv().await.unwrap(), Msg::from("reverse"));
    }
}
