//! Requester socket.
//!
//! A REQ alternates strictly: `send` a request, then `recv` its reply. Each
//! request goes to the next free peer in round-robin order, and the reply is
//! only accepted from that same connection.

use crate::mux::{self, Inbound, Multiplexer};
use crate::socket::Socket;
use async_trait::async_trait;
use tandem_types::{
    ConnectionId, Endpoint, Msg, SocketConfig, SocketType, TandemError, TandemResult,
};
use tokio::sync::{watch, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReqState {
    Idle,
    AwaitingReply(ConnectionId),
}

/// The requesting side of a request/reply exchange.
pub struct Req {
    mux: Multiplexer,
    state: Mutex<ReqState>,
}

impl Req {
    /// A REQ socket with default settings.
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    pub fn with_config(config: SocketConfig) -> Self {
        Self::build(config, None)
    }

    /// A REQ socket whose blocked and future calls fail with `Cancelled` once
    /// `cancel` turns true.
    pub fn with_cancel(config: SocketConfig, cancel: watch::Receiver<bool>) -> Self {
        Self::build(config, Some(cancel))
    }

    fn build(config: SocketConfig, cancel: Option<watch::Receiver<bool>>) -> Self {
        Self {
            mux: Multiplexer::new(SocketType::Req, config, cancel),
            state: Mutex::new(ReqState::Idle),
        }
    }

    /// Number of live connections.
    pub fn peer_count(&self) -> usize {
        self.mux.peer_count()
    }
}

impl Default for Req {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Socket for Req {
    fn socket_type(&self) -> SocketType {
        SocketType::Req
    }

    async fn listen(&self, endpoint: &str) -> TandemResult<()> {
        self.mux.listen(endpoint).await.map(|_| ())
    }

    async fn dial(&self, endpoint: &str) -> TandemResult<()> {
        self.mux.dial(endpoint).await.map(|_| ())
    }

    async fn send(&self, msg: Msg) -> TandemResult<()> {
        self.mux.ensure_open()?;
        let mut state = self.state.lock().await;
        if let ReqState::AwaitingReply(_) = *state {
            return Err(TandemError::protocol(
                "REQ: cannot send while a reply is outstanding",
            ));
        }
        self.mux.check_outgoing(&msg)?;

        let deadline = mux::deadline(self.mux.config().send_timeout());
        let (token, permit) = self.mux.acquire_peer(deadline).await?;
        permit.send(msg);
        let id = token.commit();
        *state = ReqState::AwaitingReply(id);
        debug!(conn = %id, "request sent");
        Ok(())
    }

    async fn recv(&self) -> TandemResult<Msg> {
        self.mux.ensure_open()?;
        let mut state = self.state.lock().await;
        let ReqState::AwaitingReply(awaited) = *state else {
            return Err(TandemError::protocol("REQ: no request to receive a reply for"));
        };

        let deadline = mux::deadline(self.mux.config().recv_timeout());
        loop {
            match self.mux.next_inbound(deadline).await? {
                Inbound::Message(id, msg) if id == awaited => {
                    *state = ReqState::Idle;
                    self.mux.release_peer(id);
                    return Ok(msg);
                }
                Inbound::Disconnected(id) if id == awaited => {
                    *state = ReqState::Idle;
                    debug!(conn = %id, "peer left before replying");
                    return Err(TandemError::PeerDisconnected);
                }
                Inbound::Message(id, _) => {
                    debug!(conn = %id, "discarding stale reply");
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
    use crate::rep::Rep;
    use std::time::Duration;

    fn inproc(prefix: &str) -> String {
        format!("inproc://{prefix}-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_recv_before_send_is_violation() {
        let req = Req::new();
        assert!(matches!(
            req.recv().await,
            Err(TandemError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_without_peers_fails_fast() {
        let req = Req::with_config(SocketConfig {
            send_timeout_ms: Some(0),
            ..Default::default()
        });
        assert!(matches!(
            req.send(Msg::from("hello")).await,
            Err(TandemError::NoAvailablePeer)
        ));
        // State is untouched: recv is still a violation.
        assert!(matches!(
            req.recv().await,
            Err(TandemError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_double_send_is_violation() {
        let rep = Rep::new();
        let endpoint = inproc("req-double");
        rep.listen(&endpoint).await.unwrap();
        let req = Req::new();
        req.dial(&endpoint).await.unwrap();

        req.send(Msg::from("one")).await.unwrap();
        assert!(matches!(
            req.send(Msg::from("two")).await,
            Err(TandemError::ProtocolViolation(_))
        ));

        let request = rep.recv().await.unwrap();
        assert_eq!(request, Msg::from("one"));
        rep.send(Msg::from("ack")).await.unwrap();
        assert_eq!(req.recv().await.unwrap(), Msg::from("ack"));
    }

    #[tokio::test]
    async fn test_recv_timeout_keeps_awaiting() {
        let rep = Rep::new();
        let endpoint = inproc("req-timeout");
        rep.listen(&endpoint).await.unwrap();
        let req = Req::with_config(SocketConfig {
            recv_timeout_ms: Some(50),
            ..Default::default()
        });
        req.dial(&endpoint).await.unwrap();

        req.send(Msg::from("slow")).await.unwrap();
        assert!(matches!(req.recv().await, Err(TandemError::Timeout)));
        assert!(matches!(
            req.send(Msg::from("again")).await,
            Err(TandemError::ProtocolViolation(_))
        ));

        rep.recv().await.unwrap();
        rep.send(Msg::from("late")).await.unwrap();
        assert_eq!(req.recv().await.unwrap(), Msg::from("late"));
    }

    #[tokio::test]
    async fn test_dropped_recv_future_keeps_state() {
        let rep = Rep::new();
        let endpoint = inproc("req-cancel-safe");
        rep.listen(&endpoint).await.unwrap();
        let req = Req::new();
        req.dial(&endpoint).await.unwrap();
        req.send(Msg::from("ping")).await.unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(30), req.recv()).await;
        assert!(abandoned.is_err());

        rep.recv().await.unwrap();
        rep.send(Msg::from("pong")).await.unwrap();
        assert_eq!(req.recv().await.unwrap(), Msg::from("pong"));
    }

    #[tokio::test]
    async fn test_oversized_request_fails_at_send() {
        let config = SocketConfig {
            max_message_size: 1024,
            ..Default::default()
        };
        let rep = Rep::with_config(config.clone());
        let endpoint = inproc("req-oversize");
        rep.listen(&endpoint).await.unwrap();
        let req = Req::with_config(config);
        req.dial(&endpoint).await.unwrap();

        match req.send(Msg::from(vec![0u8; 1025])).await {
            Err(TandemError::MessageTooLarge { size, max }) => {
                assert_eq!((size, max), (1025, 1024));
            }
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
        // Nothing went out and the connection survives.
        assert!(matches!(
            req.recv().await,
            Err(TandemError::ProtocolViolation(_))
        ));
        req.send(Msg::from(vec![7u8; 1024])).await.unwrap();
        let request = rep.recv().await.unwrap();
        assert_eq!(request.payload_len(), 1024);
        rep.send(Msg::from("fits")).await.unwrap();
        assert_eq!(req.recv().await.unwrap(), Msg::from("fits"));
        assert_eq!(req.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_socket_rejects_everything() {
        let req = Req::new();
        req.close().await.unwrap();
        req.close().await.unwrap();
        assert!(matches!(req.send(Msg::from("x")).await, Err(TandemError::Closed)));
        assert!(matches!(req.recv().await, Err(TandemError::Closed)));
        assert!(matches!(
            req.dial("inproc://anything").await,
            Err(TandemError::Closed)
        ));
    }
}
