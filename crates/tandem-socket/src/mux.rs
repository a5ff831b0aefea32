//! Connection multiplexer. Folds many connections into one socket.
//!
//! Every attached connection gets a link task that decodes inbound messages
//! into a single bounded queue tagged with the connection's id, and drains the
//! connection's own outbound queue onto the wire. Listening sockets run an
//! accept task that greets and attaches each new peer in its own task.
//!
//! Ordering: messages from one connection keep their order. Messages from
//! different connections interleave in the order their decoding completes;
//! there is no ordering across peers.
//!
//! REQ sockets also keep a FIFO of free peer ids. Taking the head and putting
//! it back after the reply gives round-robin over the live connections, and a
//! connection whose id is checked out is never picked for a new request.
//! Ids of departed peers stay in the FIFO until they reach the head and are
//! skipped, so it holds at most one stale id per connection ever attached.
//!
//! A departing connection only reports `Inbound::Disconnected` when a REQ is
//! waiting for its reply. Nobody else reads that event.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;
use tandem_types::{
    ConnectionId, Endpoint, Msg, SocketConfig, SocketType, TandemError, TandemResult,
};
use tandem_wire::{
    transport, Connection, ConnectionReader, ConnectionWriter, FrameDecoder, Listener,
};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long a closing link may spend flushing already committed messages.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// An event surfaced by the shared inbound queue.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A decoded message and the connection it arrived on.
    Message(ConnectionId, Msg),
    /// A connection that owed a reply is gone.
    Disconnected(ConnectionId),
}

/// Side-table entry for one live connection.
struct PeerLink {
    peer: String,
    outbound: mpsc::Sender<Msg>,
    /// REP only: one permit per sent reply lets the link read the next request.
    gate: Option<Arc<Semaphore>>,
    /// REQ only: a request is in flight on this connection.
    awaited: AtomicBool,
}

/// State shared between the socket handle and its background tasks.
struct Shared {
    socket_type: SocketType,
    config: SocketConfig,
    peers: DashMap<ConnectionId, PeerLink>,
    inbound: mpsc::Sender<Inbound>,
    free: mpsc::UnboundedSender<ConnectionId>,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Remember a background task so `close` can wait for it.
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_closed() {
            handle.abort();
            return;
        }
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Register a greeted connection and start its link task.
    fn attach(self: &Arc<Self>, conn: Connection) -> TandemResult<ConnectionId> {
        let id = conn.id();
        let peer = conn.peer().to_string();
        let (outbound, outbound_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let gate = (self.socket_type == SocketType::Rep).then(|| Arc::new(Semaphore::new(0)));

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            if self.is_closed() {
                return Err(TandemError::Closed);
            }
            self.peers.insert(
                id,
                PeerLink {
                    peer: peer.clone(),
                    outbound,
                    gate: gate.clone(),
                    awaited: AtomicBool::new(false),
                },
            );
            let (reader, writer) = conn.into_split();
            tasks.retain(|h| !h.is_finished());
            tasks.push(tokio::spawn(run_link(
                Arc::clone(self),
                id,
                reader,
                writer,
                outbound_rx,
                gate,
            )));
        }

        if self.socket_type == SocketType::Req {
            let _ = self.free.send(id);
        }
        info!(socket = %self.socket_type, conn = %id, peer = %peer, "peer attached");
        Ok(id)
    }
}

/// A checked-out free-peer id. Goes back to the pool on drop unless committed.
pub(crate) struct PeerToken {
    id: ConnectionId,
    pool: mpsc::UnboundedSender<ConnectionId>,
    armed: bool,
}

impl PeerToken {
    /// Keep the peer checked out (a request is now in flight on it).
    pub(crate) fn commit(mut self) -> ConnectionId {
        self.armed = false;
        self.id
    }

    /// Forget a peer that turned out to be dead.
    fn discard(mut self) {
        self.armed = false;
    }
}

impl Drop for PeerToken {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.pool.send(self.id);
        }
    }
}

/// Per-socket connection set, inbound queue and free-peer pool.
pub(crate) struct Multiplexer {
    shared: Arc<Shared>,
    inbound_rx: Mutex<mpsc::Receiver<Inbound>>,
    free_rx: Mutex<mpsc::UnboundedReceiver<ConnectionId>>,
    local: OnceLock<Endpoint>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Multiplexer {
    pub(crate) fn new(
        socket_type: SocketType,
        config: SocketConfig,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Self {
        let (inbound, inbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (free, free_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                socket_type,
                config,
                peers: DashMap::new(),
                inbound,
                free,
                shutdown,
                tasks: StdMutex::new(Vec::new()),
            }),
            inbound_rx: Mutex::new(inbound_rx),
            free_rx: Mutex::new(free_rx),
            local: OnceLock::new(),
            cancel,
        }
    }

    pub(crate) fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    /// The resolved listening endpoint, if `listen` succeeded.
    pub(crate) fn local_endpoint(&self) -> Option<Endpoint> {
        self.local.get().cloned()
    }

    pub(crate) fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    pub(crate) fn is_connected(&self, id: ConnectionId) -> bool {
        self.shared.peers.contains_key(&id)
    }

    /// Reject a message the peer's decoder would refuse, before it is queued.
    pub(crate) fn check_outgoing(&self, msg: &Msg) -> TandemResult<()> {
        FrameDecoder::from_config(&self.shared.config).check(msg)
    }

    /// Fail fast if the socket is closed or its cancel signal has fired.
    pub(crate) fn ensure_open(&self) -> TandemResult<()> {
        if self.shared.is_closed() {
            return Err(TandemError::Closed);
        }
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(TandemError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once the socket is closed or cancelled.
    async fn interrupted(&self) -> TandemError {
        let mut shutdown = self.shared.shutdown.subscribe();
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = closed(&mut shutdown) => TandemError::Closed,
            _ = cancelled(&mut cancel) => TandemError::Cancelled,
        }
    }

    /// Bind `addr` and start accepting peers. Only one listen per socket.
    pub(crate) async fn listen(&self, addr: &str) -> TandemResult<Endpoint> {
        self.ensure_open()?;
        let already_bound = || TandemError::Bind {
            endpoint: addr.to_string(),
            reason: "socket is already bound".to_string(),
        };
        let endpoint: Endpoint = addr.parse().map_err(|e: TandemError| TandemError::Bind {
            endpoint: addr.to_string(),
            reason: e.to_string(),
        })?;
        if self.local.get().is_some() {
            return Err(already_bound());
        }

        let listener = transport::listen(&endpoint, &self.shared.config).await?;
        let resolved = listener.endpoint().clone();
        if self.local.set(resolved.clone()).is_err() {
            return Err(already_bound());
        }
        let handle = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener));
        self.shared.track(handle);
        Ok(resolved)
    }

    /// Connect to `addr`, greet the peer and attach the connection.
    pub(crate) async fn dial(&self, addr: &str) -> TandemResult<ConnectionId> {
        self.ensure_open()?;
        let endpoint: Endpoint = addr.parse().map_err(|e: TandemError| TandemError::Connect {
            endpoint: addr.to_string(),
            reason: e.to_string(),
        })?;
        let deadline = deadline(self.shared.config.dial_timeout());

        let connect = async {
            let mut conn = transport::dial(&endpoint, &self.shared.config).await?;
            let greeting = tokio::time::timeout(
                self.shared.config.handshake_timeout(),
                conn.handshake(self.shared.socket_type),
            )
            .await;
            match greeting {
                Ok(Ok(_)) => Ok(conn),
                Ok(Err(e)) => Err(TandemError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }),
                Err(_) => Err(TandemError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "greeting timed out".to_string(),
                }),
            }
        };

        let conn = tokio::select! {
            biased;
            err = self.interrupted() => return Err(err),
            conn = connect => conn?,
            _ = expired(deadline) => return Err(TandemError::Timeout),
        };
        let id = self.shared.attach(conn)?;
        debug!(endpoint = %endpoint, conn = %id, "dialed peer");
        Ok(id)
    }

    /// Pull the next event from the shared inbound queue.
    ///
    /// Cancel-safe: an event is only removed from the queue when it is returned.
    pub(crate) async fn next_inbound(&self, deadline: Option<Instant>) -> TandemResult<Inbound> {
        self.ensure_open()?;
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            err = self.interrupted() => Err(err),
            item = rx.recv() => item.ok_or(TandemError::Closed),
            _ = expired(deadline) => Err(TandemError::Timeout),
        }
    }

    /// Check out the next free peer and reserve room in its outbound queue.
    ///
    /// Fails with `NoAvailablePeer` if nothing frees up before `deadline`.
    pub(crate) async fn acquire_peer(
        &self,
        deadline: Option<Instant>,
    ) -> TandemResult<(PeerToken, mpsc::OwnedPermit<Msg>)> {
        self.ensure_open()?;
        let mut free = self.free_rx.lock().await;
        loop {
            let id = tokio::select! {
                biased;
                err = self.interrupted() => return Err(err),
                id = free.recv() => id.ok_or(TandemError::Closed)?,
                _ = expired(deadline) => return Err(TandemError::NoAvailablePeer),
            };
            let token = PeerToken {
                id,
                pool: self.shared.free.clone(),
                armed: true,
            };
            let Some(outbound) = self.outbound(id) else {
                debug!(conn = %id, "skipping departed peer");
                token.discard();
                continue;
            };
            let permit = tokio::select! {
                biased;
                err = self.interrupted() => return Err(err),
                permit = outbound.reserve_owned() => permit,
                _ = expired(deadline) => return Err(TandemError::NoAvailablePeer),
            };
            match permit {
                Ok(permit) if self.mark_awaited(id) => return Ok((token, permit)),
                _ => {
                    debug!(conn = %id, "skipping departed peer");
                    token.discard();
                }
            }
        }
    }

    /// Flag a live peer as owing a reply, so its departure is reported.
    fn mark_awaited(&self, id: ConnectionId) -> bool {
        match self.shared.peers.get(&id) {
            Some(link) => {
                link.awaited.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Put a peer back at the end of the free queue.
    pub(crate) fn release_peer(&self, id: ConnectionId) {
        if let Some(link) = self.shared.peers.get(&id) {
            link.awaited.store(false, Ordering::Release);
            let _ = self.shared.free.send(id);
        }
    }

    /// Reserve room in one specific connection's outbound queue.
    pub(crate) async fn reserve_outbound(
        &self,
        id: ConnectionId,
        deadline: Option<Instant>,
    ) -> TandemResult<mpsc::OwnedPermit<Msg>> {
        self.ensure_open()?;
        let outbound = self.outbound(id).ok_or(TandemError::PeerDisconnected)?;
        tokio::select! {
            biased;
            err = self.interrupted() => Err(err),
            permit = outbound.reserve_owned() => permit.map_err(|_| TandemError::PeerDisconnected),
            _ = expired(deadline) => Err(TandemError::Timeout),
        }
    }

    /// Let a REP connection deliver its next request.
    pub(crate) fn open_gate(&self, id: ConnectionId) {
        if let Some(link) = self.shared.peers.get(&id) {
            if let Some(gate) = &link.gate {
                gate.add_permits(1);
            }
        }
    }

    fn outbound(&self, id: ConnectionId) -> Option<mpsc::Sender<Msg>> {
        self.shared
            .peers
            .get(&id)
            .map(|link| link.outbound.clone())
    }

    /// Close every connection and the listener, waking blocked callers.
    ///
    /// Only the first call does any work; later and concurrent calls return
    /// immediately.
    pub(crate) async fn close(&self) -> TandemResult<()> {
        if self.shared.shutdown.send_replace(true) {
            return Ok(());
        }
        info!(
            socket = %self.shared.socket_type,
            peers = self.shared.peers.len(),
            "closing socket"
        );
        loop {
            let batch = {
                let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(error = %e, "socket task panicked");
                    }
                }
            }
        }
        self.shared.peers.clear();
        Ok(())
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

/// Absolute deadline for an optional relative timeout.
pub(crate) fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Resolves once the shutdown flag is set.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending().await
}

/// Accept peers until the socket closes. Owns the listener.
async fn accept_loop(shared: Arc<Shared>, mut listener: Listener) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = closed(&mut shutdown) => break,
        };
        match accepted {
            Ok(conn) => {
                debug!(peer = %conn.peer(), endpoint = %listener.endpoint(), "accepted connection");
                let handle = tokio::spawn(greet_and_attach(Arc::clone(&shared), conn));
                shared.track(handle);
            }
            Err(e) => {
                warn!(endpoint = %listener.endpoint(), error = %e, "accept error");
                tokio::select! {
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    _ = closed(&mut shutdown) => break,
                }
            }
        }
    }
    debug!(endpoint = %listener.endpoint(), "accept loop stopped");
}

async fn greet_and_attach(shared: Arc<Shared>, mut conn: Connection) {
    let mut shutdown = shared.shutdown.subscribe();
    let greeting = tokio::select! {
        greeting = tokio::time::timeout(
            shared.config.handshake_timeout(),
            conn.handshake(shared.socket_type),
        ) => greeting,
        _ = closed(&mut shutdown) => return,
    };
    match greeting {
        Ok(Ok(_)) => {
            if let Err(e) = shared.attach(conn) {
                debug!(error = %e, "dropping connection accepted during close");
            }
        }
        Ok(Err(e)) => warn!(peer = %conn.peer(), error = %e, "rejected inbound connection"),
        Err(_) => warn!(peer = %conn.peer(), "inbound greeting timed out"),
    }
}

/// Drive one connection until it fails, the peer leaves or the socket closes.
async fn run_link(
    shared: Arc<Shared>,
    id: ConnectionId,
    mut reader: ConnectionReader,
    mut writer: ConnectionWriter,
    mut outbound: mpsc::Receiver<Msg>,
    gate: Option<Arc<Semaphore>>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    let close_bound = async {
        closed(&mut shared.shutdown.subscribe()).await;
        tokio::time::sleep(CLOSE_LINGER * 2).await;
    };
    let outcome = tokio::select! {
        r = read_loop(&shared, id, &mut reader, gate.as_deref()) => r,
        r = write_loop(&mut writer, &mut outbound, shared.shutdown.subscribe()) => r,
        _ = close_bound => Ok(()),
    };
    let (peer, awaited) = shared
        .peers
        .remove(&id)
        .map(|(_, link)| (link.peer, link.awaited.load(Ordering::Acquire)))
        .unwrap_or_default();
    match outcome {
        Ok(()) | Err(TandemError::PeerDisconnected) => {
            debug!(conn = %id, peer = %peer, "connection closed")
        }
        Err(e) if e.is_disconnect() => {
            warn!(conn = %id, peer = %peer, error = %e, "connection failed")
        }
        Err(e) => debug!(conn = %id, peer = %peer, error = %e, "link stopped"),
    }
    writer.close().await;

    if awaited && !shared.is_closed() {
        tokio::select! {
            _ = shared.inbound.send(Inbound::Disconnected(id)) => {}
            _ = closed(&mut shutdown) => {}
        }
    }
}

async fn read_loop(
    shared: &Shared,
    id: ConnectionId,
    reader: &mut ConnectionReader,
    gate: Option<&Semaphore>,
) -> TandemResult<()> {
    let mut early = None;
    loop {
        let msg = match early.take() {
            Some(msg) => msg,
            None => reader.recv().await?,
        };
        shared
            .inbound
            .send(Inbound::Message(id, msg))
            .await
            .map_err(|_| TandemError::Closed)?;
        let Some(gate) = gate else { continue };

        // Keep reading while the reply is pending so a departing peer is
        // noticed. A request sent ahead of its reply is held back.
        tokio::select! {
            permit = gate.acquire() => {
                permit.map_err(|_| TandemError::Closed)?.forget();
            }
            next = reader.recv() => {
                early = Some(next?);
                debug!(conn = %id, "peer sent ahead of its reply; holding request");
                gate.acquire()
                    .await
                    .map_err(|_| TandemError::Closed)?
                    .forget();
            }
        }
    }
}

async fn write_loop(
    writer: &mut ConnectionWriter,
    outbound: &mut mpsc::Receiver<Msg>,
    mut shutdown: watch::Receiver<bool>,
) -> TandemResult<()> {
    let conn = writer.id();
    loop {
        let msg = tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => return Ok(()),
            },
            _ = closed(&mut shutdown) => break,
        };
        writer.send(&msg).await?;
    }

    // Messages committed before the close still go out.
    let flush = async {
        while let Ok(msg) = outbound.try_recv() {
            writer.send(&msg).await?;
        }
        Ok::<_, TandemError>(())
    };
    match tokio::time::timeout(CLOSE_LINGER, flush).await {
        Ok(flushed) => flushed,
        Err(_) => {
            debug!(conn = %conn, "dropping unsent messages at close");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_wire::transport::dial as raw_dial;

    fn inproc_endpoint(prefix: &str) -> String {
        format!("inproc://{prefix}-{}", uuid::Uuid::new_v4())
    }

    async fn raw_req(endpoint: &Endpoint) -> Connection {
        let mut conn = raw_dial(endpoint, &SocketConfig::default()).await.unwrap();
        assert_eq!(
            conn.handshake(SocketType::Req).await.unwrap(),
            SocketType::Rep
        );
        conn
    }

    async fn next_message(mux: &Multiplexer) -> (ConnectionId, Msg) {
        let deadline = deadline(Some(Duration::from_secs(5)));
        loop {
            match mux.next_inbound(deadline).await.unwrap() {
                Inbound::Message(id, msg) => return (id, msg),
                Inbound::Disconnected(_) => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_fan_in_tags_and_orders_per_connection() {
        let mux = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let endpoint = mux.listen(&inproc_endpoint("fan-in")).await.unwrap();

        let mut a = raw_req(&endpoint).await;
        let mut b = raw_req(&endpoint).await;
        a.send(&Msg::from("a1")).await.unwrap();
        b.send(&Msg::from("b1")).await.unwrap();

        let (first_id, first) = next_message(&mux).await;
        let (second_id, second) = next_message(&mux).await;
        assert_ne!(first_id, second_id);
        let a_id = if first == Msg::from("a1") { first_id } else { second_id };
        let mut got = vec![first, second];
        got.sort_by(|x, y| x.first().cmp(y.first()));
        assert_eq!(got, vec![Msg::from("a1"), Msg::from("b1")]);

        // A second request from the same peer waits for the reply gate.
        a.send(&Msg::from("a2")).await.unwrap();
        let gated = mux
            .next_inbound(deadline(Some(Duration::from_millis(100))))
            .await;
        assert!(matches!(gated, Err(TandemError::Timeout)));

        mux.open_gate(a_id);
        let (id, msg) = next_message(&mux).await;
        assert_eq!(id, a_id);
        assert_eq!(msg, Msg::from("a2"));

        mux.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_connection_is_isolated() {
        let mux = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let endpoint = mux.listen(&inproc_endpoint("isolate")).await.unwrap();

        let mut a = raw_req(&endpoint).await;
        let mut b = raw_req(&endpoint).await;
        a.send(&Msg::from("from-a")).await.unwrap();
        let (a_id, _) = next_message(&mux).await;

        a.close().await;
        drop(a);
        tokio::time::timeout(Duration::from_secs(5), async {
            while mux.is_connected(a_id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dead connection removed");

        b.send(&Msg::from("from-b")).await.unwrap();
        let (_, msg) = next_message(&mux).await;
        assert_eq!(msg, Msg::from("from-b"));
        mux.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_free_pool_round_robin() {
        let rep_a = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let rep_b = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let ep_a = rep_a.listen(&inproc_endpoint("rr-a")).await.unwrap();
        let ep_b = rep_b.listen(&inproc_endpoint("rr-b")).await.unwrap();

        let req = Multiplexer::new(SocketType::Req, SocketConfig::default(), None);
        let id_a = req.dial(&ep_a.to_string()).await.unwrap();
        let id_b = req.dial(&ep_b.to_string()).await.unwrap();

        let (token, _permit) = req.acquire_peer(None).await.unwrap();
        let first = token.commit();
        let (token, _permit) = req.acquire_peer(None).await.unwrap();
        let second = token.commit();
        assert_eq!((first, second), (id_a, id_b));

        // Both peers are checked out now.
        let busy = req
            .acquire_peer(deadline(Some(Duration::from_millis(50))))
            .await;
        assert!(matches!(busy, Err(TandemError::NoAvailablePeer)));

        req.release_peer(first);
        let (token, _permit) = req.acquire_peer(None).await.unwrap();
        assert_eq!(token.commit(), id_a);
    }

    #[tokio::test]
    async fn test_disconnect_reported_only_for_awaited_peer() {
        let rep_a = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let rep_b = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let ep_a = rep_a.listen(&inproc_endpoint("awaited-a")).await.unwrap();
        let ep_b = rep_b.listen(&inproc_endpoint("awaited-b")).await.unwrap();

        let req = Multiplexer::new(SocketType::Req, SocketConfig::default(), None);
        let id_a = req.dial(&ep_a.to_string()).await.unwrap();
        req.dial(&ep_b.to_string()).await.unwrap();

        let (token, permit) = req.acquire_peer(None).await.unwrap();
        permit.send(Msg::from("ping"));
        assert_eq!(token.commit(), id_a);

        rep_b.close().await.unwrap();
        rep_a.close().await.unwrap();
        let until = deadline(Some(Duration::from_secs(5)));
        match req.next_inbound(until).await.unwrap() {
            Inbound::Disconnected(id) => assert_eq!(id, id_a),
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while req.peer_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both peers removed");
        // The idle peer left nothing behind in the inbound queue.
        let quiet = req
            .next_inbound(deadline(Some(Duration::from_millis(100))))
            .await;
        assert!(matches!(quiet, Err(TandemError::Timeout)));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected_before_queueing() {
        let mux = Multiplexer::new(
            SocketType::Req,
            SocketConfig {
                max_message_size: 4,
                ..Default::default()
            },
            None,
        );
        assert!(mux.check_outgoing(&Msg::from("four")).is_ok());
        assert!(matches!(
            mux.check_outgoing(&Msg::from("fives")),
            Err(TandemError::MessageTooLarge { size: 5, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_dropped_token_returns_to_pool() {
        let rep = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        let endpoint = rep.listen(&inproc_endpoint("token")).await.unwrap();
        let req = Multiplexer::new(SocketType::Req, SocketConfig::default(), None);
        let id = req.dial(&endpoint.to_string()).await.unwrap();

        let (token, permit) = req.acquire_peer(None).await.unwrap();
        drop(permit);
        drop(token);
        let (token, _permit) = req
            .acquire_peer(deadline(Some(Duration::from_secs(1))))
            .await
            .unwrap();
        assert_eq!(token.commit(), id);
    }

    #[tokio::test]
    async fn test_close_wakes_waiter_and_cleans_up() {
        let mux = Arc::new(Multiplexer::new(
            SocketType::Rep,
            SocketConfig::default(),
            None,
        ));
        let name = inproc_endpoint("close");
        mux.listen(&name).await.unwrap();

        let waiter = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.next_inbound(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        mux.close().await.unwrap();
        mux.close().await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(TandemError::Closed)));
        // The listener is released: the name can be bound again.
        let again = Multiplexer::new(SocketType::Rep, SocketConfig::default(), None);
        assert!(again.listen(&name).await.is_ok());
    }
}
