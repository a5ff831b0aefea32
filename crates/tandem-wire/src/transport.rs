//! Transport binding: uniform `listen`/`dial` over every supported scheme.
//!
//! Whatever the scheme, a successful dial or accept yields a [`Connection`].
//! Listeners report a resolved endpoint: a TCP listener bound to port `0`
//! reports the port the OS picked.

use crate::codec::FrameDecoder;
use crate::connection::Connection;
use crate::inproc::{self, InprocListener};
use tandem_types::{Endpoint, Scheme, SocketConfig, TandemError, TandemResult};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

fn bind_error(endpoint: &Endpoint, reason: impl ToString) -> TandemError {
    TandemError::Bind {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

fn connect_error(endpoint: &Endpoint, reason: impl ToString) -> TandemError {
    TandemError::Connect {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

/// A bound Unix-domain socket. Removes its path on drop.
#[cfg(unix)]
#[derive(Debug)]
struct IpcListener {
    listener: UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl Drop for IpcListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "could not remove ipc socket file");
        }
    }
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(IpcListener),
    Inproc(InprocListener),
}

/// A bound endpoint that yields one [`Connection`] per inbound peer.
#[derive(Debug)]
pub struct Listener {
    endpoint: Endpoint,
    kind: ListenerKind,
    decoder: FrameDecoder,
}

impl Listener {
    /// The resolved local endpoint. Never empty.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait for the next inbound peer.
    pub async fn accept(&mut self) -> TandemResult<Connection> {
        match &mut self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %addr, error = %e, "could not set TCP_NODELAY");
                }
                Ok(Connection::new(stream, addr.to_string(), self.decoder))
            }
            #[cfg(unix)]
            ListenerKind::Ipc(ipc) => {
                let (stream, _) = ipc.listener.accept().await?;
                Ok(Connection::new(
                    stream,
                    ipc.path.display().to_string(),
                    self.decoder,
                ))
            }
            ListenerKind::Inproc(listener) => {
                let name = listener.name().to_string();
                let stream = listener.accept().await.ok_or(TandemError::Closed)?;
                Ok(Connection::new(stream, name, self.decoder))
            }
        }
    }
}

/// Bind `endpoint` and return the listener.
pub async fn listen(endpoint: &Endpoint, config: &SocketConfig) -> TandemResult<Listener> {
    let decoder = FrameDecoder::from_config(config);
    let (kind, resolved) = match endpoint.scheme() {
        Scheme::Tcp => {
            let (host, port) = endpoint.host_port()?;
            let listener = TcpListener::bind((host.as_str(), port))
                .await
                .map_err(|e| bind_error(endpoint, e))?;
            let local = listener.local_addr().map_err(|e| bind_error(endpoint, e))?;
            let resolved = Endpoint::new(Scheme::Tcp, local.to_string())?;
            (ListenerKind::Tcp(listener), resolved)
        }
        #[cfg(unix)]
        Scheme::Ipc => {
            let path = PathBuf::from(endpoint.location());
            let listener = UnixListener::bind(&path).map_err(|e| bind_error(endpoint, e))?;
            (ListenerKind::Ipc(IpcListener { listener, path }), endpoint.clone())
        }
        #[cfg(not(unix))]
        Scheme::Ipc => {
            return Err(bind_error(endpoint, "ipc transport requires a unix platform"));
        }
        Scheme::Inproc => {
            let listener = inproc::bind(endpoint.location())?;
            (ListenerKind::Inproc(listener), endpoint.clone())
        }
    };
    info!(endpoint = %resolved, "listening");
    Ok(Listener {
        endpoint: resolved,
        kind,
        decoder,
    })
}

/// Open a connection to `endpoint`.
pub async fn dial(endpoint: &Endpoint, config: &SocketConfig) -> TandemResult<Connection> {
    let decoder = FrameDecoder::from_config(config);
    let peer = endpoint.to_string();
    match endpoint.scheme() {
        Scheme::Tcp => {
            let (host, port) = endpoint.host_port()?;
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| connect_error(endpoint, e))?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "could not set TCP_NODELAY");
            }
            Ok(Connection::new(stream, peer, decoder))
        }
        #[cfg(unix)]
        Scheme::Ipc => {
            let stream = UnixStream::connect(endpoint.location())
                .await
                .map_err(|e| connect_error(endpoint, e))?;
            Ok(Connection::new(stream, peer, decoder))
        }
        #[cfg(not(unix))]
        Scheme::Ipc => Err(connect_error(
            endpoint,
            "ipc transport requires a unix platform",
        )),
        Scheme::Inproc => {
            let stream = inproc::connect(endpoint.location())?;
            Ok(Connection::new(stream, peer, decoder))
        }
    }
}
