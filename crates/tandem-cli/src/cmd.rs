//! Command implementations.

use anyhow::Context;
use tandem_socket::{Msg, Rep, Req, Socket, SocketConfig, TandemError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Serve requests until `max` have been answered or Ctrl-C is pressed.
pub async fn cmd_rep(
    config: SocketConfig,
    listen: &str,
    reply: Option<&str>,
    max: Option<u64>,
) -> anyhow::Result<u64> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let rep = Rep::with_cancel(config, cancel_rx);
    rep.listen(listen)
        .await
        .with_context(|| format!("could not listen on {listen}"))?;
    if let Some(addr) = rep.addr() {
        println!("listening on {addr}");
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let mut served = 0u64;
    while max.map_or(true, |max| served < max) {
        let request = match rep.recv().await {
            Ok(request) => request,
            Err(TandemError::Cancelled) => {
                info!("Interrupted, shutting down");
                break;
            }
            Err(e) => return Err(e).context("receive failed"),
        };
        debug!(frames = request.len(), bytes = request.payload_len(), "request received");

        let response = match reply {
            Some(text) => Msg::from(text),
            None => request,
        };
        match rep.send(response).await {
            Ok(()) => served += 1,
            Err(TandemError::PeerDisconnected) => warn!("Requester left before the reply"),
            Err(TandemError::Cancelled) => break,
            Err(e) => return Err(e).context("send failed"),
        }
    }

    rep.close().await?;
    info!(served, "Server stopped");
    Ok(served)
}

/// Send `frames` as one request `count` times and print every reply.
pub async fn cmd_req(
    config: SocketConfig,
    dial: &[String],
    count: u64,
    frames: Vec<String>,
) -> anyhow::Result<Vec<Msg>> {
    let req = Req::with_config(config);
    for endpoint in dial {
        req.dial(endpoint)
            .await
            .with_context(|| format!("could not dial {endpoint}"))?;
    }
    let request = Msg::from_frames(frames).context("a request needs at least one frame")?;

    let mut replies = Vec::new();
    for round in 0..count {
        req.send(request.clone()).await.context("send failed")?;
        let reply = req.recv().await.context("no reply")?;
        debug!(round, frames = reply.len(), "reply received");
        println!("{reply}");
        replies.push(reply);
    }
    req.close().await?;
    Ok(replies)
}
