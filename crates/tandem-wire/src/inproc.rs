//! In-process transport.
//!
//! Listeners register a name in a process-wide table; dialing that name hands
//! one end of a fresh in-memory pipe to the listener's accept queue.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::OnceLock;
use tandem_types::{TandemError, TandemResult};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// Buffer size of each in-process pipe direction.
const PIPE_CAPACITY: usize = 64 * 1024;

type Backlog = mpsc::UnboundedSender<DuplexStream>;

fn registry() -> &'static DashMap<String, Backlog> {
    static REGISTRY: OnceLock<DashMap<String, Backlog>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// A bound in-process name. Unregisters itself on drop.
#[derive(Debug)]
pub struct InprocListener {
    name: String,
    backlog: Backlog,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl InprocListener {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next dialer. `None` never happens while the listener is alive.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.incoming.recv().await
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        registry().remove_if(&self.name, |_, tx| tx.same_channel(&self.backlog));
    }
}

/// Register `name`. Fails with `Bind` if another listener holds it.
pub fn bind(name: &str) -> TandemResult<InprocListener> {
    match registry().entry(name.to_string()) {
        Entry::Occupied(_) => Err(TandemError::Bind {
            endpoint: format!("inproc://{name}"),
            reason: "address already in use".to_string(),
        }),
        Entry::Vacant(slot) => {
            let (tx, rx) = mpsc::unbounded_channel();
            slot.insert(tx.clone());
            Ok(InprocListener {
                name: name.to_string(),
                backlog: tx,
                incoming: rx,
            })
        }
    }
}

/// Dial `name`, returning the client end of a new pipe.
pub fn connect(name: &str) -> TandemResult<DuplexStream> {
    let unreachable = || TandemError::Connect {
        endpoint: format!("inproc://{name}"),
        reason: "no listener bound to this name".to_string(),
    };
    let backlog = registry()
        .get(name)
        .map(|entry| entry.value().clone())
        .ok_or_else(unreachable)?;
    let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
    backlog.send(server).map_err(|_| unreachable())?;
    Ok(client)
}
