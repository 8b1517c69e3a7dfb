//! Registry of live WebSocket subscribers.
//!
//! Each connection gets a bounded queue of serialized messages. The
//! transport task drains the queue into its socket; the broadcaster only
//! ever enqueues, so a stalled socket can never block a tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::generate_connection_id;
use crate::observability::metrics;

/// Anonymous identity of one connection, only meaningful while it is open.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized message shared by every queue it is delivered to.
pub type Payload = Arc<str>;

/// Sending half of a connection's queue.
pub(crate) type ClientHandle = mpsc::Sender<Payload>;

/// Registry tracking open connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    buffer: usize,
    active: Mutex<HashMap<ConnectionId, ClientHandle>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ConnectionRegistry {
    /// Create an empty registry; `buffer` bounds each client's queue.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ClientHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection.
    ///
    /// Returns its id and the receiver the transport should drain. The
    /// receiver yields `None` once the connection is unregistered or the
    /// registry is closed.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ConnectionId(generate_connection_id());

        let total = {
            let mut active = self.lock();
            active.insert(id.clone(), tx);
            active.len()
        };
        metrics::record_connected_clients(total);
        tracing::info!(connection_id = %id, connected = total, "Client connected");

        (id, rx)
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let (removed, total) = {
            let mut active = self.lock();
            let removed = active.remove(id).is_some();
            (removed, active.len())
        };
        if removed {
            metrics::record_connected_clients(total);
            tracing::info!(connection_id = %id, connected = total, "Client disconnected");
        }
        removed
    }

    /// Copy of the current connection set, taken at broadcast start.
    pub(crate) fn snapshot(&self) -> Vec<(ConnectionId, ClientHandle)> {
        self.lock()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    /// Drop every connection; their receivers see the end of the queue.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut active = self.lock();
            let closed = active.len();
            active.clear();
            closed
        };
        if closed > 0 {
            metrics::record_connected_clients(0);
            tracing::info!(closed, "Closed all client connections");
        }
        closed
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
