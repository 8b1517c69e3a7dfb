//! Fan-out of one tick's message to every registered connection.
//!
//! The message is serialized once and the same `Arc<str>` is queued for
//! each connection present when the broadcast starts. Enqueueing never
//! waits:
//! - a full queue means the client is not ready; it misses this tick
//! - a closed queue means the client is gone; it is removed

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

use super::registry::ConnectionRegistry;
use crate::changelog::ServerMessage;

/// Per-call delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was queued for
    pub delivered: usize,
    /// Connections not ready (queue full) that miss this message
    pub skipped: usize,
    /// Connections found closed and dropped from the registry
    pub removed: usize,
}

/// Delivers server messages to all registered connections.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `message` for every connection registered at call time.
    ///
    /// One failing connection never prevents delivery to the others.
    pub fn broadcast(&self, message: &ServerMessage) -> Result<BroadcastReport, serde_json::Error> {
        let payload: Arc<str> = Arc::from(message.to_json()?);
        Ok(self.broadcast_raw(&payload))
    }

    pub(crate) fn broadcast_raw(&self, payload: &Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (id, handle) in self.registry.snapshot() {
            match handle.try_send(Arc::clone(payload)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(connection_id = %id, "Client not ready, skipping update");
                    report.skipped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %id, "Client queue closed, removing");
                    if self.registry.unregister(&id) {
                        report.removed += 1;
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::GroupedChanges;

    fn update(key: &str, ids: &[&str]) -> ServerMessage {
        let mut changes = GroupedChanges::new();
        changes.insert(key.to_string(), ids.iter().map(ToString::to_string).collect());
        ServerMessage::database_update(changes)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        let report = broadcaster
            .broadcast(&update("students_update", &["S100"]))
            .unwrap();
        assert_eq!(report.delivered, 2);

        let first = rx_a.recv().await.unwrap();
        let second = rx_b.recv().await.unwrap();
        // Same serialized message object for everyone
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            &*first,
            r#"{"type":"database_update","changes":{"students_update":["S100"]}}"#
        );
    }

    #[tokio::test]
    async fn test_closed_connection_is_removed_without_blocking_others() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_gone, rx_gone) = registry.register();
        let (_alive, mut rx_alive) = registry.register();

        // Transport task for the first client has exited
        drop(rx_gone);

        let report = broadcaster.broadcast(&update("grades_insert", &["1"])).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(registry.len(), 1);
        assert!(rx_alive.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_is_skipped_not_removed() {
        let registry = Arc::new(ConnectionRegistry::new(1));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_slow, mut rx_slow) = registry.register();

        let first = broadcaster.broadcast(&update("students_insert", &["S1"])).unwrap();
        let second = broadcaster.broadcast(&update("students_insert", &["S2"])).unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(registry.len(), 1);

        // The missed tick is gone for good
        let only = rx_slow.recv().await.unwrap();
        assert!(only.contains("S1"));
        assert!(rx_slow.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_connections() {
        let registry = Arc::new(ConnectionRegistry::default());
        let broadcaster = Broadcaster::new(registry);
        let report = broadcaster.broadcast(&update("teachers_delete", &["2"])).unwrap();
        assert_eq!(report, BroadcastReport::default());
    }
}
