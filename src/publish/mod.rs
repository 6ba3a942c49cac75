//! Downstream publish contract (§6 External interfaces). The synthetic
//! `SERVER_STATS_UPDATE` event (§4.11) and any other fan-out notifications
//! flow through here via a broadcast channel, following the same pattern
//! the teacher uses for match snapshot fan-out.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// A `SERVER_STATS_UPDATE` payload: only the non-zero delta fields, plus
/// enough identity to route it (§4.11 "carrying only the non-zero fields").
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatsUpdate {
    pub server_id: i64,
    pub fields: Vec<(&'static str, i64)>,
}

#[derive(Debug, Clone, Serialize)]
pub enum PublishedEvent {
    ServerStatsUpdate(ServerStatsUpdate),
}

/// Fan-out publisher for downstream subscribers (metrics, pubsub bridges).
/// A lagging subscriber only drops its own backlog; it never blocks publishers.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    /// Publishes best-effort: with zero subscribers this simply drops the
    /// value, which is the expected steady state when no pubsub bridge is
    /// attached (§6).
    pub fn publish(&self, event: PublishedEvent) {
        if self.tx.send(event).is_err() {
            debug!("publish: no subscribers attached");
        }
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher.publish(PublishedEvent::ServerStatsUpdate(ServerStatsUpdate {
            server_id: 1,
            fields: vec![("kills", 1)],
        }));
        let received = rx.recv().await.unwrap();
        match received {
            PublishedEvent::ServerStatsUpdate(update) => {
                assert_eq!(update.server_id, 1);
                assert_eq!(update.fields, vec![("kills", 1)]);
            }
        }
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let publisher = BroadcastPublisher::new(8);
        publisher.publish(PublishedEvent::ServerStatsUpdate(ServerStatsUpdate {
            server_id: 1,
            fields: vec![],
        }));
    }
}
