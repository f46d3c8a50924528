//! Change-feed emitter
//!
//! Publishes [`FeedEvent`]s over a tokio broadcast channel after every
//! committed mutation. Fire-and-forget: publishing never blocks or fails
//! the mutation that triggered it. With no subscribers the event is simply
//! dropped, which is the normal state for a headless deployment.

use shared::feed::{EntityType, FeedEvent, FeedEventKind};
use tokio::sync::broadcast;

/// Feed channel capacity (slow subscribers lag rather than block the core)
const FEED_CHANNEL_CAPACITY: usize = 4096;

/// Fire-and-forget change-feed publisher
#[derive(Clone)]
pub struct FeedEmitter {
    tx: broadcast::Sender<FeedEvent>,
}

impl std::fmt::Debug for FeedEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl Default for FeedEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a state change. Never blocks, never propagates failure.
    pub fn publish(&self, entity: EntityType, entity_id: &str, kind: FeedEventKind) {
        let event = FeedEvent::new(entity, entity_id, kind);
        tracing::debug!(entity = %entity, entity_id = %entity_id, kind = ?kind, "Feed event");
        // Err means no active subscribers; that is not a failure
        let _ = self.tx.send(event);
    }

    /// Subscribe to the feed (presentation layers, tests)
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let feed = FeedEmitter::new();
        let mut rx = feed.subscribe();

        feed.publish(
            EntityType::Intervention,
            "i-1",
            FeedEventKind::InterventionCreated,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity, EntityType::Intervention);
        assert_eq!(event.entity_id, "i-1");
        assert_eq!(event.kind, FeedEventKind::InterventionCreated);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let feed = FeedEmitter::new();
        feed.publish(
            EntityType::DispatchAttempt,
            "a-1",
            FeedEventKind::AttemptCreated,
        );
    }
}
