//! Notification sink
//!
//! The push / SMS / email fan-out lives outside this service. The listener
//! below drains the bus, drops duplicates on `(entity, id, to_status)` and
//! hands each event to an [`EventSink`].

use super::EventBus;
use async_trait::async_trait;
use shared::event::{EntityEvent, EventEntity};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Remembered dedup keys
const DEDUP_WINDOW: usize = 4096;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &EntityEvent);
}

/// Writes every event to the `notify` log target
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event: &EntityEvent) {
        tracing::info!(
            target: "notify",
            topic = event.entity.topic(),
            id = %event.id,
            from = ?event.from_status,
            to = %event.to_status,
            actor = %event.actor.id,
            "notification"
        );
    }
}

/// Bounded FIFO set of recently delivered keys
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<(EventEntity, String, String)>,
    order: VecDeque<(EventEntity, String, String)>,
}

impl Deduplicator {
    /// Returns false when the key was already delivered
    pub fn admit(&mut self, event: &EntityEvent) -> bool {
        let (entity, id, to) = event.dedup_key();
        let key = (entity, id.to_string(), to.to_string());
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= DEDUP_WINDOW
            && let Some(old) = self.order.pop_front()
        {
            self.seen.remove(&old);
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }
}

/// Drain the bus into `sink` until `shutdown` fires
pub async fn run_sink_listener(bus: EventBus, sink: Arc<dyn EventSink>, shutdown: CancellationToken) {
    let mut rx = bus.subscribe();
    let mut dedup = Deduplicator::default();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => {
                    if dedup.admit(&event) {
                        sink.deliver(&event).await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    tracing::debug!("Notification listener stopped");
}
