//! 事件总线核心实现
//!
//! ```text
//! OrderCoordinator ─┐
//! DispatchEngine  ──┼──▶ publish() ──▶ broadcast::Sender<EntityEvent> ──▶ subscribers
//! WalletService   ──┘                                                    (notification sink,
//!                                                                          driver agents, tests)
//! ```
//!
//! Publishing never fails the caller: an event with no subscriber is
//! simply dropped.

use shared::event::EntityEvent;
use tokio::sync::broadcast;

/// Default channel capacity
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EntityEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 发布事件 (所有订阅者)
    pub fn publish(&self, event: EntityEvent) {
        tracing::debug!(
            topic = event.entity.topic(),
            id = %event.id,
            from = ?event.from_status,
            to = %event.to_status,
            "Publishing event"
        );
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
