//! Orders Module
//!
//! - [`coordinator`] - 订单状态机 (create / cancel / arrive / start / complete / refund)
//! - [`settlement`] - 完成与退款的资金结算
//! - [`history`] - hash-chained audit rows, one per transition

pub mod coordinator;
mod error;
pub mod history;
pub mod settlement;
pub mod transitions;

pub use coordinator::OrderCoordinator;
pub use error::{OrderError, OrderResult};

use serde_json::json;
use shared::event::{Actor, EntityEvent, EventEntity};
use shared::models::{Order, OrderStatus};

/// Who issued a command, and from where
#[derive(Debug, Clone, PartialEq)]
pub struct ActorContext {
    pub actor: Actor,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            ip: None,
            user_agent: None,
        }
    }

    pub fn system() -> Self {
        Self::new(Actor::system())
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// `order` topic event for a committed transition
pub(crate) fn order_event(from: Option<OrderStatus>, order: &Order, actor: &Actor) -> EntityEvent {
    EntityEvent::new(
        EventEntity::Order,
        &order.order_id,
        from.map(|s| s.as_str().to_string()),
        order.status.as_str(),
        actor.clone(),
    )
    .with_payload(json!({
        "rider_id": order.rider_id,
        "driver_id": order.driver_id,
        "fare": order.fare,
        "currency": order.currency,
        "cancel_reason": order.cancel_reason,
    }))
}
