//! Alerting hook for internal invariant violations

use crate::message::EventBus;
use serde_json::json;
use shared::error::AppError;
use shared::event::{Actor, EntityEvent, EventEntity};

/// Log on the `alert` target and publish a `system` event.
///
/// Returns the matching [`AppError`] so callers can `return Err(raise(..))`.
pub fn raise(bus: &EventBus, subject: &str, message: impl Into<String>) -> AppError {
    let message = message.into();
    tracing::error!(target: "alert", subject, %message, "Invariant violation");
    bus.publish(
        EntityEvent::new(EventEntity::System, subject, None, "invariant_violation", Actor::system())
            .with_payload(json!({ "message": message })),
    );
    AppError::invariant(message)
}
