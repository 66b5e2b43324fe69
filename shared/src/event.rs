//! Entity events for the notification sink
//!
//! Every status transition of an order, dispatch offer, payment or
//! withdrawal is published as an [`EntityEvent`]. Consumers deduplicate on
//! [`EntityEvent::dedup_key`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who triggered a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Rider,
    Driver,
    Admin,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Rider => "rider",
            ActorType::Driver => "driver",
            ActorType::Admin => "admin",
            ActorType::System => "system",
        }
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rider" => Ok(ActorType::Rider),
            "driver" => Ok(ActorType::Driver),
            "admin" => Ok(ActorType::Admin),
            "system" => Ok(ActorType::System),
            other => Err(format!("unknown actor type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
}

impl Actor {
    pub fn new(id: impl Into<String>, actor_type: ActorType) -> Self {
        Self {
            id: id.into(),
            actor_type,
        }
    }

    pub fn system() -> Self {
        Self::new("system", ActorType::System)
    }

    pub fn rider(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Rider)
    }

    pub fn driver(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Driver)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Admin)
    }
}

/// Topic per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventEntity {
    Order,
    Dispatch,
    Snapshot,
    Promotion,
    Wallet,
    Payment,
    Withdrawal,
    Driver,
    /// Alerts raised on internal invariant violations
    System,
}

impl EventEntity {
    pub fn topic(&self) -> &'static str {
        match self {
            EventEntity::Order => "order",
            EventEntity::Dispatch => "dispatch",
            EventEntity::Snapshot => "snapshot",
            EventEntity::Promotion => "promotion",
            EventEntity::Wallet => "wallet",
            EventEntity::Payment => "payment",
            EventEntity::Withdrawal => "withdrawal",
            EventEntity::Driver => "driver",
            EventEntity::System => "system",
        }
    }
}

impl fmt::Display for EventEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// `{entity, id, from_status, to_status, at_ms, actor, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity: EventEntity,
    pub id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub at_ms: i64,
    pub actor: Actor,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EntityEvent {
    pub fn new(
        entity: EventEntity,
        id: impl Into<String>,
        from_status: Option<String>,
        to_status: impl Into<String>,
        actor: Actor,
    ) -> Self {
        Self {
            entity,
            id: id.into(),
            from_status,
            to_status: to_status.into(),
            at_ms: crate::util::now_millis(),
            actor,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Consumers are idempotent on this key
    pub fn dedup_key(&self) -> (EventEntity, &str, &str) {
        (self.entity, &self.id, &self.to_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = EntityEvent::new(
            EventEntity::Order,
            "ORD1",
            Some("dispatching".into()),
            "accepted",
            Actor::driver("D1"),
        )
        .with_payload(serde_json::json!({"driver_id": "D1"}));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["entity"], "order");
        assert_eq!(value["id"], "ORD1");
        assert_eq!(value["from_status"], "dispatching");
        assert_eq!(value["to_status"], "accepted");
        assert_eq!(value["actor"]["type"], "driver");
        assert_eq!(value["payload"]["driver_id"], "D1");
    }

    #[test]
    fn test_actor_type_parse() {
        assert_eq!("Admin".parse::<ActorType>().unwrap(), ActorType::Admin);
        assert!("robot".parse::<ActorType>().is_err());
    }
}
