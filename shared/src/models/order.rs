//! Order Model

use super::vehicle::{VehicleCategory, VehicleLevel};
use crate::event::ActorType;
use crate::geo::Coordinate;
use crate::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum OrderStatus {
    Created,
    Pricing,
    PendingDispatch,
    Dispatching,
    Accepted,
    DriverArriving,
    InProgress,
    Completed,
    Cancelled,
    Refunded,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Pricing => "pricing",
            OrderStatus::PendingDispatch => "pending_dispatch",
            OrderStatus::Dispatching => "dispatching",
            OrderStatus::Accepted => "accepted",
            OrderStatus::DriverArriving => "driver_arriving",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Rejected => "rejected",
        }
    }

    /// No further transitions except `completed → refunded`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
                | OrderStatus::Rejected
        )
    }

    /// States a rider may still cancel from (anything before the ride starts)
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created
                | OrderStatus::Pricing
                | OrderStatus::PendingDispatch
                | OrderStatus::Dispatching
                | OrderStatus::Accepted
                | OrderStatus::DriverArriving
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum OrderType {
    #[default]
    Ride,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum PaymentMethod {
    #[default]
    Wallet,
    Card,
    MobileMoney,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
        }
    }
}

/// Ride order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub rider_id: String,
    pub order_type: OrderType,
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
    /// None = immediate
    pub scheduled_at: Option<i64>,
    pub vehicle_category: VehicleCategory,
    pub vehicle_level: VehicleLevel,
    pub snapshot_id: String,
    pub driver_id: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub currency: Currency,
    /// Discounted fare copied from the bound snapshot
    pub fare: Decimal,
    pub cancel_reason: Option<String>,
    pub created_at: i64,
    pub priced_at: Option<i64>,
    pub dispatch_started_at: Option<i64>,
    pub accepted_at: Option<i64>,
    pub arrived_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub refunded_at: Option<i64>,
    pub rejected_at: Option<i64>,
    pub updated_at: i64,
}

impl Order {
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_at.is_some()
    }
}

/// Create order payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreate {
    pub rider_id: String,
    pub snapshot_id: String,
    #[serde(default)]
    pub order_type: OrderType,
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
    pub scheduled_at: Option<i64>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Region hint for payment routing
    pub region: Option<String>,
}

/// Body of cancel / refund / arrive / start / complete requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderTransitionRequest {
    pub reason: Option<String>,
}

/// Immutable audit row written on every order transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHistoryLog {
    pub id: i64,
    pub order_id: String,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub actor_id: String,
    pub actor_type: ActorType,
    /// JSON of the order before the transition (null for creation)
    pub before_snapshot: serde_json::Value,
    pub after_snapshot: serde_json::Value,
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
    pub prev_hash: String,
    pub curr_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_matches_as_str() {
        for status in [
            OrderStatus::Created,
            OrderStatus::PendingDispatch,
            OrderStatus::DriverArriving,
            OrderStatus::InProgress,
            OrderStatus::Refunded,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_cancellable_states_precede_ride_start() {
        assert!(OrderStatus::DriverArriving.is_cancellable());
        assert!(!OrderStatus::InProgress.is_cancellable());
        assert!(!OrderStatus::Completed.is_cancellable());
    }
}
