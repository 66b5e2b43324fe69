//! Payment channels, routing rows and payment records

use super::order::PaymentMethod;
use crate::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wildcard for `PaymentRouter::currency` and `PaymentRouter::payment_method`
pub const WILDCARD: &str = "*";

/// A payment provider account that can take money
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub channel_code: String,
    pub name: String,
    /// Advertised payment methods (`card`, `mobile_money`, ...)
    pub methods: Vec<String>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Routing row: which channel handles which (method, currency, amount)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRouter {
    pub router_id: String,
    pub channel_code: String,
    pub channel_account_id: String,
    /// Method name or `*`
    pub payment_method: String,
    /// ISO code or `*`
    pub currency: String,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub region: Option<String>,
    /// Higher wins
    pub priority: i32,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Router input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub payment_method: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub region: Option<String>,
}

/// Router output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSelection {
    pub router_id: String,
    pub channel_code: String,
    pub channel_account_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    /// Refunded locally, gateway refund not confirmed yet
    RefundPending,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::RefundPending => "refund_pending",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Card / mobile-money payment for an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub channel_code: String,
    pub channel_account_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
