//! Price snapshot: the immutable result of a quote

use super::order::OrderType;
use super::promotion::DiscountType;
use super::vehicle::{VehicleCategory, VehicleLevel};
use crate::geo::Coordinate;
use crate::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum SnapshotStatus {
    Active,
    Expired,
}

/// Per-line fare breakdown
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base_fare: Decimal,
    pub distance_fare: Decimal,
    pub time_fare: Decimal,
    /// Amount added by surge multipliers
    pub surge_amount: Decimal,
    /// Sum of fixed surcharges
    pub surcharge_amount: Decimal,
    pub service_fee: Decimal,
    pub platform_fee: Decimal,
}

impl FareBreakdown {
    pub fn fare_subtotal(&self) -> Decimal {
        self.base_fare + self.distance_fare + self.time_fare
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountSource {
    Rule,
    UserPromotion,
}

/// One discount that made it onto the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub source: DiscountSource,
    /// rule_id or user_promotion_id
    pub ref_id: String,
    pub code: Option<String>,
    pub discount_type: DiscountType,
    pub amount: Decimal,
}

/// A candidate discount that was not applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDiscount {
    pub code: Option<String>,
    pub ref_id: String,
    /// Error key, e.g. `min_order_not_met`
    pub reason: String,
}

/// Immutable priced quote
///
/// Only `status` (active → expired) and `order_id` (set once) change after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub snapshot_id: String,
    pub rider_id: String,
    pub order_id: Option<String>,
    pub order_type: OrderType,
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
    pub distance_km: f64,
    pub duration_min: f64,
    pub vehicle_category: VehicleCategory,
    pub vehicle_level: VehicleLevel,
    pub currency: Currency,
    pub breakdown: FareBreakdown,
    /// Product of all applied surge multipliers (1 when none)
    pub surge_multiplier: Decimal,
    /// Pre-discount total, fees included
    pub original_fare: Decimal,
    pub discount_amount: Decimal,
    pub discounted_fare: Decimal,
    pub applied_rule_ids: Vec<String>,
    pub user_promotion_ids: Vec<String>,
    pub discounts: Vec<AppliedDiscount>,
    pub skipped_discounts: Vec<SkippedDiscount>,
    pub status: SnapshotStatus,
    pub expires_at: i64,
    pub engine_version: String,
    pub rules_evaluated: u32,
    pub rules_applied: u32,
    pub calculation_time_ms: i64,
    pub created_at: i64,
}

impl PriceSnapshot {
    /// Amount discounted by a given user promotion
    pub fn discount_for(&self, user_promotion_id: &str) -> Option<Decimal> {
        self.discounts
            .iter()
            .find(|d| d.source == DiscountSource::UserPromotion && d.ref_id == user_promotion_id)
            .map(|d| d.amount)
    }
}

/// Ride context for a quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub rider_id: String,
    #[serde(default)]
    pub order_type: OrderType,
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
    pub distance_km: f64,
    pub duration_min: f64,
    pub vehicle_category: VehicleCategory,
    pub vehicle_level: VehicleLevel,
    /// Defaults to the configured pricing currency
    pub currency: Option<String>,
    /// User-entered codes, in the order typed
    #[serde(default)]
    pub promo_codes: Vec<String>,
    /// City used for promotion targeting
    pub city: Option<String>,
    /// Defaults to now
    pub request_time: Option<i64>,
}
