//! Dispatch records: one row per offer

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum DispatchRecordStatus {
    Pending,
    Accepted,
    Rejected,
    Timeout,
    Superseded,
    Cancelled,
}

impl DispatchRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchRecordStatus::Pending => "pending",
            DispatchRecordStatus::Accepted => "accepted",
            DispatchRecordStatus::Rejected => "rejected",
            DispatchRecordStatus::Timeout => "timeout",
            DispatchRecordStatus::Superseded => "superseded",
            DispatchRecordStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, DispatchRecordStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum RejectReason {
    TooFar,
    Busy,
    LowFare,
    Personal,
    Other,
}

/// Ranking weights: `w1*proximity + w2*rating + w3*idle - w4*queue`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub proximity: f64,
    pub rating: f64,
    pub idle: f64,
    pub queue: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            proximity: 0.5,
            rating: 0.2,
            idle: 0.2,
            queue: 0.1,
        }
    }
}

/// Strategy in force when an offer was made
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DispatchStrategy {
    pub radius_km: f64,
    pub fanout: u32,
    pub offer_ttl_ms: i64,
    pub weights: ScoreWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: i64,
    pub record_id: String,
    pub order_id: String,
    pub driver_id: String,
    /// 1-based
    pub round: u32,
    /// 1-based position within the round
    pub round_seq: u32,
    pub dispatched_at: i64,
    pub expired_at: i64,
    pub responded_at: Option<i64>,
    pub status: DispatchRecordStatus,
    pub reject_reason: Option<RejectReason>,
    pub reject_note: Option<String>,
    pub driver_distance_km: f64,
    pub driver_location: Coordinate,
    pub score: f64,
    pub strategy: DispatchStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferAction {
    Accept,
    Reject,
}

/// Driver's answer to an offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub driver_id: String,
    pub action: OfferAction,
    pub reason: Option<RejectReason>,
    pub note: Option<String>,
}
