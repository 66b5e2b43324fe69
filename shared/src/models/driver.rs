//! Driver projection used by dispatch

use super::vehicle::{VehicleCategory, VehicleLevel};
use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum DriverWorkStatus {
    Online,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum DriverAccountStatus {
    Active,
    Suspended,
    Inactive,
}

/// Dispatch-relevant view of a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub driver_id: String,
    pub name: String,
    pub vehicle_category: VehicleCategory,
    pub vehicle_level: VehicleLevel,
    pub account_status: DriverAccountStatus,
    pub verified: bool,
    pub work_status: DriverWorkStatus,
    pub location: Option<Coordinate>,
    /// 0.0 - 5.0
    pub rating: f64,
    pub queued_order_ids: Vec<String>,
    pub current_order_id: Option<String>,
    /// Cooldown end (Unix millis), 0 = none
    pub next_available_at: i64,
    pub max_queue_capacity: u32,
    /// Consecutive failed logins since the last success
    #[serde(default)]
    pub failed_logins: u32,
    /// Login lock end (Unix millis), 0 = none
    #[serde(default)]
    pub locked_until: i64,
    /// Last time the driver became free
    pub idle_since: i64,
    pub updated_at: i64,
}

impl DriverProfile {
    pub fn queue_len(&self) -> u32 {
        self.queued_order_ids.len() as u32
    }

    /// Busy with a ride and no room left in the queue
    pub fn at_capacity(&self) -> bool {
        self.current_order_id.is_some() && self.queue_len() >= self.max_queue_capacity
    }

    pub fn is_locked(&self, now: i64) -> bool {
        self.locked_until > now
    }
}

/// Register or replace a driver profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverUpsert {
    pub driver_id: String,
    pub name: String,
    pub vehicle_category: VehicleCategory,
    pub vehicle_level: VehicleLevel,
    #[serde(default = "default_account_status")]
    pub account_status: DriverAccountStatus,
    #[serde(default)]
    pub verified: bool,
    pub location: Option<Coordinate>,
    #[serde(default = "default_rating")]
    pub rating: f64,
    #[serde(default = "default_capacity")]
    pub max_queue_capacity: u32,
}

fn default_account_status() -> DriverAccountStatus {
    DriverAccountStatus::Active
}

fn default_rating() -> f64 {
    5.0
}

fn default_capacity() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkStatusUpdate {
    pub status: DriverWorkStatus,
}

/// Outcome of a driver login reported by the auth front
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub succeeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_requires_current_order() {
        let mut d = DriverProfile {
            driver_id: "D1".into(),
            name: "Driver".into(),
            vehicle_category: VehicleCategory::Sedan,
            vehicle_level: VehicleLevel::Economy,
            account_status: DriverAccountStatus::Active,
            verified: true,
            work_status: DriverWorkStatus::Online,
            location: None,
            rating: 4.8,
            queued_order_ids: vec!["A".into()],
            current_order_id: None,
            next_available_at: 0,
            max_queue_capacity: 1,
            failed_logins: 0,
            locked_until: 0,
            idle_since: 0,
            updated_at: 0,
        };
        assert!(!d.at_capacity());
        d.current_order_id = Some("B".into());
        assert!(d.at_capacity());
        d.max_queue_capacity = 2;
        assert!(!d.at_capacity());
    }
}
