//! Candidate selection for one dispatch round
//!
//! Pure: takes a snapshot of the driver index and returns the ranked
//! candidates. Ties on score are broken by driver id so two runs over the
//! same input always offer the same drivers.

use shared::geo::Coordinate;
use shared::models::{
    DriverAccountStatus, DriverProfile, DriverWorkStatus, ScoreWeights, VehicleClass,
};
use std::collections::HashSet;

/// Idle time at which the idle component saturates
const IDLE_SATURATION_MS: f64 = 30.0 * 60.0 * 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver_id: String,
    pub location: Coordinate,
    pub distance_km: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SelectionInput<'a> {
    pub pickup: Coordinate,
    pub class: VehicleClass,
    pub radius_km: f64,
    pub exclude: &'a HashSet<String>,
    pub now: i64,
    pub weights: ScoreWeights,
    pub limit: usize,
}

fn is_eligible(driver: &DriverProfile, input: &SelectionInput<'_>) -> bool {
    driver.vehicle_category == input.class.category
        && driver.vehicle_level == input.class.level
        && driver.account_status == DriverAccountStatus::Active
        && driver.verified
        && driver.work_status != DriverWorkStatus::Offline
        && !driver.at_capacity()
        && driver.next_available_at <= input.now
        && !driver.is_locked(input.now)
        && !input.exclude.contains(&driver.driver_id)
}

/// `w1*proximity + w2*rating + w3*idle - w4*queue`, each term in [0, 1]
pub fn score(driver: &DriverProfile, distance_km: f64, radius_km: f64, now: i64, w: &ScoreWeights) -> f64 {
    let proximity = if radius_km > 0.0 {
        (1.0 - distance_km / radius_km).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let rating = (driver.rating / 5.0).clamp(0.0, 1.0);
    let idle = if driver.current_order_id.is_some() {
        0.0
    } else {
        ((now - driver.idle_since).max(0) as f64 / IDLE_SATURATION_MS).min(1.0)
    };
    let queue = driver.queue_len() as f64 / driver.max_queue_capacity.max(1) as f64;

    w.proximity * proximity + w.rating * rating + w.idle * idle - w.queue * queue
}

pub fn select_candidates<'d>(
    drivers: impl IntoIterator<Item = &'d DriverProfile>,
    input: &SelectionInput<'_>,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = drivers
        .into_iter()
        .filter(|d| is_eligible(d, input))
        .filter_map(|d| {
            let location = d.location?;
            let distance_km = location.distance_km(&input.pickup);
            (distance_km <= input.radius_km).then(|| Candidate {
                driver_id: d.driver_id.clone(),
                location,
                distance_km,
                score: score(d, distance_km, input.radius_km, input.now, &input.weights),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
    candidates.truncate(input.limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{VehicleCategory, VehicleLevel};

    const PICKUP: Coordinate = Coordinate { lat: -1.95, lng: 30.06 };

    fn driver(id: &str, km: f64) -> DriverProfile {
        DriverProfile {
            driver_id: id.into(),
            name: id.into(),
            vehicle_category: VehicleCategory::Sedan,
            vehicle_level: VehicleLevel::Economy,
            account_status: DriverAccountStatus::Active,
            verified: true,
            work_status: DriverWorkStatus::Online,
            location: Some(PICKUP.offset_north_km(km)),
            rating: 5.0,
            queued_order_ids: vec![],
            current_order_id: None,
            next_available_at: 0,
            max_queue_capacity: 1,
            failed_logins: 0,
            locked_until: 0,
            idle_since: 0,
            updated_at: 0,
        }
    }

    fn input(exclude: &HashSet<String>, radius_km: f64, limit: usize) -> SelectionInput<'_> {
        SelectionInput {
            pickup: PICKUP,
            class: VehicleClass::new(VehicleCategory::Sedan, VehicleLevel::Economy),
            radius_km,
            exclude,
            now: 1_000,
            weights: ScoreWeights::default(),
            limit,
        }
    }

    #[test]
    fn test_radius_and_class_filter() {
        let mut suv = driver("D3", 0.5);
        suv.vehicle_category = VehicleCategory::Suv;
        let drivers = vec![driver("D1", 0.8), driver("D2", 3.0), suv];
        let none = HashSet::new();

        let picked = select_candidates(&drivers, &input(&none, 2.0, 5));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].driver_id, "D1");
        assert!((picked[0].distance_km - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ineligible_drivers_are_dropped() {
        let mut suspended = driver("D1", 0.5);
        suspended.account_status = DriverAccountStatus::Suspended;
        let mut unverified = driver("D2", 0.5);
        unverified.verified = false;
        let mut offline = driver("D3", 0.5);
        offline.work_status = DriverWorkStatus::Offline;
        let mut cooling = driver("D4", 0.5);
        cooling.next_available_at = 5_000;
        let mut full = driver("D5", 0.5);
        full.current_order_id = Some("ORDX".into());
        full.queued_order_ids = vec!["ORDY".into()];
        let mut nowhere = driver("D6", 0.5);
        nowhere.location = None;
        let mut locked = driver("D8", 0.5);
        locked.locked_until = 2_000;
        let drivers = vec![
            suspended,
            unverified,
            offline,
            cooling,
            full,
            nowhere,
            driver("D7", 0.5),
            locked,
        ];

        let exclude: HashSet<String> = ["D7".to_string()].into();
        assert!(select_candidates(&drivers, &input(&exclude, 2.0, 5)).is_empty());
    }

    #[test]
    fn test_busy_driver_with_queue_room_is_eligible_but_ranked_lower() {
        let mut busy = driver("D1", 0.5);
        busy.current_order_id = Some("ORDX".into());
        busy.max_queue_capacity = 2;
        let drivers = vec![busy, driver("D2", 0.5)];
        let none = HashSet::new();

        let picked = select_candidates(&drivers, &input(&none, 2.0, 5));
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].driver_id, "D2");
    }

    #[test]
    fn test_ties_break_by_driver_id_and_limit_applies() {
        let drivers = vec![driver("D9", 1.0), driver("D2", 1.0), driver("D5", 1.0)];
        let none = HashSet::new();

        let picked = select_candidates(&drivers, &input(&none, 2.0, 2));
        let ids: Vec<_> = picked.iter().map(|c| c.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["D2", "D5"]);
    }

    #[test]
    fn test_closer_driver_scores_higher() {
        let near = driver("D2", 0.2);
        let far = driver("D1", 1.8);
        let w = ScoreWeights::default();
        assert!(score(&near, 0.2, 2.0, 1_000, &w) > score(&far, 1.8, 2.0, 1_000, &w));
    }
}
