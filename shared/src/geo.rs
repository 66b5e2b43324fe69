//! Coordinates and great-circle distance

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Latitude within [-90, 90], longitude within [-180, 180], both finite
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Haversine distance in kilometres
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let (lat1, lon1) = (self.lat.to_radians(), self.lng.to_radians());
        let (lat2, lon2) = (other.lat.to_radians(), other.lng.to_radians());
        let sin_dlat = ((lat2 - lat1) * 0.5).sin();
        let sin_dlon = ((lon2 - lon1) * 0.5).sin();
        let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
        let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Point `km` kilometres due north (used to place test fixtures)
    pub fn offset_north_km(&self, km: f64) -> Coordinate {
        let dlat = (km / EARTH_RADIUS_KM).to_degrees();
        Coordinate::new(self.lat + dlat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(Coordinate::new(-1.9441, 30.0619).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        let kigali = Coordinate::new(-1.9441, 30.0619);
        let airport = Coordinate::new(-1.9686, 30.1395);
        assert_eq!(kigali.distance_km(&kigali), 0.0);
        let d1 = kigali.distance_km(&airport);
        let d2 = airport.distance_km(&kigali);
        assert!((d1 - d2).abs() < 1e-9);
        assert!(d1 > 8.0 && d1 < 10.0);
    }

    #[test]
    fn test_offset_north_round_trips_distance() {
        let origin = Coordinate::new(-1.95, 30.06);
        let moved = origin.offset_north_km(0.8);
        assert!((origin.distance_km(&moved) - 0.8).abs() < 1e-6);
    }
}
