//! Price Rule Matcher
//!
//! Logic for matching rules to a ride (vehicle class, pickup point) and
//! checking time validity. Times are evaluated in UTC.

use chrono::{DateTime, Datelike, NaiveTime, Timelike};
use shared::geo::Coordinate;
use shared::models::{PriceRule, TimeWindow, VehicleClass};

/// Check the absolute window, weekday list and daily `HH:MM` range
pub fn is_time_valid(window: &TimeWindow, now_ms: i64) -> bool {
    if window.valid_from.is_some_and(|from| now_ms < from) {
        return false;
    }
    if window.valid_until.is_some_and(|until| now_ms >= until) {
        return false;
    }

    let Some(now) = DateTime::from_timestamp_millis(now_ms) else {
        return false;
    };

    // 0 = Sunday
    if let Some(ref days) = window.active_days
        && !days.is_empty()
    {
        let today = now.weekday().num_days_from_sunday() as u8;
        if !days.contains(&today) {
            return false;
        }
    }

    if let (Some(start), Some(end)) = (&window.active_start_time, &window.active_end_time)
        && let (Ok(start_time), Ok(end_time)) = (
            NaiveTime::parse_from_str(start, "%H:%M"),
            NaiveTime::parse_from_str(end, "%H:%M"),
        )
    {
        let Some(current) = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0) else {
            return false;
        };

        // Handle overnight ranges (e.g., 22:00 - 02:00)
        let inside = if start_time <= end_time {
            current >= start_time && current <= end_time
        } else {
            current >= start_time || current <= end_time
        };
        if !inside {
            return false;
        }
    }

    true
}

pub fn matches_vehicle(rule: &PriceRule, class: &VehicleClass) -> bool {
    class.matches(&rule.vehicle_categories, &rule.vehicle_levels)
}

pub fn matches_area(rule: &PriceRule, pickup: &Coordinate) -> bool {
    rule.service_area.contains(pickup)
}

/// Active, in-window, vehicle and area match
pub fn is_candidate(rule: &PriceRule, class: &VehicleClass, pickup: &Coordinate, now_ms: i64) -> bool {
    rule.is_active
        && is_time_valid(&rule.window, now_ms)
        && matches_vehicle(rule, class)
        && matches_area(rule, pickup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use shared::models::{RuleKind, ServiceArea, VehicleCategory, VehicleLevel};

    fn make_rule() -> PriceRule {
        PriceRule {
            id: 1,
            rule_id: "PR1".into(),
            name: "base".into(),
            kind: RuleKind::Base,
            value: Decimal::from(500),
            is_percentage: false,
            priority: 0,
            vehicle_categories: vec![VehicleCategory::Sedan],
            vehicle_levels: vec![],
            service_area: ServiceArea::Global,
            window: TimeWindow::default(),
            currency: None,
            requires_code: false,
            code: None,
            case_sensitive: false,
            max_discount: None,
            min_order_amount: None,
            is_exclusive: false,
            is_active: true,
            created_at: 0,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_absolute_window_is_half_open() {
        let window = TimeWindow {
            valid_from: Some(1_000),
            valid_until: Some(2_000),
            ..Default::default()
        };
        assert!(!is_time_valid(&window, 999));
        assert!(is_time_valid(&window, 1_000));
        assert!(is_time_valid(&window, 1_999));
        assert!(!is_time_valid(&window, 2_000));
    }

    #[test]
    fn test_weekday_filter() {
        // 2026-03-01 is a Sunday
        let window = TimeWindow {
            active_days: Some(vec![0, 6]),
            ..Default::default()
        };
        assert!(is_time_valid(&window, at(2026, 3, 1, 12, 0)));
        assert!(!is_time_valid(&window, at(2026, 3, 2, 12, 0)));
    }

    #[test]
    fn test_overnight_daily_range() {
        let window = TimeWindow {
            active_start_time: Some("22:00".into()),
            active_end_time: Some("02:00".into()),
            ..Default::default()
        };
        assert!(is_time_valid(&window, at(2026, 3, 2, 23, 30)));
        assert!(is_time_valid(&window, at(2026, 3, 2, 1, 59)));
        assert!(!is_time_valid(&window, at(2026, 3, 2, 12, 0)));
    }

    #[test]
    fn test_candidate_requires_vehicle_and_area() {
        let mut rule = make_rule();
        let kigali = Coordinate::new(-1.95, 30.06);
        let sedan = VehicleClass::new(VehicleCategory::Sedan, VehicleLevel::Economy);
        let moto = VehicleClass::new(VehicleCategory::Moto, VehicleLevel::Economy);

        assert!(is_candidate(&rule, &sedan, &kigali, 0));
        assert!(!is_candidate(&rule, &moto, &kigali, 0));

        rule.service_area = ServiceArea::Circle {
            center: kigali,
            radius_km: 1.0,
        };
        assert!(!is_candidate(&rule, &sedan, &kigali.offset_north_km(2.0), 0));

        rule.service_area = ServiceArea::Global;
        rule.is_active = false;
        assert!(!is_candidate(&rule, &sedan, &kigali, 0));
    }
}
