//! Price Rule Model

use super::vehicle::{VehicleCategory, VehicleLevel};
use crate::geo::Coordinate;
use crate::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rule type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum RuleKind {
    Base,
    PerDistance,
    PerTime,
    SurgeMultiplier,
    FixedSurcharge,
    PercentageDiscount,
    FixedAmountDiscount,
    ServiceFee,
    PlatformFee,
}

/// Evaluation stage a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Fare,
    Surcharge,
    Discount,
    Fee,
}

impl RuleKind {
    pub fn category(&self) -> RuleCategory {
        match self {
            RuleKind::Base | RuleKind::PerDistance | RuleKind::PerTime => RuleCategory::Fare,
            RuleKind::SurgeMultiplier | RuleKind::FixedSurcharge => RuleCategory::Surcharge,
            RuleKind::PercentageDiscount | RuleKind::FixedAmountDiscount => {
                RuleCategory::Discount
            }
            RuleKind::ServiceFee | RuleKind::PlatformFee => RuleCategory::Fee,
        }
    }
}

/// Where a rule applies
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceArea {
    #[default]
    Global,
    Circle {
        center: Coordinate,
        radius_km: f64,
    },
    Bbox {
        min_lat: f64,
        min_lng: f64,
        max_lat: f64,
        max_lng: f64,
    },
}

impl ServiceArea {
    pub fn contains(&self, point: &Coordinate) -> bool {
        match self {
            ServiceArea::Global => true,
            ServiceArea::Circle { center, radius_km } => center.distance_km(point) <= *radius_km,
            ServiceArea::Bbox {
                min_lat,
                min_lng,
                max_lat,
                max_lng,
            } => {
                (*min_lat..=*max_lat).contains(&point.lat)
                    && (*min_lng..=*max_lng).contains(&point.lng)
            }
        }
    }
}

/// Time validity of a rule or promotion
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Valid from (Unix millis, inclusive)
    pub valid_from: Option<i64>,
    /// Valid until (Unix millis, exclusive)
    pub valid_until: Option<i64>,
    /// Active days of week (0=Sunday..6=Saturday)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_days: Option<Vec<u8>>,
    /// Daily start time (HH:MM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_start_time: Option<String>,
    /// Daily end time (HH:MM), may be earlier than start for overnight ranges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_end_time: Option<String>,
}

/// Price rule entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRule {
    pub id: i64,
    pub rule_id: String,
    pub name: String,
    pub kind: RuleKind,
    /// Rate, multiplier, amount or percentage depending on `kind`
    pub value: Decimal,
    /// Fee rules only: `value` is a percentage of the fare subtotal
    #[serde(default)]
    pub is_percentage: bool,
    /// Lower = evaluated earlier
    pub priority: i32,
    #[serde(default)]
    pub vehicle_categories: Vec<VehicleCategory>,
    #[serde(default)]
    pub vehicle_levels: Vec<VehicleLevel>,
    #[serde(default)]
    pub service_area: ServiceArea,
    #[serde(default, flatten)]
    pub window: TimeWindow,
    /// None = any currency
    pub currency: Option<Currency>,
    /// Discount rules only
    #[serde(default)]
    pub requires_code: bool,
    pub code: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub is_exclusive: bool,
    pub is_active: bool,
    pub created_at: i64,
}

impl PriceRule {
    pub fn category(&self) -> RuleCategory {
        self.kind.category()
    }

    /// Code comparison honouring `case_sensitive`
    pub fn code_matches(&self, input: &str) -> bool {
        match &self.code {
            Some(code) if self.case_sensitive => code == input,
            Some(code) => code.eq_ignore_ascii_case(input),
            None => false,
        }
    }
}

/// Create price rule payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRuleCreate {
    pub name: String,
    pub kind: RuleKind,
    pub value: Decimal,
    #[serde(default)]
    pub is_percentage: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub vehicle_categories: Vec<VehicleCategory>,
    #[serde(default)]
    pub vehicle_levels: Vec<VehicleLevel>,
    #[serde(default)]
    pub service_area: ServiceArea,
    #[serde(default, flatten)]
    pub window: TimeWindow,
    pub currency: Option<Currency>,
    #[serde(default)]
    pub requires_code: bool,
    pub code: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub is_exclusive: bool,
}

impl PriceRuleCreate {
    pub fn new(name: impl Into<String>, kind: RuleKind, value: Decimal) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            is_percentage: false,
            priority: 0,
            vehicle_categories: Vec::new(),
            vehicle_levels: Vec::new(),
            service_area: ServiceArea::Global,
            window: TimeWindow::default(),
            currency: None,
            requires_code: false,
            code: None,
            case_sensitive: false,
            max_discount: None,
            min_order_amount: None,
            is_exclusive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_area_contains() {
        let kigali = Coordinate::new(-1.95, 30.06);
        assert!(ServiceArea::Global.contains(&kigali));

        let circle = ServiceArea::Circle {
            center: kigali,
            radius_km: 10.0,
        };
        assert!(circle.contains(&kigali.offset_north_km(9.0)));
        assert!(!circle.contains(&kigali.offset_north_km(11.0)));

        let bbox = ServiceArea::Bbox {
            min_lat: -2.1,
            min_lng: 29.9,
            max_lat: -1.8,
            max_lng: 30.3,
        };
        assert!(bbox.contains(&kigali));
        assert!(!bbox.contains(&Coordinate::new(0.3476, 32.5825)));
    }

    #[test]
    fn test_code_matching_case_rules() {
        let mut rule = PriceRule {
            id: 1,
            rule_id: "R1".into(),
            name: "welcome".into(),
            kind: RuleKind::PercentageDiscount,
            value: Decimal::from(10),
            is_percentage: false,
            priority: 0,
            vehicle_categories: vec![],
            vehicle_levels: vec![],
            service_area: ServiceArea::Global,
            window: TimeWindow::default(),
            currency: None,
            requires_code: true,
            code: Some("Welcome".into()),
            case_sensitive: false,
            max_discount: None,
            min_order_amount: None,
            is_exclusive: false,
            is_active: true,
            created_at: 0,
        };
        assert!(rule.code_matches("WELCOME"));
        rule.case_sensitive = true;
        assert!(!rule.code_matches("WELCOME"));
        assert!(rule.code_matches("Welcome"));
    }

    #[test]
    fn test_service_area_json_shape() {
        let area: ServiceArea = serde_json::from_str(
            r#"{"type":"circle","center":{"lat":-1.95,"lng":30.06},"radius_km":5.0}"#,
        )
        .unwrap();
        assert!(matches!(area, ServiceArea::Circle { .. }));
    }
}
