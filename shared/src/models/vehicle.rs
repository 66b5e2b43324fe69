//! Vehicle classes

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum VehicleCategory {
    Moto,
    Sedan,
    Suv,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum VehicleLevel {
    Economy,
    Comfort,
    Premium,
}

/// Category + level pair, e.g. sedan/economy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleClass {
    pub category: VehicleCategory,
    pub level: VehicleLevel,
}

impl VehicleClass {
    pub fn new(category: VehicleCategory, level: VehicleLevel) -> Self {
        Self { category, level }
    }

    /// Empty filter lists match every class
    pub fn matches(&self, categories: &[VehicleCategory], levels: &[VehicleLevel]) -> bool {
        (categories.is_empty() || categories.contains(&self.category))
            && (levels.is_empty() || levels.contains(&self.level))
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.category, self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let class = VehicleClass::new(VehicleCategory::Sedan, VehicleLevel::Economy);
        assert!(class.matches(&[], &[]));
        assert!(class.matches(&[VehicleCategory::Sedan], &[]));
        assert!(!class.matches(&[VehicleCategory::Suv], &[]));
        assert!(!class.matches(&[], &[VehicleLevel::Premium]));
    }

    #[test]
    fn test_unknown_category_fails_to_parse() {
        assert!(serde_json::from_str::<VehicleCategory>("\"sedan\"").is_ok());
        assert!(serde_json::from_str::<VehicleCategory>("\"hovercraft\"").is_err());
    }
}
