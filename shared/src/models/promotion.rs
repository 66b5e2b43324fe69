//! Promotion templates and user-held promotions

use super::vehicle::VehicleCategory;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum PromotionStatus {
    Active,
    Inactive,
    Expired,
}

/// System-defined coupon template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: i64,
    pub promotion_id: String,
    /// Unique human code
    pub code: String,
    pub name: String,
    pub discount_type: DiscountType,
    /// Percentage (10 = 10%) or fixed amount
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    /// Total issued-and-used cap across all users
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    pub per_user_limit: Option<i64>,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    /// Empty = every city
    #[serde(default)]
    pub cities: Vec<String>,
    /// Empty = every vehicle category
    #[serde(default)]
    pub vehicle_categories: Vec<VehicleCategory>,
    #[serde(default)]
    pub is_exclusive: bool,
    #[serde(default)]
    pub auto_apply: bool,
    pub status: PromotionStatus,
    pub created_at: i64,
}

impl Promotion {
    pub fn in_window(&self, now: i64) -> bool {
        self.valid_from.is_none_or(|from| now >= from)
            && self.valid_until.is_none_or(|until| now < until)
    }

    pub fn usage_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.usage_count >= limit)
    }

    pub fn targets(&self, city: Option<&str>, category: VehicleCategory) -> bool {
        let city_ok = self.cities.is_empty()
            || city.is_some_and(|c| self.cities.iter().any(|t| t.eq_ignore_ascii_case(c)));
        let vehicle_ok =
            self.vehicle_categories.is_empty() || self.vehicle_categories.contains(&category);
        city_ok && vehicle_ok
    }
}

/// Create promotion payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionCreate {
    pub code: String,
    pub name: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub usage_limit: Option<i64>,
    pub per_user_limit: Option<i64>,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub vehicle_categories: Vec<VehicleCategory>,
    #[serde(default)]
    pub is_exclusive: bool,
    #[serde(default)]
    pub auto_apply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum UserPromotionStatus {
    Available,
    Used,
    Expired,
    Inactive,
}

impl UserPromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserPromotionStatus::Available => "available",
            UserPromotionStatus::Used => "used",
            UserPromotionStatus::Expired => "expired",
            UserPromotionStatus::Inactive => "inactive",
        }
    }
}

/// Promotion issued to a user; discount fields are copied at issue time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPromotion {
    pub id: i64,
    pub user_promotion_id: String,
    pub promotion_id: String,
    pub user_id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub is_exclusive: bool,
    pub auto_apply: bool,
    pub status: UserPromotionStatus,
    /// Set when `used`
    pub order_id: Option<String>,
    pub used_amount: Option<Decimal>,
    pub used_at: Option<i64>,
    pub expires_at: Option<i64>,
    /// Provenance, e.g. `signup`, `campaign`, `admin`
    pub source: String,
    pub issued_at: i64,
}

impl UserPromotion {
    /// `available` and not past its own expiry
    pub fn is_usable(&self, now: i64) -> bool {
        self.status == UserPromotionStatus::Available && self.expires_at.is_none_or(|e| now < e)
    }
}

/// Issue a promotion to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePromotionRequest {
    pub user_id: String,
    pub promotion_id: String,
    pub expires_at: Option<i64>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "admin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Promotion {
        Promotion {
            id: 1,
            promotion_id: "PRM1".into(),
            code: "WELCOME_NEW_USER".into(),
            name: "Welcome".into(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::from(10),
            max_discount: Some(Decimal::from(500)),
            min_order_amount: Some(Decimal::from(100)),
            usage_limit: Some(2),
            usage_count: 0,
            per_user_limit: Some(1),
            valid_from: Some(1_000),
            valid_until: Some(2_000),
            cities: vec!["Kigali".into()],
            vehicle_categories: vec![],
            is_exclusive: false,
            auto_apply: false,
            status: PromotionStatus::Active,
            created_at: 0,
        }
    }

    #[test]
    fn test_window_bounds() {
        let p = template();
        assert!(!p.in_window(999));
        assert!(p.in_window(1_000));
        assert!(p.in_window(1_999));
        assert!(!p.in_window(2_000));
    }

    #[test]
    fn test_usage_and_targeting() {
        let mut p = template();
        assert!(!p.usage_exhausted());
        p.usage_count = 2;
        assert!(p.usage_exhausted());

        assert!(p.targets(Some("kigali"), VehicleCategory::Sedan));
        assert!(!p.targets(Some("Kampala"), VehicleCategory::Sedan));
        assert!(!p.targets(None, VehicleCategory::Sedan));
    }
}
