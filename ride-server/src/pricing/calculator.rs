//! Fare Calculator
//!
//! Fare, surcharge and fee stages. Each breakdown line is rounded to the
//! currency's minor units (half away from zero) before it is summed.
//! Arithmetic is checked: a fare outside Decimal's range is an error, never
//! a panic or a silent zero.

use super::error::{PricingError, PricingResult};
use rust_decimal::prelude::*;
use shared::models::{FareBreakdown, PriceRule, RuleKind};
use shared::money::Currency;

/// Convert a distance / duration to Decimal; `None` when out of Decimal's range
#[inline]
pub fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(6))
}

fn overflow() -> PricingError {
    PricingError::OutOfRange {
        field: "fare",
        message: "exceeds the representable amount".into(),
    }
}

fn add(a: Decimal, b: Decimal) -> PricingResult<Decimal> {
    a.checked_add(b).ok_or_else(overflow)
}

fn mul(a: Decimal, b: Decimal) -> PricingResult<Decimal> {
    a.checked_mul(b).ok_or_else(overflow)
}

/// Result of the fare, surcharge and fee stages
#[derive(Debug, Clone, Default)]
pub struct FareCalculation {
    pub breakdown: FareBreakdown,
    /// Product of applied surge multipliers
    pub surge_multiplier: Decimal,
    /// Pre-discount total, fees included
    pub total: Decimal,
    /// rule_id of every rule that contributed, in evaluation order
    pub applied_rule_ids: Vec<String>,
}

/// Run the fare, surcharge and fee stages over already-selected rules
///
/// `rules` must be sorted by priority (lower first); discount rules are
/// ignored here.
pub fn calculate_fare(
    rules: &[&PriceRule],
    distance_km: Decimal,
    duration_min: Decimal,
    currency: Currency,
) -> PricingResult<FareCalculation> {
    let mut calc = FareCalculation {
        surge_multiplier: Decimal::ONE,
        ..Default::default()
    };

    let mut base = Decimal::ZERO;
    let mut distance = Decimal::ZERO;
    let mut time = Decimal::ZERO;
    let mut surcharge = Decimal::ZERO;

    // Step 1: fare, surge, fixed surcharge
    for rule in rules {
        match rule.kind {
            RuleKind::Base => base = add(base, rule.value)?,
            RuleKind::PerDistance => distance = add(distance, mul(rule.value, distance_km)?)?,
            RuleKind::PerTime => time = add(time, mul(rule.value, duration_min)?)?,
            RuleKind::SurgeMultiplier => calc.surge_multiplier = mul(calc.surge_multiplier, rule.value)?,
            RuleKind::FixedSurcharge => surcharge = add(surcharge, rule.value)?,
            _ => continue,
        }
        calc.applied_rule_ids.push(rule.rule_id.clone());
    }

    let b = &mut calc.breakdown;
    b.base_fare = currency.round(base);
    b.distance_fare = currency.round(distance);
    b.time_fare = currency.round(time);

    let subtotal = add(add(b.base_fare, b.distance_fare)?, b.time_fare)?;
    b.surge_amount = currency.round(mul(subtotal, calc.surge_multiplier - Decimal::ONE)?);
    b.surcharge_amount = currency.round(surcharge);

    // Step 2: fees on the fare subtotal
    for rule in rules {
        let amount = match rule.kind {
            RuleKind::ServiceFee | RuleKind::PlatformFee => fee_amount(rule, subtotal)?,
            _ => continue,
        };
        if rule.kind == RuleKind::ServiceFee {
            b.service_fee = add(b.service_fee, amount)?;
        } else {
            b.platform_fee = add(b.platform_fee, amount)?;
        }
        calc.applied_rule_ids.push(rule.rule_id.clone());
    }
    b.service_fee = currency.round(b.service_fee);
    b.platform_fee = currency.round(b.platform_fee);

    let mut total = subtotal;
    for part in [b.surge_amount, b.surcharge_amount, b.service_fee, b.platform_fee] {
        total = add(total, part)?;
    }
    calc.total = total.max(Decimal::ZERO);
    Ok(calc)
}

fn fee_amount(rule: &PriceRule, subtotal: Decimal) -> PricingResult<Decimal> {
    if rule.is_percentage {
        Ok(mul(subtotal, rule.value)? / Decimal::ONE_HUNDRED)
    } else {
        Ok(rule.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use shared::models::{ServiceArea, TimeWindow};

    fn rule(id: &str, kind: RuleKind, value: Decimal) -> PriceRule {
        PriceRule {
            id: 0,
            rule_id: id.into(),
            name: id.into(),
            kind,
            value,
            is_percentage: false,
            priority: 0,
            vehicle_categories: vec![],
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

    fn standard_rules() -> Vec<PriceRule> {
        vec![
            rule("BASE", RuleKind::Base, dec!(500)),
            rule("KM", RuleKind::PerDistance, dec!(200)),
            rule("MIN", RuleKind::PerTime, dec!(30)),
            rule("SVC", RuleKind::ServiceFee, dec!(100)),
        ]
    }

    #[test]
    fn test_standard_sedan_fare() {
        let rules = standard_rules();
        let refs: Vec<&PriceRule> = rules.iter().collect();
        let calc = calculate_fare(&refs, dec!(5.0), dec!(15), Currency::Rwf).unwrap();

        assert_eq!(calc.breakdown.base_fare, dec!(500));
        assert_eq!(calc.breakdown.distance_fare, dec!(1000));
        assert_eq!(calc.breakdown.time_fare, dec!(450));
        assert_eq!(calc.breakdown.service_fee, dec!(100));
        assert_eq!(calc.surge_multiplier, Decimal::ONE);
        assert_eq!(calc.total, dec!(2050));
        assert_eq!(calc.applied_rule_ids, vec!["BASE", "KM", "MIN", "SVC"]);
    }

    #[test]
    fn test_surge_and_surcharge() {
        let mut rules = standard_rules();
        rules.push(rule("SURGE", RuleKind::SurgeMultiplier, dec!(1.5)));
        rules.push(rule("AIRPORT", RuleKind::FixedSurcharge, dec!(300)));
        let refs: Vec<&PriceRule> = rules.iter().collect();
        let calc = calculate_fare(&refs, dec!(5), dec!(15), Currency::Rwf).unwrap();

        // subtotal 1950 * 0.5
        assert_eq!(calc.breakdown.surge_amount, dec!(975));
        assert_eq!(calc.breakdown.surcharge_amount, dec!(300));
        assert_eq!(calc.total, dec!(1950) + dec!(975) + dec!(300) + dec!(100));
    }

    #[test]
    fn test_percentage_fee_rounds_to_minor_units() {
        let mut fee = rule("PLAT", RuleKind::PlatformFee, dec!(3.3));
        fee.is_percentage = true;
        let base = rule("BASE", RuleKind::Base, dec!(1005));
        let refs = vec![&base, &fee];

        let rwf = calculate_fare(&refs, Decimal::ZERO, Decimal::ZERO, Currency::Rwf).unwrap();
        // 1005 * 3.3% = 33.165
        assert_eq!(rwf.breakdown.platform_fee, dec!(33));

        let usd = calculate_fare(&refs, Decimal::ZERO, Decimal::ZERO, Currency::Usd).unwrap();
        assert_eq!(usd.breakdown.platform_fee, dec!(33.17));
    }

    #[test]
    fn test_discount_rules_are_not_fare_rules() {
        let base = rule("BASE", RuleKind::Base, dec!(500));
        let promo = rule("PROMO", RuleKind::PercentageDiscount, dec!(10));
        let calc = calculate_fare(&[&base, &promo], dec!(1), dec!(1), Currency::Rwf).unwrap();
        assert_eq!(calc.total, dec!(500));
        assert_eq!(calc.applied_rule_ids, vec!["BASE"]);
    }

    #[test]
    fn test_overflowing_fare_is_an_error() {
        let rules = standard_rules();
        let refs: Vec<&PriceRule> = rules.iter().collect();
        let huge = Decimal::MAX / dec!(10);
        assert!(matches!(
            calculate_fare(&refs, huge, Decimal::ZERO, Currency::Rwf),
            Err(PricingError::OutOfRange { field: "fare", .. })
        ));
    }

    #[test]
    fn test_to_decimal_rejects_out_of_range() {
        assert_eq!(to_decimal(5.25), Some(dec!(5.25)));
        assert!(to_decimal(1e40).is_none());
    }
}
