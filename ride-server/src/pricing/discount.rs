//! Discount stage
//!
//! Candidates from code-matched rules and user-held promotions are
//! normalised to one shape, ordered, then applied against a running total.

use rust_decimal::Decimal;
use shared::models::{
    AppliedDiscount, DiscountSource, DiscountType, PriceRule, RuleKind, SkippedDiscount,
    UserPromotion,
};
use shared::money::Currency;
use std::cmp::Ordering;

pub const REASON_MIN_ORDER: &str = "min_order_not_met";
pub const REASON_GLOBAL_CAP: &str = "global_cap_reached";
pub const REASON_EXCLUSIVE: &str = "exclusive_applied";
pub const REASON_ZERO: &str = "zero_discount";
pub const REASON_NOT_TARGETED: &str = "not_targeted";

/// Normalised discount candidate
#[derive(Debug, Clone)]
pub struct DiscountCandidate {
    pub source: DiscountSource,
    pub ref_id: String,
    pub code: Option<String>,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub max_cap: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub exclusive: bool,
    /// Position of the code the rider typed; None for automatic discounts
    pub user_order: Option<usize>,
}

impl DiscountCandidate {
    /// None for non-discount rules
    pub fn from_rule(rule: &PriceRule, user_order: Option<usize>) -> Option<Self> {
        let discount_type = match rule.kind {
            RuleKind::PercentageDiscount => DiscountType::Percentage,
            RuleKind::FixedAmountDiscount => DiscountType::FixedAmount,
            _ => return None,
        };
        Some(Self {
            source: DiscountSource::Rule,
            ref_id: rule.rule_id.clone(),
            code: rule.code.clone(),
            discount_type,
            value: rule.value,
            max_cap: rule.max_discount,
            min_order_amount: rule.min_order_amount,
            exclusive: rule.is_exclusive,
            user_order,
        })
    }

    pub fn from_user_promotion(up: &UserPromotion, user_order: Option<usize>) -> Self {
        Self {
            source: DiscountSource::UserPromotion,
            ref_id: up.user_promotion_id.clone(),
            code: Some(up.code.clone()),
            discount_type: up.discount_type,
            value: up.discount_value,
            max_cap: up.max_discount,
            min_order_amount: up.min_order_amount,
            exclusive: up.is_exclusive,
            user_order,
        }
    }

    /// Uncapped-by-total discount this candidate yields on `total`
    pub fn provisional(&self, total: Decimal, currency: Currency) -> Decimal {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                // 溢出时折扣必然超过总价，按总价封顶
                let amount = total
                    .checked_mul(self.value)
                    .map_or(total, |v| v / Decimal::ONE_HUNDRED);
                match self.max_cap {
                    Some(cap) => amount.min(cap),
                    None => amount,
                }
            }
            DiscountType::FixedAmount => self.value.min(total),
        };
        currency.round(raw.max(Decimal::ZERO)).min(total)
    }

    fn skipped(&self, reason: &str) -> SkippedDiscount {
        SkippedDiscount {
            code: self.code.clone(),
            ref_id: self.ref_id.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscountOutcome {
    pub total_discount: Decimal,
    pub final_total: Decimal,
    pub applied: Vec<AppliedDiscount>,
    pub skipped: Vec<SkippedDiscount>,
}

impl DiscountOutcome {
    pub fn user_promotion_ids(&self) -> Vec<String> {
        self.applied
            .iter()
            .filter(|d| d.source == DiscountSource::UserPromotion)
            .map(|d| d.ref_id.clone())
            .collect()
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.applied
            .iter()
            .filter(|d| d.source == DiscountSource::Rule)
            .map(|d| d.ref_id.clone())
            .collect()
    }
}

/// Typed codes first (in typing order), then larger discount on `total` first
pub fn sort_candidates(candidates: &mut [DiscountCandidate], total: Decimal, currency: Currency) {
    candidates.sort_by(|a, b| match (a.user_order, b.user_order) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.ref_id.cmp(&b.ref_id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b
            .provisional(total, currency)
            .cmp(&a.provisional(total, currency))
            .then_with(|| a.ref_id.cmp(&b.ref_id)),
    });
}

/// Apply candidates to `total`
///
/// A candidate is skipped when the running total is below its minimum order
/// amount (equal passes). Application stops once the cumulative discount
/// reaches `global_cap` or an exclusive discount has been applied; whatever
/// is left is reported as skipped.
pub fn apply_discounts(
    total: Decimal,
    mut candidates: Vec<DiscountCandidate>,
    global_cap: Option<Decimal>,
    currency: Currency,
) -> DiscountOutcome {
    sort_candidates(&mut candidates, total, currency);

    let mut outcome = DiscountOutcome {
        final_total: total,
        ..Default::default()
    };
    let mut stop_reason: Option<&str> = None;

    for candidate in candidates {
        if let Some(reason) = stop_reason {
            outcome.skipped.push(candidate.skipped(reason));
            continue;
        }

        let running = outcome.final_total;
        if candidate.min_order_amount.is_some_and(|min| running < min) {
            outcome.skipped.push(candidate.skipped(REASON_MIN_ORDER));
            continue;
        }

        let mut amount = candidate.provisional(running, currency);
        if let Some(cap) = global_cap {
            amount = amount.min((cap - outcome.total_discount).max(Decimal::ZERO));
        }
        if amount.is_zero() {
            outcome.skipped.push(candidate.skipped(REASON_ZERO));
            continue;
        }

        outcome.total_discount += amount;
        outcome.final_total -= amount;
        outcome.applied.push(AppliedDiscount {
            source: candidate.source,
            ref_id: candidate.ref_id.clone(),
            code: candidate.code.clone(),
            discount_type: candidate.discount_type,
            amount,
        });

        if global_cap.is_some_and(|cap| outcome.total_discount >= cap) {
            stop_reason = Some(REASON_GLOBAL_CAP);
        } else if candidate.exclusive {
            stop_reason = Some(REASON_EXCLUSIVE);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate(id: &str, t: DiscountType, value: Decimal) -> DiscountCandidate {
        DiscountCandidate {
            source: DiscountSource::UserPromotion,
            ref_id: id.into(),
            code: Some(id.into()),
            discount_type: t,
            value,
            max_cap: None,
            min_order_amount: None,
            exclusive: false,
            user_order: None,
        }
    }

    #[test]
    fn test_welcome_promotion_on_standard_fare() {
        let mut up = candidate("UP1", DiscountType::Percentage, dec!(10));
        up.max_cap = Some(dec!(500));
        up.min_order_amount = Some(dec!(100));
        up.user_order = Some(0);

        let out = apply_discounts(dec!(2050), vec![up], None, Currency::Rwf);
        assert_eq!(out.total_discount, dec!(205));
        assert_eq!(out.final_total, dec!(1845));
        assert_eq!(out.user_promotion_ids(), vec!["UP1"]);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn test_min_order_boundary() {
        let mut equal = candidate("EQ", DiscountType::FixedAmount, dec!(50));
        equal.min_order_amount = Some(dec!(1000));
        let out = apply_discounts(dec!(1000), vec![equal.clone()], None, Currency::Rwf);
        assert_eq!(out.total_discount, dec!(50));

        equal.min_order_amount = Some(dec!(1000.01));
        let out = apply_discounts(dec!(1000), vec![equal], None, Currency::Rwf);
        assert!(out.applied.is_empty());
        assert_eq!(out.skipped[0].reason, REASON_MIN_ORDER);
    }

    #[test]
    fn test_min_order_checks_running_total() {
        let mut first = candidate("A", DiscountType::FixedAmount, dec!(300));
        first.user_order = Some(0);
        let mut second = candidate("B", DiscountType::FixedAmount, dec!(100));
        second.user_order = Some(1);
        second.min_order_amount = Some(dec!(900));

        let out = apply_discounts(dec!(1000), vec![second, first], None, Currency::Rwf);
        assert_eq!(out.total_discount, dec!(300));
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].ref_id, "B");
    }

    #[test]
    fn test_typed_codes_before_larger_automatic_discounts() {
        let mut typed = candidate("TYPED", DiscountType::FixedAmount, dec!(10));
        typed.user_order = Some(0);
        typed.exclusive = true;
        let auto = candidate("AUTO", DiscountType::FixedAmount, dec!(500));

        let out = apply_discounts(dec!(2000), vec![auto, typed], None, Currency::Rwf);
        assert_eq!(out.applied.len(), 1);
        assert_eq!(out.applied[0].ref_id, "TYPED");
        assert_eq!(out.skipped[0].reason, REASON_EXCLUSIVE);
    }

    #[test]
    fn test_higher_value_first_among_automatic() {
        let small = candidate("SMALL", DiscountType::FixedAmount, dec!(100));
        let big = candidate("BIG", DiscountType::Percentage, dec!(20));
        let out = apply_discounts(dec!(1000), vec![small, big], None, Currency::Rwf);
        assert_eq!(out.applied[0].ref_id, "BIG");
        assert_eq!(out.applied[0].amount, dec!(200));
        // fixed discount applies to the reduced total
        assert_eq!(out.applied[1].amount, dec!(100));
        assert_eq!(out.final_total, dec!(700));
    }

    #[test]
    fn test_global_cap_clamps_and_stops() {
        let a = candidate("A", DiscountType::FixedAmount, dec!(300));
        let b = candidate("B", DiscountType::FixedAmount, dec!(200));
        let c = candidate("C", DiscountType::FixedAmount, dec!(100));
        let out = apply_discounts(dec!(2000), vec![a, b, c], Some(dec!(400)), Currency::Rwf);
        assert_eq!(out.total_discount, dec!(400));
        assert_eq!(out.applied.len(), 2);
        assert_eq!(out.applied[1].amount, dec!(100));
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].reason, REASON_GLOBAL_CAP);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_total() {
        let a = candidate("A", DiscountType::FixedAmount, dec!(5000));
        let out = apply_discounts(dec!(800), vec![a], None, Currency::Rwf);
        assert_eq!(out.total_discount, dec!(800));
        assert_eq!(out.final_total, Decimal::ZERO);
    }
}
