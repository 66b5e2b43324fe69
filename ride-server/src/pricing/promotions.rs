//! Promotion issuing and retirement
//!
//! Issuing is split in two: [`build_user_promotion`] produces the row from a
//! template, [`admit`] checks the caps and persists it.
//!
//! A snapshot's user promotions are reserved (`used`, bound to the order)
//! when the snapshot is locked. Cancel, rejection and refund release them;
//! completion confirms them.

use super::error::{PricingError, PricingResult};
use crate::db::repository::{RepoResult, promotion};
use shared::models::{
    IssuePromotionRequest, PriceSnapshot, Promotion, PromotionStatus, UserPromotion,
    UserPromotionStatus,
};
use shared::util::domain_id;
use sqlx::SqliteConnection;

/// Copy the template's discount terms into a new, not yet persisted row
pub fn build_user_promotion(template: &Promotion, req: &IssuePromotionRequest, now: i64) -> UserPromotion {
    let expires_at = match (req.expires_at, template.valid_until) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    UserPromotion {
        id: 0,
        user_promotion_id: domain_id("UP"),
        promotion_id: template.promotion_id.clone(),
        user_id: req.user_id.clone(),
        code: template.code.clone(),
        discount_type: template.discount_type,
        discount_value: template.discount_value,
        max_discount: template.max_discount,
        min_order_amount: template.min_order_amount,
        is_exclusive: template.is_exclusive,
        auto_apply: template.auto_apply,
        status: UserPromotionStatus::Available,
        order_id: None,
        used_amount: None,
        used_at: None,
        expires_at,
        source: req.source.clone(),
        issued_at: now,
    }
}

/// Check the template state and usage caps, count the issue, persist the row
pub async fn admit(
    conn: &mut SqliteConnection,
    template: &Promotion,
    up: &UserPromotion,
    now: i64,
) -> PricingResult<()> {
    if template.status != PromotionStatus::Active || !template.in_window(now) {
        return Err(PricingError::PromoExpired(template.code.clone()));
    }

    if let Some(limit) = template.per_user_limit {
        let held = promotion::count_for_user(conn, &up.user_id, &template.promotion_id).await?;
        if held >= limit {
            return Err(PricingError::PromotionUsageExceeded(template.promotion_id.clone()));
        }
    }

    if !promotion::increment_usage(conn, &template.promotion_id).await? {
        return Err(PricingError::PromotionUsageExceeded(template.promotion_id.clone()));
    }

    promotion::insert_user_promotion(conn, up).await?;
    Ok(())
}

/// `available → used` for every user promotion the snapshot applied
///
/// Runs in the transaction that binds the snapshot; a promotion taken by
/// another order fails the bind.
pub async fn reserve_for_order(
    conn: &mut SqliteConnection,
    snapshot: &PriceSnapshot,
    order_id: &str,
    now: i64,
) -> PricingResult<()> {
    for up_id in &snapshot.user_promotion_ids {
        let amount = snapshot.discount_for(up_id).unwrap_or_default();
        if !promotion::mark_used(conn, up_id, order_id, amount, now).await? {
            return Err(PricingError::UserPromotionUnavailable(up_id.clone()));
        }
    }
    Ok(())
}

/// Confirm the order's reservations at settlement
///
/// Returns the ids held by the order; a promotion held by nobody is taken
/// now, one held elsewhere is skipped with a warning.
pub async fn retire_for_order(
    conn: &mut SqliteConnection,
    snapshot: &PriceSnapshot,
    order_id: &str,
    now: i64,
) -> PricingResult<Vec<String>> {
    let mut retired = Vec::with_capacity(snapshot.user_promotion_ids.len());
    for up_id in &snapshot.user_promotion_ids {
        let amount = snapshot.discount_for(up_id).unwrap_or_default();
        let held = promotion::find_user_promotion(conn, up_id)
            .await?
            .is_some_and(|up| up.status == UserPromotionStatus::Used && up.order_id.as_deref() == Some(order_id));
        if held || promotion::mark_used(conn, up_id, order_id, amount, now).await? {
            retired.push(up_id.clone());
        } else {
            tracing::warn!(
                user_promotion_id = %up_id,
                order_id,
                "User promotion held by another order at settlement"
            );
        }
    }
    Ok(retired)
}

/// `used → available` for the snapshot's user promotions held by `order_id`
pub async fn release_for_order(
    conn: &mut SqliteConnection,
    snapshot: &PriceSnapshot,
    order_id: &str,
) -> RepoResult<Vec<String>> {
    let mut released = Vec::new();
    for up_id in &snapshot.user_promotion_ids {
        if promotion::release(conn, up_id, order_id).await? {
            released.push(up_id.clone());
        }
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use rust_decimal::Decimal;
    use shared::models::{DiscountType, PromotionCreate};

    fn create_payload(code: &str) -> PromotionCreate {
        PromotionCreate {
            code: code.into(),
            name: "Welcome".into(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::from(10),
            max_discount: Some(Decimal::from(500)),
            min_order_amount: Some(Decimal::from(100)),
            usage_limit: Some(2),
            per_user_limit: Some(1),
            valid_from: None,
            valid_until: Some(5_000),
            cities: vec![],
            vehicle_categories: vec![],
            is_exclusive: false,
            auto_apply: false,
        }
    }

    fn issue(user: &str, template: &Promotion) -> IssuePromotionRequest {
        IssuePromotionRequest {
            user_id: user.into(),
            promotion_id: template.promotion_id.clone(),
            expires_at: Some(9_000),
            source: "signup".into(),
        }
    }

    #[test]
    fn test_builder_takes_earliest_expiry() {
        let template = Promotion {
            id: 1,
            promotion_id: "PROMO1".into(),
            code: "WELCOME".into(),
            name: "w".into(),
            discount_type: DiscountType::FixedAmount,
            discount_value: Decimal::from(100),
            max_discount: None,
            min_order_amount: None,
            usage_limit: None,
            usage_count: 0,
            per_user_limit: None,
            valid_from: None,
            valid_until: Some(5_000),
            cities: vec![],
            vehicle_categories: vec![],
            is_exclusive: true,
            auto_apply: false,
            status: PromotionStatus::Active,
            created_at: 0,
        };
        let up = build_user_promotion(&template, &issue("R1", &template), 10);
        assert_eq!(up.expires_at, Some(5_000));
        assert_eq!(up.code, "WELCOME");
        assert!(up.is_exclusive);
        assert_eq!(up.status, UserPromotionStatus::Available);
    }

    #[tokio::test]
    async fn test_admit_enforces_per_user_and_total_caps() {
        let db = DbService::in_memory().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();
        let template = promotion::create(&mut conn, create_payload("WELCOME")).await.unwrap();

        let first = build_user_promotion(&template, &issue("R1", &template), 10);
        admit(&mut conn, &template, &first, 10).await.unwrap();

        let again = build_user_promotion(&template, &issue("R1", &template), 11);
        assert!(matches!(
            admit(&mut conn, &template, &again, 11).await,
            Err(PricingError::PromotionUsageExceeded(_))
        ));

        let second = build_user_promotion(&template, &issue("R2", &template), 12);
        admit(&mut conn, &template, &second, 12).await.unwrap();

        let third = build_user_promotion(&template, &issue("R3", &template), 13);
        assert!(matches!(
            admit(&mut conn, &template, &third, 13).await,
            Err(PricingError::PromotionUsageExceeded(_))
        ));

        // outside the template window
        let late = build_user_promotion(&template, &issue("R4", &template), 6_000);
        assert!(matches!(
            admit(&mut conn, &template, &late, 6_000).await,
            Err(PricingError::PromoExpired(_))
        ));
    }
}
