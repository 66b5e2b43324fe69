//! Promotion templates and user-held promotions

use super::{RepoError, RepoResult, decimal, json_or_default, opt_decimal, to_json};
use rust_decimal::Decimal;
use shared::models::{
    DiscountType, Promotion, PromotionCreate, PromotionStatus, UserPromotion, UserPromotionStatus,
};
use sqlx::SqliteConnection;

const PROMOTION_SELECT: &str = "SELECT id, promotion_id, code, name, discount_type, discount_value, max_discount, min_order_amount, usage_limit, usage_count, per_user_limit, valid_from, valid_until, cities, vehicle_categories, is_exclusive, auto_apply, status, created_at FROM t_promotion";

const USER_PROMOTION_SELECT: &str = "SELECT id, user_promotion_id, promotion_id, user_id, code, discount_type, discount_value, max_discount, min_order_amount, is_exclusive, auto_apply, status, order_id, used_amount, used_at, expires_at, source, issued_at FROM t_user_promotion";

#[derive(sqlx::FromRow)]
struct PromotionRow {
    id: i64,
    promotion_id: String,
    code: String,
    name: String,
    discount_type: DiscountType,
    discount_value: String,
    max_discount: Option<String>,
    min_order_amount: Option<String>,
    usage_limit: Option<i64>,
    usage_count: i64,
    per_user_limit: Option<i64>,
    valid_from: Option<i64>,
    valid_until: Option<i64>,
    cities: String,
    vehicle_categories: String,
    is_exclusive: bool,
    auto_apply: bool,
    status: PromotionStatus,
    created_at: i64,
}

impl PromotionRow {
    fn into_promotion(self) -> RepoResult<Promotion> {
        Ok(Promotion {
            id: self.id,
            discount_value: decimal(&self.discount_value, "t_promotion.discount_value")?,
            max_discount: opt_decimal(self.max_discount.as_deref(), "max_discount")?,
            min_order_amount: opt_decimal(self.min_order_amount.as_deref(), "min_order_amount")?,
            cities: json_or_default(&self.cities, "cities"),
            vehicle_categories: json_or_default(&self.vehicle_categories, "vehicle_categories"),
            promotion_id: self.promotion_id,
            code: self.code,
            name: self.name,
            discount_type: self.discount_type,
            usage_limit: self.usage_limit,
            usage_count: self.usage_count,
            per_user_limit: self.per_user_limit,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            is_exclusive: self.is_exclusive,
            auto_apply: self.auto_apply,
            status: self.status,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserPromotionRow {
    id: i64,
    user_promotion_id: String,
    promotion_id: String,
    user_id: String,
    code: String,
    discount_type: DiscountType,
    discount_value: String,
    max_discount: Option<String>,
    min_order_amount: Option<String>,
    is_exclusive: bool,
    auto_apply: bool,
    status: UserPromotionStatus,
    order_id: Option<String>,
    used_amount: Option<String>,
    used_at: Option<i64>,
    expires_at: Option<i64>,
    source: String,
    issued_at: i64,
}

impl UserPromotionRow {
    fn into_user_promotion(self) -> RepoResult<UserPromotion> {
        Ok(UserPromotion {
            id: self.id,
            discount_value: decimal(&self.discount_value, "t_user_promotion.discount_value")?,
            max_discount: opt_decimal(self.max_discount.as_deref(), "max_discount")?,
            min_order_amount: opt_decimal(self.min_order_amount.as_deref(), "min_order_amount")?,
            used_amount: opt_decimal(self.used_amount.as_deref(), "used_amount")?,
            user_promotion_id: self.user_promotion_id,
            promotion_id: self.promotion_id,
            user_id: self.user_id,
            code: self.code,
            discount_type: self.discount_type,
            is_exclusive: self.is_exclusive,
            auto_apply: self.auto_apply,
            status: self.status,
            order_id: self.order_id,
            used_at: self.used_at,
            expires_at: self.expires_at,
            source: self.source,
            issued_at: self.issued_at,
        })
    }
}

// ========== Templates ==========

pub async fn create(conn: &mut SqliteConnection, data: PromotionCreate) -> RepoResult<Promotion> {
    if data.discount_value <= Decimal::ZERO {
        return Err(RepoError::Validation("discount_value must be positive".into()));
    }
    let promotion_id = shared::util::domain_id("PROMO");
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO t_promotion (promotion_id, code, name, discount_type, discount_value, max_discount, min_order_amount, usage_limit, usage_count, per_user_limit, valid_from, valid_until, cities, vehicle_categories, is_exclusive, auto_apply, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 'active', ?16)",
    )
    .bind(&promotion_id)
    .bind(&data.code)
    .bind(&data.name)
    .bind(data.discount_type)
    .bind(data.discount_value.to_string())
    .bind(data.max_discount.map(|d| d.to_string()))
    .bind(data.min_order_amount.map(|d| d.to_string()))
    .bind(data.usage_limit)
    .bind(data.per_user_limit)
    .bind(data.valid_from)
    .bind(data.valid_until)
    .bind(to_json(&data.cities)?)
    .bind(to_json(&data.vehicle_categories)?)
    .bind(data.is_exclusive)
    .bind(data.auto_apply)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    find_by_id(conn, &promotion_id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to create promotion".into()))
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    promotion_id: &str,
) -> RepoResult<Option<Promotion>> {
    let sql = format!("{PROMOTION_SELECT} WHERE promotion_id = ?");
    let row = sqlx::query_as::<_, PromotionRow>(&sql)
        .bind(promotion_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(PromotionRow::into_promotion).transpose()
}

/// Bump `usage_count` unless the total cap is reached
pub async fn increment_usage(conn: &mut SqliteConnection, promotion_id: &str) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_promotion SET usage_count = usage_count + 1 WHERE promotion_id = ? AND status = 'active' AND (usage_limit IS NULL OR usage_count < usage_limit)",
    )
    .bind(promotion_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ========== User promotions ==========

pub async fn insert_user_promotion(
    conn: &mut SqliteConnection,
    up: &UserPromotion,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_user_promotion (user_promotion_id, promotion_id, user_id, code, discount_type, discount_value, max_discount, min_order_amount, is_exclusive, auto_apply, status, order_id, used_amount, used_at, expires_at, source, issued_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
    )
    .bind(&up.user_promotion_id)
    .bind(&up.promotion_id)
    .bind(&up.user_id)
    .bind(&up.code)
    .bind(up.discount_type)
    .bind(up.discount_value.to_string())
    .bind(up.max_discount.map(|d| d.to_string()))
    .bind(up.min_order_amount.map(|d| d.to_string()))
    .bind(up.is_exclusive)
    .bind(up.auto_apply)
    .bind(up.status)
    .bind(&up.order_id)
    .bind(up.used_amount.map(|d| d.to_string()))
    .bind(up.used_at)
    .bind(up.expires_at)
    .bind(&up.source)
    .bind(up.issued_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_user_promotion(
    conn: &mut SqliteConnection,
    user_promotion_id: &str,
) -> RepoResult<Option<UserPromotion>> {
    let sql = format!("{USER_PROMOTION_SELECT} WHERE user_promotion_id = ?");
    let row = sqlx::query_as::<_, UserPromotionRow>(&sql)
        .bind(user_promotion_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(UserPromotionRow::into_user_promotion).transpose()
}

pub async fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> RepoResult<Vec<UserPromotion>> {
    let sql = format!("{USER_PROMOTION_SELECT} WHERE user_id = ? ORDER BY issued_at, id");
    let rows = sqlx::query_as::<_, UserPromotionRow>(&sql)
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(UserPromotionRow::into_user_promotion)
        .collect()
}

pub async fn count_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    promotion_id: &str,
) -> RepoResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM t_user_promotion WHERE user_id = ? AND promotion_id = ?",
    )
    .bind(user_id)
    .bind(promotion_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// `available → used`
pub async fn mark_used(
    conn: &mut SqliteConnection,
    user_promotion_id: &str,
    order_id: &str,
    used_amount: Decimal,
    now: i64,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_user_promotion SET status = 'used', order_id = ?1, used_amount = ?2, used_at = ?3 WHERE user_promotion_id = ?4 AND status = 'available'",
    )
    .bind(order_id)
    .bind(used_amount.to_string())
    .bind(now)
    .bind(user_promotion_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `used → available`, clearing the spend fields
pub async fn reset(conn: &mut SqliteConnection, user_promotion_id: &str) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_user_promotion SET status = 'available', order_id = NULL, used_amount = NULL, used_at = NULL WHERE user_promotion_id = ? AND status = 'used'",
    )
    .bind(user_promotion_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `used → available` only while still held by `order_id`
pub async fn release(conn: &mut SqliteConnection, user_promotion_id: &str, order_id: &str) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_user_promotion SET status = 'available', order_id = NULL, used_amount = NULL, used_at = NULL WHERE user_promotion_id = ? AND order_id = ? AND status = 'used'",
    )
    .bind(user_promotion_id)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Mark available promotions past their expiry
pub async fn expire_due(conn: &mut SqliteConnection, now: i64) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE t_user_promotion SET status = 'expired' WHERE status = 'available' AND expires_at IS NOT NULL AND expires_at <= ?",
    )
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
