//! Price Snapshot Repository

use super::{RepoResult, decimal, json_or_default, to_json};
use shared::geo::Coordinate;
use shared::models::{
    FareBreakdown, OrderType, PriceSnapshot, SnapshotStatus, VehicleCategory, VehicleLevel,
};
use shared::money::Currency;
use sqlx::SqliteConnection;

const SNAPSHOT_SELECT: &str = "SELECT snapshot_id, rider_id, order_id, order_type, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, distance_km, duration_min, vehicle_category, vehicle_level, currency, breakdown, surge_multiplier, original_fare, discount_amount, discounted_fare, applied_rule_ids, user_promotion_ids, discounts, skipped_discounts, status, expires_at, engine_version, rules_evaluated, rules_applied, calculation_time_ms, created_at FROM t_price_snapshot";

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    snapshot_id: String,
    rider_id: String,
    order_id: Option<String>,
    order_type: OrderType,
    pickup_lat: f64,
    pickup_lng: f64,
    dropoff_lat: f64,
    dropoff_lng: f64,
    distance_km: f64,
    duration_min: f64,
    vehicle_category: VehicleCategory,
    vehicle_level: VehicleLevel,
    currency: Currency,
    breakdown: String,
    surge_multiplier: String,
    original_fare: String,
    discount_amount: String,
    discounted_fare: String,
    applied_rule_ids: String,
    user_promotion_ids: String,
    discounts: String,
    skipped_discounts: String,
    status: SnapshotStatus,
    expires_at: i64,
    engine_version: String,
    rules_evaluated: i64,
    rules_applied: i64,
    calculation_time_ms: i64,
    created_at: i64,
}

impl SnapshotRow {
    fn into_snapshot(self) -> RepoResult<PriceSnapshot> {
        Ok(PriceSnapshot {
            breakdown: json_or_default::<FareBreakdown>(&self.breakdown, "breakdown"),
            surge_multiplier: decimal(&self.surge_multiplier, "surge_multiplier")?,
            original_fare: decimal(&self.original_fare, "original_fare")?,
            discount_amount: decimal(&self.discount_amount, "discount_amount")?,
            discounted_fare: decimal(&self.discounted_fare, "discounted_fare")?,
            applied_rule_ids: json_or_default(&self.applied_rule_ids, "applied_rule_ids"),
            user_promotion_ids: json_or_default(&self.user_promotion_ids, "user_promotion_ids"),
            discounts: json_or_default(&self.discounts, "discounts"),
            skipped_discounts: json_or_default(&self.skipped_discounts, "skipped_discounts"),
            snapshot_id: self.snapshot_id,
            rider_id: self.rider_id,
            order_id: self.order_id,
            order_type: self.order_type,
            pickup: Coordinate::new(self.pickup_lat, self.pickup_lng),
            dropoff: Coordinate::new(self.dropoff_lat, self.dropoff_lng),
            distance_km: self.distance_km,
            duration_min: self.duration_min,
            vehicle_category: self.vehicle_category,
            vehicle_level: self.vehicle_level,
            currency: self.currency,
            status: self.status,
            expires_at: self.expires_at,
            engine_version: self.engine_version,
            rules_evaluated: self.rules_evaluated.max(0) as u32,
            rules_applied: self.rules_applied.max(0) as u32,
            calculation_time_ms: self.calculation_time_ms,
            created_at: self.created_at,
        })
    }
}

pub async fn insert(conn: &mut SqliteConnection, snapshot: &PriceSnapshot) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_price_snapshot (snapshot_id, rider_id, order_id, order_type, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, distance_km, duration_min, vehicle_category, vehicle_level, currency, breakdown, surge_multiplier, original_fare, discount_amount, discounted_fare, applied_rule_ids, user_promotion_ids, discounts, skipped_discounts, status, expires_at, engine_version, rules_evaluated, rules_applied, calculation_time_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
    )
    .bind(&snapshot.snapshot_id)
    .bind(&snapshot.rider_id)
    .bind(&snapshot.order_id)
    .bind(snapshot.order_type)
    .bind(snapshot.pickup.lat)
    .bind(snapshot.pickup.lng)
    .bind(snapshot.dropoff.lat)
    .bind(snapshot.dropoff.lng)
    .bind(snapshot.distance_km)
    .bind(snapshot.duration_min)
    .bind(snapshot.vehicle_category)
    .bind(snapshot.vehicle_level)
    .bind(snapshot.currency)
    .bind(to_json(&snapshot.breakdown)?)
    .bind(snapshot.surge_multiplier.to_string())
    .bind(snapshot.original_fare.to_string())
    .bind(snapshot.discount_amount.to_string())
    .bind(snapshot.discounted_fare.to_string())
    .bind(to_json(&snapshot.applied_rule_ids)?)
    .bind(to_json(&snapshot.user_promotion_ids)?)
    .bind(to_json(&snapshot.discounts)?)
    .bind(to_json(&snapshot.skipped_discounts)?)
    .bind(snapshot.status)
    .bind(snapshot.expires_at)
    .bind(&snapshot.engine_version)
    .bind(snapshot.rules_evaluated as i64)
    .bind(snapshot.rules_applied as i64)
    .bind(snapshot.calculation_time_ms)
    .bind(snapshot.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    snapshot_id: &str,
) -> RepoResult<Option<PriceSnapshot>> {
    let sql = format!("{SNAPSHOT_SELECT} WHERE snapshot_id = ?");
    let row = sqlx::query_as::<_, SnapshotRow>(&sql)
        .bind(snapshot_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(SnapshotRow::into_snapshot).transpose()
}

/// Set `order_id` exactly once. False when already bound or not active.
pub async fn bind_order(
    conn: &mut SqliteConnection,
    snapshot_id: &str,
    order_id: &str,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_price_snapshot SET order_id = ?1 WHERE snapshot_id = ?2 AND order_id IS NULL AND status = 'active'",
    )
    .bind(order_id)
    .bind(snapshot_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `active → expired` for an unbound snapshot
pub async fn expire(conn: &mut SqliteConnection, snapshot_id: &str) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_price_snapshot SET status = 'expired' WHERE snapshot_id = ? AND status = 'active' AND order_id IS NULL",
    )
    .bind(snapshot_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Sweep unbound snapshots whose TTL has passed
pub async fn expire_due(conn: &mut SqliteConnection, now: i64) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE t_price_snapshot SET status = 'expired' WHERE status = 'active' AND order_id IS NULL AND expires_at <= ?",
    )
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
