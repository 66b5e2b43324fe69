//! Driver projection (write-through store behind the in-memory index)

use super::{RepoResult, json_or_default, to_json};
use shared::geo::Coordinate;
use shared::models::{
    DriverAccountStatus, DriverProfile, DriverWorkStatus, VehicleCategory, VehicleLevel,
};
use sqlx::SqliteConnection;

const DRIVER_SELECT: &str = "SELECT driver_id, name, vehicle_category, vehicle_level, account_status, verified, work_status, lat, lng, rating, queued_order_ids, current_order_id, next_available_at, max_queue_capacity, failed_logins, locked_until, idle_since, updated_at FROM t_driver";

#[derive(sqlx::FromRow)]
struct DriverRow {
    driver_id: String,
    name: String,
    vehicle_category: VehicleCategory,
    vehicle_level: VehicleLevel,
    account_status: DriverAccountStatus,
    verified: bool,
    work_status: DriverWorkStatus,
    lat: Option<f64>,
    lng: Option<f64>,
    rating: f64,
    queued_order_ids: String,
    current_order_id: Option<String>,
    next_available_at: i64,
    max_queue_capacity: i64,
    failed_logins: i64,
    locked_until: i64,
    idle_since: i64,
    updated_at: i64,
}

impl From<DriverRow> for DriverProfile {
    fn from(row: DriverRow) -> Self {
        let location = match (row.lat, row.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        };
        Self {
            queued_order_ids: json_or_default(&row.queued_order_ids, "queued_order_ids"),
            driver_id: row.driver_id,
            name: row.name,
            vehicle_category: row.vehicle_category,
            vehicle_level: row.vehicle_level,
            account_status: row.account_status,
            verified: row.verified,
            work_status: row.work_status,
            location,
            rating: row.rating,
            current_order_id: row.current_order_id,
            next_available_at: row.next_available_at,
            max_queue_capacity: row.max_queue_capacity.max(0) as u32,
            failed_logins: row.failed_logins.max(0) as u32,
            locked_until: row.locked_until,
            idle_since: row.idle_since,
            updated_at: row.updated_at,
        }
    }
}

/// Insert or overwrite the full profile
pub async fn save(conn: &mut SqliteConnection, driver: &DriverProfile) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_driver (driver_id, name, vehicle_category, vehicle_level, account_status, verified, work_status, lat, lng, rating, queued_order_ids, current_order_id, next_available_at, max_queue_capacity, failed_logins, locked_until, idle_since, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18) \
         ON CONFLICT(driver_id) DO UPDATE SET name = excluded.name, vehicle_category = excluded.vehicle_category, vehicle_level = excluded.vehicle_level, account_status = excluded.account_status, verified = excluded.verified, work_status = excluded.work_status, lat = excluded.lat, lng = excluded.lng, rating = excluded.rating, queued_order_ids = excluded.queued_order_ids, current_order_id = excluded.current_order_id, next_available_at = excluded.next_available_at, max_queue_capacity = excluded.max_queue_capacity, failed_logins = excluded.failed_logins, locked_until = excluded.locked_until, idle_since = excluded.idle_since, updated_at = excluded.updated_at",
    )
    .bind(&driver.driver_id)
    .bind(&driver.name)
    .bind(driver.vehicle_category)
    .bind(driver.vehicle_level)
    .bind(driver.account_status)
    .bind(driver.verified)
    .bind(driver.work_status)
    .bind(driver.location.map(|c| c.lat))
    .bind(driver.location.map(|c| c.lng))
    .bind(driver.rating)
    .bind(to_json(&driver.queued_order_ids)?)
    .bind(&driver.current_order_id)
    .bind(driver.next_available_at)
    .bind(driver.max_queue_capacity as i64)
    .bind(driver.failed_logins as i64)
    .bind(driver.locked_until)
    .bind(driver.idle_since)
    .bind(driver.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    driver_id: &str,
) -> RepoResult<Option<DriverProfile>> {
    let sql = format!("{DRIVER_SELECT} WHERE driver_id = ?");
    let row = sqlx::query_as::<_, DriverRow>(&sql)
        .bind(driver_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Into::into))
}

pub async fn find_all(conn: &mut SqliteConnection) -> RepoResult<Vec<DriverProfile>> {
    let sql = format!("{DRIVER_SELECT} ORDER BY driver_id");
    let rows = sqlx::query_as::<_, DriverRow>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
