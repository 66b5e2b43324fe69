//! Dispatch Record Repository

use super::{RepoResult, json_or_default, to_json};
use shared::geo::Coordinate;
use shared::models::{DispatchRecord, DispatchRecordStatus, RejectReason};
use sqlx::SqliteConnection;

const RECORD_SELECT: &str = "SELECT id, record_id, order_id, driver_id, round, round_seq, dispatched_at, expired_at, responded_at, status, reject_reason, reject_note, driver_distance_km, driver_lat, driver_lng, score, strategy FROM t_dispatch_record";

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    record_id: String,
    order_id: String,
    driver_id: String,
    round: i64,
    round_seq: i64,
    dispatched_at: i64,
    expired_at: i64,
    responded_at: Option<i64>,
    status: DispatchRecordStatus,
    reject_reason: Option<RejectReason>,
    reject_note: Option<String>,
    driver_distance_km: f64,
    driver_lat: f64,
    driver_lng: f64,
    score: f64,
    strategy: String,
}

impl From<RecordRow> for DispatchRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            record_id: row.record_id,
            order_id: row.order_id,
            driver_id: row.driver_id,
            round: row.round.max(0) as u32,
            round_seq: row.round_seq.max(0) as u32,
            dispatched_at: row.dispatched_at,
            expired_at: row.expired_at,
            responded_at: row.responded_at,
            status: row.status,
            reject_reason: row.reject_reason,
            reject_note: row.reject_note,
            driver_distance_km: row.driver_distance_km,
            driver_location: Coordinate::new(row.driver_lat, row.driver_lng),
            score: row.score,
            strategy: json_or_default(&row.strategy, "strategy"),
        }
    }
}

/// `record.id` is ignored; returns the new row id
pub async fn insert(conn: &mut SqliteConnection, record: &DispatchRecord) -> RepoResult<i64> {
    let result = sqlx::query(
        "INSERT INTO t_dispatch_record (record_id, order_id, driver_id, round, round_seq, dispatched_at, expired_at, responded_at, status, reject_reason, reject_note, driver_distance_km, driver_lat, driver_lng, score, strategy) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )
    .bind(&record.record_id)
    .bind(&record.order_id)
    .bind(&record.driver_id)
    .bind(record.round as i64)
    .bind(record.round_seq as i64)
    .bind(record.dispatched_at)
    .bind(record.expired_at)
    .bind(record.responded_at)
    .bind(record.status)
    .bind(record.reject_reason)
    .bind(&record.reject_note)
    .bind(record.driver_distance_km)
    .bind(record.driver_location.lat)
    .bind(record.driver_location.lng)
    .bind(record.score)
    .bind(to_json(&record.strategy)?)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    record_id: &str,
) -> RepoResult<Option<DispatchRecord>> {
    let sql = format!("{RECORD_SELECT} WHERE record_id = ?");
    let row = sqlx::query_as::<_, RecordRow>(&sql)
        .bind(record_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Into::into))
}

pub async fn list_by_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<DispatchRecord>> {
    let sql = format!("{RECORD_SELECT} WHERE order_id = ? ORDER BY id");
    let rows = sqlx::query_as::<_, RecordRow>(&sql)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn list_pending(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<DispatchRecord>> {
    let sql = format!("{RECORD_SELECT} WHERE order_id = ? AND status = 'pending' ORDER BY id");
    let rows = sqlx::query_as::<_, RecordRow>(&sql)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// The driver's open offer for this order, if any
pub async fn find_pending_for_driver(
    conn: &mut SqliteConnection,
    order_id: &str,
    driver_id: &str,
) -> RepoResult<Option<DispatchRecord>> {
    let sql = format!(
        "{RECORD_SELECT} WHERE order_id = ? AND driver_id = ? AND status = 'pending' ORDER BY id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, RecordRow>(&sql)
        .bind(order_id)
        .bind(driver_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Into::into))
}

/// Every driver already offered this order, whatever the outcome
pub async fn offered_driver_ids(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT driver_id FROM t_dispatch_record WHERE order_id = ? ORDER BY driver_id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Settle one pending record. False when it was already settled.
pub async fn settle(
    conn: &mut SqliteConnection,
    record_id: &str,
    to: DispatchRecordStatus,
    responded_at: Option<i64>,
    reject_reason: Option<RejectReason>,
    reject_note: Option<&str>,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_dispatch_record SET status = ?1, responded_at = ?2, reject_reason = ?3, reject_note = ?4 WHERE record_id = ?5 AND status = 'pending'",
    )
    .bind(to)
    .bind(responded_at)
    .bind(reject_reason)
    .bind(reject_note)
    .bind(record_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Settle every pending record of the order (supersede / cancel)
pub async fn settle_all_pending(
    conn: &mut SqliteConnection,
    order_id: &str,
    to: DispatchRecordStatus,
) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE t_dispatch_record SET status = ? WHERE order_id = ? AND status = 'pending'",
    )
    .bind(to)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Next `round_seq` inside a round
pub async fn next_round_seq(
    conn: &mut SqliteConnection,
    order_id: &str,
    round: u32,
) -> RepoResult<u32> {
    let max: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(round_seq) FROM t_dispatch_record WHERE order_id = ? AND round = ?",
    )
    .bind(order_id)
    .bind(round as i64)
    .fetch_one(&mut *conn)
    .await?;
    Ok(max.map(|m| m as u32 + 1).unwrap_or(1))
}
