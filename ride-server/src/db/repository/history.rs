//! Order history log (append-only, hash chained)

use super::{RepoResult, json_or_default, to_json};
use shared::event::ActorType;
use shared::models::{OrderHistoryLog, OrderStatus};
use sqlx::SqliteConnection;

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    order_id: String,
    from_status: Option<OrderStatus>,
    to_status: OrderStatus,
    actor_id: String,
    actor_type: ActorType,
    before_snapshot: String,
    after_snapshot: String,
    reason: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    created_at: i64,
    prev_hash: String,
    curr_hash: String,
}

impl From<HistoryRow> for OrderHistoryLog {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            before_snapshot: json_or_default(&row.before_snapshot, "before_snapshot"),
            after_snapshot: json_or_default(&row.after_snapshot, "after_snapshot"),
            order_id: row.order_id,
            from_status: row.from_status,
            to_status: row.to_status,
            actor_id: row.actor_id,
            actor_type: row.actor_type,
            reason: row.reason,
            ip: row.ip,
            user_agent: row.user_agent,
            created_at: row.created_at,
            prev_hash: row.prev_hash,
            curr_hash: row.curr_hash,
        }
    }
}

/// Hash of the latest entry for `order_id`
pub async fn last_hash(conn: &mut SqliteConnection, order_id: &str) -> RepoResult<Option<String>> {
    let hash: Option<String> = sqlx::query_scalar(
        "SELECT curr_hash FROM t_order_history_log WHERE order_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(hash)
}

/// Append an entry; `entry.id` is ignored and the new row id returned
pub async fn insert(conn: &mut SqliteConnection, entry: &OrderHistoryLog) -> RepoResult<i64> {
    let result = sqlx::query(
        "INSERT INTO t_order_history_log (order_id, from_status, to_status, actor_id, actor_type, before_snapshot, after_snapshot, reason, ip, user_agent, created_at, prev_hash, curr_hash) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&entry.order_id)
    .bind(entry.from_status)
    .bind(entry.to_status)
    .bind(&entry.actor_id)
    .bind(entry.actor_type)
    .bind(to_json(&entry.before_snapshot)?)
    .bind(to_json(&entry.after_snapshot)?)
    .bind(&entry.reason)
    .bind(&entry.ip)
    .bind(&entry.user_agent)
    .bind(entry.created_at)
    .bind(&entry.prev_hash)
    .bind(&entry.curr_hash)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_by_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<OrderHistoryLog>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        "SELECT id, order_id, from_status, to_status, actor_id, actor_type, before_snapshot, after_snapshot, reason, ip, user_agent, created_at, prev_hash, curr_hash FROM t_order_history_log WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
