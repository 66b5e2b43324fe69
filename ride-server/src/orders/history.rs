//! 订单审计日志 (hash chained)
//!
//! Every transition appends one immutable row. `curr_hash` covers the
//! previous hash and every stored field, so editing or removing a row
//! breaks [`verify_chain`].

use super::ActorContext;
use crate::db::repository::{RepoResult, history};
use sha2::{Digest, Sha256};
use shared::event::ActorType;
use shared::models::{Order, OrderHistoryLog, OrderStatus};
use sqlx::SqliteConnection;

/// prev_hash of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// 计算审计条目的 SHA256 哈希
///
/// - 变长字段间用 `\x00` 分隔
/// - Optional 字段用 `\x00`=None / `\x01`+bytes=Some 区分
#[allow(clippy::too_many_arguments)]
fn compute_entry_hash(
    prev_hash: &str,
    order_id: &str,
    from_status: Option<OrderStatus>,
    to_status: OrderStatus,
    actor_id: &str,
    actor_type: ActorType,
    before: &serde_json::Value,
    after: &serde_json::Value,
    reason: Option<&str>,
    ip: Option<&str>,
    user_agent: Option<&str>,
    created_at: i64,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update(prev_hash.as_bytes());
    hasher.update(b"\x00");
    hasher.update(created_at.to_le_bytes());

    hasher.update(order_id.as_bytes());
    hasher.update(b"\x00");
    hash_optional(&mut hasher, from_status.map(|s| s.as_str()));
    hasher.update(to_status.as_str().as_bytes());
    hasher.update(b"\x00");
    hasher.update(actor_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(actor_type.as_str().as_bytes());
    hasher.update(b"\x00");

    hasher.update(serde_json::to_string(before).unwrap_or_default().as_bytes());
    hasher.update(b"\x00");
    hasher.update(serde_json::to_string(after).unwrap_or_default().as_bytes());
    hasher.update(b"\x00");

    hash_optional(&mut hasher, reason);
    hash_optional(&mut hasher, ip);
    hash_optional(&mut hasher, user_agent);

    hex::encode(hasher.finalize())
}

fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(b"\x01");
            hasher.update(v.as_bytes());
            hasher.update(b"\x00");
        }
        None => hasher.update(b"\x00"),
    }
}

fn entry_hash(entry: &OrderHistoryLog) -> String {
    compute_entry_hash(
        &entry.prev_hash,
        &entry.order_id,
        entry.from_status,
        entry.to_status,
        &entry.actor_id,
        entry.actor_type,
        &entry.before_snapshot,
        &entry.after_snapshot,
        entry.reason.as_deref(),
        entry.ip.as_deref(),
        entry.user_agent.as_deref(),
        entry.created_at,
    )
}

/// Append a transition row; `before` is None for creation
pub async fn append(
    conn: &mut SqliteConnection,
    before: Option<&Order>,
    after: &Order,
    actor: &ActorContext,
    reason: Option<&str>,
    now: i64,
) -> RepoResult<OrderHistoryLog> {
    let prev_hash = history::last_hash(conn, &after.order_id)
        .await?
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let mut entry = OrderHistoryLog {
        id: 0,
        order_id: after.order_id.clone(),
        from_status: before.map(|o| o.status),
        to_status: after.status,
        actor_id: actor.actor.id.clone(),
        actor_type: actor.actor.actor_type,
        before_snapshot: before
            .map(|o| serde_json::to_value(o).unwrap_or_default())
            .unwrap_or(serde_json::Value::Null),
        after_snapshot: serde_json::to_value(after).unwrap_or_default(),
        reason: reason.map(str::to_string),
        ip: actor.ip.clone(),
        user_agent: actor.user_agent.clone(),
        created_at: now,
        prev_hash,
        curr_hash: String::new(),
    };
    entry.curr_hash = entry_hash(&entry);
    entry.id = history::insert(conn, &entry).await?;

    tracing::info!(
        target: "audit",
        order_id = %entry.order_id,
        from = ?entry.from_status,
        to = %entry.to_status,
        actor_id = %entry.actor_id,
        actor_type = entry.actor_type.as_str(),
        "Order transition recorded"
    );
    Ok(entry)
}

/// Recompute every hash; returns the id of the first broken entry
pub fn verify_chain(entries: &[OrderHistoryLog]) -> Result<(), i64> {
    let mut expected_prev = GENESIS_HASH;
    for entry in entries {
        if entry.prev_hash != expected_prev || entry_hash(entry) != entry.curr_hash {
            return Err(entry.id);
        }
        expected_prev = &entry.curr_hash;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::event::Actor;

    fn entry(prev: &str, to: OrderStatus) -> OrderHistoryLog {
        let mut e = OrderHistoryLog {
            id: 1,
            order_id: "ORD1".into(),
            from_status: None,
            to_status: to,
            actor_id: "R1".into(),
            actor_type: ActorType::Rider,
            before_snapshot: serde_json::Value::Null,
            after_snapshot: serde_json::json!({"status": to.as_str()}),
            reason: None,
            ip: Some("10.0.0.1".into()),
            user_agent: None,
            created_at: 1_000,
            prev_hash: prev.to_string(),
            curr_hash: String::new(),
        };
        e.curr_hash = entry_hash(&e);
        e
    }

    #[test]
    fn test_chain_verifies_and_detects_tampering() {
        let first = entry(GENESIS_HASH, OrderStatus::Created);
        let mut second = entry(&first.curr_hash, OrderStatus::PendingDispatch);
        second.id = 2;
        let mut chain = vec![first, second];
        assert_eq!(verify_chain(&chain), Ok(()));

        chain[1].reason = Some("edited".into());
        assert_eq!(verify_chain(&chain), Err(2));
    }

    #[test]
    fn test_none_and_empty_optional_hash_differently() {
        let mut a = entry(GENESIS_HASH, OrderStatus::Created);
        let mut b = a.clone();
        a.reason = None;
        b.reason = Some(String::new());
        assert_ne!(entry_hash(&a), entry_hash(&b));
        let _ = ActorContext::new(Actor::system());
    }
}
