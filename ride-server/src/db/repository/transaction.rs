//! Wallet Transaction Repository (append-only)

use super::{RepoResult, decimal};
use shared::models::{
    BalanceOp, BalanceSnapshot, ReviewStatus, TransactionStatus, TransactionType,
    WalletTransaction,
};
use shared::money::Currency;
use sqlx::SqliteConnection;

const TX_SELECT: &str = "SELECT id, transaction_id, account_id, tx_type, category, op, amount, fee, currency, status, available_after, frozen_after, pending_after, version_after, related_order_id, related_withdrawal_id, related_payment_id, review_status, risk_score, note, created_at FROM t_wallet_transaction";

#[derive(sqlx::FromRow)]
struct TxRow {
    id: i64,
    transaction_id: String,
    account_id: String,
    tx_type: TransactionType,
    category: String,
    op: BalanceOp,
    amount: String,
    fee: String,
    currency: Currency,
    status: TransactionStatus,
    available_after: String,
    frozen_after: String,
    pending_after: String,
    version_after: i64,
    related_order_id: Option<String>,
    related_withdrawal_id: Option<String>,
    related_payment_id: Option<String>,
    review_status: ReviewStatus,
    risk_score: Option<f64>,
    note: Option<String>,
    created_at: i64,
}

impl TxRow {
    fn into_transaction(self) -> RepoResult<WalletTransaction> {
        Ok(WalletTransaction {
            id: self.id,
            amount: decimal(&self.amount, "amount")?,
            fee: decimal(&self.fee, "fee")?,
            balance_after: BalanceSnapshot {
                available: decimal(&self.available_after, "available_after")?,
                frozen: decimal(&self.frozen_after, "frozen_after")?,
                pending: decimal(&self.pending_after, "pending_after")?,
            },
            transaction_id: self.transaction_id,
            account_id: self.account_id,
            tx_type: self.tx_type,
            category: self.category,
            op: self.op,
            currency: self.currency,
            status: self.status,
            version_after: self.version_after,
            related_order_id: self.related_order_id,
            related_withdrawal_id: self.related_withdrawal_id,
            related_payment_id: self.related_payment_id,
            review_status: self.review_status,
            risk_score: self.risk_score,
            note: self.note,
            created_at: self.created_at,
        })
    }
}

/// `tx.id` is ignored; returns the new row id
pub async fn insert(conn: &mut SqliteConnection, tx: &WalletTransaction) -> RepoResult<i64> {
    let result = sqlx::query(
        "INSERT INTO t_wallet_transaction (transaction_id, account_id, tx_type, category, op, amount, fee, currency, status, available_after, frozen_after, pending_after, version_after, related_order_id, related_withdrawal_id, related_payment_id, review_status, risk_score, note, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
    )
    .bind(&tx.transaction_id)
    .bind(&tx.account_id)
    .bind(tx.tx_type)
    .bind(&tx.category)
    .bind(tx.op)
    .bind(tx.amount.to_string())
    .bind(tx.fee.to_string())
    .bind(tx.currency)
    .bind(tx.status)
    .bind(tx.balance_after.available.to_string())
    .bind(tx.balance_after.frozen.to_string())
    .bind(tx.balance_after.pending.to_string())
    .bind(tx.version_after)
    .bind(&tx.related_order_id)
    .bind(&tx.related_withdrawal_id)
    .bind(&tx.related_payment_id)
    .bind(tx.review_status)
    .bind(tx.risk_score)
    .bind(&tx.note)
    .bind(tx.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest first
pub async fn list_by_account(
    conn: &mut SqliteConnection,
    account_id: &str,
    limit: i64,
) -> RepoResult<Vec<WalletTransaction>> {
    let sql = format!("{TX_SELECT} WHERE account_id = ? ORDER BY id DESC LIMIT ?");
    let rows = sqlx::query_as::<_, TxRow>(&sql)
        .bind(account_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(TxRow::into_transaction).collect()
}

/// Oldest first, whole history
pub async fn history(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> RepoResult<Vec<WalletTransaction>> {
    let sql = format!("{TX_SELECT} WHERE account_id = ? ORDER BY id ASC");
    let rows = sqlx::query_as::<_, TxRow>(&sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(TxRow::into_transaction).collect()
}

pub async fn list_by_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<WalletTransaction>> {
    let sql = format!("{TX_SELECT} WHERE related_order_id = ? ORDER BY id ASC");
    let rows = sqlx::query_as::<_, TxRow>(&sql)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(TxRow::into_transaction).collect()
}
