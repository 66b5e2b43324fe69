//! Withdrawal Repository

use super::{RepoResult, decimal, json_opt, json_or_default, to_json};
use shared::models::{BalanceSnapshot, Withdrawal, WithdrawalMethod, WithdrawalStatus};
use shared::money::Currency;
use sqlx::SqliteConnection;

const WITHDRAWAL_SELECT: &str = "SELECT withdrawal_id, account_id, user_id, amount, fee, net_amount, currency, method, destination, status, requires_manual_review, risk_score, approved_by, approved_at, reject_reason, failure_reason, external_txn_id, balance_before, balance_after, created_at, updated_at, completed_at FROM t_withdrawal";

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    withdrawal_id: String,
    account_id: String,
    user_id: String,
    amount: String,
    fee: String,
    net_amount: String,
    currency: Currency,
    method: WithdrawalMethod,
    destination: String,
    status: WithdrawalStatus,
    requires_manual_review: bool,
    risk_score: f64,
    approved_by: Option<String>,
    approved_at: Option<i64>,
    reject_reason: Option<String>,
    failure_reason: Option<String>,
    external_txn_id: Option<String>,
    balance_before: String,
    balance_after: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl WithdrawalRow {
    fn into_withdrawal(self) -> RepoResult<Withdrawal> {
        Ok(Withdrawal {
            amount: decimal(&self.amount, "amount")?,
            fee: decimal(&self.fee, "fee")?,
            net_amount: decimal(&self.net_amount, "net_amount")?,
            balance_before: json_or_default::<BalanceSnapshot>(&self.balance_before, "balance_before"),
            balance_after: json_opt(self.balance_after.as_deref(), "balance_after"),
            withdrawal_id: self.withdrawal_id,
            account_id: self.account_id,
            user_id: self.user_id,
            currency: self.currency,
            method: self.method,
            destination: self.destination,
            status: self.status,
            requires_manual_review: self.requires_manual_review,
            risk_score: self.risk_score,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            reject_reason: self.reject_reason,
            failure_reason: self.failure_reason,
            external_txn_id: self.external_txn_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

pub async fn insert(conn: &mut SqliteConnection, w: &Withdrawal) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_withdrawal (withdrawal_id, account_id, user_id, amount, fee, net_amount, currency, method, destination, status, requires_manual_review, risk_score, approved_by, approved_at, reject_reason, failure_reason, external_txn_id, balance_before, balance_after, created_at, updated_at, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
    )
    .bind(&w.withdrawal_id)
    .bind(&w.account_id)
    .bind(&w.user_id)
    .bind(w.amount.to_string())
    .bind(w.fee.to_string())
    .bind(w.net_amount.to_string())
    .bind(w.currency)
    .bind(w.method)
    .bind(&w.destination)
    .bind(w.status)
    .bind(w.requires_manual_review)
    .bind(w.risk_score)
    .bind(&w.approved_by)
    .bind(w.approved_at)
    .bind(&w.reject_reason)
    .bind(&w.failure_reason)
    .bind(&w.external_txn_id)
    .bind(to_json(&w.balance_before)?)
    .bind(w.balance_after.as_ref().map(to_json).transpose()?)
    .bind(w.created_at)
    .bind(w.updated_at)
    .bind(w.completed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    withdrawal_id: &str,
) -> RepoResult<Option<Withdrawal>> {
    let sql = format!("{WITHDRAWAL_SELECT} WHERE withdrawal_id = ?");
    let row = sqlx::query_as::<_, WithdrawalRow>(&sql)
        .bind(withdrawal_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(WithdrawalRow::into_withdrawal).transpose()
}

pub async fn list_by_account(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> RepoResult<Vec<Withdrawal>> {
    let sql = format!("{WITHDRAWAL_SELECT} WHERE account_id = ? ORDER BY created_at DESC");
    let rows = sqlx::query_as::<_, WithdrawalRow>(&sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(WithdrawalRow::into_withdrawal).collect()
}

/// Persist the workflow fields if the stored status is still `expected`
pub async fn update_if_status(
    conn: &mut SqliteConnection,
    w: &Withdrawal,
    expected: WithdrawalStatus,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_withdrawal SET status = ?1, approved_by = ?2, approved_at = ?3, reject_reason = ?4, failure_reason = ?5, external_txn_id = ?6, balance_after = ?7, updated_at = ?8, completed_at = ?9 WHERE withdrawal_id = ?10 AND status = ?11",
    )
    .bind(w.status)
    .bind(&w.approved_by)
    .bind(w.approved_at)
    .bind(&w.reject_reason)
    .bind(&w.failure_reason)
    .bind(&w.external_txn_id)
    .bind(w.balance_after.as_ref().map(to_json).transpose()?)
    .bind(w.updated_at)
    .bind(w.completed_at)
    .bind(&w.withdrawal_id)
    .bind(expected)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
