//! User Account Repository (ledger heads)

use super::{RepoResult, decimal};
use shared::models::{UserAccount, UserType};
use shared::money::Currency;
use sqlx::SqliteConnection;

const ACCOUNT_SELECT: &str = "SELECT account_id, user_id, user_type, currency, available, frozen, pending, version, last_balance_update_at, day_key, day_withdrawn, month_key, month_withdrawn, total_earned, total_spent, total_withdrawn, created_at FROM t_user_account";

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: String,
    user_id: String,
    user_type: UserType,
    currency: Currency,
    available: String,
    frozen: String,
    pending: String,
    version: i64,
    last_balance_update_at: i64,
    day_key: i64,
    day_withdrawn: String,
    month_key: i64,
    month_withdrawn: String,
    total_earned: String,
    total_spent: String,
    total_withdrawn: String,
    created_at: i64,
}

impl AccountRow {
    fn into_account(self) -> RepoResult<UserAccount> {
        Ok(UserAccount {
            available: decimal(&self.available, "available")?,
            frozen: decimal(&self.frozen, "frozen")?,
            pending: decimal(&self.pending, "pending")?,
            day_withdrawn: decimal(&self.day_withdrawn, "day_withdrawn")?,
            month_withdrawn: decimal(&self.month_withdrawn, "month_withdrawn")?,
            total_earned: decimal(&self.total_earned, "total_earned")?,
            total_spent: decimal(&self.total_spent, "total_spent")?,
            total_withdrawn: decimal(&self.total_withdrawn, "total_withdrawn")?,
            account_id: self.account_id,
            user_id: self.user_id,
            user_type: self.user_type,
            currency: self.currency,
            version: self.version,
            last_balance_update_at: self.last_balance_update_at,
            day_key: self.day_key,
            month_key: self.month_key,
            created_at: self.created_at,
        })
    }
}

pub async fn insert(conn: &mut SqliteConnection, account: &UserAccount) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_user_account (account_id, user_id, user_type, currency, available, frozen, pending, version, last_balance_update_at, day_key, day_withdrawn, month_key, month_withdrawn, total_earned, total_spent, total_withdrawn, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
    )
    .bind(&account.account_id)
    .bind(&account.user_id)
    .bind(account.user_type)
    .bind(account.currency)
    .bind(account.available.to_string())
    .bind(account.frozen.to_string())
    .bind(account.pending.to_string())
    .bind(account.version)
    .bind(account.last_balance_update_at)
    .bind(account.day_key)
    .bind(account.day_withdrawn.to_string())
    .bind(account.month_key)
    .bind(account.month_withdrawn.to_string())
    .bind(account.total_earned.to_string())
    .bind(account.total_spent.to_string())
    .bind(account.total_withdrawn.to_string())
    .bind(account.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> RepoResult<Option<UserAccount>> {
    let sql = format!("{ACCOUNT_SELECT} WHERE account_id = ?");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(AccountRow::into_account).transpose()
}

pub async fn find_by_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    user_type: UserType,
) -> RepoResult<Option<UserAccount>> {
    let sql = format!("{ACCOUNT_SELECT} WHERE user_id = ? AND user_type = ?");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(user_id)
        .bind(user_type)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(AccountRow::into_account).transpose()
}

/// Version CAS: write `next` only if the stored version is `expected_version`
pub async fn update_if_version(
    conn: &mut SqliteConnection,
    next: &UserAccount,
    expected_version: i64,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_user_account SET available = ?1, frozen = ?2, pending = ?3, version = ?4, last_balance_update_at = ?5, day_key = ?6, day_withdrawn = ?7, month_key = ?8, month_withdrawn = ?9, total_earned = ?10, total_spent = ?11, total_withdrawn = ?12 WHERE account_id = ?13 AND version = ?14",
    )
    .bind(next.available.to_string())
    .bind(next.frozen.to_string())
    .bind(next.pending.to_string())
    .bind(next.version)
    .bind(next.last_balance_update_at)
    .bind(next.day_key)
    .bind(next.day_withdrawn.to_string())
    .bind(next.month_key)
    .bind(next.month_withdrawn.to_string())
    .bind(next.total_earned.to_string())
    .bind(next.total_spent.to_string())
    .bind(next.total_withdrawn.to_string())
    .bind(&next.account_id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
