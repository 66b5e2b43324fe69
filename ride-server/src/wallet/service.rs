//! Wallet Service
//!
//! 每次余额变更:
//!
//! ```text
//! account lock ─▶ load head ─▶ account::apply ─▶ version CAS ─▶ ledger row ─▶ commit ─▶ event
//! ```
//!
//! [`WalletService::post_in`] runs the middle part inside a caller-owned
//! transaction so settlement and withdrawals can combine several postings
//! with other writes.

use super::account;
use super::error::{WalletError, WalletResult};
use crate::core::config::{WalletConfig, WithdrawalConfig};
use crate::db::repository::{account as account_repo, transaction};
use crate::message::EventBus;
use crate::utils::{KeyedLocks, alert};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::event::{Actor, EntityEvent, EventEntity};
use shared::models::{
    BalanceOp, OpenAccountRequest, ReviewStatus, TransactionStatus, TransactionType, UserAccount,
    Wallet, WalletTransaction,
};
use shared::money::Currency;
use shared::util::{day_key, domain_id, month_key, now_millis};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::OwnedMutexGuard;

pub const DEFAULT_TX_LIMIT: i64 = 50;
pub const MAX_TX_LIMIT: i64 = 500;

/// One balance operation plus the ledger metadata it is recorded with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub op: BalanceOp,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub category: String,
    /// When set, must equal the account currency
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub related_order_id: Option<String>,
    #[serde(default)]
    pub related_withdrawal_id: Option<String>,
    #[serde(default)]
    pub related_payment_id: Option<String>,
    #[serde(default)]
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl LedgerEntry {
    pub fn new(op: BalanceOp, tx_type: TransactionType, amount: Decimal, category: impl Into<String>) -> Self {
        Self {
            op,
            tx_type,
            amount,
            fee: Decimal::ZERO,
            category: category.into(),
            currency: None,
            related_order_id: None,
            related_withdrawal_id: None,
            related_payment_id: None,
            review_status: ReviewStatus::NotRequired,
            risk_score: None,
            note: None,
        }
    }

    pub fn in_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.related_order_id = Some(order_id.into());
        self
    }

    pub fn for_withdrawal(mut self, withdrawal_id: impl Into<String>) -> Self {
        self.related_withdrawal_id = Some(withdrawal_id.into());
        self
    }

    pub fn for_payment(mut self, payment_id: impl Into<String>) -> Self {
        self.related_payment_id = Some(payment_id.into());
        self
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_review(mut self, status: ReviewStatus, risk_score: f64) -> Self {
        self.review_status = status;
        self.risk_score = Some(risk_score);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// New account head and the ledger row that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub account: UserAccount,
    pub transaction: WalletTransaction,
}

/// Ledger sum against the balance head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account_id: String,
    pub ledger_total: Decimal,
    pub balance_total: Decimal,
    pub balanced: bool,
}

#[derive(Debug, Clone)]
pub struct WalletService {
    pool: SqlitePool,
    config: WalletConfig,
    limits: WithdrawalConfig,
    locks: KeyedLocks,
    bus: EventBus,
}

impl WalletService {
    pub fn new(pool: SqlitePool, config: WalletConfig, limits: WithdrawalConfig, bus: EventBus) -> Self {
        Self {
            pool,
            config,
            limits,
            locks: KeyedLocks::new(),
            bus,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn limits(&self) -> &WithdrawalConfig {
        &self.limits
    }

    /// Account-scoped guards in ascending key order
    pub async fn lock_accounts(&self, account_ids: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        self.locks.lock_many(account_ids).await
    }

    // ========== Accounts ==========

    /// Idempotent per (user, type)
    pub async fn open_account(&self, req: OpenAccountRequest) -> WalletResult<UserAccount> {
        if req.user_id.trim().is_empty() {
            return Err(WalletError::InvalidInput {
                field: "user_id",
                message: "must not be empty".into(),
            });
        }
        let _guard = self
            .locks
            .lock(&format!("user:{:?}:{}", req.user_type, req.user_id))
            .await;

        let mut conn = self.pool.acquire().await?;
        if let Some(existing) = account_repo::find_by_user(&mut conn, &req.user_id, req.user_type).await? {
            if existing.currency != req.currency {
                return Err(WalletError::CurrencyMismatch {
                    account: existing.currency,
                    request: req.currency,
                });
            }
            return Ok(existing);
        }

        let now = now_millis();
        let account = UserAccount {
            account_id: domain_id("ACC"),
            user_id: req.user_id,
            user_type: req.user_type,
            currency: req.currency,
            available: Decimal::ZERO,
            frozen: Decimal::ZERO,
            pending: Decimal::ZERO,
            version: 0,
            last_balance_update_at: now,
            day_key: day_key(now),
            day_withdrawn: Decimal::ZERO,
            month_key: month_key(now),
            month_withdrawn: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            created_at: now,
        };
        account_repo::insert(&mut conn, &account).await?;
        tracing::info!(
            account_id = %account.account_id,
            user_id = %account.user_id,
            user_type = ?account.user_type,
            currency = %account.currency,
            "Wallet account opened"
        );
        Ok(account)
    }

    pub async fn get_account(&self, account_id: &str) -> WalletResult<UserAccount> {
        let mut conn = self.pool.acquire().await?;
        account_repo::find_by_id(&mut conn, account_id)
            .await?
            .ok_or_else(|| WalletError::AccountNotFound(account_id.to_string()))
    }

    pub async fn find_by_user(
        &self,
        user_id: &str,
        user_type: shared::models::UserType,
    ) -> WalletResult<Option<UserAccount>> {
        let mut conn = self.pool.acquire().await?;
        Ok(account_repo::find_by_user(&mut conn, user_id, user_type).await?)
    }

    /// Account head plus withdrawal headroom for the current day and month
    pub async fn get_wallet(&self, account_id: &str) -> WalletResult<Wallet> {
        let account = self.get_account(account_id).await?;
        Ok(wallet_view(account, &self.limits, now_millis()))
    }

    /// Newest first; `limit` defaults to 50 and is capped at 500
    pub async fn list_transactions(
        &self,
        account_id: &str,
        limit: Option<i64>,
    ) -> WalletResult<Vec<WalletTransaction>> {
        let limit = limit.unwrap_or(DEFAULT_TX_LIMIT).clamp(1, MAX_TX_LIMIT);
        let mut conn = self.pool.acquire().await?;
        if account_repo::find_by_id(&mut conn, account_id).await?.is_none() {
            return Err(WalletError::AccountNotFound(account_id.to_string()));
        }
        Ok(transaction::list_by_account(&mut conn, account_id, limit).await?)
    }

    /// Signed ledger sum vs `available + frozen + pending`
    pub async fn reconcile(&self, account_id: &str) -> WalletResult<Reconciliation> {
        let mut conn = self.pool.acquire().await?;
        let account = account_repo::find_by_id(&mut conn, account_id)
            .await?
            .ok_or_else(|| WalletError::AccountNotFound(account_id.to_string()))?;
        let rows = transaction::history(&mut conn, account_id).await?;
        drop(conn);

        let ledger_total = ledger_total(&rows);
        let balance_total = account.total();
        let balanced = ledger_total == balance_total;
        if !balanced {
            let _ = alert::raise(
                &self.bus,
                account_id,
                format!("ledger sum {ledger_total} differs from balance {balance_total}"),
            );
        }
        Ok(Reconciliation {
            account_id: account_id.to_string(),
            ledger_total,
            balance_total,
            balanced,
        })
    }

    // ========== Balance operations ==========

    /// One balance operation in its own transaction
    pub async fn apply(
        &self,
        account_id: &str,
        entry: LedgerEntry,
        expected_version: Option<i64>,
        actor: &Actor,
    ) -> WalletResult<Posting> {
        let guard = self.locks.lock(account_id).await;
        let mut tx = self.pool.begin().await?;
        let posting = self
            .post_in(&mut tx, account_id, &entry, expected_version, now_millis())
            .await?;
        tx.commit().await?;
        drop(guard);

        self.announce(&posting, actor);
        Ok(posting)
    }

    /// Apply `entry` inside the caller's transaction
    ///
    /// The caller holds the account lock and publishes with
    /// [`WalletService::announce`] after commit.
    pub async fn post_in(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        entry: &LedgerEntry,
        expected_version: Option<i64>,
        now: i64,
    ) -> WalletResult<Posting> {
        self.post_adjusted(conn, account_id, entry, expected_version, now, |_| {})
            .await
    }

    /// [`WalletService::post_in`] with extra edits to the head (withdrawal counters)
    pub async fn post_adjusted<F>(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        entry: &LedgerEntry,
        expected_version: Option<i64>,
        now: i64,
        adjust: F,
    ) -> WalletResult<Posting>
    where
        F: FnOnce(&mut UserAccount) + Send,
    {
        if entry.fee < Decimal::ZERO {
            return Err(WalletError::InvalidAmount {
                amount: entry.fee,
                reason: "fee must not be negative",
            });
        }
        let current = account_repo::find_by_id(conn, account_id)
            .await?
            .ok_or_else(|| WalletError::AccountNotFound(account_id.to_string()))?;

        if let Some(currency) = entry.currency
            && currency != current.currency
        {
            return Err(WalletError::CurrencyMismatch {
                account: current.currency,
                request: currency,
            });
        }
        if let Some(expected) = expected_version
            && expected != current.version
        {
            return Err(WalletError::VersionConflict {
                account_id: account_id.to_string(),
                expected,
                actual: current.version,
            });
        }

        let freeze_limit = self.config.max_freeze_per_account;
        let mut next = match account::apply(&current, entry.op, entry.tx_type, entry.amount, freeze_limit, now) {
            Ok(next) => next,
            Err(WalletError::Invariant(msg)) => {
                let _ = alert::raise(&self.bus, account_id, msg.clone());
                return Err(WalletError::Invariant(msg));
            }
            Err(e) => return Err(e),
        };
        adjust(&mut next);

        if !account_repo::update_if_version(conn, &next, current.version).await? {
            let actual = account_repo::find_by_id(conn, account_id)
                .await?
                .map(|a| a.version)
                .unwrap_or(current.version);
            return Err(WalletError::VersionConflict {
                account_id: account_id.to_string(),
                expected: current.version,
                actual,
            });
        }

        let mut row = WalletTransaction {
            id: 0,
            transaction_id: domain_id("TXN"),
            account_id: account_id.to_string(),
            tx_type: entry.tx_type,
            category: entry.category.clone(),
            op: entry.op,
            amount: entry.amount,
            fee: entry.fee,
            currency: next.currency,
            status: TransactionStatus::Completed,
            balance_after: next.balances(),
            version_after: next.version,
            related_order_id: entry.related_order_id.clone(),
            related_withdrawal_id: entry.related_withdrawal_id.clone(),
            related_payment_id: entry.related_payment_id.clone(),
            review_status: entry.review_status,
            risk_score: entry.risk_score,
            note: entry.note.clone(),
            created_at: now,
        };
        row.id = transaction::insert(conn, &row).await?;

        tracing::debug!(
            account_id,
            op = entry.op.as_str(),
            tx_type = entry.tx_type.as_str(),
            amount = %entry.amount,
            version = next.version,
            "Balance posted"
        );
        Ok(Posting {
            account: next,
            transaction: row,
        })
    }

    /// Publish a committed posting on the `wallet` topic
    pub fn announce(&self, posting: &Posting, actor: &Actor) {
        let tx = &posting.transaction;
        self.bus.publish(
            EntityEvent::new(
                EventEntity::Wallet,
                &tx.transaction_id,
                None,
                tx.op.as_str(),
                actor.clone(),
            )
            .with_payload(json!({
                "account_id": tx.account_id,
                "tx_type": tx.tx_type,
                "category": tx.category,
                "amount": tx.amount,
                "currency": tx.currency,
                "available": tx.balance_after.available,
                "frozen": tx.balance_after.frozen,
                "pending": tx.balance_after.pending,
                "version": tx.version_after,
                "order_id": tx.related_order_id,
            })),
        );
    }
}

/// Sum of `ledger_sign * amount` over the rows
pub fn ledger_total(rows: &[WalletTransaction]) -> Decimal {
    rows.iter()
        .filter(|r| r.status == TransactionStatus::Completed)
        .map(|r| Decimal::from(r.tx_type.ledger_sign()) * r.amount)
        .sum()
}

/// Counters from an older day or month no longer count against the limit
pub fn wallet_view(account: UserAccount, limits: &WithdrawalConfig, now: i64) -> Wallet {
    let day_used = if account.day_key == day_key(now) {
        account.day_withdrawn
    } else {
        Decimal::ZERO
    };
    let month_used = if account.month_key == month_key(now) {
        account.month_withdrawn
    } else {
        Decimal::ZERO
    };
    Wallet {
        daily_limit: limits.daily_limit,
        monthly_limit: limits.monthly_limit,
        daily_remaining: (limits.daily_limit - day_used).max(Decimal::ZERO),
        monthly_remaining: (limits.monthly_limit - month_used).max(Decimal::ZERO),
        account,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::db::DbService;
    use rust_decimal_macros::dec;
    use shared::models::UserType;

    async fn service() -> WalletService {
        let db = DbService::in_memory().await.unwrap();
        let config = Config::for_tests();
        WalletService::new(db.pool, config.wallet, config.withdrawal, EventBus::new())
    }

    async fn funded(svc: &WalletService, amount: Decimal) -> UserAccount {
        let account = svc
            .open_account(OpenAccountRequest {
                user_id: "RIDER_A".into(),
                user_type: UserType::Rider,
                currency: Currency::Rwf,
            })
            .await
            .unwrap();
        svc.apply(
            &account.account_id,
            LedgerEntry::new(BalanceOp::AddAvailable, TransactionType::Bonus, amount, "top_up"),
            None,
            &Actor::system(),
        )
        .await
        .unwrap()
        .account
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let svc = service().await;
        let req = OpenAccountRequest {
            user_id: "D1".into(),
            user_type: UserType::Driver,
            currency: Currency::Rwf,
        };
        let a = svc.open_account(req.clone()).await.unwrap();
        let b = svc.open_account(req.clone()).await.unwrap();
        assert_eq!(a.account_id, b.account_id);

        let usd = OpenAccountRequest {
            currency: Currency::Usd,
            ..req
        };
        assert!(matches!(
            svc.open_account(usd).await,
            Err(WalletError::CurrencyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_freeze_unfreeze_bumps_version_twice() {
        let svc = service().await;
        let start = funded(&svc, dec!(1000)).await;
        let id = start.account_id.clone();

        svc.apply(
            &id,
            LedgerEntry::new(BalanceOp::Freeze, TransactionType::Transfer, dec!(400), "hold"),
            Some(start.version),
            &Actor::system(),
        )
        .await
        .unwrap();
        let back = svc
            .apply(
                &id,
                LedgerEntry::new(BalanceOp::Unfreeze, TransactionType::Transfer, dec!(400), "hold"),
                None,
                &Actor::system(),
            )
            .await
            .unwrap()
            .account;

        assert_eq!(back.balances(), start.balances());
        assert_eq!(back.version, start.version + 2);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let svc = service().await;
        let start = funded(&svc, dec!(1000)).await;
        let result = svc
            .apply(
                &start.account_id,
                LedgerEntry::new(BalanceOp::SubtractAvailable, TransactionType::Expense, dec!(1), "x"),
                Some(start.version - 1),
                &Actor::system(),
            )
            .await;
        assert!(matches!(result, Err(WalletError::VersionConflict { .. })));
        assert_eq!(svc.get_account(&start.account_id).await.unwrap().available, dec!(1000));
    }

    #[tokio::test]
    async fn test_failed_operation_writes_no_row() {
        let svc = service().await;
        let start = funded(&svc, dec!(300)).await;
        let result = svc
            .apply(
                &start.account_id,
                LedgerEntry::new(BalanceOp::SubtractAvailable, TransactionType::Expense, dec!(700), "ride_payment"),
                None,
                &Actor::system(),
            )
            .await;
        assert!(matches!(result, Err(WalletError::InsufficientBalance { .. })));

        let rows = svc.list_transactions(&start.account_id, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        let after = svc.get_account(&start.account_id).await.unwrap();
        assert_eq!(after.version, start.version);
    }

    #[tokio::test]
    async fn test_currency_mismatch_and_ledger_reconciles() {
        let svc = service().await;
        let start = funded(&svc, dec!(1000)).await;
        let id = start.account_id.clone();

        let usd = LedgerEntry::new(BalanceOp::AddAvailable, TransactionType::Income, dec!(5), "x")
            .in_currency(Currency::Usd);
        assert!(matches!(
            svc.apply(&id, usd, None, &Actor::system()).await,
            Err(WalletError::CurrencyMismatch { .. })
        ));

        for entry in [
            LedgerEntry::new(BalanceOp::SubtractAvailable, TransactionType::Expense, dec!(250), "ride_payment"),
            LedgerEntry::new(BalanceOp::MoveToPending, TransactionType::Transfer, dec!(100), "settling"),
            LedgerEntry::new(BalanceOp::DeductFromPending, TransactionType::Penalty, dec!(40), "late_cancel"),
        ] {
            svc.apply(&id, entry, None, &Actor::system()).await.unwrap();
        }

        let rec = svc.reconcile(&id).await.unwrap();
        assert!(rec.balanced);
        assert_eq!(rec.balance_total, dec!(710));
    }

    #[test]
    fn test_wallet_view_resets_stale_counters() {
        let limits = Config::for_tests().withdrawal;
        // 2025-03-15 12:00:00 UTC
        let now = 1_742_040_000_000;
        let account = UserAccount {
            account_id: "ACC1".into(),
            user_id: "D1".into(),
            user_type: UserType::Driver,
            currency: Currency::Rwf,
            available: dec!(100),
            frozen: Decimal::ZERO,
            pending: Decimal::ZERO,
            version: 1,
            last_balance_update_at: 0,
            day_key: 20250314,
            day_withdrawn: dec!(400000),
            month_key: 202503,
            month_withdrawn: dec!(1000000),
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            created_at: 0,
        };
        let wallet = wallet_view(account, &limits, now);
        assert_eq!(wallet.daily_remaining, dec!(500000));
        assert_eq!(wallet.monthly_remaining, dec!(4000000));
    }
}
