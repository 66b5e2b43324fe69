//! Withdrawal workflow
//!
//! ```text
//! request ─▶ pending_approval ──approve──▶ approved ─▶ processing ─▶ completed
//!        └─▶ approved (low risk)   │                       └────────▶ failed
//!                               reject / cancel ─▶ rejected / cancelled
//! ```
//!
//! The hold (`amount + fee`) is frozen on request and unfrozen on reject,
//! cancel or fail. Completion deducts it from frozen as two entries: the
//! payout (`withdrawal`) and the fee (`expense`). Re-applying the status a
//! withdrawal is already in is a no-op.
//!
//! `process` and `fail` serialize on a per-withdrawal lock held across the
//! gateway call.

use super::error::{WalletError, WalletResult};
use super::gateway::{GatewayIntent, GatewayRequest, GatewayResult, IntentStatus, PaymentGateway, call_with_retry};
use super::service::{LedgerEntry, Posting, WalletService};
use crate::core::config::{GatewayConfig, WithdrawalConfig};
use crate::db::repository::{account as account_repo, withdrawal as withdrawal_repo};
use crate::message::EventBus;
use crate::utils::KeyedLocks;
use rust_decimal::Decimal;
use serde_json::json;
use shared::event::{Actor, EntityEvent, EventEntity};
use shared::models::{
    BalanceOp, ReviewStatus, TransactionType, UserAccount, Withdrawal, WithdrawalRequest,
    WithdrawalStatus,
};
use shared::money::Currency;
use shared::util::{day_key, domain_id, month_key, now_millis};
use sqlx::SqliteConnection;
use std::sync::Arc;

const HOLD_CATEGORY: &str = "withdrawal_hold";
const PAYOUT_CATEGORY: &str = "withdrawal";
const FEE_CATEGORY: &str = "withdrawal_fee";
const PAYOUT_CHANNEL: &str = "payout";

/// `fee_fixed + amount * fee_percent / 100`, rounded to the currency
pub fn withdrawal_fee(config: &WithdrawalConfig, currency: Currency, amount: Decimal) -> Decimal {
    let fee = config.fee_fixed + amount * config.fee_percent / Decimal::ONE_HUNDRED;
    currency.round(fee.max(Decimal::ZERO))
}

/// Check the day/month counters and return them with `amount` added
///
/// Counters from an older day or month restart at zero.
pub fn reserve_limits(
    account: &UserAccount,
    config: &WithdrawalConfig,
    amount: Decimal,
    now: i64,
) -> WalletResult<(i64, Decimal, i64, Decimal)> {
    let (day, month) = (day_key(now), month_key(now));
    let day_used = if account.day_key == day { account.day_withdrawn } else { Decimal::ZERO };
    let month_used = if account.month_key == month {
        account.month_withdrawn
    } else {
        Decimal::ZERO
    };
    if day_used + amount > config.daily_limit {
        return Err(WalletError::DailyLimitExceeded {
            limit: config.daily_limit,
            requested: amount,
        });
    }
    if month_used + amount > config.monthly_limit {
        return Err(WalletError::MonthlyLimitExceeded {
            limit: config.monthly_limit,
            requested: amount,
        });
    }
    Ok((day, day_used + amount, month, month_used + amount))
}

/// Give back counter headroom taken at request time, for the same day/month only
fn release_limits(account: &mut UserAccount, w: &Withdrawal) {
    if account.day_key == day_key(w.created_at) {
        account.day_withdrawn = (account.day_withdrawn - w.amount).max(Decimal::ZERO);
    }
    if account.month_key == month_key(w.created_at) {
        account.month_withdrawn = (account.month_withdrawn - w.amount).max(Decimal::ZERO);
    }
}

#[derive(Clone)]
pub struct WithdrawalService {
    wallet: WalletService,
    config: WithdrawalConfig,
    gateway_config: GatewayConfig,
    gateway: Arc<dyn PaymentGateway>,
    locks: KeyedLocks,
    bus: EventBus,
}

impl std::fmt::Debug for WithdrawalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalService")
            .field("config", &self.config)
            .field("gateway_config", &self.gateway_config)
            .finish()
    }
}

impl WithdrawalService {
    pub fn new(
        wallet: WalletService,
        config: WithdrawalConfig,
        gateway_config: GatewayConfig,
        gateway: Arc<dyn PaymentGateway>,
        bus: EventBus,
    ) -> Self {
        Self {
            wallet,
            config,
            gateway_config,
            gateway,
            locks: KeyedLocks::new(),
            bus,
        }
    }

    /// Drop payout locks nobody holds
    pub fn prune_locks(&self) {
        self.locks.prune();
    }

    pub async fn get(&self, withdrawal_id: &str) -> WalletResult<Withdrawal> {
        let mut conn = self.wallet.pool().acquire().await?;
        withdrawal_repo::find_by_id(&mut conn, withdrawal_id)
            .await?
            .ok_or_else(|| WalletError::WithdrawalNotFound(withdrawal_id.to_string()))
    }

    pub async fn list(&self, account_id: &str) -> WalletResult<Vec<Withdrawal>> {
        let mut conn = self.wallet.pool().acquire().await?;
        Ok(withdrawal_repo::list_by_account(&mut conn, account_id).await?)
    }

    // ========== Request ==========

    /// Freeze the hold and record the withdrawal
    ///
    /// A supplied `withdrawal_id` that already exists returns the stored row.
    pub async fn request(&self, req: WithdrawalRequest, actor: &Actor) -> WalletResult<Withdrawal> {
        if req.destination.trim().is_empty() {
            return Err(WalletError::InvalidInput {
                field: "destination",
                message: "must not be empty".into(),
            });
        }
        if !req.risk_score.is_finite() || req.risk_score < 0.0 {
            return Err(WalletError::InvalidInput {
                field: "risk_score",
                message: format!("{} is not a valid score", req.risk_score),
            });
        }

        let guards = self.wallet.lock_accounts(&[req.account_id.as_str()]).await;
        let now = now_millis();
        let mut tx = self.wallet.pool().begin().await?;

        if let Some(id) = req.withdrawal_id.as_deref()
            && let Some(existing) = withdrawal_repo::find_by_id(&mut tx, id).await?
        {
            if existing.account_id != req.account_id {
                return Err(WalletError::InvalidInput {
                    field: "withdrawal_id",
                    message: format!("{id} belongs to another account"),
                });
            }
            return Ok(existing);
        }

        let account = account_repo::find_by_id(&mut tx, &req.account_id)
            .await?
            .ok_or_else(|| WalletError::AccountNotFound(req.account_id.clone()))?;
        super::account::check_amount(&account, req.amount)?;

        let fee = withdrawal_fee(&self.config, account.currency, req.amount);
        let (day, day_total, month, month_total) = reserve_limits(&account, &self.config, req.amount, now)?;

        let manual = req.risk_score >= self.config.auto_approve_risk_threshold;
        let withdrawal_id = req.withdrawal_id.clone().unwrap_or_else(|| domain_id("WD"));
        let hold = req.amount + fee;

        let entry = LedgerEntry::new(BalanceOp::Freeze, TransactionType::Transfer, hold, HOLD_CATEGORY)
            .for_withdrawal(&withdrawal_id)
            .with_fee(fee)
            .with_review(
                if manual { ReviewStatus::Pending } else { ReviewStatus::NotRequired },
                req.risk_score,
            );
        let posting = self
            .wallet
            .post_adjusted(&mut tx, &account.account_id, &entry, None, now, move |next| {
                next.day_key = day;
                next.day_withdrawn = day_total;
                next.month_key = month;
                next.month_withdrawn = month_total;
            })
            .await?;

        let (status, approved_by, approved_at) = if manual {
            (WithdrawalStatus::PendingApproval, None, None)
        } else {
            (WithdrawalStatus::Approved, Some(Actor::system().id), Some(now))
        };
        let withdrawal = Withdrawal {
            withdrawal_id,
            account_id: account.account_id.clone(),
            user_id: account.user_id.clone(),
            amount: req.amount,
            fee,
            net_amount: req.amount,
            currency: account.currency,
            method: req.method,
            destination: req.destination,
            status,
            requires_manual_review: manual,
            risk_score: req.risk_score,
            approved_by,
            approved_at,
            reject_reason: None,
            failure_reason: None,
            external_txn_id: None,
            balance_before: account.balances(),
            balance_after: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        withdrawal_repo::insert(&mut tx, &withdrawal).await?;
        tx.commit().await?;
        drop(guards);

        tracing::info!(
            withdrawal_id = %withdrawal.withdrawal_id,
            account_id = %withdrawal.account_id,
            amount = %withdrawal.amount,
            fee = %withdrawal.fee,
            risk_score = withdrawal.risk_score,
            status = %withdrawal.status,
            "Withdrawal requested"
        );
        self.wallet.announce(&posting, actor);
        self.publish(None, &withdrawal, actor);
        Ok(withdrawal)
    }

    // ========== Review ==========

    pub async fn approve(&self, withdrawal_id: &str, actor: &Actor) -> WalletResult<Withdrawal> {
        self.transition(
            withdrawal_id,
            &[WithdrawalStatus::PendingApproval],
            WithdrawalStatus::Approved,
            actor,
            None,
            |w, now| {
                w.approved_by = Some(actor.id.clone());
                w.approved_at = Some(now);
            },
        )
        .await
    }

    pub async fn reject(
        &self,
        withdrawal_id: &str,
        reason: Option<String>,
        actor: &Actor,
    ) -> WalletResult<Withdrawal> {
        self.transition(
            withdrawal_id,
            &[WithdrawalStatus::PendingApproval],
            WithdrawalStatus::Rejected,
            actor,
            Some(BalanceOp::Unfreeze),
            |w, _| w.reject_reason = reason.or_else(|| Some("rejected".into())),
        )
        .await
    }

    /// User-side cancel; not possible once processing started
    pub async fn cancel(&self, withdrawal_id: &str, actor: &Actor) -> WalletResult<Withdrawal> {
        self.transition(
            withdrawal_id,
            &[WithdrawalStatus::PendingApproval, WithdrawalStatus::Approved],
            WithdrawalStatus::Cancelled,
            actor,
            Some(BalanceOp::Unfreeze),
            |_, _| {},
        )
        .await
    }

    /// Admin operation: `processing → failed` with unfreeze
    ///
    /// Waits for an in-flight payout. When the gateway already reports the
    /// payout as succeeded the withdrawal is completed instead and
    /// `WithdrawalNotInState` is returned.
    pub async fn fail(
        &self,
        withdrawal_id: &str,
        reason: Option<String>,
        actor: &Actor,
    ) -> WalletResult<Withdrawal> {
        let _payout = self.locks.lock(withdrawal_id).await;
        let current = self.get(withdrawal_id).await?;
        if current.status == WithdrawalStatus::Processing
            && let Some(intent_id) = current.external_txn_id.as_deref()
        {
            let gateway = self.gateway.as_ref();
            let intent = call_with_retry(&self.gateway_config, "query_status", withdrawal_id, move || {
                gateway.query_status(intent_id)
            })
            .await?;
            if intent.status == IntentStatus::Succeeded {
                tracing::warn!(withdrawal_id, intent_id, "Payout already succeeded, completing instead of failing");
                let done = self.complete(withdrawal_id, intent.intent_id, actor).await?;
                return Err(WalletError::WithdrawalNotInState {
                    withdrawal_id: withdrawal_id.to_string(),
                    status: done.status,
                });
            }
        }

        self.transition(
            withdrawal_id,
            &[WithdrawalStatus::Processing],
            WithdrawalStatus::Failed,
            actor,
            Some(BalanceOp::Unfreeze),
            |w, _| w.failure_reason = reason.or_else(|| Some("failed by operator".into())),
        )
        .await
    }

    // ========== Payout ==========

    /// `approved → processing`, pay out through the gateway, then complete or fail
    ///
    /// The withdrawal id is the gateway idempotency key. A withdrawal found
    /// in `processing` had its payout interrupted and is paid out again with
    /// the same key.
    pub async fn process(&self, withdrawal_id: &str, actor: &Actor) -> WalletResult<Withdrawal> {
        let _payout = self.locks.lock(withdrawal_id).await;
        let current = self.get(withdrawal_id).await?;
        let processing = match current.status {
            WithdrawalStatus::Completed | WithdrawalStatus::Failed => return Ok(current),
            WithdrawalStatus::Processing => current,
            _ => {
                self.transition(
                    withdrawal_id,
                    &[WithdrawalStatus::Approved],
                    WithdrawalStatus::Processing,
                    actor,
                    None,
                    |_, _| {},
                )
                .await?
            }
        };

        match self.pay_out(&processing).await {
            Ok(intent) => self.complete(withdrawal_id, intent.intent_id, actor).await,
            Err(e) => {
                tracing::warn!(withdrawal_id, error = %e, "Payout failed");
                let failed = self
                    .transition(
                        withdrawal_id,
                        &[WithdrawalStatus::Processing],
                        WithdrawalStatus::Failed,
                        &Actor::system(),
                        Some(BalanceOp::Unfreeze),
                        |w, _| w.failure_reason = Some(e.to_string()),
                    )
                    .await?;
                Ok(failed)
            }
        }
    }

    /// Create and capture the payout; the intent id is stored once known
    async fn pay_out(&self, w: &Withdrawal) -> GatewayResult<GatewayIntent> {
        let req = GatewayRequest {
            idempotency_key: w.withdrawal_id.clone(),
            amount: w.net_amount,
            currency: w.currency,
            channel_code: PAYOUT_CHANNEL.into(),
            channel_account_id: w.destination.clone(),
            method: w.method.as_str().into(),
        };
        let gateway = self.gateway.as_ref();
        let key = req.idempotency_key.as_str();
        let req_ref = &req;
        let intent = call_with_retry(&self.gateway_config, "create_intent", key, move || {
            gateway.create_intent(req_ref)
        })
        .await?;
        self.record_intent(w, &intent.intent_id).await;
        if intent.status == IntentStatus::Succeeded {
            return Ok(intent);
        }
        let intent_id = intent.intent_id.as_str();
        call_with_retry(&self.gateway_config, "capture", key, move || gateway.capture(intent_id, key)).await
    }

    async fn record_intent(&self, w: &Withdrawal, intent_id: &str) {
        if w.external_txn_id.as_deref() == Some(intent_id) {
            return;
        }
        let mut next = w.clone();
        next.external_txn_id = Some(intent_id.to_string());
        next.updated_at = now_millis();
        let stored = match self.wallet.pool().acquire().await {
            Ok(mut conn) => withdrawal_repo::update_if_status(&mut conn, &next, WithdrawalStatus::Processing).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            tracing::warn!(withdrawal_id = %w.withdrawal_id, intent_id, error = %e, "Payout intent not recorded");
        }
    }

    /// `processing → completed`: deduct payout and fee from frozen
    async fn complete(
        &self,
        withdrawal_id: &str,
        external_txn_id: String,
        actor: &Actor,
    ) -> WalletResult<Withdrawal> {
        let w = self.get(withdrawal_id).await?;
        let guards = self.wallet.lock_accounts(&[w.account_id.as_str()]).await;
        let now = now_millis();
        let mut tx = self.wallet.pool().begin().await?;

        let before = load(&mut tx, withdrawal_id).await?;
        if before.status == WithdrawalStatus::Completed {
            return Ok(before);
        }
        if before.status != WithdrawalStatus::Processing {
            return Err(WalletError::WithdrawalNotInState {
                withdrawal_id: withdrawal_id.to_string(),
                status: before.status,
            });
        }

        let note = format!("{} {}", before.method.as_str(), external_txn_id);
        let payout = LedgerEntry::new(
            BalanceOp::DeductFromFrozen,
            TransactionType::Withdrawal,
            before.amount,
            PAYOUT_CATEGORY,
        )
        .for_withdrawal(withdrawal_id)
        .with_note(note.clone());
        let mut postings = vec![self.wallet.post_in(&mut tx, &before.account_id, &payout, None, now).await?];
        if before.fee > Decimal::ZERO {
            let fee = LedgerEntry::new(BalanceOp::DeductFromFrozen, TransactionType::Expense, before.fee, FEE_CATEGORY)
                .for_withdrawal(withdrawal_id)
                .with_fee(before.fee)
                .with_note(note);
            postings.push(self.wallet.post_in(&mut tx, &before.account_id, &fee, None, now).await?);
        }

        let mut after = before.clone();
        after.status = WithdrawalStatus::Completed;
        after.external_txn_id = Some(external_txn_id);
        after.balance_after = postings.last().map(|p| p.account.balances());
        after.completed_at = Some(now);
        after.updated_at = now;
        if !withdrawal_repo::update_if_status(&mut tx, &after, before.status).await? {
            return Err(WalletError::WithdrawalNotInState {
                withdrawal_id: withdrawal_id.to_string(),
                status: before.status,
            });
        }
        tx.commit().await?;
        drop(guards);

        tracing::info!(
            withdrawal_id,
            account_id = %after.account_id,
            external_txn_id = ?after.external_txn_id,
            "Withdrawal completed"
        );
        for posting in &postings {
            self.wallet.announce(posting, actor);
        }
        self.publish(Some(before.status), &after, actor);
        Ok(after)
    }

    // ========== Internals ==========

    /// Move `withdrawal_id` from one of `from` to `to`
    ///
    /// With `release = Some(Unfreeze)` the hold goes back to available and
    /// the request's counter headroom is returned.
    async fn transition<F>(
        &self,
        withdrawal_id: &str,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        actor: &Actor,
        release: Option<BalanceOp>,
        mutate: F,
    ) -> WalletResult<Withdrawal>
    where
        F: FnOnce(&mut Withdrawal, i64),
    {
        let account_id = self.get(withdrawal_id).await?.account_id;
        let guards = self.wallet.lock_accounts(&[account_id.as_str()]).await;
        let now = now_millis();
        let mut tx = self.wallet.pool().begin().await?;

        let before = load(&mut tx, withdrawal_id).await?;
        if before.status == to {
            return Ok(before);
        }
        if !from.contains(&before.status) {
            return Err(WalletError::WithdrawalNotInState {
                withdrawal_id: withdrawal_id.to_string(),
                status: before.status,
            });
        }

        let mut after = before.clone();
        after.status = to;
        after.updated_at = now;
        mutate(&mut after, now);

        let posting: Option<Posting> = match release {
            Some(op) => {
                let entry = LedgerEntry::new(op, TransactionType::Transfer, before.hold_amount(), HOLD_CATEGORY)
                    .for_withdrawal(withdrawal_id)
                    .with_note(to.as_str());
                let released = before.clone();
                let posting = self
                    .wallet
                    .post_adjusted(&mut tx, &before.account_id, &entry, None, now, move |next| {
                        release_limits(next, &released)
                    })
                    .await?;
                after.balance_after = Some(posting.account.balances());
                if to.is_terminal() {
                    after.completed_at = Some(now);
                }
                Some(posting)
            }
            None => None,
        };

        if !withdrawal_repo::update_if_status(&mut tx, &after, before.status).await? {
            return Err(WalletError::WithdrawalNotInState {
                withdrawal_id: withdrawal_id.to_string(),
                status: before.status,
            });
        }
        tx.commit().await?;
        drop(guards);

        tracing::info!(
            withdrawal_id,
            from = %before.status,
            to = %after.status,
            actor = %actor.id,
            "Withdrawal transition"
        );
        if let Some(posting) = &posting {
            self.wallet.announce(posting, actor);
        }
        self.publish(Some(before.status), &after, actor);
        Ok(after)
    }

    fn publish(&self, from: Option<WithdrawalStatus>, w: &Withdrawal, actor: &Actor) {
        self.bus.publish(
            EntityEvent::new(
                EventEntity::Withdrawal,
                &w.withdrawal_id,
                from.map(|s| s.as_str().to_string()),
                w.status.as_str(),
                actor.clone(),
            )
            .with_payload(json!({
                "account_id": w.account_id,
                "user_id": w.user_id,
                "amount": w.amount,
                "fee": w.fee,
                "currency": w.currency,
                "requires_manual_review": w.requires_manual_review,
                "external_txn_id": w.external_txn_id,
                "reason": w.reject_reason.as_ref().or(w.failure_reason.as_ref()),
            })),
        );
    }
}

async fn load(conn: &mut SqliteConnection, withdrawal_id: &str) -> WalletResult<Withdrawal> {
    withdrawal_repo::find_by_id(conn, withdrawal_id)
        .await?
        .ok_or_else(|| WalletError::WithdrawalNotFound(withdrawal_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::db::DbService;
    use crate::wallet::gateway::{GatewayError, SandboxGateway};
    use rust_decimal_macros::dec;
    use shared::models::{OpenAccountRequest, UserType, WithdrawalMethod};

    struct Fixture {
        wallet: WalletService,
        withdrawals: WithdrawalService,
        gateway: Arc<SandboxGateway>,
        account: UserAccount,
    }

    async fn fixture(config: Config, balance: Decimal) -> Fixture {
        let db = DbService::in_memory().await.unwrap();
        let bus = EventBus::new();
        let wallet = WalletService::new(db.pool, config.wallet, config.withdrawal.clone(), bus.clone());
        let gateway = Arc::new(SandboxGateway::new());
        let withdrawals = WithdrawalService::new(
            wallet.clone(),
            config.withdrawal,
            config.gateway,
            gateway.clone(),
            bus,
        );
        let account = wallet
            .open_account(OpenAccountRequest {
                user_id: "D5".into(),
                user_type: UserType::Driver,
                currency: Currency::Rwf,
            })
            .await
            .unwrap();
        wallet
            .apply(
                &account.account_id,
                LedgerEntry::new(BalanceOp::AddAvailable, TransactionType::Income, balance, "ride_earning"),
                None,
                &Actor::system(),
            )
            .await
            .unwrap();
        Fixture {
            wallet,
            withdrawals,
            gateway,
            account,
        }
    }

    fn request(account_id: &str, amount: Decimal, risk_score: f64) -> WithdrawalRequest {
        WithdrawalRequest {
            withdrawal_id: None,
            account_id: account_id.into(),
            amount,
            method: WithdrawalMethod::MobileMoney,
            destination: "+250788000000".into(),
            risk_score,
        }
    }

    #[test]
    fn test_fee_and_limits() {
        let mut config = Config::for_tests().withdrawal;
        config.fee_fixed = dec!(100);
        config.fee_percent = dec!(1.5);
        assert_eq!(withdrawal_fee(&config, Currency::Rwf, dec!(10000)), dec!(250));

        let account = UserAccount {
            account_id: "ACC1".into(),
            user_id: "D1".into(),
            user_type: UserType::Driver,
            currency: Currency::Rwf,
            available: dec!(1000000),
            frozen: Decimal::ZERO,
            pending: Decimal::ZERO,
            version: 1,
            last_balance_update_at: 0,
            day_key: 20250315,
            day_withdrawn: dec!(450000),
            month_key: 202503,
            month_withdrawn: dec!(450000),
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            created_at: 0,
        };
        // 2025-03-15 12:00:00 UTC
        let now = 1_742_040_000_000;
        assert!(matches!(
            reserve_limits(&account, &config, dec!(60000), now),
            Err(WalletError::DailyLimitExceeded { .. })
        ));
        let (_, day_total, _, _) = reserve_limits(&account, &config, dec!(50000), now).unwrap();
        assert_eq!(day_total, dec!(500000));
        // next day: the daily counter restarts
        let (_, day_total, _, month_total) =
            reserve_limits(&account, &config, dec!(60000), now + 86_400_000).unwrap();
        assert_eq!(day_total, dec!(60000));
        assert_eq!(month_total, dec!(510000));
    }

    #[tokio::test]
    async fn test_manual_review_then_payout() {
        let f = fixture(Config::for_tests(), dec!(80000)).await;
        f.gateway.push_reference("EX-XYZ");

        let w = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(50000), 85.0), &Actor::driver("D5"))
            .await
            .unwrap();
        assert_eq!(w.status, WithdrawalStatus::PendingApproval);
        assert!(w.requires_manual_review);
        let held = f.wallet.get_account(&f.account.account_id).await.unwrap();
        assert_eq!(held.available, dec!(30000));
        assert_eq!(held.frozen, dec!(50000));

        let approved = f.withdrawals.approve(&w.withdrawal_id, &Actor::admin("ADM1")).await.unwrap();
        assert_eq!(approved.approved_by.as_deref(), Some("ADM1"));

        let done = f.withdrawals.process(&w.withdrawal_id, &Actor::admin("ADM1")).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
        assert_eq!(done.external_txn_id.as_deref(), Some("EX-XYZ"));

        let after = f.wallet.get_account(&f.account.account_id).await.unwrap();
        assert_eq!(after.available, dec!(30000));
        assert_eq!(after.frozen, Decimal::ZERO);
        assert_eq!(after.total_withdrawn, dec!(50000));
        assert!(f.wallet.reconcile(&f.account.account_id).await.unwrap().balanced);

        // replay is a no-op
        let again = f.withdrawals.process(&w.withdrawal_id, &Actor::admin("ADM1")).await.unwrap();
        assert_eq!(again.status, WithdrawalStatus::Completed);
        assert_eq!(f.wallet.get_account(&f.account.account_id).await.unwrap().version, after.version);
    }

    #[tokio::test]
    async fn test_low_risk_is_auto_approved_and_cancel_unfreezes() {
        let f = fixture(Config::for_tests(), dec!(10000)).await;
        let w = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(4000), 10.0), &Actor::driver("D5"))
            .await
            .unwrap();
        assert_eq!(w.status, WithdrawalStatus::Approved);
        assert_eq!(w.approved_by.as_deref(), Some("system"));

        let cancelled = f.withdrawals.cancel(&w.withdrawal_id, &Actor::driver("D5")).await.unwrap();
        assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
        let twice = f.withdrawals.cancel(&w.withdrawal_id, &Actor::driver("D5")).await.unwrap();
        assert_eq!(twice.status, WithdrawalStatus::Cancelled);

        let wallet = f.wallet.get_wallet(&f.account.account_id).await.unwrap();
        assert_eq!(wallet.account.available, dec!(10000));
        assert_eq!(wallet.account.frozen, Decimal::ZERO);
        assert_eq!(wallet.daily_remaining, wallet.daily_limit);
    }

    #[tokio::test]
    async fn test_terminal_gateway_failure_unfreezes() {
        let f = fixture(Config::for_tests(), dec!(10000)).await;
        f.gateway.fail_next([GatewayError::Declined("account closed".into())]);
        let w = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(4000), 0.0), &Actor::driver("D5"))
            .await
            .unwrap();

        let failed = f.withdrawals.process(&w.withdrawal_id, &Actor::system()).await.unwrap();
        assert_eq!(failed.status, WithdrawalStatus::Failed);
        assert!(failed.failure_reason.is_some());
        let account = f.wallet.get_account(&f.account.account_id).await.unwrap();
        assert_eq!(account.available, dec!(10000));
        assert_eq!(f.gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_limits_and_processing_guards() {
        let mut config = Config::for_tests();
        config.withdrawal.daily_limit = dec!(5000);
        let f = fixture(config, dec!(20000)).await;

        let first = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(3000), 0.0), &Actor::driver("D5"))
            .await
            .unwrap();
        assert!(matches!(
            f.withdrawals
                .request(request(&f.account.account_id, dec!(2500), 0.0), &Actor::driver("D5"))
                .await,
            Err(WalletError::DailyLimitExceeded { .. })
        ));

        assert!(matches!(
            f.withdrawals.fail(&first.withdrawal_id, None, &Actor::admin("ADM1")).await,
            Err(WalletError::WithdrawalNotInState { .. })
        ));
        assert!(matches!(
            f.withdrawals.reject(&first.withdrawal_id, None, &Actor::admin("ADM1")).await,
            Err(WalletError::WithdrawalNotInState { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_is_idempotent_on_withdrawal_id() {
        let f = fixture(Config::for_tests(), dec!(10000)).await;
        let mut req = request(&f.account.account_id, dec!(1000), 0.0);
        req.withdrawal_id = Some("WD-CLIENT-1".into());

        let a = f.withdrawals.request(req.clone(), &Actor::driver("D5")).await.unwrap();
        let b = f.withdrawals.request(req, &Actor::driver("D5")).await.unwrap();
        assert_eq!(a.withdrawal_id, b.withdrawal_id);
        assert_eq!(f.wallet.get_account(&f.account.account_id).await.unwrap().frozen, dec!(1000));
    }

    #[tokio::test]
    async fn test_fail_waits_for_inflight_payout() {
        let f = fixture(Config::for_tests(), dec!(10000)).await;
        let w = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(4000), 0.0), &Actor::driver("D5"))
            .await
            .unwrap();
        f.gateway.set_latency(std::time::Duration::from_millis(150));

        let payout = {
            let withdrawals = f.withdrawals.clone();
            let id = w.withdrawal_id.clone();
            tokio::spawn(async move { withdrawals.process(&id, &Actor::system()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let failed = f.withdrawals.fail(&w.withdrawal_id, None, &Actor::admin("ADM1")).await;
        assert!(matches!(
            failed,
            Err(WalletError::WithdrawalNotInState {
                status: WithdrawalStatus::Completed,
                ..
            })
        ));
        let done = payout.await.unwrap().unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);

        let account = f.wallet.get_account(&f.account.account_id).await.unwrap();
        assert_eq!(account.available, dec!(6000));
        assert_eq!(account.frozen, Decimal::ZERO);
        assert!(f.wallet.reconcile(&f.account.account_id).await.unwrap().balanced);
    }

    #[tokio::test]
    async fn test_fail_completes_when_payout_already_succeeded() {
        let f = fixture(Config::for_tests(), dec!(10000)).await;
        let w = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(4000), 0.0), &Actor::driver("D5"))
            .await
            .unwrap();
        // payout interrupted after the gateway captured it
        let processing = f
            .withdrawals
            .transition(
                &w.withdrawal_id,
                &[WithdrawalStatus::Approved],
                WithdrawalStatus::Processing,
                &Actor::system(),
                None,
                |_, _| {},
            )
            .await
            .unwrap();
        let intent = f.withdrawals.pay_out(&processing).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Succeeded);
        let stored = f.withdrawals.get(&w.withdrawal_id).await.unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Processing);
        assert_eq!(stored.external_txn_id.as_deref(), Some(intent.intent_id.as_str()));

        assert!(matches!(
            f.withdrawals.fail(&w.withdrawal_id, None, &Actor::admin("ADM1")).await,
            Err(WalletError::WithdrawalNotInState {
                status: WithdrawalStatus::Completed,
                ..
            })
        ));
        let account = f.wallet.get_account(&f.account.account_id).await.unwrap();
        assert_eq!(account.available, dec!(6000));
        assert_eq!(account.frozen, Decimal::ZERO);
        assert_eq!(account.total_withdrawn, dec!(4000));
    }

    #[tokio::test]
    async fn test_fee_is_recorded_apart_from_payout() {
        let mut config = Config::for_tests();
        config.withdrawal.fee_fixed = dec!(500);
        let f = fixture(config, dec!(10000)).await;
        let w = f
            .withdrawals
            .request(request(&f.account.account_id, dec!(4000), 0.0), &Actor::driver("D5"))
            .await
            .unwrap();
        let done = f.withdrawals.process(&w.withdrawal_id, &Actor::system()).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);

        let account = f.wallet.get_account(&f.account.account_id).await.unwrap();
        assert_eq!(account.available, dec!(5500));
        assert_eq!(account.frozen, Decimal::ZERO);
        assert_eq!(account.total_withdrawn, dec!(4000));
        assert_eq!(account.total_spent, dec!(500));
        assert!(f.wallet.reconcile(&f.account.account_id).await.unwrap().balanced);
    }
}
