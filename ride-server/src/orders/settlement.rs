//! Order settlement
//!
//! Completion debits the rider (wallet) or records the captured external
//! payment (card / mobile money), credits the driver's share and retires
//! the snapshot's user promotions. Refund writes the inverse entries.
//!
//! Ledger writes run inside the coordinator's transaction. A capture runs
//! before it; a gateway refund runs after it commits, from `refund_pending`.
//! See [`PaymentHandoff`].

use super::error::{OrderError, OrderResult};
use crate::core::config::{GatewayConfig, SettlementConfig};
use crate::db::repository::{payment, snapshot, transaction};
use crate::pricing::PricingError;
use crate::pricing::promotions;
use crate::wallet::gateway::{GatewayRequest, call_with_retry, charge};
use crate::wallet::{LedgerEntry, PaymentGateway, PaymentRouterService, Posting, WalletError, WalletService};
use rust_decimal::Decimal;
use shared::models::{
    BalanceOp, Order, Payment, PaymentMethod, PaymentStatus, PriceSnapshot, RouteRequest,
    TransactionType,
};
use shared::money::Currency;
use shared::util::now_millis;
use sqlx::SqliteConnection;
use std::sync::Arc;

pub const RIDE_PAYMENT: &str = "ride_payment";
pub const RIDE_EARNING: &str = "ride_earning";
pub const RIDE_REFUND: &str = "ride_refund";

/// Driver's cut of the fare, rounded to the currency's minor units
pub fn driver_share(fare: Decimal, percent: Decimal, currency: Currency) -> Decimal {
    currency.round(fare * percent / Decimal::ONE_HUNDRED)
}

/// Stable per order so a retried completion reuses the gateway intent
pub fn payment_id_for(order_id: &str) -> String {
    format!("PAY-{order_id}")
}

/// Wallet accounts touched by a settlement
#[derive(Debug, Clone)]
pub struct Parties {
    /// Set for wallet-paid orders only
    pub rider_account: Option<String>,
    pub driver_account: String,
}

impl Parties {
    /// Accounts to lock for the settlement
    pub fn accounts(&self) -> Vec<&str> {
        self.rider_account
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.driver_account.as_str()))
            .collect()
    }
}

/// What a settlement wrote
#[derive(Debug, Clone, Default)]
pub struct SettlementOutcome {
    pub postings: Vec<Posting>,
    pub payments: Vec<Payment>,
    pub promotions: Vec<String>,
}

async fn load_snapshot(conn: &mut SqliteConnection, snapshot_id: &str) -> OrderResult<PriceSnapshot> {
    snapshot::find_by_id(conn, snapshot_id)
        .await?
        .ok_or_else(|| OrderError::Pricing(PricingError::SnapshotNotFound(snapshot_id.to_string())))
}

/// Ledger side of `in_progress → completed`
pub async fn settle_completion(
    conn: &mut SqliteConnection,
    wallet: &WalletService,
    config: &SettlementConfig,
    order: &Order,
    parties: &Parties,
    captured: Option<&Payment>,
    now: i64,
) -> OrderResult<SettlementOutcome> {
    let mut outcome = SettlementOutcome::default();

    match (order.payment_method, captured, parties.rider_account.as_deref()) {
        (PaymentMethod::Wallet, _, Some(rider_account)) => {
            let entry = LedgerEntry::new(
                BalanceOp::SubtractAvailable,
                TransactionType::Expense,
                order.fare,
                RIDE_PAYMENT,
            )
            .in_currency(order.currency)
            .for_order(&order.order_id);
            outcome
                .postings
                .push(wallet.post_in(conn, rider_account, &entry, None, now).await?);
        }
        (PaymentMethod::Wallet, _, None) => {
            return Err(OrderError::Wallet(WalletError::AccountNotFound(format!(
                "rider {}",
                order.rider_id
            ))));
        }
        (_, Some(p), _) => {
            payment::insert_payment(conn, p).await?;
            outcome.payments.push(p.clone());
        }
        (method, None, _) => {
            return Err(OrderError::Wallet(WalletError::PaymentFailed {
                payment_id: payment_id_for(&order.order_id),
                reason: format!("no captured {} payment", method.as_str()),
            }));
        }
    }

    let share = driver_share(order.fare, config.driver_share_percent, order.currency);
    if share > Decimal::ZERO {
        let mut entry = LedgerEntry::new(BalanceOp::AddAvailable, TransactionType::Income, share, RIDE_EARNING)
            .in_currency(order.currency)
            .for_order(&order.order_id);
        if let Some(p) = captured {
            entry = entry.for_payment(&p.payment_id);
        }
        outcome
            .postings
            .push(wallet.post_in(conn, &parties.driver_account, &entry, None, now).await?);
    }

    let snap = load_snapshot(conn, &order.snapshot_id).await?;
    outcome.promotions = promotions::retire_for_order(conn, &snap, &order.order_id, now).await?;
    Ok(outcome)
}

/// Ledger side of `completed → refunded`
///
/// The driver's earning is clawed back as an expense. External payments
/// move to `refund_pending`; the gateway refund follows the commit.
pub async fn settle_refund(
    conn: &mut SqliteConnection,
    wallet: &WalletService,
    config: &SettlementConfig,
    order: &Order,
    parties: &Parties,
    now: i64,
) -> OrderResult<SettlementOutcome> {
    let mut outcome = SettlementOutcome::default();

    match (order.payment_method, parties.rider_account.as_deref()) {
        (PaymentMethod::Wallet, Some(rider_account)) => {
            let entry = LedgerEntry::new(BalanceOp::AddAvailable, TransactionType::Refund, order.fare, RIDE_REFUND)
                .in_currency(order.currency)
                .for_order(&order.order_id);
            outcome
                .postings
                .push(wallet.post_in(conn, rider_account, &entry, None, now).await?);
        }
        (PaymentMethod::Wallet, None) => {
            return Err(OrderError::Wallet(WalletError::AccountNotFound(format!(
                "rider {}",
                order.rider_id
            ))));
        }
        _ => {
            for p in payment::find_payments_by_order(conn, &order.order_id).await? {
                if p.status == PaymentStatus::Succeeded
                    && payment::update_payment_status(
                        conn,
                        &p.payment_id,
                        PaymentStatus::Succeeded,
                        PaymentStatus::RefundPending,
                        now,
                    )
                    .await?
                {
                    outcome.payments.push(Payment {
                        status: PaymentStatus::RefundPending,
                        updated_at: now,
                        ..p
                    });
                }
            }
        }
    }

    let earned: Decimal = transaction::list_by_order(conn, &order.order_id)
        .await?
        .into_iter()
        .filter(|t| {
            t.account_id == parties.driver_account
                && t.category == RIDE_EARNING
                && t.tx_type == TransactionType::Income
        })
        .map(|t| t.amount)
        .sum();
    if earned > Decimal::ZERO {
        let entry = LedgerEntry::new(BalanceOp::SubtractAvailable, TransactionType::Expense, earned, RIDE_REFUND)
            .in_currency(order.currency)
            .for_order(&order.order_id);
        outcome
            .postings
            .push(wallet.post_in(conn, &parties.driver_account, &entry, None, now).await?);
    }

    if config.release_promotions_on_refund {
        let snap = load_snapshot(conn, &order.snapshot_id).await?;
        outcome.promotions = promotions::release_for_order(conn, &snap, &order.order_id).await?;
    }
    Ok(outcome)
}

/// Router + gateway for card and mobile-money orders
#[derive(Clone)]
pub struct PaymentHandoff {
    router: PaymentRouterService,
    gateway: Arc<dyn PaymentGateway>,
    config: GatewayConfig,
}

impl std::fmt::Debug for PaymentHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentHandoff")
            .field("router", &self.router)
            .field("config", &self.config)
            .finish()
    }
}

impl PaymentHandoff {
    pub fn new(router: PaymentRouterService, gateway: Arc<dyn PaymentGateway>, config: GatewayConfig) -> Self {
        Self {
            router,
            gateway,
            config,
        }
    }

    pub fn router(&self) -> &PaymentRouterService {
        &self.router
    }

    /// Route and capture the fare; the returned row is not persisted yet
    pub async fn capture(&self, order: &Order, region: Option<String>) -> OrderResult<Payment> {
        let payment_id = payment_id_for(&order.order_id);
        let route = self
            .router
            .route(&RouteRequest {
                payment_method: order.payment_method.as_str().to_string(),
                currency: order.currency,
                amount: order.fare,
                region,
            })
            .await?;

        let req = GatewayRequest {
            idempotency_key: payment_id.clone(),
            amount: order.fare,
            currency: order.currency,
            channel_code: route.channel_code.clone(),
            channel_account_id: route.channel_account_id.clone(),
            method: order.payment_method.as_str().to_string(),
        };
        let intent = charge(self.gateway.as_ref(), &self.config, &req)
            .await
            .map_err(|e| {
                tracing::warn!(order_id = %order.order_id, payment_id = %payment_id, error = %e, "Capture failed");
                OrderError::Wallet(WalletError::PaymentFailed {
                    payment_id: payment_id.clone(),
                    reason: e.to_string(),
                })
            })?;

        let now = now_millis();
        tracing::info!(
            order_id = %order.order_id,
            payment_id = %payment_id,
            channel = %route.channel_code,
            external_ref = %intent.intent_id,
            "Payment captured"
        );
        Ok(Payment {
            payment_id,
            order_id: order.order_id.clone(),
            method: order.payment_method,
            channel_code: route.channel_code,
            channel_account_id: route.channel_account_id,
            amount: order.fare,
            currency: order.currency,
            status: PaymentStatus::Succeeded,
            external_ref: Some(intent.intent_id),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Refund a captured payment at the gateway
    pub async fn refund(&self, p: &Payment) -> OrderResult<()> {
        let Some(intent_id) = p.external_ref.as_deref() else {
            return Err(OrderError::Wallet(WalletError::PaymentFailed {
                payment_id: p.payment_id.clone(),
                reason: "no gateway reference".into(),
            }));
        };
        let key = format!("{}-refund", p.payment_id);
        let gateway = self.gateway.as_ref();
        let amount = p.amount;
        let key_ref = key.as_str();
        call_with_retry(&self.config, "refund", key_ref, move || {
            gateway.refund(intent_id, amount, key_ref)
        })
        .await
        .map_err(WalletError::from)?;
        tracing::info!(payment_id = %p.payment_id, "Payment refunded at gateway");
        Ok(())
    }

    /// Compensation when the local settlement failed after a capture
    pub fn compensate(&self, p: Payment) {
        let handoff = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handoff.refund(&p).await {
                tracing::error!(
                    target: "alert",
                    payment_id = %p.payment_id,
                    order_id = %p.order_id,
                    error = %e,
                    "Captured payment could not be compensated"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_driver_share_rounds_to_currency() {
        assert_eq!(driver_share(dec!(2050), dec!(80), Currency::Rwf), dec!(1640));
        assert_eq!(driver_share(dec!(1845), dec!(80), Currency::Rwf), dec!(1476));
        assert_eq!(driver_share(dec!(1001), dec!(75), Currency::Rwf), dec!(751));
        assert_eq!(driver_share(dec!(10.05), dec!(75), Currency::Usd), dec!(7.54));
    }

    #[test]
    fn test_payment_id_is_stable() {
        assert_eq!(payment_id_for("ORD1"), payment_id_for("ORD1"));
        assert_ne!(payment_id_for("ORD1"), payment_id_for("ORD2"));
    }
}
