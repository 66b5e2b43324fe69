//! Order Coordinator
//!
//! Owns every order status transition. Each one runs under the order lock
//! in a single transaction that also writes the history row; events and
//! driver-index updates follow the commit.

use super::error::{OrderError, OrderResult};
use super::settlement::{self, Parties, PaymentHandoff, SettlementOutcome};
use super::transitions::can_transition;
use super::{ActorContext, history, order_event};
use crate::core::config::SettlementConfig;
use crate::db::repository::{history as history_repo, order, payment, snapshot};
use crate::dispatch::DispatchEngine;
use crate::message::EventBus;
use crate::pricing::{PricingEngine, PricingError, promotions};
use crate::wallet::{WalletError, WalletService};
use serde_json::json;
use shared::event::{Actor, EntityEvent, EventEntity};
use shared::models::{
    DispatchRecord, DispatchRecordStatus, OpenAccountRequest, Order, OrderCreate,
    OrderHistoryLog, OrderStatus, Payment, PaymentMethod, PaymentStatus, UserType,
};
use shared::util::{domain_id, now_millis};
use sqlx::{SqliteConnection, SqlitePool};

const RIDER_CANCELLED: &str = "rider_cancelled";

#[derive(Clone)]
pub struct OrderCoordinator {
    pool: SqlitePool,
    config: SettlementConfig,
    pricing: PricingEngine,
    dispatch: DispatchEngine,
    wallet: WalletService,
    payments: PaymentHandoff,
    bus: EventBus,
}

impl std::fmt::Debug for OrderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCoordinator")
            .field("config", &self.config)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

async fn load(conn: &mut SqliteConnection, order_id: &str) -> OrderResult<Order> {
    order::find_by_id(conn, order_id)
        .await?
        .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
}

impl OrderCoordinator {
    pub fn new(
        pool: SqlitePool,
        config: SettlementConfig,
        pricing: PricingEngine,
        dispatch: DispatchEngine,
        wallet: WalletService,
        payments: PaymentHandoff,
        bus: EventBus,
    ) -> Self {
        Self {
            pool,
            config,
            pricing,
            dispatch,
            wallet,
            payments,
            bus,
        }
    }

    pub fn dispatch(&self) -> &DispatchEngine {
        &self.dispatch
    }

    // ========== Reads ==========

    pub async fn get(&self, order_id: &str) -> OrderResult<Order> {
        let mut conn = self.pool.acquire().await?;
        load(&mut conn, order_id).await
    }

    /// Oldest first
    pub async fn history(&self, order_id: &str) -> OrderResult<Vec<OrderHistoryLog>> {
        let mut conn = self.pool.acquire().await?;
        load(&mut conn, order_id).await?;
        Ok(history_repo::list_by_order(&mut conn, order_id).await?)
    }

    pub async fn dispatch_records(&self, order_id: &str) -> OrderResult<Vec<DispatchRecord>> {
        Ok(self.dispatch.list_records(order_id).await?)
    }

    /// External (card / mobile money) payments of the order
    pub async fn payments(&self, order_id: &str) -> OrderResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        load(&mut conn, order_id).await?;
        Ok(payment::find_payments_by_order(&mut conn, order_id).await?)
    }

    // ========== Delete ==========

    /// Remove a cancelled order with its dispatch records and history
    ///
    /// Wallet transactions belong to the account and are kept.
    pub async fn delete(&self, order_id: &str, ctx: &ActorContext) -> OrderResult<()> {
        let _order_guard = self.dispatch.order_locks().lock(order_id).await;
        let mut tx = self.pool.begin().await?;
        let current = load(&mut tx, order_id).await?;
        if current.status != OrderStatus::Cancelled {
            return Err(OrderError::NotDeletable {
                order_id: order_id.to_string(),
                status: current.status,
            });
        }
        if !order::delete(&mut tx, order_id).await? {
            return Err(OrderError::NotFound(order_id.to_string()));
        }
        tx.commit().await?;

        tracing::info!(order_id, actor = %ctx.actor.id, "Order deleted");
        self.bus.publish(EntityEvent::new(
            EventEntity::Order,
            order_id,
            Some(current.status.as_str().to_string()),
            "deleted",
            ctx.actor.clone(),
        ));
        Ok(())
    }

    // ========== Create ==========

    /// Create the order, bind its snapshot and, for immediate orders, start dispatch
    ///
    /// `created → pending_dispatch` commits together with the snapshot lock.
    pub async fn create(&self, req: OrderCreate, ctx: &ActorContext) -> OrderResult<Order> {
        let now = now_millis();
        if req.rider_id.trim().is_empty() {
            return Err(OrderError::InvalidInput {
                field: "rider_id",
                message: "must not be empty".into(),
            });
        }
        if !req.pickup.is_valid() {
            return Err(OrderError::Pricing(PricingError::InvalidCoordinate("pickup")));
        }
        if !req.dropoff.is_valid() {
            return Err(OrderError::Pricing(PricingError::InvalidCoordinate("dropoff")));
        }
        if let Some(at) = req.scheduled_at
            && at <= now
        {
            return Err(OrderError::InvalidSchedule(at));
        }

        let snap = self.pricing.get_snapshot(&req.snapshot_id).await?;
        if snap.rider_id != req.rider_id {
            return Err(OrderError::InvalidInput {
                field: "snapshot_id",
                message: format!("snapshot {} was quoted for another rider", snap.snapshot_id),
            });
        }

        let created = Order {
            order_id: domain_id("ORD"),
            rider_id: req.rider_id.clone(),
            order_type: req.order_type,
            pickup: req.pickup,
            dropoff: req.dropoff,
            scheduled_at: req.scheduled_at,
            vehicle_category: snap.vehicle_category,
            vehicle_level: snap.vehicle_level,
            snapshot_id: snap.snapshot_id.clone(),
            driver_id: None,
            status: OrderStatus::Created,
            payment_method: req.payment_method,
            currency: snap.currency,
            fare: snap.discounted_fare,
            cancel_reason: None,
            created_at: now,
            priced_at: None,
            dispatch_started_at: None,
            accepted_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            refunded_at: None,
            rejected_at: None,
            updated_at: now,
        };
        let order_id = created.order_id.clone();

        let pending = {
            let _snapshot_guard = self.pricing.snapshot_guard(&snap.snapshot_id).await;
            let _order_guard = self.dispatch.order_locks().lock(&order_id).await;
            let mut tx = self.pool.begin().await?;

            order::insert(&mut tx, &created).await?;
            history::append(&mut tx, None, &created, ctx, None, now).await?;
            PricingEngine::lock_in(&mut tx, &snap.snapshot_id, &order_id, now).await?;
            if !order::update_status(
                &mut tx,
                &order_id,
                OrderStatus::Created,
                OrderStatus::PendingDispatch,
                now,
                None,
            )
            .await?
            {
                return Err(OrderError::NotInState {
                    order_id,
                    status: OrderStatus::Created,
                    target: OrderStatus::PendingDispatch,
                });
            }
            let pending = load(&mut tx, &order_id).await?;
            history::append(&mut tx, Some(&created), &pending, ctx, None, now).await?;
            tx.commit().await?;
            pending
        };

        tracing::info!(
            order_id = %order_id,
            rider_id = %pending.rider_id,
            snapshot_id = %pending.snapshot_id,
            fare = %pending.fare,
            scheduled = pending.is_scheduled(),
            "Order created"
        );
        self.bus.publish(order_event(None, &created, &ctx.actor));
        self.bus
            .publish(order_event(Some(OrderStatus::Created), &pending, &ctx.actor));

        if pending.is_scheduled() {
            return Ok(pending);
        }
        match self.dispatch.start(&order_id, &ActorContext::system()).await {
            Ok(dispatching) => Ok(dispatching),
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Dispatch did not start");
                Ok(pending)
            }
        }
    }

    // ========== Transitions ==========

    /// Rider cancel before the ride starts; open offers become `cancelled`
    pub async fn cancel(&self, order_id: &str, reason: Option<String>, ctx: &ActorContext) -> OrderResult<Order> {
        let reason = reason.unwrap_or_else(|| RIDER_CANCELLED.to_string());
        let (before, after, offers, released) = {
            let _guard = self.dispatch.order_locks().lock(order_id).await;
            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let before = load(&mut tx, order_id).await?;
            if before.status == OrderStatus::Cancelled {
                return Ok(before);
            }
            self.check(&before, OrderStatus::Cancelled)?;

            if !order::update_status(&mut tx, order_id, before.status, OrderStatus::Cancelled, now, Some(&reason))
                .await?
            {
                return Err(self.not_in_state(&before, OrderStatus::Cancelled));
            }
            let offers = DispatchEngine::cancel_offers(&mut tx, order_id).await?;
            let released = match snapshot::find_by_id(&mut tx, &before.snapshot_id).await? {
                Some(snap) => promotions::release_for_order(&mut tx, &snap, order_id).await?,
                None => Vec::new(),
            };
            let after = load(&mut tx, order_id).await?;
            history::append(&mut tx, Some(&before), &after, ctx, Some(&reason), now).await?;
            tx.commit().await?;
            (before, after, offers, released)
        };

        self.dispatch.stop(order_id);
        if let Some(driver_id) = after.driver_id.as_deref()
            && let Err(e) = self.dispatch.index().release(driver_id, order_id).await
        {
            tracing::warn!(order_id, driver_id, error = %e, "Driver not released after cancel");
        }

        tracing::info!(order_id, from = %before.status, reason = %reason, released = released.len(), "Order cancelled");
        self.dispatch
            .announce(&offers, DispatchRecordStatus::Cancelled, &ctx.actor);
        self.bus
            .publish(order_event(Some(before.status), &after, &ctx.actor));
        Ok(after)
    }

    /// `accepted → driver_arriving`, by the assigned driver
    pub async fn arrive(&self, order_id: &str, driver_id: &str, ctx: &ActorContext) -> OrderResult<Order> {
        self.advance(order_id, driver_id, OrderStatus::DriverArriving, ctx)
            .await
    }

    /// `driver_arriving → in_progress`, by the assigned driver
    pub async fn start(&self, order_id: &str, driver_id: &str, ctx: &ActorContext) -> OrderResult<Order> {
        self.advance(order_id, driver_id, OrderStatus::InProgress, ctx)
            .await
    }

    async fn advance(
        &self,
        order_id: &str,
        driver_id: &str,
        target: OrderStatus,
        ctx: &ActorContext,
    ) -> OrderResult<Order> {
        let (before, after) = {
            let _guard = self.dispatch.order_locks().lock(order_id).await;
            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let before = load(&mut tx, order_id).await?;
            self.check_driver(&before, driver_id)?;
            self.check(&before, target)?;
            if !order::update_status(&mut tx, order_id, before.status, target, now, None).await? {
                return Err(self.not_in_state(&before, target));
            }
            let after = load(&mut tx, order_id).await?;
            history::append(&mut tx, Some(&before), &after, ctx, None, now).await?;
            tx.commit().await?;
            (before, after)
        };

        tracing::info!(order_id, driver_id, from = %before.status, to = %after.status, "Order advanced");
        self.bus
            .publish(order_event(Some(before.status), &after, &ctx.actor));
        Ok(after)
    }

    /// `in_progress → completed` with settlement in the same transaction
    ///
    /// The order lock is held from the state check through the capture, so
    /// a duplicate completion fails before it reaches the gateway.
    pub async fn complete(&self, order_id: &str, driver_id: &str, ctx: &ActorContext) -> OrderResult<Order> {
        let order_guard = self.dispatch.order_locks().lock(order_id).await;
        let current = self.get(order_id).await?;
        self.check_driver(&current, driver_id)?;
        self.check(&current, OrderStatus::Completed)?;

        let parties = self.parties(&current).await?;
        let captured = match current.payment_method {
            PaymentMethod::Wallet => None,
            _ => Some(self.payments.capture(&current, None).await?),
        };

        let result = self
            .settle_completion(order_id, driver_id, &parties, captured.as_ref(), ctx)
            .await;
        let (before, after, outcome) = match result {
            Ok(done) => done,
            Err(e) => {
                if let Some(p) = captured {
                    if self.payment_recorded(&p).await {
                        tracing::warn!(order_id, payment_id = %p.payment_id, error = %e, "Settlement failed, payment already recorded");
                    } else {
                        tracing::warn!(order_id, payment_id = %p.payment_id, error = %e, "Settlement failed after capture, refunding");
                        self.payments.compensate(p);
                    }
                }
                return Err(e);
            }
        };
        drop(order_guard);

        if let Err(e) = self.dispatch.index().release(driver_id, order_id).await {
            tracing::warn!(order_id, driver_id, error = %e, "Driver not released after completion");
        }
        tracing::info!(
            order_id,
            driver_id,
            fare = %after.fare,
            promotions = outcome.promotions.len(),
            "Order completed"
        );
        self.announce_settlement(&outcome, &ctx.actor);
        self.bus
            .publish(order_event(Some(before.status), &after, &ctx.actor));
        Ok(after)
    }

    /// Caller holds the order lock
    async fn settle_completion(
        &self,
        order_id: &str,
        driver_id: &str,
        parties: &Parties,
        captured: Option<&Payment>,
        ctx: &ActorContext,
    ) -> OrderResult<(Order, Order, SettlementOutcome)> {
        let _account_guards = self.wallet.lock_accounts(&parties.accounts()).await;

        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let before = load(&mut tx, order_id).await?;
        self.check_driver(&before, driver_id)?;
        self.check(&before, OrderStatus::Completed)?;

        if !order::update_status(&mut tx, order_id, before.status, OrderStatus::Completed, now, None).await? {
            return Err(self.not_in_state(&before, OrderStatus::Completed));
        }
        let outcome =
            settlement::settle_completion(&mut tx, &self.wallet, &self.config, &before, parties, captured, now)
                .await?;
        let after = load(&mut tx, order_id).await?;
        history::append(&mut tx, Some(&before), &after, ctx, None, now).await?;
        tx.commit().await?;
        Ok((before, after, outcome))
    }

    /// A persisted, non-failed row means a committed settlement owns the capture
    async fn payment_recorded(&self, p: &Payment) -> bool {
        let rows = match self.pool.acquire().await {
            Ok(mut conn) => payment::find_payments_by_order(&mut conn, &p.order_id).await,
            Err(e) => Err(e.into()),
        };
        match rows {
            Ok(rows) => rows
                .iter()
                .any(|r| r.payment_id == p.payment_id && r.status != PaymentStatus::Failed),
            Err(e) => {
                tracing::error!(
                    target: "alert",
                    payment_id = %p.payment_id,
                    order_id = %p.order_id,
                    error = %e,
                    "Payment state unknown after failed settlement, not refunding"
                );
                true
            }
        }
    }

    /// `completed → refunded` with inverse ledger entries
    ///
    /// The local transaction commits first and leaves external payments in
    /// `refund_pending`; the gateway refund runs afterwards. Calling refund
    /// again on a refunded order retries any payment still pending.
    pub async fn refund(&self, order_id: &str, reason: Option<String>, ctx: &ActorContext) -> OrderResult<Order> {
        let current = self.get(order_id).await?;
        if current.status == OrderStatus::Refunded {
            self.resume_refunds(order_id, &ctx.actor).await?;
            return Ok(current);
        }
        self.check(&current, OrderStatus::Refunded)?;
        let parties = self.parties(&current).await?;

        let settled = {
            let _order_guard = self.dispatch.order_locks().lock(order_id).await;
            let _account_guards = self.wallet.lock_accounts(&parties.accounts()).await;

            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let before = load(&mut tx, order_id).await?;
            if before.status == OrderStatus::Refunded {
                None
            } else {
                self.check(&before, OrderStatus::Refunded)?;
                if !order::update_status(&mut tx, order_id, before.status, OrderStatus::Refunded, now, None).await? {
                    return Err(self.not_in_state(&before, OrderStatus::Refunded));
                }
                let outcome =
                    settlement::settle_refund(&mut tx, &self.wallet, &self.config, &before, &parties, now).await?;
                let after = load(&mut tx, order_id).await?;
                history::append(&mut tx, Some(&before), &after, ctx, reason.as_deref(), now).await?;
                tx.commit().await?;
                Some((before, after, outcome))
            }
        };
        let Some((before, after, outcome)) = settled else {
            self.resume_refunds(order_id, &ctx.actor).await?;
            return self.get(order_id).await;
        };

        tracing::info!(order_id, fare = %after.fare, released = outcome.promotions.len(), "Order refunded");
        self.announce_settlement(&outcome, &ctx.actor);
        self.bus
            .publish(order_event(Some(before.status), &after, &ctx.actor));
        self.resume_refunds(order_id, &ctx.actor).await?;
        Ok(after)
    }

    /// Refund every `refund_pending` payment of the order at the gateway
    async fn resume_refunds(&self, order_id: &str, actor: &Actor) -> OrderResult<()> {
        let _order_guard = self.dispatch.order_locks().lock(order_id).await;
        let mut conn = self.pool.acquire().await?;
        let pending: Vec<Payment> = payment::find_payments_by_order(&mut conn, order_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::RefundPending)
            .collect();
        drop(conn);

        for p in pending {
            if let Err(e) = self.payments.refund(&p).await {
                tracing::warn!(order_id, payment_id = %p.payment_id, error = %e, "Gateway refund pending");
                return Err(e);
            }
            let now = now_millis();
            let mut conn = self.pool.acquire().await?;
            if payment::update_payment_status(
                &mut conn,
                &p.payment_id,
                PaymentStatus::RefundPending,
                PaymentStatus::Refunded,
                now,
            )
            .await?
            {
                self.announce_payment(
                    &Payment {
                        status: PaymentStatus::Refunded,
                        updated_at: now,
                        ..p
                    },
                    actor,
                );
            }
        }
        Ok(())
    }

    // ========== Internals ==========

    fn check(&self, order: &Order, target: OrderStatus) -> OrderResult<()> {
        if can_transition(order.status, target) {
            Ok(())
        } else {
            Err(self.not_in_state(order, target))
        }
    }

    fn not_in_state(&self, order: &Order, target: OrderStatus) -> OrderError {
        OrderError::NotInState {
            order_id: order.order_id.clone(),
            status: order.status,
            target,
        }
    }

    fn check_driver(&self, order: &Order, driver_id: &str) -> OrderResult<()> {
        match order.driver_id.as_deref() {
            Some(assigned) if assigned == driver_id => Ok(()),
            _ => Err(OrderError::DriverMismatch {
                order_id: order.order_id.clone(),
                driver_id: driver_id.to_string(),
            }),
        }
    }

    /// Rider wallet (wallet-paid orders) and the driver wallet, opened on first earning
    async fn parties(&self, order: &Order) -> OrderResult<Parties> {
        let rider_account = match order.payment_method {
            PaymentMethod::Wallet => {
                let account = self
                    .wallet
                    .find_by_user(&order.rider_id, UserType::Rider)
                    .await?
                    .ok_or_else(|| WalletError::AccountNotFound(format!("rider {}", order.rider_id)))?;
                Some(account.account_id)
            }
            _ => None,
        };
        let driver_id = order.driver_id.clone().ok_or_else(|| OrderError::DriverMismatch {
            order_id: order.order_id.clone(),
            driver_id: String::new(),
        })?;
        let driver_account = self
            .wallet
            .open_account(OpenAccountRequest {
                user_id: driver_id,
                user_type: UserType::Driver,
                currency: order.currency,
            })
            .await?;
        Ok(Parties {
            rider_account,
            driver_account: driver_account.account_id,
        })
    }

    fn announce_settlement(&self, outcome: &SettlementOutcome, actor: &Actor) {
        for posting in &outcome.postings {
            self.wallet.announce(posting, actor);
        }
        for p in &outcome.payments {
            self.announce_payment(p, actor);
        }
    }

    fn announce_payment(&self, p: &Payment, actor: &Actor) {
        self.bus.publish(
            EntityEvent::new(
                EventEntity::Payment,
                &p.payment_id,
                None,
                p.status.as_str(),
                actor.clone(),
            )
            .with_payload(json!({
                "order_id": p.order_id,
                "amount": p.amount,
                "currency": p.currency,
                "channel_code": p.channel_code,
                "external_ref": p.external_ref,
            })),
        );
    }
}
