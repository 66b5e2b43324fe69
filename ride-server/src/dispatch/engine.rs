//! Dispatch Engine
//!
//! One background session per dispatching order:
//!
//! ```text
//! start ──▶ round 1..=max_rounds
//!             ├─ select (radius grows per round, offered drivers excluded)
//!             ├─ offer  (fanout records, expired_at = now + ttl)
//!             └─ wait   (respond / expiry / cancel / deadline)
//!                   accept ──▶ done
//!                   all settled ──▶ next candidates, then next round
//!           exhausted ──▶ order rejected (no driver found)
//! ```
//!
//! Every step runs under the order lock, which is never held across a
//! wait. Acceptance is decided by the compare-and-set on `order.driver_id`.

use super::error::{DispatchError, DispatchResult};
use super::index::DriverIndex;
use super::selection::{SelectionInput, select_candidates};
use crate::core::config::{DispatchConfig, MAX_FANOUT};
use crate::db::repository::{dispatch_record, order, snapshot};
use crate::message::EventBus;
use crate::orders::{ActorContext, history, order_event};
use crate::pricing::promotions;
use crate::utils::KeyedLocks;
use dashmap::DashMap;
use serde_json::json;
use shared::event::{Actor, EntityEvent, EventEntity};
use shared::models::{
    DispatchRecord, DispatchRecordStatus, DispatchStrategy, OfferAction, OfferResponse, Order,
    OrderStatus, RejectReason, VehicleClass,
};
use shared::util::{domain_id, now_millis};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancel reason stamped on orders nobody accepted
pub const NO_DRIVER_FOUND: &str = "no_driver_found";

#[derive(Debug, Clone)]
struct Session {
    token: CancellationToken,
    wake: Arc<Notify>,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Accepted(String),
    /// Order left `dispatching` for another reason (cancelled)
    Stopped,
    Exhausted,
}

enum Offered {
    Count(usize),
    Ended(SessionEnd),
}

enum BatchOutcome {
    Settled,
    Ended(SessionEnd),
    Deadline,
}

#[derive(Clone)]
pub struct DispatchEngine {
    pool: SqlitePool,
    config: DispatchConfig,
    index: DriverIndex,
    bus: EventBus,
    order_locks: KeyedLocks,
    sessions: Arc<DashMap<String, Session>>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("config", &self.config)
            .field("index", &self.index)
            .field("active_sessions", &self.sessions.len())
            .finish()
    }
}

fn end_for(order: &Order) -> SessionEnd {
    match (order.status, &order.driver_id) {
        (OrderStatus::Accepted, Some(driver_id)) => SessionEnd::Accepted(driver_id.clone()),
        _ => SessionEnd::Stopped,
    }
}

impl DispatchEngine {
    /// `order_locks` must be the coordinator's order lock table
    pub fn new(
        pool: SqlitePool,
        config: DispatchConfig,
        index: DriverIndex,
        bus: EventBus,
        order_locks: KeyedLocks,
    ) -> Self {
        Self {
            pool,
            config,
            index,
            bus,
            order_locks,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn index(&self) -> &DriverIndex {
        &self.index
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Order-scoped lock table shared with the coordinator
    pub fn order_locks(&self) -> &KeyedLocks {
        &self.order_locks
    }

    pub fn is_active(&self, order_id: &str) -> bool {
        self.sessions.contains_key(order_id)
    }

    fn fanout(&self) -> usize {
        self.config.fanout_per_round.clamp(1, MAX_FANOUT) as usize
    }

    fn strategy(&self, radius_km: f64) -> DispatchStrategy {
        DispatchStrategy {
            radius_km,
            fanout: self.fanout() as u32,
            offer_ttl_ms: self.config.offer_ttl_ms,
            weights: self.config.score_weights,
        }
    }

    // ========== Session lifecycle ==========

    /// `pending_dispatch → dispatching` and spawn the round loop
    pub async fn start(&self, order_id: &str, ctx: &ActorContext) -> DispatchResult<Order> {
        let after = {
            let _guard = self.order_locks.lock(order_id).await;
            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let before = order::find_by_id(&mut tx, order_id)
                .await?
                .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
            if before.status != OrderStatus::PendingDispatch
                || !order::update_status(
                    &mut tx,
                    order_id,
                    OrderStatus::PendingDispatch,
                    OrderStatus::Dispatching,
                    now,
                    None,
                )
                .await?
            {
                return Err(DispatchError::OrderNotInState {
                    order_id: order_id.to_string(),
                    status: before.status,
                    expected: OrderStatus::PendingDispatch,
                });
            }
            let after = order::find_by_id(&mut tx, order_id)
                .await?
                .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
            history::append(&mut tx, Some(&before), &after, ctx, None, now).await?;
            tx.commit().await?;
            after
        };

        tracing::info!(target: "dispatch", order_id, "Dispatch started");
        self.bus.publish(order_event(
            Some(OrderStatus::PendingDispatch),
            &after,
            &ctx.actor,
        ));
        self.spawn_session(order_id);
        Ok(after)
    }

    fn spawn_session(&self, order_id: &str) {
        let session = Session {
            token: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
        };
        self.sessions.insert(order_id.to_string(), session.clone());

        let engine = self.clone();
        let order_id = order_id.to_string();
        tokio::spawn(async move {
            let deadline =
                Instant::now() + Duration::from_millis(engine.config.global_deadline_ms.max(0) as u64);
            let outcome = engine.drive(&order_id, &session, deadline).await;
            let finished = match outcome {
                Ok(SessionEnd::Exhausted) => engine.fail(&order_id).await.map(|_| SessionEnd::Exhausted),
                other => other,
            };
            engine.sessions.remove(&order_id);
            match finished {
                Ok(end) => tracing::info!(target: "dispatch", order_id = %order_id, end = ?end, "Dispatch session finished"),
                Err(e) => tracing::error!(target: "dispatch", order_id = %order_id, error = %e, "Dispatch session failed"),
            }
        });
    }

    /// Interrupt the session at its next suspension point
    pub fn stop(&self, order_id: &str) -> bool {
        match self.sessions.get(order_id) {
            Some(session) => {
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    fn wake(&self, order_id: &str) {
        if let Some(session) = self.sessions.get(order_id) {
            session.wake.notify_one();
        }
    }

    /// Re-spawn sessions for orders left `dispatching` by a previous process
    pub async fn resume_dispatching(&self) -> DispatchResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let orders = order::find_by_status(&mut conn, OrderStatus::Dispatching).await?;
        drop(conn);

        let mut resumed = 0;
        for o in orders {
            if !self.is_active(&o.order_id) {
                self.spawn_session(&o.order_id);
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!(target: "dispatch", resumed, "Resumed dispatch sessions");
        }
        Ok(resumed)
    }

    /// Start scheduled orders whose pickup is within the lead time
    pub async fn activate_due(&self, now: i64) -> DispatchResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let due = order::find_due_scheduled(&mut conn, now + self.config.scheduled_lead_ms).await?;
        drop(conn);

        let mut started = 0;
        for o in due {
            match self.start(&o.order_id, &ActorContext::system()).await {
                Ok(_) => started += 1,
                Err(e) => {
                    tracing::warn!(target: "dispatch", order_id = %o.order_id, error = %e, "Scheduled activation skipped")
                }
            }
        }
        Ok(started)
    }

    // ========== Round loop ==========

    async fn drive(
        &self,
        order_id: &str,
        session: &Session,
        deadline: Instant,
    ) -> DispatchResult<SessionEnd> {
        for round in 1..=self.config.max_rounds.max(1) {
            let radius_km = self.config.radius_for_round(round);
            let mut offered_in_round = 0;
            tracing::debug!(target: "dispatch", order_id, round, radius_km, "Round started");

            loop {
                if session.token.is_cancelled() {
                    return Ok(SessionEnd::Stopped);
                }
                if Instant::now() >= deadline {
                    return Ok(SessionEnd::Exhausted);
                }

                let count = match self.offer_batch(order_id, round, radius_km).await? {
                    Offered::Ended(end) => return Ok(end),
                    Offered::Count(n) => n,
                };

                if count == 0 {
                    if offered_in_round == 0 {
                        // nobody in range: give the round one offer window
                        let until = deadline
                            .min(Instant::now() + Duration::from_millis(self.config.offer_ttl_ms.max(0) as u64));
                        tokio::select! {
                            _ = session.token.cancelled() => return Ok(SessionEnd::Stopped),
                            _ = tokio::time::sleep_until(until) => {}
                        }
                    }
                    break;
                }
                offered_in_round += count;

                match self.await_batch(order_id, session, deadline).await? {
                    BatchOutcome::Settled => continue,
                    BatchOutcome::Ended(end) => return Ok(end),
                    BatchOutcome::Deadline => return Ok(SessionEnd::Exhausted),
                }
            }
        }
        Ok(SessionEnd::Exhausted)
    }

    /// Select and persist up to `fanout` offers
    async fn offer_batch(&self, order_id: &str, round: u32, radius_km: f64) -> DispatchResult<Offered> {
        let records = {
            let _guard = self.order_locks.lock(order_id).await;
            let mut tx = self.pool.begin().await?;
            let current = order::find_by_id(&mut tx, order_id)
                .await?
                .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
            if current.status != OrderStatus::Dispatching {
                return Ok(Offered::Ended(end_for(&current)));
            }

            let exclude: HashSet<String> = dispatch_record::offered_driver_ids(&mut tx, order_id)
                .await?
                .into_iter()
                .collect();
            let now = now_millis();
            let drivers = self.index.snapshot();
            let candidates = select_candidates(
                &drivers,
                &SelectionInput {
                    pickup: current.pickup,
                    class: VehicleClass::new(current.vehicle_category, current.vehicle_level),
                    radius_km,
                    exclude: &exclude,
                    now,
                    weights: self.config.score_weights,
                    limit: self.fanout(),
                },
            );
            if candidates.is_empty() {
                return Ok(Offered::Count(0));
            }

            let strategy = self.strategy(radius_km);
            let mut records = Vec::with_capacity(candidates.len());
            for c in candidates {
                let round_seq = dispatch_record::next_round_seq(&mut tx, order_id, round).await?;
                let mut record = DispatchRecord {
                    id: 0,
                    record_id: domain_id("DSP"),
                    order_id: order_id.to_string(),
                    driver_id: c.driver_id,
                    round,
                    round_seq,
                    dispatched_at: now,
                    expired_at: now + self.config.offer_ttl_ms,
                    responded_at: None,
                    status: DispatchRecordStatus::Pending,
                    reject_reason: None,
                    reject_note: None,
                    driver_distance_km: c.distance_km,
                    driver_location: c.location,
                    score: c.score,
                    strategy: strategy.clone(),
                };
                record.id = dispatch_record::insert(&mut tx, &record).await?;
                records.push(record);
            }
            tx.commit().await?;
            records
        };

        for r in &records {
            tracing::info!(
                target: "dispatch",
                order_id,
                driver_id = %r.driver_id,
                round,
                round_seq = r.round_seq,
                distance_km = r.driver_distance_km,
                "Offer sent"
            );
            self.bus.publish(
                EntityEvent::new(EventEntity::Dispatch, &r.record_id, None, "pending", Actor::system())
                    .with_payload(json!({
                        "order_id": r.order_id,
                        "driver_id": r.driver_id,
                        "round": r.round,
                        "expired_at": r.expired_at,
                        "distance_km": r.driver_distance_km,
                    })),
            );
        }
        Ok(Offered::Count(records.len()))
    }

    /// Wait until every pending offer settles, the order leaves
    /// `dispatching`, or the deadline passes
    async fn await_batch(
        &self,
        order_id: &str,
        session: &Session,
        deadline: Instant,
    ) -> DispatchResult<BatchOutcome> {
        loop {
            let next_expiry = {
                let _guard = self.order_locks.lock(order_id).await;
                let mut tx = self.pool.begin().await?;
                let current = order::find_by_id(&mut tx, order_id)
                    .await?
                    .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
                if current.status != OrderStatus::Dispatching {
                    return Ok(BatchOutcome::Ended(end_for(&current)));
                }

                let now = now_millis();
                let pending = dispatch_record::list_pending(&mut tx, order_id).await?;
                let mut timed_out = Vec::new();
                let mut next_expiry: Option<i64> = None;
                for r in pending {
                    if now >= r.expired_at {
                        if dispatch_record::settle(
                            &mut tx,
                            &r.record_id,
                            DispatchRecordStatus::Timeout,
                            None,
                            None,
                            None,
                        )
                        .await?
                        {
                            timed_out.push(r);
                        }
                    } else {
                        next_expiry = Some(next_expiry.map_or(r.expired_at, |e| e.min(r.expired_at)));
                    }
                }
                tx.commit().await?;
                self.announce(&timed_out, DispatchRecordStatus::Timeout, &Actor::system());

                match next_expiry {
                    None => return Ok(BatchOutcome::Settled),
                    Some(at) => at,
                }
            };

            let wait_ms = (next_expiry - now_millis() + 1).max(0) as u64;
            let until = deadline.min(Instant::now() + Duration::from_millis(wait_ms));
            tokio::select! {
                _ = session.token.cancelled() => return Ok(BatchOutcome::Ended(SessionEnd::Stopped)),
                _ = session.wake.notified() => {}
                _ = tokio::time::sleep_until(until) => {}
            }
            if Instant::now() >= deadline {
                return Ok(BatchOutcome::Deadline);
            }
        }
    }

    /// Budget exhausted: time out open offers, `dispatching → rejected`
    async fn fail(&self, order_id: &str) -> DispatchResult<()> {
        let (before, after, timed_out) = {
            let _guard = self.order_locks.lock(order_id).await;
            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let before = order::find_by_id(&mut tx, order_id)
                .await?
                .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
            if before.status != OrderStatus::Dispatching {
                return Ok(());
            }
            let timed_out = dispatch_record::list_pending(&mut tx, order_id).await?;
            dispatch_record::settle_all_pending(&mut tx, order_id, DispatchRecordStatus::Timeout).await?;
            if !order::update_status(
                &mut tx,
                order_id,
                OrderStatus::Dispatching,
                OrderStatus::Rejected,
                now,
                Some(NO_DRIVER_FOUND),
            )
            .await?
            {
                return Ok(());
            }
            if let Some(snap) = snapshot::find_by_id(&mut tx, &before.snapshot_id).await? {
                promotions::release_for_order(&mut tx, &snap, order_id).await?;
            }
            let after = order::find_by_id(&mut tx, order_id)
                .await?
                .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
            history::append(&mut tx, Some(&before), &after, &ActorContext::system(), Some(NO_DRIVER_FOUND), now)
                .await?;
            tx.commit().await?;
            (before, after, timed_out)
        };

        tracing::warn!(target: "dispatch", order_id, "No driver found, order rejected");
        self.announce(&timed_out, DispatchRecordStatus::Timeout, &Actor::system());
        self.bus
            .publish(order_event(Some(before.status), &after, &Actor::system()));
        Ok(())
    }

    // ========== Driver responses ==========

    /// Accept or reject an offer
    pub async fn respond(&self, order_id: &str, resp: OfferResponse) -> DispatchResult<DispatchRecord> {
        let _guard = self.order_locks.lock(order_id).await;
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let before = order::find_by_id(&mut tx, order_id)
            .await?
            .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;

        let Some(record) =
            dispatch_record::find_pending_for_driver(&mut tx, order_id, &resp.driver_id).await?
        else {
            let latest = dispatch_record::list_by_order(&mut tx, order_id)
                .await?
                .into_iter()
                .rev()
                .find(|r| r.driver_id == resp.driver_id);
            return Err(match latest {
                Some(r) if r.status == DispatchRecordStatus::Superseded => {
                    DispatchError::AlreadyAssigned(order_id.to_string())
                }
                Some(r) if r.status == DispatchRecordStatus::Timeout => DispatchError::OfferTimeout(r.record_id),
                Some(r) => DispatchError::OfferNotPending {
                    record_id: r.record_id,
                    status: r.status,
                },
                None => DispatchError::RecordNotFound {
                    order_id: order_id.to_string(),
                    driver_id: resp.driver_id.clone(),
                },
            });
        };

        let driver = Actor::driver(&resp.driver_id);

        if now >= record.expired_at {
            dispatch_record::settle(&mut tx, &record.record_id, DispatchRecordStatus::Timeout, None, None, None)
                .await?;
            tx.commit().await?;
            tracing::info!(target: "dispatch", order_id, driver_id = %resp.driver_id, "Late response, offer timed out");
            self.announce(std::slice::from_ref(&record), DispatchRecordStatus::Timeout, &Actor::system());
            self.wake(order_id);
            return Err(DispatchError::OfferTimeout(record.record_id));
        }

        match resp.action {
            OfferAction::Accept => {
                if !order::assign_driver(&mut tx, order_id, &resp.driver_id, now).await? {
                    dispatch_record::settle(
                        &mut tx,
                        &record.record_id,
                        DispatchRecordStatus::Superseded,
                        Some(now),
                        None,
                        None,
                    )
                    .await?;
                    tx.commit().await?;
                    self.announce(std::slice::from_ref(&record), DispatchRecordStatus::Superseded, &Actor::system());
                    return Err(DispatchError::AlreadyAssigned(order_id.to_string()));
                }

                dispatch_record::settle(&mut tx, &record.record_id, DispatchRecordStatus::Accepted, Some(now), None, None)
                    .await?;
                let losers = dispatch_record::list_pending(&mut tx, order_id).await?;
                dispatch_record::settle_all_pending(&mut tx, order_id, DispatchRecordStatus::Superseded).await?;

                let after = order::find_by_id(&mut tx, order_id)
                    .await?
                    .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;
                history::append(&mut tx, Some(&before), &after, &ActorContext::new(driver.clone()), None, now)
                    .await?;
                let accepted = dispatch_record::find_by_id(&mut tx, &record.record_id)
                    .await?
                    .unwrap_or(record);
                tx.commit().await?;

                if let Err(e) = self.index.assign(&resp.driver_id, order_id).await {
                    tracing::warn!(driver_id = %resp.driver_id, order_id, error = %e, "Driver index not updated on accept");
                }

                tracing::info!(target: "dispatch", order_id, driver_id = %resp.driver_id, superseded = losers.len(), "Offer accepted");
                self.announce(std::slice::from_ref(&accepted), DispatchRecordStatus::Accepted, &driver);
                self.announce(&losers, DispatchRecordStatus::Superseded, &Actor::system());
                self.bus.publish(order_event(Some(before.status), &after, &driver));
                self.wake(order_id);
                Ok(accepted)
            }
            OfferAction::Reject => {
                let reason = resp.reason.unwrap_or(RejectReason::Other);
                dispatch_record::settle(
                    &mut tx,
                    &record.record_id,
                    DispatchRecordStatus::Rejected,
                    Some(now),
                    Some(reason),
                    resp.note.as_deref(),
                )
                .await?;
                let rejected = dispatch_record::find_by_id(&mut tx, &record.record_id)
                    .await?
                    .unwrap_or(record);
                tx.commit().await?;

                if let Err(e) = self
                    .index
                    .apply_cooldown(&resp.driver_id, now + self.config.reject_cooldown_ms)
                    .await
                {
                    tracing::warn!(driver_id = %resp.driver_id, error = %e, "Reject cooldown not applied");
                }

                tracing::info!(target: "dispatch", order_id, driver_id = %resp.driver_id, reason = ?reason, "Offer rejected");
                self.announce(std::slice::from_ref(&rejected), DispatchRecordStatus::Rejected, &driver);
                self.wake(order_id);
                Ok(rejected)
            }
        }
    }

    /// Settle the order's open offers as `cancelled` inside the caller's
    /// transaction; publish the result with [`DispatchEngine::announce`]
    pub async fn cancel_offers(conn: &mut SqliteConnection, order_id: &str) -> DispatchResult<Vec<DispatchRecord>> {
        let pending = dispatch_record::list_pending(conn, order_id).await?;
        dispatch_record::settle_all_pending(conn, order_id, DispatchRecordStatus::Cancelled).await?;
        Ok(pending)
    }

    /// `dispatch` topic events for settled offers
    pub fn announce(&self, records: &[DispatchRecord], to: DispatchRecordStatus, actor: &Actor) {
        for r in records {
            self.bus.publish(
                EntityEvent::new(
                    EventEntity::Dispatch,
                    &r.record_id,
                    Some(DispatchRecordStatus::Pending.as_str().to_string()),
                    to.as_str(),
                    actor.clone(),
                )
                .with_payload(json!({
                    "order_id": r.order_id,
                    "driver_id": r.driver_id,
                    "round": r.round,
                })),
            );
        }
    }

    pub async fn list_records(&self, order_id: &str) -> DispatchResult<Vec<DispatchRecord>> {
        let mut conn = self.pool.acquire().await?;
        if order::find_by_id(&mut conn, order_id).await?.is_none() {
            return Err(DispatchError::OrderNotFound(order_id.to_string()));
        }
        Ok(dispatch_record::list_by_order(&mut conn, order_id).await?)
    }
}
