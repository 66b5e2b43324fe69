//! Pricing Engine
//!
//! Quote → persisted snapshot, Lock (bind to an order, once), Expire.
//! Rule evaluation itself is pure ([`evaluate`]); the engine wraps it with
//! loading, the calculation timeout and persistence.

use super::calculator::{FareCalculation, calculate_fare, to_decimal};
use super::discount::{DiscountCandidate, DiscountOutcome, REASON_NOT_TARGETED, apply_discounts};
use super::error::{PricingError, PricingResult};
use super::matcher::{is_candidate, is_time_valid, matches_vehicle};
use super::promotions;
use crate::core::config::PricingConfig;
use crate::db::repository::{price_rule, promotion, snapshot};
use crate::message::EventBus;
use crate::utils::KeyedLocks;
use rust_decimal::Decimal;
use serde_json::json;
use shared::event::{Actor, EntityEvent, EventEntity};
use shared::geo::Coordinate;
use shared::models::{
    IssuePromotionRequest, PriceRule, PriceRuleCreate, PriceSnapshot, Promotion, PromotionCreate,
    QuoteRequest, RuleCategory, SkippedDiscount, SnapshotStatus, UserPromotion,
    UserPromotionStatus, VehicleClass,
};
use shared::money::Currency;
use shared::util::{domain_id, now_millis};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

pub const ENGINE_VERSION: &str = "ride-pricing/1";

/// Validated quote inputs
#[derive(Debug, Clone)]
pub struct QuoteContext {
    pub class: VehicleClass,
    pub pickup: Coordinate,
    pub distance_km: Decimal,
    pub duration_min: Decimal,
    pub currency: Currency,
    pub promo_codes: Vec<String>,
    pub city: Option<String>,
    pub now: i64,
}

/// Outcome of the pure evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub fare: FareCalculation,
    pub discounts: DiscountOutcome,
    pub applied_rule_ids: Vec<String>,
    pub rules_evaluated: u32,
}

/// Run the rule pipeline over loaded rules and the rider's promotions
///
/// `templates` maps promotion_id to template and is used for city and
/// vehicle targeting of user promotions.
pub fn evaluate(
    ctx: &QuoteContext,
    rules: &[PriceRule],
    user_promotions: &[UserPromotion],
    templates: &HashMap<String, Promotion>,
    global_cap: Option<Decimal>,
) -> PricingResult<Evaluation> {
    let selected: Vec<&PriceRule> = rules
        .iter()
        .filter(|r| is_candidate(r, &ctx.class, &ctx.pickup, ctx.now))
        .collect();

    // Fare coverage: vehicle first, then area
    let has_fare = selected.iter().any(|r| r.category() == RuleCategory::Fare);
    if !has_fare {
        let vehicle_served = rules.iter().any(|r| {
            r.is_active
                && r.category() == RuleCategory::Fare
                && is_time_valid(&r.window, ctx.now)
                && matches_vehicle(r, &ctx.class)
        });
        return Err(if vehicle_served {
            PricingError::ServiceAreaOutOfBounds(ctx.class)
        } else {
            PricingError::VehicleUnsupported(ctx.class)
        });
    }

    let mut priced: Vec<&PriceRule> = Vec::with_capacity(selected.len());
    for rule in selected.iter().copied() {
        if rule.category() == RuleCategory::Discount {
            continue;
        }
        match rule.currency {
            Some(c) if c != ctx.currency && rule.category() == RuleCategory::Fare => {
                return Err(PricingError::CurrencyMismatch {
                    rule_id: rule.rule_id.clone(),
                    rule: c,
                    request: ctx.currency,
                });
            }
            Some(c) if c != ctx.currency => continue,
            _ => priced.push(rule),
        }
    }

    let fare = calculate_fare(&priced, ctx.distance_km, ctx.duration_min, ctx.currency)?;

    let (candidates, skipped) = collect_discounts(ctx, rules, &selected, user_promotions, templates)?;
    let mut discounts = apply_discounts(fare.total, candidates, global_cap, ctx.currency);
    let mut all_skipped = skipped;
    all_skipped.append(&mut discounts.skipped);
    discounts.skipped = all_skipped;

    let mut applied_rule_ids = fare.applied_rule_ids.clone();
    applied_rule_ids.extend(discounts.rule_ids());

    Ok(Evaluation {
        fare,
        discounts,
        applied_rule_ids,
        rules_evaluated: rules.len() as u32,
    })
}

/// Gather discount candidates from rules and user promotions
///
/// A typed code that matches nothing is `promo_invalid`; one that only
/// matches expired rules or promotions is `promo_expired`.
fn collect_discounts(
    ctx: &QuoteContext,
    rules: &[PriceRule],
    selected: &[&PriceRule],
    user_promotions: &[UserPromotion],
    templates: &HashMap<String, Promotion>,
) -> PricingResult<(Vec<DiscountCandidate>, Vec<SkippedDiscount>)> {
    let mut candidates = Vec::new();
    let mut skipped = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Automatic rule discounts
    for rule in selected.iter().filter(|r| !r.requires_code) {
        if let Some(c) = DiscountCandidate::from_rule(rule, None)
            && seen.insert(c.ref_id.clone())
        {
            candidates.push(c);
        }
    }

    let codes = normalize_codes(&ctx.promo_codes);
    for (position, code) in codes.iter().enumerate() {
        let mut matched = false;
        let mut expired = false;

        for rule in rules
            .iter()
            .filter(|r| r.is_active && r.requires_code && r.code_matches(code))
        {
            if is_candidate(rule, &ctx.class, &ctx.pickup, ctx.now) {
                if let Some(c) = DiscountCandidate::from_rule(rule, Some(position)) {
                    matched = true;
                    if seen.insert(c.ref_id.clone()) {
                        candidates.push(c);
                    }
                }
            } else if rule.window.valid_until.is_some_and(|until| ctx.now >= until) {
                expired = true;
            } else {
                matched = true;
                skipped.push(SkippedDiscount {
                    code: Some(code.clone()),
                    ref_id: rule.rule_id.clone(),
                    reason: REASON_NOT_TARGETED.to_string(),
                });
            }
        }

        for up in user_promotions.iter().filter(|up| up.code.eq_ignore_ascii_case(code)) {
            if !up.is_usable(ctx.now) {
                if up.status == UserPromotionStatus::Expired
                    || up.expires_at.is_some_and(|e| ctx.now >= e)
                {
                    expired = true;
                }
                continue;
            }
            match templates.get(&up.promotion_id) {
                Some(t) if t.valid_until.is_some_and(|until| ctx.now >= until) => {
                    expired = true;
                    continue;
                }
                Some(t) if !t.targets(ctx.city.as_deref(), ctx.class.category) => {
                    matched = true;
                    skipped.push(SkippedDiscount {
                        code: Some(code.clone()),
                        ref_id: up.user_promotion_id.clone(),
                        reason: REASON_NOT_TARGETED.to_string(),
                    });
                    continue;
                }
                _ => {}
            }
            matched = true;
            if seen.insert(up.user_promotion_id.clone()) {
                candidates.push(DiscountCandidate::from_user_promotion(up, Some(position)));
            }
        }

        if !matched {
            return Err(if expired {
                PricingError::PromoExpired(code.clone())
            } else {
                PricingError::PromoInvalid(code.clone())
            });
        }
    }

    // Auto-apply user promotions
    for up in user_promotions
        .iter()
        .filter(|up| up.auto_apply && up.is_usable(ctx.now))
    {
        if seen.contains(&up.user_promotion_id) {
            continue;
        }
        let targeted = templates.get(&up.promotion_id).is_none_or(|t| {
            t.in_window(ctx.now) && t.targets(ctx.city.as_deref(), ctx.class.category)
        });
        if !targeted {
            continue;
        }
        seen.insert(up.user_promotion_id.clone());
        candidates.push(DiscountCandidate::from_user_promotion(up, None));
    }

    Ok((candidates, skipped))
}

/// Trim, drop empties and case-insensitive duplicates, keep typing order
fn normalize_codes(codes: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    codes
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.to_ascii_uppercase()))
        .collect()
}

fn check_measure(field: &'static str, value: f64, max: f64) -> PricingResult<Decimal> {
    if !value.is_finite() || value < 0.0 {
        return Err(PricingError::InvalidInput {
            field,
            message: "must be a non-negative number".into(),
        });
    }
    if value > max {
        return Err(PricingError::OutOfRange {
            field,
            message: format!("{value} exceeds the limit of {max}"),
        });
    }
    to_decimal(value).ok_or_else(|| PricingError::OutOfRange {
        field,
        message: format!("{value} is not representable"),
    })
}

/// Validate the raw request
pub fn build_context(req: &QuoteRequest, config: &PricingConfig) -> PricingResult<QuoteContext> {
    if req.rider_id.trim().is_empty() {
        return Err(PricingError::InvalidInput {
            field: "rider_id",
            message: "must not be empty".into(),
        });
    }
    if !req.pickup.is_valid() {
        return Err(PricingError::InvalidCoordinate("pickup"));
    }
    if !req.dropoff.is_valid() {
        return Err(PricingError::InvalidCoordinate("dropoff"));
    }
    let distance_km = check_measure("distance_km", req.distance_km, config.max_distance_km)?;
    let duration_min = check_measure("duration_min", req.duration_min, config.max_duration_min)?;
    let currency = match req.currency.as_deref() {
        Some(code) => code
            .parse::<Currency>()
            .map_err(|_| PricingError::UnknownCurrency(code.to_string()))?,
        None => config.currency,
    };

    Ok(QuoteContext {
        class: VehicleClass::new(req.vehicle_category, req.vehicle_level),
        pickup: req.pickup,
        distance_km,
        duration_min,
        currency,
        promo_codes: req.promo_codes.clone(),
        city: req.city.clone(),
        now: req.request_time.unwrap_or_else(now_millis),
    })
}

/// Pricing Engine - quotes, snapshot binding and promotion admission
#[derive(Clone)]
pub struct PricingEngine {
    pool: SqlitePool,
    config: PricingConfig,
    locks: KeyedLocks,
    bus: EventBus,
}

impl std::fmt::Debug for PricingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingEngine")
            .field("pool", &"<SqlitePool>")
            .field("config", &self.config)
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl PricingEngine {
    pub fn new(pool: SqlitePool, config: PricingConfig, bus: EventBus) -> Self {
        Self {
            pool,
            config,
            locks: KeyedLocks::new(),
            bus,
        }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    // ========== Quote ==========

    /// Price a ride and persist an active snapshot
    pub async fn quote(&self, req: QuoteRequest) -> PricingResult<PriceSnapshot> {
        let started = Instant::now();
        let ctx = build_context(&req, &self.config)?;

        let budget = Duration::from_millis(self.config.calc_timeout_ms);
        let evaluation = tokio::time::timeout(budget, self.load_and_evaluate(&req.rider_id, &ctx))
            .await
            .map_err(|_| {
                tracing::warn!(rider_id = %req.rider_id, budget_ms = self.config.calc_timeout_ms, "Price calculation timed out");
                PricingError::CalcTimeout(self.config.calc_timeout_ms)
            })??;

        let Evaluation {
            fare,
            discounts,
            applied_rule_ids,
            rules_evaluated,
        } = evaluation;
        let issued_at = now_millis();

        let snapshot = PriceSnapshot {
            snapshot_id: domain_id("SNP"),
            rider_id: req.rider_id.clone(),
            order_id: None,
            order_type: req.order_type,
            pickup: req.pickup,
            dropoff: req.dropoff,
            distance_km: req.distance_km,
            duration_min: req.duration_min,
            vehicle_category: req.vehicle_category,
            vehicle_level: req.vehicle_level,
            currency: ctx.currency,
            breakdown: fare.breakdown,
            surge_multiplier: fare.surge_multiplier,
            original_fare: fare.total,
            discount_amount: discounts.total_discount,
            discounted_fare: discounts.final_total,
            rules_applied: applied_rule_ids.len() as u32,
            applied_rule_ids,
            user_promotion_ids: discounts.user_promotion_ids(),
            discounts: discounts.applied,
            skipped_discounts: discounts.skipped,
            status: SnapshotStatus::Active,
            // 有效期按服务端时间计，request_time 只影响规则时间窗
            expires_at: issued_at + self.config.snapshot_ttl_ms,
            engine_version: ENGINE_VERSION.to_string(),
            rules_evaluated,
            calculation_time_ms: started.elapsed().as_millis() as i64,
            created_at: issued_at,
        };

        let mut conn = self.pool.acquire().await?;
        snapshot::insert(&mut conn, &snapshot).await?;
        drop(conn);

        tracing::info!(
            snapshot_id = %snapshot.snapshot_id,
            rider_id = %snapshot.rider_id,
            original_fare = %snapshot.original_fare,
            discounted_fare = %snapshot.discounted_fare,
            currency = %snapshot.currency,
            "Quote issued"
        );
        self.bus.publish(
            EntityEvent::new(
                EventEntity::Snapshot,
                &snapshot.snapshot_id,
                None,
                "active",
                Actor::rider(&snapshot.rider_id),
            )
            .with_payload(json!({
                "discounted_fare": snapshot.discounted_fare,
                "currency": snapshot.currency,
                "expires_at": snapshot.expires_at,
            })),
        );
        Ok(snapshot)
    }

    async fn load_and_evaluate(&self, rider_id: &str, ctx: &QuoteContext) -> PricingResult<Evaluation> {
        let mut conn = self.pool.acquire().await?;
        let rules = price_rule::find_active(&mut conn).await?;
        let held = promotion::list_for_user(&mut conn, rider_id).await?;

        let mut templates = HashMap::new();
        for up in &held {
            if templates.contains_key(&up.promotion_id) {
                continue;
            }
            if let Some(t) = promotion::find_by_id(&mut conn, &up.promotion_id).await? {
                templates.insert(up.promotion_id.clone(), t);
            }
        }
        drop(conn);

        evaluate(ctx, &rules, &held, &templates, self.config.max_total_discount)
    }

    // ========== Snapshot lifecycle ==========

    pub async fn get_snapshot(&self, snapshot_id: &str) -> PricingResult<PriceSnapshot> {
        let mut conn = self.pool.acquire().await?;
        snapshot::find_by_id(&mut conn, snapshot_id)
            .await?
            .ok_or_else(|| PricingError::SnapshotNotFound(snapshot_id.to_string()))
    }

    /// Per-snapshot guard; hold it around [`PricingEngine::lock_in`]
    pub async fn snapshot_guard(&self, snapshot_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(snapshot_id).await
    }

    /// Bind a snapshot to an order inside the caller's transaction
    ///
    /// Re-binding to the same order is a no-op. The snapshot's user
    /// promotions are reserved for the order. The caller must hold
    /// [`PricingEngine::snapshot_guard`].
    pub async fn lock_in(
        conn: &mut SqliteConnection,
        snapshot_id: &str,
        order_id: &str,
        now: i64,
    ) -> PricingResult<PriceSnapshot> {
        let mut snap = snapshot::find_by_id(conn, snapshot_id)
            .await?
            .ok_or_else(|| PricingError::SnapshotNotFound(snapshot_id.to_string()))?;

        match snap.order_id.as_deref() {
            Some(bound) if bound == order_id => return Ok(snap),
            Some(bound) => {
                return Err(PricingError::SnapshotAlreadyBound {
                    snapshot_id: snapshot_id.to_string(),
                    order_id: bound.to_string(),
                });
            }
            None => {}
        }

        if snap.status == SnapshotStatus::Expired || now >= snap.expires_at {
            return Err(PricingError::SnapshotExpired(snapshot_id.to_string()));
        }

        if !snapshot::bind_order(conn, snapshot_id, order_id).await? {
            return Err(PricingError::SnapshotExpired(snapshot_id.to_string()));
        }
        promotions::reserve_for_order(conn, &snap, order_id, now).await?;
        snap.order_id = Some(order_id.to_string());
        Ok(snap)
    }

    /// Standalone Lock: guard + own transaction
    pub async fn lock(&self, snapshot_id: &str, order_id: &str) -> PricingResult<PriceSnapshot> {
        let _guard = self.snapshot_guard(snapshot_id).await;
        let mut tx = self.pool.begin().await?;
        let snap = Self::lock_in(&mut tx, snapshot_id, order_id, now_millis()).await?;
        tx.commit().await?;
        tracing::info!(snapshot_id, order_id, "Snapshot locked");
        Ok(snap)
    }

    /// `active → expired`; a no-op when already expired or bound
    pub async fn expire(&self, snapshot_id: &str) -> PricingResult<PriceSnapshot> {
        let _guard = self.snapshot_guard(snapshot_id).await;
        let mut conn = self.pool.acquire().await?;
        let changed = snapshot::expire(&mut conn, snapshot_id).await?;
        let snap = snapshot::find_by_id(&mut conn, snapshot_id)
            .await?
            .ok_or_else(|| PricingError::SnapshotNotFound(snapshot_id.to_string()))?;
        drop(conn);

        if changed {
            tracing::info!(snapshot_id, "Snapshot expired");
            self.bus.publish(EntityEvent::new(
                EventEntity::Snapshot,
                snapshot_id,
                Some("active".into()),
                "expired",
                Actor::system(),
            ));
        }
        Ok(snap)
    }

    /// Sweep: expire unbound snapshots and user promotions past their expiry
    pub async fn expire_due(&self, now: i64) -> PricingResult<(u64, u64)> {
        let mut conn = self.pool.acquire().await?;
        let snapshots = snapshot::expire_due(&mut conn, now).await?;
        let user_promotions = promotion::expire_due(&mut conn, now).await?;
        if snapshots > 0 || user_promotions > 0 {
            tracing::info!(snapshots, user_promotions, "Expired stale quotes and promotions");
        }
        Ok((snapshots, user_promotions))
    }

    // ========== Rules & promotions ==========

    pub async fn create_rule(&self, data: PriceRuleCreate) -> PricingResult<PriceRule> {
        let mut conn = self.pool.acquire().await?;
        let rule = price_rule::create(&mut conn, data).await?;
        tracing::info!(rule_id = %rule.rule_id, kind = ?rule.kind, "Price rule created");
        Ok(rule)
    }

    pub async fn create_promotion(&self, data: PromotionCreate) -> PricingResult<Promotion> {
        let mut conn = self.pool.acquire().await?;
        let promo = promotion::create(&mut conn, data).await?;
        tracing::info!(promotion_id = %promo.promotion_id, code = %promo.code, "Promotion created");
        Ok(promo)
    }

    /// Admit a template into a user-held promotion
    pub async fn issue_promotion(&self, req: IssuePromotionRequest) -> PricingResult<UserPromotion> {
        let _guard = self
            .locks
            .lock(&format!("promo:{}:{}", req.promotion_id, req.user_id))
            .await;
        let now = now_millis();

        let mut tx = self.pool.begin().await?;
        let template = promotion::find_by_id(&mut tx, &req.promotion_id)
            .await?
            .ok_or_else(|| PricingError::PromotionNotFound(req.promotion_id.clone()))?;
        let up = promotions::build_user_promotion(&template, &req, now);
        promotions::admit(&mut tx, &template, &up, now).await?;
        tx.commit().await?;

        tracing::info!(
            user_promotion_id = %up.user_promotion_id,
            user_id = %up.user_id,
            code = %up.code,
            "Promotion issued"
        );
        self.bus.publish(EntityEvent::new(
            EventEntity::Promotion,
            &up.user_promotion_id,
            None,
            UserPromotionStatus::Available.as_str(),
            Actor::system(),
        ));
        Ok(up)
    }

    /// Dedicated reversal of `used`
    pub async fn reset_user_promotion(&self, user_promotion_id: &str) -> PricingResult<UserPromotion> {
        let mut conn = self.pool.acquire().await?;
        if promotion::find_user_promotion(&mut conn, user_promotion_id)
            .await?
            .is_none()
        {
            return Err(PricingError::UserPromotionNotFound(user_promotion_id.to_string()));
        }
        if !promotion::reset(&mut conn, user_promotion_id).await? {
            return Err(PricingError::UserPromotionNotUsed(user_promotion_id.to_string()));
        }
        let up = promotion::find_user_promotion(&mut conn, user_promotion_id)
            .await?
            .ok_or_else(|| PricingError::UserPromotionNotFound(user_promotion_id.to_string()))?;
        drop(conn);

        tracing::info!(user_promotion_id, "User promotion reset");
        self.bus.publish(EntityEvent::new(
            EventEntity::Promotion,
            user_promotion_id,
            Some(UserPromotionStatus::Used.as_str().into()),
            UserPromotionStatus::Available.as_str(),
            Actor::system(),
        ));
        Ok(up)
    }

    pub async fn list_user_promotions(&self, user_id: &str) -> PricingResult<Vec<UserPromotion>> {
        let mut conn = self.pool.acquire().await?;
        Ok(promotion::list_for_user(&mut conn, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::db::DbService;
    use rust_decimal_macros::dec;
    use shared::models::{
        DiscountType, OrderType, RuleKind, ServiceArea, VehicleCategory, VehicleLevel,
    };

    fn kigali() -> Coordinate {
        Coordinate::new(-1.9441, 30.0619)
    }

    fn quote_request(codes: &[&str]) -> QuoteRequest {
        QuoteRequest {
            rider_id: "RIDER_A".into(),
            order_type: OrderType::Ride,
            pickup: kigali(),
            dropoff: kigali().offset_north_km(5.0),
            distance_km: 5.0,
            duration_min: 15.0,
            vehicle_category: VehicleCategory::Sedan,
            vehicle_level: VehicleLevel::Economy,
            currency: Some("RWF".into()),
            promo_codes: codes.iter().map(|c| c.to_string()).collect(),
            city: Some("Kigali".into()),
            request_time: None,
        }
    }

    async fn engine_with_rules() -> PricingEngine {
        let db = DbService::in_memory().await.unwrap();
        let engine = PricingEngine::new(db.pool, Config::for_tests().pricing, EventBus::new());
        for (name, kind, value) in [
            ("base", RuleKind::Base, dec!(500)),
            ("per_km", RuleKind::PerDistance, dec!(200)),
            ("per_min", RuleKind::PerTime, dec!(30)),
            ("service_fee", RuleKind::ServiceFee, dec!(100)),
        ] {
            let mut rule = PriceRuleCreate::new(name, kind, value);
            rule.vehicle_categories = vec![VehicleCategory::Sedan];
            rule.currency = Some(Currency::Rwf);
            engine.create_rule(rule).await.unwrap();
        }
        engine
    }

    async fn welcome_template(engine: &PricingEngine) -> Promotion {
        engine
            .create_promotion(PromotionCreate {
                code: "WELCOME_NEW_USER".into(),
                name: "Welcome".into(),
                discount_type: DiscountType::Percentage,
                discount_value: dec!(10),
                max_discount: Some(dec!(500)),
                min_order_amount: Some(dec!(100)),
                usage_limit: None,
                per_user_limit: Some(1),
                valid_from: None,
                valid_until: None,
                cities: vec![],
                vehicle_categories: vec![],
                is_exclusive: false,
                auto_apply: false,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_standard_quote() {
        let engine = engine_with_rules().await;
        let snap = engine.quote(quote_request(&[])).await.unwrap();

        assert_eq!(snap.breakdown.base_fare, dec!(500));
        assert_eq!(snap.breakdown.distance_fare, dec!(1000));
        assert_eq!(snap.breakdown.time_fare, dec!(450));
        assert_eq!(snap.breakdown.service_fee, dec!(100));
        assert_eq!(snap.original_fare, dec!(2050));
        assert_eq!(snap.discounted_fare, dec!(2050));
        assert_eq!(snap.status, SnapshotStatus::Active);
        assert_eq!(snap.rules_evaluated, 4);
        assert_eq!(snap.rules_applied, 4);

        let stored = engine.get_snapshot(&snap.snapshot_id).await.unwrap();
        assert_eq!(stored.snapshot_id, snap.snapshot_id);
        assert_eq!(stored.breakdown, snap.breakdown);
        assert_eq!(stored.discounted_fare, dec!(2050));
        assert!(stored.order_id.is_none());
    }

    #[tokio::test]
    async fn test_quote_with_welcome_promotion() {
        let engine = engine_with_rules().await;
        let template = welcome_template(&engine).await;
        let up = engine
            .issue_promotion(IssuePromotionRequest {
                user_id: "RIDER_A".into(),
                promotion_id: template.promotion_id.clone(),
                expires_at: None,
                source: "signup".into(),
            })
            .await
            .unwrap();

        let snap = engine
            .quote(quote_request(&["welcome_new_user"]))
            .await
            .unwrap();
        assert_eq!(snap.original_fare, dec!(2050));
        assert_eq!(snap.discount_amount, dec!(205));
        assert_eq!(snap.discounted_fare, dec!(1845));
        assert_eq!(snap.user_promotion_ids, vec![up.user_promotion_id.clone()]);

        // quoting does not consume the promotion
        let held = engine.list_user_promotions("RIDER_A").await.unwrap();
        assert_eq!(held[0].status, UserPromotionStatus::Available);
    }

    #[tokio::test]
    async fn test_unknown_and_expired_codes() {
        let engine = engine_with_rules().await;
        assert!(matches!(
            engine.quote(quote_request(&["NOPE"])).await,
            Err(PricingError::PromoInvalid(_))
        ));

        let mut rule = PriceRuleCreate::new("old", RuleKind::FixedAmountDiscount, dec!(100));
        rule.requires_code = true;
        rule.code = Some("SPRING".into());
        rule.window.valid_until = Some(1_000);
        engine.create_rule(rule).await.unwrap();
        assert!(matches!(
            engine.quote(quote_request(&["spring"])).await,
            Err(PricingError::PromoExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_vehicle_and_area_errors() {
        let engine = engine_with_rules().await;
        let mut req = quote_request(&[]);
        req.vehicle_category = VehicleCategory::Van;
        assert!(matches!(
            engine.quote(req).await,
            Err(PricingError::VehicleUnsupported(_))
        ));

        let mut area_rule = PriceRuleCreate::new("moto base", RuleKind::Base, dec!(300));
        area_rule.vehicle_categories = vec![VehicleCategory::Moto];
        area_rule.service_area = ServiceArea::Circle {
            center: kigali(),
            radius_km: 10.0,
        };
        engine.create_rule(area_rule).await.unwrap();

        let mut req = quote_request(&[]);
        req.vehicle_category = VehicleCategory::Moto;
        req.pickup = Coordinate::new(0.3476, 32.5825);
        assert!(matches!(
            engine.quote(req).await,
            Err(PricingError::ServiceAreaOutOfBounds(_))
        ));
    }

    #[tokio::test]
    async fn test_currency_mismatch_and_unknown_currency() {
        let engine = engine_with_rules().await;
        let mut req = quote_request(&[]);
        req.currency = Some("USD".into());
        assert!(matches!(
            engine.quote(req).await,
            Err(PricingError::CurrencyMismatch { .. })
        ));

        let mut req = quote_request(&[]);
        req.currency = Some("XYZ".into());
        assert!(matches!(
            engine.quote(req).await,
            Err(PricingError::UnknownCurrency(_))
        ));

        let mut req = quote_request(&[]);
        req.pickup = Coordinate::new(95.0, 0.0);
        assert!(matches!(
            engine.quote(req).await,
            Err(PricingError::InvalidCoordinate("pickup"))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_idempotent_and_binds_once() {
        let engine = engine_with_rules().await;
        let snap = engine.quote(quote_request(&[])).await.unwrap();

        let locked = engine.lock(&snap.snapshot_id, "ORD1").await.unwrap();
        assert_eq!(locked.order_id.as_deref(), Some("ORD1"));
        let again = engine.lock(&snap.snapshot_id, "ORD1").await.unwrap();
        assert_eq!(again.order_id.as_deref(), Some("ORD1"));

        assert!(matches!(
            engine.lock(&snap.snapshot_id, "ORD2").await,
            Err(PricingError::SnapshotAlreadyBound { .. })
        ));
        // bound snapshots are not expired
        let after = engine.expire(&snap.snapshot_id).await.unwrap();
        assert_eq!(after.status, SnapshotStatus::Active);
    }

    #[tokio::test]
    async fn test_lock_expiry_boundary() {
        let engine = engine_with_rules().await;
        let snap = engine.quote(quote_request(&[])).await.unwrap();
        let mut conn = engine.pool.acquire().await.unwrap();

        assert!(matches!(
            PricingEngine::lock_in(&mut conn, &snap.snapshot_id, "ORD1", snap.expires_at + 1).await,
            Err(PricingError::SnapshotExpired(_))
        ));
        assert!(matches!(
            PricingEngine::lock_in(&mut conn, &snap.snapshot_id, "ORD1", snap.expires_at).await,
            Err(PricingError::SnapshotExpired(_))
        ));
        let ok = PricingEngine::lock_in(&mut conn, &snap.snapshot_id, "ORD1", snap.expires_at - 1)
            .await
            .unwrap();
        assert_eq!(ok.order_id.as_deref(), Some("ORD1"));
    }

    #[tokio::test]
    async fn test_expire_is_idempotent() {
        let engine = engine_with_rules().await;
        let snap = engine.quote(quote_request(&[])).await.unwrap();
        let first = engine.expire(&snap.snapshot_id).await.unwrap();
        let second = engine.expire(&snap.snapshot_id).await.unwrap();
        assert_eq!(first.status, SnapshotStatus::Expired);
        assert_eq!(second.status, SnapshotStatus::Expired);
        assert!(matches!(
            engine.lock(&snap.snapshot_id, "ORD1").await,
            Err(PricingError::SnapshotExpired(_))
        ));
        assert!(matches!(
            engine.expire("SNP_MISSING").await,
            Err(PricingError::SnapshotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_requires_used() {
        let engine = engine_with_rules().await;
        let template = welcome_template(&engine).await;
        let up = engine
            .issue_promotion(IssuePromotionRequest {
                user_id: "RIDER_A".into(),
                promotion_id: template.promotion_id,
                expires_at: None,
                source: "admin".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            engine.reset_user_promotion(&up.user_promotion_id).await,
            Err(PricingError::UserPromotionNotUsed(_))
        ));
        assert!(matches!(
            engine.reset_user_promotion("UP_MISSING").await,
            Err(PricingError::UserPromotionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quote_input_bounds() {
        let engine = engine_with_rules().await;

        let mut far = quote_request(&[]);
        far.distance_km = 1e30;
        assert!(matches!(
            engine.quote(far).await,
            Err(PricingError::OutOfRange { field: "distance_km", .. })
        ));

        let mut long = quote_request(&[]);
        long.duration_min = 1_441.0;
        let err = shared::error::AppError::from(engine.quote(long).await.unwrap_err());
        assert_eq!(err.code, shared::error::ErrorCode::ValueOutOfRange);

        let mut at_limit = quote_request(&[]);
        at_limit.distance_km = 1_000.0;
        let snap = engine.quote(at_limit).await.unwrap();
        assert_eq!(snap.breakdown.distance_fare, dec!(200000));
    }

    #[tokio::test]
    async fn test_expiry_follows_server_clock() {
        let engine = engine_with_rules().await;
        let mut req = quote_request(&[]);
        req.request_time = Some(now_millis() + 365 * 24 * 3_600_000);
        let before = now_millis();
        let snap = engine.quote(req).await.unwrap();
        let ttl = engine.config().snapshot_ttl_ms;
        assert!(snap.expires_at >= before + ttl);
        assert!(snap.expires_at <= now_millis() + ttl);
    }
}
