//! Payment router
//!
//! Picks the `(channel_code, channel_account_id)` for a payment:
//! active + in window → currency → amount bounds → region → method, then
//! priority desc, newest first. A `*` method delegates to the channel's
//! advertised methods.

use super::error::{WalletError, WalletResult};
use crate::db::repository::payment;
use rust_decimal::Decimal;
use shared::models::{PaymentChannel, PaymentRouter, RouteRequest, RouteSelection, WILDCARD};
use shared::money::Currency;
use shared::util::{domain_id, now_millis};
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Filter inputs shared by route selection and method listing
#[derive(Debug, Clone)]
pub struct RouteQuery<'a> {
    pub currency: Currency,
    pub amount: Decimal,
    pub region: Option<&'a str>,
    pub now: i64,
}

fn in_window(r: &PaymentRouter, now: i64) -> bool {
    r.valid_from.is_none_or(|from| now >= from) && r.valid_until.is_none_or(|until| now < until)
}

/// Every filter except the payment method
fn base_match(r: &PaymentRouter, q: &RouteQuery<'_>) -> bool {
    r.is_active
        && in_window(r, q.now)
        && (r.currency == WILDCARD || r.currency.eq_ignore_ascii_case(q.currency.code()))
        && r.min_amount.is_none_or(|min| q.amount >= min)
        && r.max_amount.is_none_or(|max| q.amount <= max)
        && match (&r.region, q.region) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        }
}

/// Methods a router row can serve; wildcard rows expand through their channel
fn methods_of<'a>(r: &'a PaymentRouter, channels: &'a HashMap<&str, &PaymentChannel>) -> Vec<&'a str> {
    if r.payment_method == WILDCARD {
        channels
            .get(r.channel_code.as_str())
            .map(|c| c.methods.iter().map(String::as_str).collect())
            .unwrap_or_default()
    } else {
        vec![r.payment_method.as_str()]
    }
}

/// Matching rows in selection order
fn ranked<'a>(
    routers: &'a [PaymentRouter],
    channels: &HashMap<&str, &PaymentChannel>,
    q: &RouteQuery<'_>,
) -> Vec<&'a PaymentRouter> {
    let mut matched: Vec<&PaymentRouter> = routers
        .iter()
        .filter(|r| base_match(r, q))
        .filter(|r| channels.contains_key(r.channel_code.as_str()))
        .collect();
    matched.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.router_id.cmp(&b.router_id))
    });
    matched
}

fn active_channels(channels: &[PaymentChannel]) -> HashMap<&str, &PaymentChannel> {
    channels
        .iter()
        .filter(|c| c.is_active)
        .map(|c| (c.channel_code.as_str(), c))
        .collect()
}

pub fn select_route(
    routers: &[PaymentRouter],
    channels: &[PaymentChannel],
    method: &str,
    q: &RouteQuery<'_>,
) -> Option<RouteSelection> {
    let channels = active_channels(channels);
    ranked(routers, &channels, q)
        .into_iter()
        .find(|r| methods_of(r, &channels).iter().any(|m| m.eq_ignore_ascii_case(method)))
        .map(|r| RouteSelection {
            router_id: r.router_id.clone(),
            channel_code: r.channel_code.clone(),
            channel_account_id: r.channel_account_id.clone(),
        })
}

/// Deduplicated methods, highest priority first
pub fn available_methods(
    routers: &[PaymentRouter],
    channels: &[PaymentChannel],
    q: &RouteQuery<'_>,
) -> Vec<String> {
    let channels = active_channels(channels);
    let mut methods: Vec<String> = Vec::new();
    for r in ranked(routers, &channels, q) {
        for m in methods_of(r, &channels) {
            if m != WILDCARD && !methods.iter().any(|known| known == m) {
                methods.push(m.to_string());
            }
        }
    }
    methods
}

/// Payment Router - loads the routing tables and applies the pure selection
#[derive(Debug, Clone)]
pub struct PaymentRouterService {
    pool: SqlitePool,
}

impl PaymentRouterService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn tables(&self) -> WalletResult<(Vec<PaymentRouter>, Vec<PaymentChannel>)> {
        let mut conn = self.pool.acquire().await?;
        let routers = payment::list_active_routers(&mut conn).await?;
        let channels = payment::list_channels(&mut conn).await?;
        Ok((routers, channels))
    }

    pub async fn route(&self, req: &RouteRequest) -> WalletResult<RouteSelection> {
        if req.amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount {
                amount: req.amount,
                reason: "must be positive",
            });
        }
        let (routers, channels) = self.tables().await?;
        let q = RouteQuery {
            currency: req.currency,
            amount: req.amount,
            region: req.region.as_deref(),
            now: now_millis(),
        };
        let selection = select_route(&routers, &channels, &req.payment_method, &q).ok_or_else(|| {
            WalletError::NoChannelAvailable {
                method: req.payment_method.clone(),
                currency: req.currency,
                amount: req.amount,
            }
        })?;
        tracing::debug!(
            method = %req.payment_method,
            currency = %req.currency,
            amount = %req.amount,
            channel = %selection.channel_code,
            "Payment routed"
        );
        Ok(selection)
    }

    pub async fn available_methods(
        &self,
        currency: Currency,
        amount: Decimal,
        region: Option<&str>,
    ) -> WalletResult<Vec<String>> {
        let (routers, channels) = self.tables().await?;
        let q = RouteQuery {
            currency,
            amount,
            region,
            now: now_millis(),
        };
        Ok(available_methods(&routers, &channels, &q))
    }

    pub async fn save_channel(&self, channel: PaymentChannel) -> WalletResult<PaymentChannel> {
        let mut conn = self.pool.acquire().await?;
        payment::save_channel(&mut conn, &channel).await?;
        Ok(channel)
    }

    /// Empty `router_id` gets a generated one
    pub async fn add_router(&self, mut router: PaymentRouter) -> WalletResult<PaymentRouter> {
        if router.router_id.is_empty() {
            router.router_id = domain_id("RT");
        }
        if let (Some(min), Some(max)) = (router.min_amount, router.max_amount)
            && min > max
        {
            return Err(WalletError::InvalidInput {
                field: "min_amount",
                message: format!("{min} is above max_amount {max}"),
            });
        }
        let mut conn = self.pool.acquire().await?;
        payment::insert_router(&mut conn, &router).await?;
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn channel(code: &str, methods: &[&str]) -> PaymentChannel {
        PaymentChannel {
            channel_code: code.into(),
            name: code.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            is_active: true,
            created_at: 0,
        }
    }

    fn router(id: &str, channel: &str, method: &str, currency: &str, priority: i32, created_at: i64) -> PaymentRouter {
        PaymentRouter {
            router_id: id.into(),
            channel_code: channel.into(),
            channel_account_id: format!("{channel}-ACC"),
            payment_method: method.into(),
            currency: currency.into(),
            min_amount: None,
            max_amount: None,
            region: None,
            priority,
            valid_from: None,
            valid_until: None,
            is_active: true,
            created_at,
        }
    }

    fn query(amount: Decimal) -> RouteQuery<'static> {
        RouteQuery {
            currency: Currency::Rwf,
            amount,
            region: None,
            now: 1_000,
        }
    }

    #[test]
    fn test_priority_then_newest_wins() {
        let channels = vec![channel("MTN", &["mobile_money"]), channel("AIRTEL", &["mobile_money"])];
        let routers = vec![
            router("R1", "MTN", "mobile_money", "RWF", 10, 1),
            router("R2", "AIRTEL", "mobile_money", "RWF", 10, 2),
            router("R3", "MTN", "mobile_money", "RWF", 5, 3),
        ];
        let pick = select_route(&routers, &channels, "mobile_money", &query(dec!(2050))).unwrap();
        assert_eq!(pick.router_id, "R2");
        assert_eq!(pick.channel_code, "AIRTEL");
    }

    #[test]
    fn test_currency_amount_window_filters() {
        let channels = vec![channel("STRIPE", &["card"])];
        let mut bounded = router("R1", "STRIPE", "card", "RWF", 9, 1);
        bounded.min_amount = Some(dec!(100));
        bounded.max_amount = Some(dec!(1000));
        let mut expired = router("R2", "STRIPE", "card", "*", 8, 1);
        expired.valid_until = Some(1_000);
        let usd = router("R3", "STRIPE", "card", "USD", 7, 1);
        let routers = vec![bounded, expired, usd];

        assert_eq!(
            select_route(&routers, &channels, "card", &query(dec!(1000))).unwrap().router_id,
            "R1"
        );
        assert!(select_route(&routers, &channels, "card", &query(dec!(1001))).is_none());
        assert!(select_route(&routers, &channels, "card", &query(dec!(99))).is_none());
    }

    #[test]
    fn test_wildcard_delegates_to_channel_methods() {
        let channels = vec![channel("FLW", &["card", "mobile_money"])];
        let routers = vec![router("R1", "FLW", "*", "*", 1, 1)];

        assert!(select_route(&routers, &channels, "mobile_money", &query(dec!(10))).is_some());
        assert!(select_route(&routers, &channels, "wallet", &query(dec!(10))).is_none());
    }

    #[test]
    fn test_available_methods_dedup_in_priority_order() {
        let channels = vec![
            channel("FLW", &["card", "mobile_money"]),
            channel("MTN", &["mobile_money"]),
        ];
        let routers = vec![
            router("R1", "FLW", "*", "RWF", 1, 1),
            router("R2", "MTN", "mobile_money", "RWF", 5, 1),
        ];
        let methods = available_methods(&routers, &channels, &query(dec!(10)));
        assert_eq!(methods, vec!["mobile_money".to_string(), "card".to_string()]);
    }

    #[test]
    fn test_inactive_channel_and_region() {
        let mut off = channel("MTN", &["mobile_money"]);
        off.is_active = false;
        let channels = vec![off, channel("AIRTEL", &["mobile_money"])];
        let mut regional = router("R2", "AIRTEL", "mobile_money", "RWF", 1, 1);
        regional.region = Some("RW".into());
        let routers = vec![router("R1", "MTN", "mobile_money", "RWF", 9, 1), regional];

        assert!(select_route(&routers, &channels, "mobile_money", &query(dec!(10))).is_none());
        let mut q = query(dec!(10));
        q.region = Some("rw");
        assert_eq!(
            select_route(&routers, &channels, "mobile_money", &q).unwrap().router_id,
            "R2"
        );
    }
}
