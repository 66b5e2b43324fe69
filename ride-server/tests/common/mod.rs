//! 集成测试公共夹具
//!
//! 每个测试独立一个内存库 `ServerState`，司机通过轮询派单记录模拟接单端。

#![allow(dead_code)]

use ride_server::utils::logger::init_test_logger;
use ride_server::wallet::{LedgerEntry, PaymentGateway, SandboxGateway};
use ride_server::{ActorContext, Config, ServerState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared::event::Actor;
use shared::geo::Coordinate;
use shared::models::{
    BalanceOp, DispatchRecord, DispatchRecordStatus, DriverAccountStatus, DriverUpsert, DriverWorkStatus,
    OfferAction, OfferResponse, OpenAccountRequest, Order, OrderCreate, OrderStatus, OrderType, PaymentChannel,
    PaymentMethod, PaymentRouter, PriceRuleCreate, PriceSnapshot, QuoteRequest, RejectReason, RuleKind, TransactionType, UserAccount,
    UserType, VehicleCategory, VehicleLevel,
};
use shared::money::Currency;
use std::sync::Arc;
use std::time::Duration;

pub const RIDER: &str = "RIDER_A";

/// 单次等待上限
const WAIT_LIMIT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn kigali() -> Coordinate {
    Coordinate::new(-1.9441, 30.0619)
}

pub async fn state() -> ServerState {
    init_test_logger();
    ServerState::in_memory().await.expect("in-memory state")
}

pub async fn state_with(config: Config) -> ServerState {
    init_test_logger();
    ServerState::initialize(&config).await.expect("state")
}

/// 可脚本化的沙箱网关
pub async fn state_with_gateway(config: Config) -> (ServerState, Arc<SandboxGateway>) {
    init_test_logger();
    let gateway = Arc::new(SandboxGateway::new());
    let shared: Arc<dyn PaymentGateway> = gateway.clone();
    let state = ServerState::with_gateway(&config, shared).await.expect("state");
    (state, gateway)
}

/// 一个同时收卡和移动钱包的 RWF 通道
pub async fn seed_card_channel(state: &ServerState) {
    state
        .router
        .save_channel(PaymentChannel {
            channel_code: "CARDPAY".into(),
            name: "Card acquirer".into(),
            methods: vec!["card".into(), "mobile_money".into()],
            is_active: true,
            created_at: 0,
        })
        .await
        .expect("channel");
    state
        .router
        .add_router(PaymentRouter {
            router_id: String::new(),
            channel_code: "CARDPAY".into(),
            channel_account_id: "CARDPAY-RW-1".into(),
            payment_method: "*".into(),
            currency: "RWF".into(),
            min_amount: None,
            max_amount: None,
            region: None,
            priority: 10,
            valid_from: None,
            valid_until: None,
            is_active: true,
            created_at: 0,
        })
        .await
        .expect("router");
}

/// base 500 + 200/km + 30/min + service fee 100 (sedan, RWF)
pub async fn seed_standard_rules(state: &ServerState) {
    for (name, kind, value) in [
        ("base", RuleKind::Base, dec!(500)),
        ("per_km", RuleKind::PerDistance, dec!(200)),
        ("per_min", RuleKind::PerTime, dec!(30)),
        ("service_fee", RuleKind::ServiceFee, dec!(100)),
    ] {
        seed_rule(state, name, kind, value).await;
    }
}

pub async fn seed_rule(state: &ServerState, name: &str, kind: RuleKind, value: Decimal) {
    let mut rule = PriceRuleCreate::new(name, kind, value);
    rule.vehicle_categories = vec![VehicleCategory::Sedan];
    rule.currency = Some(Currency::Rwf);
    state.pricing.create_rule(rule).await.expect("rule");
}

pub fn quote_request(rider_id: &str, codes: &[&str]) -> QuoteRequest {
    QuoteRequest {
        rider_id: rider_id.into(),
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

pub fn rider_ctx(rider_id: &str) -> ActorContext {
    ActorContext::new(Actor::rider(rider_id))
}

pub fn driver_ctx(driver_id: &str) -> ActorContext {
    ActorContext::new(Actor::driver(driver_id))
}

pub fn admin() -> Actor {
    Actor::admin("ops")
}

// ========== Wallets ==========

pub async fn open_wallet(state: &ServerState, user_id: &str, user_type: UserType) -> UserAccount {
    state
        .wallet
        .open_account(OpenAccountRequest {
            user_id: user_id.into(),
            user_type,
            currency: Currency::Rwf,
        })
        .await
        .expect("open account")
}

/// 开户并充值
pub async fn funded_wallet(state: &ServerState, user_id: &str, user_type: UserType, amount: Decimal) -> UserAccount {
    let account = open_wallet(state, user_id, user_type).await;
    let entry = LedgerEntry::new(BalanceOp::AddAvailable, TransactionType::Income, amount, "top_up");
    state
        .wallet
        .apply(&account.account_id, entry, None, &admin())
        .await
        .expect("top up")
        .account
}

pub async fn account_of(state: &ServerState, user_id: &str, user_type: UserType) -> UserAccount {
    state
        .wallet
        .find_by_user(user_id, user_type)
        .await
        .expect("lookup")
        .expect("account exists")
}

pub async fn assert_balanced(state: &ServerState, account_id: &str) {
    let rec = state.wallet.reconcile(account_id).await.expect("reconcile");
    assert!(
        rec.balanced,
        "ledger {} != balance {} for {account_id}",
        rec.ledger_total, rec.balance_total
    );
}

// ========== Drivers ==========

/// 注册已认证司机并上线，位于上车点正北 `km_north` 处
pub async fn online_driver(state: &ServerState, driver_id: &str, km_north: f64) {
    let index = state.dispatch.index();
    index
        .upsert(DriverUpsert {
            driver_id: driver_id.into(),
            name: format!("Driver {driver_id}"),
            vehicle_category: VehicleCategory::Sedan,
            vehicle_level: VehicleLevel::Economy,
            account_status: DriverAccountStatus::Active,
            verified: true,
            location: Some(kigali().offset_north_km(km_north)),
            rating: 4.8,
            max_queue_capacity: 1,
        })
        .await
        .expect("upsert driver");
    index
        .set_work_status(driver_id, DriverWorkStatus::Online)
        .await
        .expect("driver online");
}

/// 等待发给该司机的待响应报价
pub async fn wait_for_offer(state: &ServerState, order_id: &str, driver_id: &str) -> DispatchRecord {
    let poll = async {
        loop {
            let records = state.orders.dispatch_records(order_id).await.expect("records");
            if let Some(r) = records
                .into_iter()
                .find(|r| r.driver_id == driver_id && r.status == DispatchRecordStatus::Pending)
            {
                return r;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, poll)
        .await
        .unwrap_or_else(|_| panic!("no offer for {driver_id} on {order_id}"))
}

/// 等待任意司机的待响应报价
pub async fn wait_for_any_offer(state: &ServerState, order_id: &str) -> DispatchRecord {
    let poll = async {
        loop {
            let records = state.orders.dispatch_records(order_id).await.expect("records");
            if let Some(r) = records
                .into_iter()
                .find(|r| r.status == DispatchRecordStatus::Pending)
            {
                return r;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, poll)
        .await
        .unwrap_or_else(|_| panic!("no offer on {order_id}"))
}

pub async fn wait_for_status(state: &ServerState, order_id: &str, status: OrderStatus) -> Order {
    let poll = async {
        loop {
            let order = state.orders.get(order_id).await.expect("order");
            if order.status == status {
                return order;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, poll)
        .await
        .unwrap_or_else(|_| panic!("{order_id} never reached {status}"))
}

pub fn accept(driver_id: &str) -> OfferResponse {
    OfferResponse {
        driver_id: driver_id.into(),
        action: OfferAction::Accept,
        reason: None,
        note: None,
    }
}

pub fn reject(driver_id: &str, reason: RejectReason) -> OfferResponse {
    OfferResponse {
        driver_id: driver_id.into(),
        action: OfferAction::Reject,
        reason: Some(reason),
        note: None,
    }
}

// ========== Orders ==========

pub async fn place_order(state: &ServerState, snapshot: &PriceSnapshot) -> Order {
    place_order_with(state, snapshot, PaymentMethod::Wallet).await
}

pub fn order_request(snapshot: &PriceSnapshot, payment_method: PaymentMethod) -> OrderCreate {
    OrderCreate {
        rider_id: snapshot.rider_id.clone(),
        snapshot_id: snapshot.snapshot_id.clone(),
        order_type: OrderType::Ride,
        pickup: snapshot.pickup,
        dropoff: snapshot.dropoff,
        scheduled_at: None,
        payment_method,
        region: None,
    }
}

pub async fn place_order_with(state: &ServerState, snapshot: &PriceSnapshot, payment_method: PaymentMethod) -> Order {
    state
        .orders
        .create(order_request(snapshot, payment_method), &rider_ctx(&snapshot.rider_id))
        .await
        .expect("create order")
}

/// 报价、下单、派给 `driver_id` 并开始行程
pub async fn ride_in_progress(state: &ServerState, driver_id: &str, payment_method: PaymentMethod) -> Order {
    let snap = state.pricing.quote(quote_request(RIDER, &[])).await.expect("quote");
    let order = place_order_with(state, &snap, payment_method).await;
    wait_for_offer(state, &order.order_id, driver_id).await;
    state
        .dispatch
        .respond(&order.order_id, accept(driver_id))
        .await
        .expect("accept");
    pick_up(state, &order.order_id, driver_id).await
}

/// 司机接单后走完 到达 → 开始 行程
pub async fn pick_up(state: &ServerState, order_id: &str, driver_id: &str) -> Order {
    let ctx = driver_ctx(driver_id);
    state.orders.arrive(order_id, driver_id, &ctx).await.expect("arrive");
    state.orders.start(order_id, driver_id, &ctx).await.expect("start")
}
