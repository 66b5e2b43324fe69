use crate::core::Config;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::db::DbService;
use crate::dispatch::{DispatchEngine, DriverIndex};
use crate::message::{EventBus, EventSink, LogSink};
use crate::message::sink::run_sink_listener;
use crate::orders::OrderCoordinator;
use crate::orders::settlement::PaymentHandoff;
use crate::pricing::PricingEngine;
use crate::utils::{AppError, KeyedLocks};
use crate::wallet::{PaymentGateway, PaymentRouterService, SandboxGateway, WalletService, WithdrawalService};
use shared::util::now_millis;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// 快照过期扫描间隔
const SNAPSHOT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// 预约单激活扫描间隔
const SCHEDULED_SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// 服务器状态 - 持有所有服务的共享引用
///
/// 所有字段都是廉价 Clone (内部 Arc / 连接池)。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | pool | SQLite 连接池 |
/// | bus | 进程内事件总线 |
/// | pricing | 计价引擎 |
/// | dispatch | 派单引擎 (含司机索引) |
/// | orders | 订单协调器 |
/// | wallet | 钱包账本 |
/// | withdrawals | 提现流程 |
/// | router | 支付路由 |
#[derive(Clone, Debug)]
pub struct ServerState {
    pub config: Config,
    pub pool: SqlitePool,
    pub bus: EventBus,
    pub pricing: PricingEngine,
    pub dispatch: DispatchEngine,
    pub orders: OrderCoordinator,
    pub wallet: WalletService,
    pub withdrawals: WithdrawalService,
    pub router: PaymentRouterService,
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 1. 工作目录
    /// 2. 数据库 (config.database.path, None = 内存库)
    /// 3. 各服务，使用 sandbox 支付网关
    pub async fn initialize(config: &Config) -> Result<Self, AppError> {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(SandboxGateway::new());
        Self::with_gateway(config, gateway).await
    }

    /// In-memory database, test timers, sandbox gateway
    pub async fn in_memory() -> Result<Self, AppError> {
        Self::initialize(&Config::for_tests()).await
    }

    pub async fn with_gateway(config: &Config, gateway: Arc<dyn PaymentGateway>) -> Result<Self, AppError> {
        let db = match &config.database.path {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| AppError::internal(format!("Failed to create {}: {e}", parent.display())))?;
                }
                DbService::new(&path.to_string_lossy(), config.database.max_connections).await?
            }
            None => DbService::in_memory().await?,
        };
        let pool = db.pool;
        let bus = EventBus::new();

        let pricing = PricingEngine::new(pool.clone(), config.pricing.clone(), bus.clone());
        let index = DriverIndex::new(pool.clone());
        let dispatch = DispatchEngine::new(
            pool.clone(),
            config.dispatch.clone(),
            index,
            bus.clone(),
            KeyedLocks::new(),
        );
        let wallet = WalletService::new(
            pool.clone(),
            config.wallet.clone(),
            config.withdrawal.clone(),
            bus.clone(),
        );
        let withdrawals = WithdrawalService::new(
            wallet.clone(),
            config.withdrawal.clone(),
            config.gateway.clone(),
            gateway.clone(),
            bus.clone(),
        );
        let router = PaymentRouterService::new(pool.clone());
        let payments = PaymentHandoff::new(router.clone(), gateway, config.gateway.clone());
        let orders = OrderCoordinator::new(
            pool.clone(),
            config.settlement.clone(),
            pricing.clone(),
            dispatch.clone(),
            wallet.clone(),
            payments,
            bus.clone(),
        );

        Ok(Self {
            config: config.clone(),
            pool,
            bus,
            pricing,
            dispatch,
            orders,
            wallet,
            withdrawals,
            router,
        })
    }

    /// 预热司机索引并恢复中断的派单
    pub async fn warmup(&self) -> Result<(), AppError> {
        let drivers = self.dispatch.index().warmup().await?;
        let resumed = self.dispatch.resume_dispatching().await?;
        tracing::info!(drivers, resumed, "Warmup complete");
        Ok(())
    }

    /// 启动后台任务
    ///
    /// - snapshot_sweeper: 过期未绑定的报价快照与用户优惠券
    /// - scheduled_activator: 预约单到点派单
    /// - notification_listener: 事件总线 → 通知出口
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let pricing = self.pricing.clone();
        tasks.every("snapshot_sweeper", SNAPSHOT_SWEEP_INTERVAL, move || {
            let pricing = pricing.clone();
            async move {
                if let Err(e) = pricing.expire_due(now_millis()).await {
                    tracing::warn!(error = %e, "Snapshot sweep failed");
                }
            }
        });

        let dispatch = self.dispatch.clone();
        let withdrawals = self.withdrawals.clone();
        tasks.every("scheduled_activator", SCHEDULED_SCAN_INTERVAL, move || {
            let dispatch = dispatch.clone();
            let withdrawals = withdrawals.clone();
            async move {
                if let Err(e) = dispatch.activate_due(now_millis()).await {
                    tracing::warn!(error = %e, "Scheduled order activation failed");
                }
                dispatch.order_locks().prune();
                withdrawals.prune_locks();
            }
        });

        let sink: Arc<dyn EventSink> = Arc::new(LogSink);
        let shutdown = tasks.shutdown_token();
        tasks.spawn(
            "notification_listener",
            TaskKind::Listener,
            run_sink_listener(self.bus.clone(), sink, shutdown),
        );

        tasks.log_summary();
        tasks
    }
}
