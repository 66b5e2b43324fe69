//! Ride Server - 网约车核心后端
//!
//! # 模块结构
//!
//! ```text
//! ride-server/src/
//! ├── core/          # 配置、状态、后台任务、HTTP 服务器
//! ├── db/            # SQLite 连接池、迁移、仓储函数
//! ├── pricing/       # 计价引擎、优惠券、报价快照
//! ├── dispatch/      # 司机索引、派单轮次
//! ├── orders/        # 订单协调器、结算、审计链
//! ├── wallet/        # 钱包账本、提现、支付路由与网关
//! ├── message/       # 事件总线与通知出口
//! ├── api/           # HTTP 路由和处理器
//! └── utils/         # 锁、告警、日志
//! ```

pub mod api;
pub mod core;
pub mod db;
pub mod dispatch;
pub mod message;
pub mod orders;
pub mod pricing;
pub mod utils;
pub mod wallet;

// Re-export 公共类型
pub use core::{Config, Server, ServerState};
pub use dispatch::{DispatchEngine, DriverIndex};
pub use message::EventBus;
pub use orders::{ActorContext, OrderCoordinator};
pub use pricing::PricingEngine;
pub use utils::{AppError, AppResult};
pub use wallet::{PaymentRouterService, WalletService, WithdrawalService};

// Re-export unified error types from shared
pub use utils::{ApiResponse, ErrorCategory, ErrorCode};

pub use utils::logger::{init_logger, init_logger_with_file};
