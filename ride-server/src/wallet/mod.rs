//! Wallet & Payments
//!
//! - [`account`] - 余额操作 (纯函数)
//! - [`service`] - 账户锁 + 版本 CAS + 流水
//! - [`withdrawal`] - 提现状态机
//! - [`router`] - 支付渠道路由
//! - [`gateway`] - 支付网关抽象, 重试与沙箱实现

pub mod account;
mod error;
pub mod gateway;
pub mod router;
pub mod service;
pub mod withdrawal;

pub use error::{WalletError, WalletResult};
pub use gateway::{GatewayError, PaymentGateway, SandboxGateway};
pub use router::PaymentRouterService;
pub use service::{LedgerEntry, Posting, WalletService};
pub use withdrawal::WithdrawalService;
