//! 工具模块 - 通用工具函数和类型
//!
//! # 内容
//!
//! - [`AppError`] - 应用错误类型 (from shared::error)
//! - [`KeyedLocks`] - 按 key 串行化的异步锁
//! - 日志、告警

pub mod alert;
pub mod locks;
pub mod logger;

pub use locks::KeyedLocks;
pub use shared::error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
