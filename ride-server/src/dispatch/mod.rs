//! Dispatch Module
//!
//! - [`index`] - 司机投影 (内存 + `t_driver`)
//! - [`selection`] - 每轮候选司机筛选与打分
//! - [`engine`] - 派单会话, 报价应答, 超时推进

pub mod engine;
mod error;
pub mod index;
pub mod selection;

pub use engine::{DispatchEngine, NO_DRIVER_FOUND, SessionEnd};
pub use error::{DispatchError, DispatchResult};
pub use index::DriverIndex;
