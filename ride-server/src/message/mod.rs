//! 事件总线
//!
//! - [`EventBus`] - 进程内 broadcast 总线
//! - [`sink`] - 通知下游 (push/SMS/email) 的出口

pub mod bus;
pub mod sink;

pub use bus::EventBus;
pub use sink::{EventSink, LogSink};
