//! Data models
//!
//! Shared between ride-server and API consumers. Status enums derive
//! `sqlx::Type` behind the `db` feature; monetary fields are `Decimal`
//! and travel as decimal strings.

pub mod dispatch;
pub mod driver;
pub mod order;
pub mod payment;
pub mod price_rule;
pub mod price_snapshot;
pub mod promotion;
pub mod vehicle;
pub mod wallet;
pub mod withdrawal;

// Re-exports
pub use dispatch::*;
pub use driver::*;
pub use order::*;
pub use payment::*;
pub use price_rule::*;
pub use price_snapshot::*;
pub use promotion::*;
pub use vehicle::*;
pub use wallet::*;
pub use withdrawal::*;
