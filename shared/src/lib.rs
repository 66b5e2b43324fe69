//! Shared types for the ride-hailing core
//!
//! Domain value types used by the server and by API consumers:
//! orders, price snapshots, promotions, driver projections, dispatch
//! records, wallet ledger rows, withdrawals and payment routing, plus
//! the unified error system and the entity event envelope.

pub mod error;
pub mod event;
pub mod geo;
pub mod models;
pub mod money;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use event::{Actor, ActorType, EntityEvent, EventEntity};
pub use geo::Coordinate;
pub use money::{Currency, Money, MoneyError};
