//! Pricing Engine Module
//!
//! Turns a ride context into an immutable price snapshot. Rules are
//! selected by [`matcher`], priced by [`calculator`], discounted by
//! [`discount`]; [`engine`] persists and binds snapshots.

pub mod calculator;
pub mod discount;
pub mod engine;
mod error;
pub mod matcher;
pub mod promotions;

pub use engine::{ENGINE_VERSION, PricingEngine};
pub use error::{PricingError, PricingResult};
