//! Unified error system
//!
//! - [`ErrorCode`]: standardized numeric codes with a stable snake_case key
//! - [`ErrorCategory`]: how a caller should react (fix, give up, retry)
//! - [`AppError`]: code + message + structured details
//! - [`ApiResponse`]: JSON envelope, used for every error body
//!
//! # Error Code Ranges
//!
//! - 0xxx: General / validation errors
//! - 1xxx: Pricing errors
//! - 2xxx: Dispatch errors
//! - 3xxx: Order errors
//! - 4xxx: Wallet errors
//! - 5xxx: Payment and withdrawal errors
//! - 7xxx: Concurrency errors
//! - 8xxx: External gateway errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode, ApiResponse};
//!
//! let err = AppError::new(ErrorCode::InsufficientBalance)
//!     .with_detail("account_id", "ACC1");
//! let response = ApiResponse::<()>::error(&err);
//! assert_eq!(response.error.as_deref(), Some("insufficient_balance"));
//! ```

mod category;
mod codes;
mod http;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{ApiResponse, AppError, AppResult, Details};
