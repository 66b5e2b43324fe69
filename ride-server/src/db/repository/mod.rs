//! Repository Module
//!
//! Free async functions over `&mut SqliteConnection`, so the same call runs
//! on a pooled connection or inside a caller-owned transaction
//! (`&mut *tx`). Money columns are decimal strings and JSON columns are
//! text; both are converted to typed values here and never leak further.

// Orders
pub mod history;
pub mod order;

// Pricing
pub mod price_rule;
pub mod promotion;
pub mod snapshot;

// Dispatch
pub mod dispatch_record;
pub mod driver;

// Wallet
pub mod account;
pub mod payment;
pub mod transaction;
pub mod withdrawal;

use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::error::AppError;
use std::str::FromStr;
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound("row not found".into()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RepoError::Duplicate(db_err.message().to_string())
            }
            other => RepoError::Database(other.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => AppError::not_found(msg),
            RepoError::Duplicate(msg) => AppError::already_exists(msg),
            RepoError::Database(msg) => AppError::database(msg),
            RepoError::Validation(msg) => AppError::validation(msg),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Parse a money column
pub(crate) fn decimal(raw: &str, column: &'static str) -> RepoResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| RepoError::Database(format!("{column}: malformed decimal '{raw}': {e}")))
}

pub(crate) fn opt_decimal(raw: Option<&str>, column: &'static str) -> RepoResult<Option<Decimal>> {
    raw.map(|r| decimal(r, column)).transpose()
}

/// Parse a JSON column; malformed content yields the empty value.
pub(crate) fn json_or_default<T: DeserializeOwned + Default>(raw: &str, column: &'static str) -> T {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(column, error = %e, "Malformed JSON column, treating as empty");
            T::default()
        }
    }
}

/// Nullable JSON column; malformed content yields `None`.
pub(crate) fn json_opt<T: DeserializeOwned>(raw: Option<&str>, column: &'static str) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(column, error = %e, "Malformed JSON column, treating as empty");
            None
        }
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|e| RepoError::Validation(format!("Failed to serialize column: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_or_default_tolerates_garbage() {
        let ids: Vec<String> = json_or_default("not json", "applied_rule_ids");
        assert!(ids.is_empty());
        let ids: Vec<String> = json_or_default(r#"["R1","R2"]"#, "applied_rule_ids");
        assert_eq!(ids, vec!["R1", "R2"]);
    }

    #[test]
    fn test_decimal_column() {
        assert_eq!(decimal("2050.00", "fare").unwrap(), Decimal::new(205000, 2));
        assert!(matches!(decimal("abc", "fare"), Err(RepoError::Database(_))));
        assert_eq!(opt_decimal(None, "max_discount").unwrap(), None);
    }

    #[test]
    fn test_repo_error_maps_to_app_error() {
        let err: AppError = RepoError::NotFound("order ORD1".into()).into();
        assert_eq!(err.code, shared::error::ErrorCode::NotFound);
        let err: AppError = RepoError::Duplicate("x".into()).into();
        assert_eq!(err.code, shared::error::ErrorCode::AlreadyExists);
    }
}
