use super::gateway::GatewayError;
use crate::db::repository::RepoError;
use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{BalanceOp, TransactionType, WithdrawalStatus};
use shared::money::Currency;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: &'static str },

    #[error("invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("account {account_id} cannot {op:?} {amount}")]
    InsufficientBalance {
        account_id: String,
        op: BalanceOp,
        amount: Decimal,
    },

    #[error("account {account_id} would freeze more than {limit}")]
    FreezeLimitExceeded { account_id: String, limit: Decimal },

    #[error("{tx_type} cannot be recorded for {op:?}")]
    InvalidTransactionType { op: BalanceOp, tx_type: TransactionType },

    #[error("account is in {account}, operation is in {request}")]
    CurrencyMismatch { account: Currency, request: Currency },

    #[error("account {account_id} is at version {actual}, expected {expected}")]
    VersionConflict {
        account_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("withdrawal {0} not found")]
    WithdrawalNotFound(String),

    #[error("withdrawal {withdrawal_id} is {status}")]
    WithdrawalNotInState {
        withdrawal_id: String,
        status: WithdrawalStatus,
    },

    #[error("daily withdrawal limit {limit} exceeded")]
    DailyLimitExceeded { limit: Decimal, requested: Decimal },

    #[error("monthly withdrawal limit {limit} exceeded")]
    MonthlyLimitExceeded { limit: Decimal, requested: Decimal },

    #[error("no payment channel for {method} {currency} {amount}")]
    NoChannelAvailable {
        method: String,
        currency: Currency,
        amount: Decimal,
    },

    #[error("payment {payment_id} failed: {reason}")]
    PaymentFailed { payment_id: String, reason: String },

    /// Raised through the alerting hook before it gets here
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub type WalletResult<T> = Result<T, WalletError>;

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        WalletError::Repo(err.into())
    }
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        let message = err.to_string();
        match err {
            WalletError::InvalidAmount { amount, .. } => {
                AppError::with_message(ErrorCode::InvalidAmount, message)
                    .with_detail("field", "amount")
                    .with_detail("value", amount.to_string())
            }
            WalletError::InvalidInput { field, .. } => AppError::invalid_field(field, message),
            WalletError::AccountNotFound(id) => {
                AppError::with_message(ErrorCode::AccountNotFound, message)
                    .with_detail("account_id", id)
            }
            WalletError::InsufficientBalance { account_id, .. } => {
                AppError::with_message(ErrorCode::InsufficientBalance, message)
                    .with_detail("account_id", account_id)
            }
            WalletError::FreezeLimitExceeded { account_id, .. } => {
                AppError::with_message(ErrorCode::FreezeLimitExceeded, message)
                    .with_detail("account_id", account_id)
            }
            WalletError::InvalidTransactionType { .. } => {
                AppError::with_message(ErrorCode::InvalidTransactionType, message)
            }
            WalletError::CurrencyMismatch { .. } => {
                AppError::with_message(ErrorCode::CurrencyMismatch, message)
            }
            WalletError::VersionConflict { account_id, actual, .. } => {
                AppError::with_message(ErrorCode::VersionConflict, message)
                    .with_detail("account_id", account_id)
                    .with_detail("version", actual)
            }
            WalletError::WithdrawalNotFound(id) => {
                AppError::with_message(ErrorCode::WithdrawalNotFound, message)
                    .with_detail("withdrawal_id", id)
            }
            WalletError::WithdrawalNotInState { withdrawal_id, status } => {
                AppError::with_message(ErrorCode::WithdrawalNotInState, message)
                    .with_detail("withdrawal_id", withdrawal_id)
                    .with_detail("status", status.as_str())
            }
            WalletError::DailyLimitExceeded { .. } => {
                AppError::with_message(ErrorCode::DailyLimitExceeded, message)
            }
            WalletError::MonthlyLimitExceeded { .. } => {
                AppError::with_message(ErrorCode::MonthlyLimitExceeded, message)
            }
            WalletError::NoChannelAvailable { .. } => {
                AppError::with_message(ErrorCode::NoChannelAvailable, message)
            }
            WalletError::PaymentFailed { payment_id, .. } => {
                AppError::with_message(ErrorCode::PaymentFailed, message)
                    .with_detail("payment_id", payment_id)
            }
            WalletError::Invariant(msg) => AppError::invariant(msg),
            WalletError::Gateway(e) => e.into(),
            WalletError::Repo(e) => e.into(),
        }
    }
}
