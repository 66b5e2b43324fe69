use crate::db::repository::RepoError;
use crate::dispatch::DispatchError;
use crate::pricing::PricingError;
use crate::wallet::WalletError;
use shared::error::{AppError, ErrorCode};
use shared::models::OrderStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("order {0} not found")]
    NotFound(String),

    #[error("order {order_id} is {status}, cannot move to {target}")]
    NotInState {
        order_id: String,
        status: OrderStatus,
        target: OrderStatus,
    },

    #[error("order {order_id} is {status}, only cancelled orders can be deleted")]
    NotDeletable { order_id: String, status: OrderStatus },

    #[error("scheduled time {0} is in the past")]
    InvalidSchedule(i64),

    #[error("driver {driver_id} is not assigned to order {order_id}")]
    DriverMismatch { order_id: String, driver_id: String },

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub type OrderResult<T> = Result<T, OrderError>;

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        OrderError::Repo(err.into())
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::InvalidInput { field, .. } => AppError::invalid_field(field, message),
            OrderError::NotFound(id) => {
                AppError::with_message(ErrorCode::OrderNotFound, message).with_detail("order_id", id)
            }
            OrderError::NotInState {
                order_id, status, ..
            } => AppError::with_message(ErrorCode::OrderNotInState, message)
                .with_detail("order_id", order_id)
                .with_detail("status", status.as_str()),
            OrderError::NotDeletable { order_id, status } => {
                AppError::with_message(ErrorCode::OrderNotInState, message)
                    .with_detail("order_id", order_id)
                    .with_detail("status", status.as_str())
            }
            OrderError::InvalidSchedule(_) => {
                AppError::with_message(ErrorCode::InvalidSchedule, message)
                    .with_detail("field", "scheduled_at")
            }
            OrderError::DriverMismatch { driver_id, .. } => {
                AppError::with_message(ErrorCode::DriverMismatch, message)
                    .with_detail("driver_id", driver_id)
            }
            OrderError::Pricing(e) => e.into(),
            OrderError::Dispatch(e) => e.into(),
            OrderError::Wallet(e) => e.into(),
            OrderError::Repo(e) => e.into(),
        }
    }
}
