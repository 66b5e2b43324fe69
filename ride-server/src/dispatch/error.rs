use crate::db::repository::RepoError;
use shared::error::{AppError, ErrorCode};
use shared::models::{DispatchRecordStatus, OrderStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("order {order_id} is {status}, expected {expected}")]
    OrderNotInState {
        order_id: String,
        status: OrderStatus,
        expected: OrderStatus,
    },

    #[error("order {0} has no active dispatch")]
    NotActive(String),

    #[error("driver {driver_id} has no offer for order {order_id}")]
    RecordNotFound { order_id: String, driver_id: String },

    #[error("offer {0} expired")]
    OfferTimeout(String),

    #[error("offer {record_id} is already {status:?}")]
    OfferNotPending {
        record_id: String,
        status: DispatchRecordStatus,
    },

    #[error("order {0} was accepted by another driver")]
    AlreadyAssigned(String),

    #[error("driver {0} not found")]
    DriverNotFound(String),

    #[error("driver {driver_id} is locked until {locked_until}")]
    DriverLocked { driver_id: String, locked_until: i64 },

    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Repo(err.into())
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::InvalidInput { field, .. } => AppError::invalid_field(field, message),
            DispatchError::OrderNotFound(id) => {
                AppError::with_message(ErrorCode::OrderNotFound, message).with_detail("order_id", id)
            }
            DispatchError::OrderNotInState { order_id, status, .. } => {
                AppError::with_message(ErrorCode::OrderNotInState, message)
                    .with_detail("order_id", order_id)
                    .with_detail("status", status.as_str())
            }
            DispatchError::NotActive(id) => {
                AppError::with_message(ErrorCode::DispatchNotActive, message)
                    .with_detail("order_id", id)
            }
            DispatchError::RecordNotFound { order_id, driver_id } => {
                AppError::with_message(ErrorCode::DispatchRecordNotFound, message)
                    .with_detail("order_id", order_id)
                    .with_detail("driver_id", driver_id)
            }
            DispatchError::OfferTimeout(id) => {
                AppError::with_message(ErrorCode::OfferTimeout, message).with_detail("record_id", id)
            }
            DispatchError::OfferNotPending { record_id, status } => {
                AppError::with_message(ErrorCode::OfferNotPending, message)
                    .with_detail("record_id", record_id)
                    .with_detail("status", status.as_str())
            }
            DispatchError::AlreadyAssigned(id) => {
                AppError::with_message(ErrorCode::DriverAlreadyAssigned, message)
                    .with_detail("order_id", id)
            }
            DispatchError::DriverNotFound(id) => {
                AppError::with_message(ErrorCode::DriverNotFound, message)
                    .with_detail("driver_id", id)
            }
            DispatchError::DriverLocked { driver_id, locked_until } => {
                AppError::with_message(ErrorCode::DriverLocked, message)
                    .with_detail("driver_id", driver_id)
                    .with_detail("locked_until", locked_until)
            }
            DispatchError::Repo(e) => e.into(),
        }
    }
}
