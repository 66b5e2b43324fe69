use crate::db::repository::RepoError;
use shared::error::{AppError, ErrorCode};
use shared::models::VehicleClass;
use shared::money::Currency;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("{field} {message}")]
    OutOfRange { field: &'static str, message: String },

    #[error("{0} coordinate is out of range")]
    InvalidCoordinate(&'static str),

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("rule {rule_id} is priced in {rule}, request is in {request}")]
    CurrencyMismatch {
        rule_id: String,
        rule: Currency,
        request: Currency,
    },

    #[error("no fare rule for {0}")]
    VehicleUnsupported(VehicleClass),

    #[error("pickup is outside every service area for {0}")]
    ServiceAreaOutOfBounds(VehicleClass),

    #[error("promo code {0} is invalid")]
    PromoInvalid(String),

    #[error("promo code {0} has expired")]
    PromoExpired(String),

    #[error("price calculation exceeded {0}ms")]
    CalcTimeout(u64),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    #[error("snapshot {0} has expired")]
    SnapshotExpired(String),

    #[error("snapshot {snapshot_id} is bound to order {order_id}")]
    SnapshotAlreadyBound {
        snapshot_id: String,
        order_id: String,
    },

    #[error("promotion {0} not found")]
    PromotionNotFound(String),

    #[error("promotion {0} cannot be issued again")]
    PromotionUsageExceeded(String),

    #[error("user promotion {0} is held by another order")]
    UserPromotionUnavailable(String),

    #[error("user promotion {0} not found")]
    UserPromotionNotFound(String),

    #[error("user promotion {0} is not used")]
    UserPromotionNotUsed(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub type PricingResult<T> = Result<T, PricingError>;

impl From<sqlx::Error> for PricingError {
    fn from(err: sqlx::Error) -> Self {
        PricingError::Repo(err.into())
    }
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        let message = err.to_string();
        match err {
            PricingError::InvalidInput { field, .. } => AppError::invalid_field(field, message),
            PricingError::OutOfRange { field, .. } => {
                AppError::with_message(ErrorCode::ValueOutOfRange, message).with_detail("field", field)
            }
            PricingError::InvalidCoordinate(field) => {
                AppError::with_message(ErrorCode::InvalidCoordinate, message)
                    .with_detail("field", field)
            }
            PricingError::UnknownCurrency(code) => {
                AppError::with_message(ErrorCode::UnknownCurrency, message)
                    .with_detail("field", "currency")
                    .with_detail("value", code)
            }
            PricingError::CurrencyMismatch { rule_id, .. } => {
                AppError::with_message(ErrorCode::CurrencyMismatch, message)
                    .with_detail("rule_id", rule_id)
            }
            PricingError::VehicleUnsupported(_) => {
                AppError::with_message(ErrorCode::VehicleUnsupported, message)
            }
            PricingError::ServiceAreaOutOfBounds(_) => {
                AppError::with_message(ErrorCode::ServiceAreaOutOfBounds, message)
            }
            PricingError::PromoInvalid(code) => {
                AppError::with_message(ErrorCode::PromoInvalid, message).with_detail("code", code)
            }
            PricingError::PromoExpired(code) => {
                AppError::with_message(ErrorCode::PromoExpired, message).with_detail("code", code)
            }
            PricingError::CalcTimeout(_) => AppError::with_message(ErrorCode::CalcTimeout, message),
            PricingError::SnapshotNotFound(id) => {
                AppError::with_message(ErrorCode::SnapshotNotFound, message)
                    .with_detail("snapshot_id", id)
            }
            PricingError::SnapshotExpired(id) => {
                AppError::with_message(ErrorCode::SnapshotExpired, message)
                    .with_detail("snapshot_id", id)
            }
            PricingError::SnapshotAlreadyBound { snapshot_id, .. } => {
                AppError::with_message(ErrorCode::SnapshotAlreadyBound, message)
                    .with_detail("snapshot_id", snapshot_id)
            }
            PricingError::PromotionNotFound(id) => {
                AppError::with_message(ErrorCode::PromotionNotFound, message)
                    .with_detail("promotion_id", id)
            }
            PricingError::PromotionUsageExceeded(id) => {
                AppError::with_message(ErrorCode::PromotionUsageExceeded, message)
                    .with_detail("promotion_id", id)
            }
            PricingError::UserPromotionUnavailable(id) => {
                AppError::with_message(ErrorCode::PromotionUsageExceeded, message)
                    .with_detail("user_promotion_id", id)
            }
            PricingError::UserPromotionNotFound(id) => {
                AppError::with_message(ErrorCode::UserPromotionNotFound, message)
                    .with_detail("user_promotion_id", id)
            }
            PricingError::UserPromotionNotUsed(id) => {
                AppError::with_message(ErrorCode::UserPromotionNotUsed, message)
                    .with_detail("user_promotion_id", id)
            }
            PricingError::Repo(e) => e.into(),
        }
    }
}
