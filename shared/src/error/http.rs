//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::SnapshotNotFound
            | Self::PromotionNotFound
            | Self::UserPromotionNotFound
            | Self::DispatchRecordNotFound
            | Self::DriverNotFound
            | Self::OrderNotFound
            | Self::AccountNotFound
            | Self::PaymentNotFound
            | Self::WithdrawalNotFound => StatusCode::NOT_FOUND,

            // 403 Forbidden
            Self::PermissionDenied | Self::DriverMismatch => StatusCode::FORBIDDEN,

            // 423 Locked
            Self::DriverLocked => StatusCode::LOCKED,

            // 409 Conflict (state and concurrency)
            Self::AlreadyExists
            | Self::SnapshotAlreadyBound
            | Self::OfferNotPending
            | Self::OrderNotInState
            | Self::WithdrawalNotInState
            | Self::UserPromotionNotUsed
            | Self::DispatchNotActive
            | Self::VersionConflict
            | Self::DriverAlreadyAssigned => StatusCode::CONFLICT,

            // 410 Gone
            Self::SnapshotExpired | Self::OfferTimeout => StatusCode::GONE,

            // 422 Unprocessable (business rules)
            Self::VehicleUnsupported
            | Self::ServiceAreaOutOfBounds
            | Self::PromoInvalid
            | Self::PromoExpired
            | Self::MinOrderNotMet
            | Self::PromotionUsageExceeded
            | Self::NoDriverFound
            | Self::InsufficientBalance
            | Self::FreezeLimitExceeded
            | Self::NoChannelAvailable
            | Self::DailyLimitExceeded
            | Self::MonthlyLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,

            // 402 Payment Required
            Self::PaymentFailed => StatusCode::PAYMENT_REQUIRED,

            // 502 Bad Gateway
            Self::GatewayDeclined => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::GatewayNetwork | Self::GatewayUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            Self::CalcTimeout | Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            Self::Unknown
            | Self::InternalError
            | Self::DatabaseError
            | Self::InvariantViolation
            | Self::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::Success.http_status(), StatusCode::OK);
        assert_eq!(ErrorCode::InvalidAmount.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::UnknownCurrency.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ErrorCode::OrderNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::InsufficientBalance.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::VersionConflict.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::SnapshotExpired.http_status(), StatusCode::GONE);
        assert_eq!(
            ErrorCode::GatewayNetwork.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::InvariantViolation.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
