//! Unified error codes for the ride-hailing core
//!
//! Error codes are organized by domain:
//! - 0xxx: General / validation errors
//! - 1xxx: Pricing errors
//! - 2xxx: Dispatch errors
//! - 3xxx: Order errors
//! - 4xxx: Wallet errors
//! - 5xxx: Payment and withdrawal errors
//! - 7xxx: Concurrency errors (retryable by the caller)
//! - 8xxx: External gateway errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Serialized as its `u16` value; [`ErrorCode::key`] gives the stable
/// snake_case name surfaced to clients alongside the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Required field missing
    RequiredField = 7,
    /// Value out of range
    ValueOutOfRange = 8,
    /// Malformed or non-positive monetary amount
    InvalidAmount = 10,
    /// Currency code is not recognised
    UnknownCurrency = 11,
    /// Two amounts in different currencies were combined
    CurrencyMismatch = 12,
    /// Latitude/longitude outside the valid range
    InvalidCoordinate = 13,
    /// Vehicle category or level is not recognised
    UnknownVehicleClass = 14,
    /// Actor is not allowed to perform this operation
    PermissionDenied = 20,

    // ==================== 1xxx: Pricing ====================
    /// No fare rule covers the requested vehicle class
    VehicleUnsupported = 1001,
    /// Pickup lies outside every configured service area
    ServiceAreaOutOfBounds = 1002,
    /// Promo code does not match any promotion
    PromoInvalid = 1003,
    /// Promo code matched an expired promotion
    PromoExpired = 1004,
    /// Running total below the discount's minimum order amount
    MinOrderNotMet = 1005,
    /// Price calculation exceeded its time budget
    CalcTimeout = 1006,
    /// Price snapshot not found
    SnapshotNotFound = 1007,
    /// Price snapshot has expired
    SnapshotExpired = 1008,
    /// Price snapshot already bound to another order
    SnapshotAlreadyBound = 1009,
    /// Promotion template not found
    PromotionNotFound = 1010,
    /// Promotion usage cap reached
    PromotionUsageExceeded = 1011,
    /// User promotion not found
    UserPromotionNotFound = 1012,
    /// User promotion is not in the `used` state
    UserPromotionNotUsed = 1013,

    // ==================== 2xxx: Dispatch ====================
    /// Dispatch record not found
    DispatchRecordNotFound = 2001,
    /// Offer answered at or after its expiry
    OfferTimeout = 2002,
    /// Offer already settled
    OfferNotPending = 2003,
    /// Driver not found
    DriverNotFound = 2004,
    /// No dispatch session for this order
    DispatchNotActive = 2005,
    /// No driver accepted within the retry budget
    NoDriverFound = 2006,
    /// Driver account locked after repeated failed logins
    DriverLocked = 2007,

    // ==================== 3xxx: Order ====================
    /// Order not found
    OrderNotFound = 3001,
    /// Order is not in a state that allows this transition
    OrderNotInState = 3002,
    /// Scheduled time is in the past
    InvalidSchedule = 3003,
    /// Driver is not the one assigned to the order
    DriverMismatch = 3004,

    // ==================== 4xxx: Wallet ====================
    /// Account not found
    AccountNotFound = 4001,
    /// Insufficient balance
    InsufficientBalance = 4002,
    /// Frozen balance would exceed the per-account limit
    FreezeLimitExceeded = 4003,
    /// Transaction type not valid for the operation
    InvalidTransactionType = 4004,

    // ==================== 5xxx: Payment / Withdrawal ====================
    /// No payment channel matches the request
    NoChannelAvailable = 5001,
    /// Payment failed
    PaymentFailed = 5002,
    /// Payment not found
    PaymentNotFound = 5003,
    /// Withdrawal not found
    WithdrawalNotFound = 5101,
    /// Withdrawal is not in a state that allows this transition
    WithdrawalNotInState = 5102,
    /// Daily withdrawal limit exceeded
    DailyLimitExceeded = 5103,
    /// Monthly withdrawal limit exceeded
    MonthlyLimitExceeded = 5104,

    // ==================== 7xxx: Concurrency ====================
    /// Account version changed since it was read
    VersionConflict = 7001,
    /// Another driver already accepted the order
    DriverAlreadyAssigned = 7002,

    // ==================== 8xxx: External ====================
    /// Gateway unreachable, safe to retry
    GatewayNetwork = 8001,
    /// Gateway answered with a transient failure
    GatewayUnavailable = 8002,
    /// Gateway declined permanently
    GatewayDeclined = 8003,
    /// Gateway call timed out
    GatewayTimeout = 8004,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Invariant violation detected
    InvariantViolation = 9003,
    /// Configuration error
    ConfigError = 9004,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Whether a caller may retry the same request unchanged
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::VersionConflict
                | ErrorCode::DriverAlreadyAssigned
                | ErrorCode::GatewayNetwork
                | ErrorCode::GatewayUnavailable
                | ErrorCode::GatewayTimeout
        )
    }

    /// Stable snake_case identifier
    pub const fn key(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Unknown => "unknown",
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::RequiredField => "required_field",
            ErrorCode::ValueOutOfRange => "value_out_of_range",
            ErrorCode::InvalidAmount => "invalid_amount",
            ErrorCode::UnknownCurrency => "unknown_currency",
            ErrorCode::CurrencyMismatch => "currency_mismatch",
            ErrorCode::InvalidCoordinate => "invalid_coordinate",
            ErrorCode::UnknownVehicleClass => "unknown_vehicle_class",
            ErrorCode::PermissionDenied => "permission_denied",

            ErrorCode::VehicleUnsupported => "vehicle_unsupported",
            ErrorCode::ServiceAreaOutOfBounds => "service_area_out_of_bounds",
            ErrorCode::PromoInvalid => "promo_invalid",
            ErrorCode::PromoExpired => "promo_expired",
            ErrorCode::MinOrderNotMet => "min_order_not_met",
            ErrorCode::CalcTimeout => "calc_timeout",
            ErrorCode::SnapshotNotFound => "snapshot_not_found",
            ErrorCode::SnapshotExpired => "snapshot_expired",
            ErrorCode::SnapshotAlreadyBound => "snapshot_already_bound",
            ErrorCode::PromotionNotFound => "promotion_not_found",
            ErrorCode::PromotionUsageExceeded => "promotion_usage_exceeded",
            ErrorCode::UserPromotionNotFound => "user_promotion_not_found",
            ErrorCode::UserPromotionNotUsed => "user_promotion_not_used",

            ErrorCode::DispatchRecordNotFound => "dispatch_record_not_found",
            ErrorCode::OfferTimeout => "timeout",
            ErrorCode::OfferNotPending => "offer_not_pending",
            ErrorCode::DriverNotFound => "driver_not_found",
            ErrorCode::DispatchNotActive => "dispatch_not_active",
            ErrorCode::NoDriverFound => "no_driver_found",
            ErrorCode::DriverLocked => "driver_locked",

            ErrorCode::OrderNotFound => "order_not_found",
            ErrorCode::OrderNotInState => "order_not_in_state",
            ErrorCode::InvalidSchedule => "invalid_schedule",
            ErrorCode::DriverMismatch => "driver_mismatch",

            ErrorCode::AccountNotFound => "account_not_found",
            ErrorCode::InsufficientBalance => "insufficient_balance",
            ErrorCode::FreezeLimitExceeded => "freeze_limit_exceeded",
            ErrorCode::InvalidTransactionType => "invalid_transaction_type",

            ErrorCode::NoChannelAvailable => "no_channel_available",
            ErrorCode::PaymentFailed => "payment_failed",
            ErrorCode::PaymentNotFound => "payment_not_found",
            ErrorCode::WithdrawalNotFound => "withdrawal_not_found",
            ErrorCode::WithdrawalNotInState => "withdrawal_not_in_state",
            ErrorCode::DailyLimitExceeded => "daily_limit_exceeded",
            ErrorCode::MonthlyLimitExceeded => "monthly_limit_exceeded",

            ErrorCode::VersionConflict => "version_conflict",
            ErrorCode::DriverAlreadyAssigned => "driver_already_assigned",

            ErrorCode::GatewayNetwork => "retryable_network",
            ErrorCode::GatewayUnavailable => "retryable_gateway",
            ErrorCode::GatewayDeclined => "terminal",
            ErrorCode::GatewayTimeout => "gateway_timeout",

            ErrorCode::InternalError => "internal_error",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::InvariantViolation => "invariant_violation",
            ErrorCode::ConfigError => "config_error",
        }
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::RequiredField => "Required field is missing",
            ErrorCode::ValueOutOfRange => "Value is out of range",
            ErrorCode::InvalidAmount => "Amount is malformed or not positive",
            ErrorCode::UnknownCurrency => "Unknown currency",
            ErrorCode::CurrencyMismatch => "Currency mismatch",
            ErrorCode::InvalidCoordinate => "Coordinate is out of range",
            ErrorCode::UnknownVehicleClass => "Unknown vehicle class",
            ErrorCode::PermissionDenied => "Permission denied",

            // Pricing
            ErrorCode::VehicleUnsupported => "Vehicle class is not supported here",
            ErrorCode::ServiceAreaOutOfBounds => "Pickup is outside the service area",
            ErrorCode::PromoInvalid => "Promo code is invalid",
            ErrorCode::PromoExpired => "Promo code has expired",
            ErrorCode::MinOrderNotMet => "Minimum order amount not met",
            ErrorCode::CalcTimeout => "Price calculation timed out",
            ErrorCode::SnapshotNotFound => "Price snapshot not found",
            ErrorCode::SnapshotExpired => "Price snapshot has expired",
            ErrorCode::SnapshotAlreadyBound => "Price snapshot is bound to another order",
            ErrorCode::PromotionNotFound => "Promotion not found",
            ErrorCode::PromotionUsageExceeded => "Promotion usage limit reached",
            ErrorCode::UserPromotionNotFound => "User promotion not found",
            ErrorCode::UserPromotionNotUsed => "User promotion has not been used",

            // Dispatch
            ErrorCode::DispatchRecordNotFound => "Dispatch record not found",
            ErrorCode::OfferTimeout => "Offer has timed out",
            ErrorCode::OfferNotPending => "Offer is no longer pending",
            ErrorCode::DriverNotFound => "Driver not found",
            ErrorCode::DispatchNotActive => "Order is not being dispatched",
            ErrorCode::NoDriverFound => "No driver found",
            ErrorCode::DriverLocked => "Driver account is temporarily locked",

            // Order
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::OrderNotInState => "Order is not in the required state",
            ErrorCode::InvalidSchedule => "Scheduled time is invalid",
            ErrorCode::DriverMismatch => "Driver is not assigned to this order",

            // Wallet
            ErrorCode::AccountNotFound => "Account not found",
            ErrorCode::InsufficientBalance => "Insufficient balance",
            ErrorCode::FreezeLimitExceeded => "Freeze limit exceeded",
            ErrorCode::InvalidTransactionType => "Invalid transaction type",

            // Payment / Withdrawal
            ErrorCode::NoChannelAvailable => "No payment channel available",
            ErrorCode::PaymentFailed => "Payment processing failed",
            ErrorCode::PaymentNotFound => "Payment not found",
            ErrorCode::WithdrawalNotFound => "Withdrawal not found",
            ErrorCode::WithdrawalNotInState => "Withdrawal is not in the required state",
            ErrorCode::DailyLimitExceeded => "Daily withdrawal limit exceeded",
            ErrorCode::MonthlyLimitExceeded => "Monthly withdrawal limit exceeded",

            // Concurrency
            ErrorCode::VersionConflict => "Account was modified concurrently",
            ErrorCode::DriverAlreadyAssigned => "Order already has a driver",

            // External
            ErrorCode::GatewayNetwork => "Payment gateway unreachable",
            ErrorCode::GatewayUnavailable => "Payment gateway temporarily unavailable",
            ErrorCode::GatewayDeclined => "Payment gateway declined the request",
            ErrorCode::GatewayTimeout => "Payment gateway timed out",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::InvariantViolation => "Invariant violation",
            ErrorCode::ConfigError => "Configuration error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            7 => Ok(ErrorCode::RequiredField),
            8 => Ok(ErrorCode::ValueOutOfRange),
            10 => Ok(ErrorCode::InvalidAmount),
            11 => Ok(ErrorCode::UnknownCurrency),
            12 => Ok(ErrorCode::CurrencyMismatch),
            13 => Ok(ErrorCode::InvalidCoordinate),
            14 => Ok(ErrorCode::UnknownVehicleClass),
            20 => Ok(ErrorCode::PermissionDenied),

            // Pricing
            1001 => Ok(ErrorCode::VehicleUnsupported),
            1002 => Ok(ErrorCode::ServiceAreaOutOfBounds),
            1003 => Ok(ErrorCode::PromoInvalid),
            1004 => Ok(ErrorCode::PromoExpired),
            1005 => Ok(ErrorCode::MinOrderNotMet),
            1006 => Ok(ErrorCode::CalcTimeout),
            1007 => Ok(ErrorCode::SnapshotNotFound),
            1008 => Ok(ErrorCode::SnapshotExpired),
            1009 => Ok(ErrorCode::SnapshotAlreadyBound),
            1010 => Ok(ErrorCode::PromotionNotFound),
            1011 => Ok(ErrorCode::PromotionUsageExceeded),
            1012 => Ok(ErrorCode::UserPromotionNotFound),
            1013 => Ok(ErrorCode::UserPromotionNotUsed),

            // Dispatch
            2001 => Ok(ErrorCode::DispatchRecordNotFound),
            2002 => Ok(ErrorCode::OfferTimeout),
            2003 => Ok(ErrorCode::OfferNotPending),
            2004 => Ok(ErrorCode::DriverNotFound),
            2005 => Ok(ErrorCode::DispatchNotActive),
            2006 => Ok(ErrorCode::NoDriverFound),
            2007 => Ok(ErrorCode::DriverLocked),

            // Order
            3001 => Ok(ErrorCode::OrderNotFound),
            3002 => Ok(ErrorCode::OrderNotInState),
            3003 => Ok(ErrorCode::InvalidSchedule),
            3004 => Ok(ErrorCode::DriverMismatch),

            // Wallet
            4001 => Ok(ErrorCode::AccountNotFound),
            4002 => Ok(ErrorCode::InsufficientBalance),
            4003 => Ok(ErrorCode::FreezeLimitExceeded),
            4004 => Ok(ErrorCode::InvalidTransactionType),

            // Payment / Withdrawal
            5001 => Ok(ErrorCode::NoChannelAvailable),
            5002 => Ok(ErrorCode::PaymentFailed),
            5003 => Ok(ErrorCode::PaymentNotFound),
            5101 => Ok(ErrorCode::WithdrawalNotFound),
            5102 => Ok(ErrorCode::WithdrawalNotInState),
            5103 => Ok(ErrorCode::DailyLimitExceeded),
            5104 => Ok(ErrorCode::MonthlyLimitExceeded),

            // Concurrency
            7001 => Ok(ErrorCode::VersionConflict),
            7002 => Ok(ErrorCode::DriverAlreadyAssigned),

            // External
            8001 => Ok(ErrorCode::GatewayNetwork),
            8002 => Ok(ErrorCode::GatewayUnavailable),
            8003 => Ok(ErrorCode::GatewayDeclined),
            8004 => Ok(ErrorCode::GatewayTimeout),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::InvariantViolation),
            9004 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::PromoExpired.code(), 1004);
        assert_eq!(ErrorCode::OfferTimeout.code(), 2002);
        assert_eq!(ErrorCode::OrderNotInState.code(), 3002);
        assert_eq!(ErrorCode::InsufficientBalance.code(), 4002);
        assert_eq!(ErrorCode::DailyLimitExceeded.code(), 5103);
        assert_eq!(ErrorCode::VersionConflict.code(), 7001);
        assert_eq!(ErrorCode::GatewayNetwork.code(), 8001);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_try_from_round_trips_every_known_code() {
        for value in 0..10_000u16 {
            if let Ok(code) = ErrorCode::try_from(value) {
                assert_eq!(code.code(), value);
            }
        }
        assert_eq!(ErrorCode::try_from(6), Err(InvalidErrorCode(6)));
        assert_eq!(ErrorCode::try_from(9999), Err(InvalidErrorCode(9999)));
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&ErrorCode::SnapshotExpired).unwrap();
        assert_eq!(json, "1008");
        let code: ErrorCode = serde_json::from_str("7002").unwrap();
        assert_eq!(code, ErrorCode::DriverAlreadyAssigned);
        assert!(serde_json::from_str::<ErrorCode>("6").is_err());
    }

    #[test]
    fn test_keys_and_retryable() {
        assert_eq!(ErrorCode::InsufficientBalance.key(), "insufficient_balance");
        assert_eq!(ErrorCode::DriverAlreadyAssigned.key(), "driver_already_assigned");
        assert!(ErrorCode::VersionConflict.is_retryable());
        assert!(ErrorCode::GatewayNetwork.is_retryable());
        assert!(!ErrorCode::GatewayDeclined.is_retryable());
        assert!(!ErrorCode::InsufficientBalance.is_retryable());
    }
}
