//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// How the caller should treat an error
///
/// - Validation: the request itself is wrong (0xxx)
/// - BusinessRule: well-formed but not permitted right now (1xxx-6xxx)
/// - Concurrency: lost a race, retry (7xxx)
/// - External: a third party failed (8xxx)
/// - Internal: a bug or infrastructure failure (9xxx)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    BusinessRule,
    Concurrency,
    External,
    Internal,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..1000 => Self::Validation,
            1000..7000 => Self::BusinessRule,
            7000..8000 => Self::Concurrency,
            8000..9000 => Self::External,
            _ => Self::Internal,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::BusinessRule => "business_rule",
            Self::Concurrency => "concurrency",
            Self::External => "external",
            Self::Internal => "internal",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }

    /// Domain prefix used in logs (`pricing`, `wallet`, ...)
    pub fn domain(&self) -> &'static str {
        match self.code() {
            0..1000 => "general",
            1000..2000 => "pricing",
            2000..3000 => "dispatch",
            3000..4000 => "order",
            4000..5000 => "wallet",
            5000..6000 => "payment",
            7000..8000 => "concurrency",
            8000..9000 => "gateway",
            _ => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(ErrorCategory::from_code(0), ErrorCategory::Validation);
        assert_eq!(ErrorCategory::from_code(14), ErrorCategory::Validation);
        assert_eq!(ErrorCategory::from_code(1008), ErrorCategory::BusinessRule);
        assert_eq!(ErrorCategory::from_code(4002), ErrorCategory::BusinessRule);
        assert_eq!(ErrorCategory::from_code(5103), ErrorCategory::BusinessRule);
        assert_eq!(ErrorCategory::from_code(7001), ErrorCategory::Concurrency);
        assert_eq!(ErrorCategory::from_code(8003), ErrorCategory::External);
        assert_eq!(ErrorCategory::from_code(9001), ErrorCategory::Internal);
        assert_eq!(ErrorCategory::from_code(10000), ErrorCategory::Internal);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(
            ErrorCode::InvalidCoordinate.category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ErrorCode::InsufficientBalance.category(),
            ErrorCategory::BusinessRule
        );
        assert_eq!(
            ErrorCode::DriverAlreadyAssigned.category(),
            ErrorCategory::Concurrency
        );
        assert_eq!(ErrorCode::GatewayTimeout.category(), ErrorCategory::External);
        assert_eq!(
            ErrorCode::InvariantViolation.category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_domain() {
        assert_eq!(ErrorCode::SnapshotExpired.domain(), "pricing");
        assert_eq!(ErrorCode::OfferTimeout.domain(), "dispatch");
        assert_eq!(ErrorCode::WithdrawalNotFound.domain(), "payment");
    }
}
