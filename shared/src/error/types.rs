//! AppError and the JSON error envelope

use super::category::ErrorCategory;
use super::codes::ErrorCode;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub type Details = HashMap<String, Value>;

/// Service-boundary error: a stable code, a message and optional details
///
/// Layer errors (repository, pricing, dispatch, wallet) are converted into
/// this type before they reach a handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    /// Offending field, ids, retry hint
    pub details: Option<Details>,
}

impl AppError {
    /// Error carrying the code's default message
    pub fn new(code: ErrorCode) -> Self {
        Self::with_message(code, code.message())
    }

    /// Retryable codes get `retry: true` up front so clients can back off
    /// without a lookup table.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        let details = code
            .is_retryable()
            .then(|| Details::from([("retry".to_string(), Value::Bool(true))]));
        Self {
            code,
            message: message.into(),
            details,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Details::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    pub fn invalid_field(field: &str, msg: impl Into<String>) -> Self {
        Self::validation(msg).with_detail("field", field)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{resource} not found")).with_detail("resource", resource)
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::with_message(ErrorCode::AlreadyExists, format!("{resource} already exists"))
            .with_detail("resource", resource)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DatabaseError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    /// A state that must never exist was observed (ledger drift, double capture)
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvariantViolation, msg)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON envelope
///
/// Success: `{"code":0,"message":"OK","data":...}`.
/// Failure: `{"code":5103,"error":"daily_limit_exceeded","message":...,"details":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: Some(0),
            error: None,
            message: "OK".into(),
            data: Some(data),
            details: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(err: &AppError) -> Self {
        Self {
            code: Some(err.code.code()),
            error: Some(err.code.key().into()),
            message: err.message.clone(),
            data: None,
            details: err.details.clone(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        // 客户端错误只回给调用方，系统与外部错误需要留痕
        match self.category() {
            ErrorCategory::Internal => {
                tracing::error!(code = %self.code, error = self.code.key(), message = %self.message, "Request failed")
            }
            ErrorCategory::External => {
                tracing::warn!(code = %self.code, error = self.code.key(), message = %self.message, "Upstream failure")
            }
            _ => {}
        }
        (self.http_status(), axum::Json(ApiResponse::error(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_message_comes_from_code() {
        let err = AppError::new(ErrorCode::OrderNotFound);
        assert_eq!(err.message, "Order not found");
        assert_eq!(err.to_string(), "Order not found");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_retryable_codes_carry_retry_hint() {
        let err = AppError::new(ErrorCode::VersionConflict);
        assert_eq!(err.details.unwrap()["retry"], true);

        let err = AppError::new(ErrorCode::InsufficientBalance);
        assert!(err.details.is_none());
    }

    #[test]
    fn test_invalid_field_names_the_field() {
        let err = AppError::invalid_field("pickup.lat", "latitude out of range");
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.details.unwrap()["field"], "pickup.lat");
    }

    #[test]
    fn test_error_envelope_carries_key_and_details() {
        let err = AppError::new(ErrorCode::DailyLimitExceeded).with_detail("limit", "500000");
        let response = ApiResponse::error(&err);

        assert_eq!(response.code, Some(5103));
        assert_eq!(response.error.as_deref(), Some("daily_limit_exceeded"));
        assert!(response.data.is_none());
        assert_eq!(response.details.unwrap()["limit"], "500000");
    }

    #[test]
    fn test_success_envelope_omits_error() {
        let json = serde_json::to_value(ApiResponse::success("hello")).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"], "hello");
        assert!(json.get("error").is_none());

        let back: ApiResponse<String> = serde_json::from_value(json).unwrap();
        assert_eq!(back.data.as_deref(), Some("hello"));
    }
}
