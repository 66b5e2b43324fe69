//! Payment gateway handoff
//!
//! [`PaymentGateway`] is the boundary to card / mobile-money providers.
//! Every call carries an idempotency key (the payment or withdrawal id), so
//! [`call_with_retry`] may repeat a call safely.

use crate::core::config::GatewayConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::money::Currency;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure classes a provider error maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RetryableNetwork,
    RetryableGateway,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway network error: {0}")]
    Network(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway declined: {0}")]
    Declined(String),

    #[error("gateway call timed out after {0}ms")]
    Timeout(u64),
}

impl GatewayError {
    pub fn category(&self) -> FailureCategory {
        match self {
            GatewayError::Network(_) | GatewayError::Timeout(_) => FailureCategory::RetryableNetwork,
            GatewayError::Unavailable(_) => FailureCategory::RetryableGateway,
            GatewayError::Declined(_) => FailureCategory::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() != FailureCategory::Terminal
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let code = match err {
            GatewayError::Network(_) => ErrorCode::GatewayNetwork,
            GatewayError::Unavailable(_) => ErrorCode::GatewayUnavailable,
            GatewayError::Declined(_) => ErrorCode::GatewayDeclined,
            GatewayError::Timeout(_) => ErrorCode::GatewayTimeout,
        };
        AppError::with_message(code, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub channel_code: String,
    pub channel_account_id: String,
    pub method: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresCapture,
    Succeeded,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayIntent {
    /// Provider-side reference
    pub intent_id: String,
    pub amount: Decimal,
    pub status: IntentStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: &GatewayRequest) -> GatewayResult<GatewayIntent>;

    async fn capture(&self, intent_id: &str, idempotency_key: &str) -> GatewayResult<GatewayIntent>;

    async fn refund(&self, intent_id: &str, amount: Decimal, idempotency_key: &str) -> GatewayResult<GatewayIntent>;

    async fn query_status(&self, intent_id: &str) -> GatewayResult<GatewayIntent>;
}

/// Exponential backoff: base * 2^attempt, capped
pub fn backoff_delay(config: &GatewayConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(config.backoff_base_ms.saturating_mul(factor).min(config.backoff_cap_ms))
}

/// Adds up to 50% random jitter
fn jittered(delay: Duration) -> Duration {
    use rand::Rng;
    let ms = delay.as_millis() as u64;
    Duration::from_millis(ms + rand::thread_rng().gen_range(0..=ms / 2))
}

/// Run `call` with a per-attempt timeout, retrying retryable failures
///
/// Terminal failures return immediately; the last retryable error is
/// returned once `max_retries` is spent.
pub async fn call_with_retry<T, F, Fut>(
    config: &GatewayConfig,
    operation: &str,
    idempotency_key: &str,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let budget = Duration::from_millis(config.attempt_timeout_ms);
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(budget, call()).await {
            Ok(r) => r,
            Err(_) => Err(GatewayError::Timeout(config.attempt_timeout_ms)),
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = jittered(backoff_delay(config, attempt));
                tracing::warn!(
                    operation,
                    idempotency_key,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Gateway call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation, idempotency_key, attempts = attempt + 1, error = %e, "Gateway call failed");
                return Err(e);
            }
        }
    }
}

/// Create and capture in one go; the usual charge / payout path
pub async fn charge(
    gateway: &dyn PaymentGateway,
    config: &GatewayConfig,
    req: &GatewayRequest,
) -> GatewayResult<GatewayIntent> {
    let key = req.idempotency_key.as_str();
    let intent = call_with_retry(config, "create_intent", key, move || gateway.create_intent(req)).await?;
    if intent.status == IntentStatus::Succeeded {
        return Ok(intent);
    }
    let intent_id = intent.intent_id.as_str();
    call_with_retry(config, "capture", key, move || gateway.capture(intent_id, key)).await
}

// =============================================================================
// Sandbox
// =============================================================================

/// In-process gateway for development and tests
///
/// Intents are keyed by idempotency key, so a replayed call returns the
/// first result. Failures and provider references can be scripted.
#[derive(Debug, Default)]
pub struct SandboxGateway {
    intents: Mutex<HashMap<String, GatewayIntent>>,
    /// intent_id -> idempotency key
    keys: Mutex<HashMap<String, String>>,
    failures: Mutex<VecDeque<GatewayError>>,
    references: Mutex<VecDeque<String>>,
    calls: Mutex<u32>,
    latency: Mutex<Duration>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next calls fail with these errors, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.failures.lock().extend(errors);
    }

    /// Provider reference handed to the next created intent
    pub fn push_reference(&self, reference: impl Into<String>) {
        self.references.lock().push_back(reference.into());
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }

    /// Every later call sleeps this long before answering
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn enter(&self) -> GatewayResult<()> {
        *self.calls.lock() += 1;
        match self.failures.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn intent(&self, intent_id: &str) -> GatewayResult<GatewayIntent> {
        let keys = self.keys.lock();
        let key = keys
            .get(intent_id)
            .ok_or_else(|| GatewayError::Declined(format!("unknown intent {intent_id}")))?;
        self.intents
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| GatewayError::Declined(format!("unknown intent {intent_id}")))
    }

    fn set_status(&self, intent_id: &str, status: IntentStatus) -> GatewayResult<GatewayIntent> {
        let key = self
            .keys
            .lock()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::Declined(format!("unknown intent {intent_id}")))?;
        let mut intents = self.intents.lock();
        let intent = intents
            .get_mut(&key)
            .ok_or_else(|| GatewayError::Declined(format!("unknown intent {intent_id}")))?;
        intent.status = status;
        Ok(intent.clone())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_intent(&self, req: &GatewayRequest) -> GatewayResult<GatewayIntent> {
        self.delay().await;
        self.enter()?;
        if req.amount <= Decimal::ZERO {
            return Err(GatewayError::Declined("amount must be positive".into()));
        }
        if let Some(existing) = self.intents.lock().get(&req.idempotency_key) {
            return Ok(existing.clone());
        }
        let intent_id = self
            .references
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("SBX-{}", req.idempotency_key));
        let intent = GatewayIntent {
            intent_id: intent_id.clone(),
            amount: req.amount,
            status: IntentStatus::RequiresCapture,
        };
        self.keys.lock().insert(intent_id, req.idempotency_key.clone());
        self.intents
            .lock()
            .insert(req.idempotency_key.clone(), intent.clone());
        Ok(intent)
    }

    async fn capture(&self, intent_id: &str, _idempotency_key: &str) -> GatewayResult<GatewayIntent> {
        self.delay().await;
        self.enter()?;
        let current = self.intent(intent_id)?;
        match current.status {
            IntentStatus::RequiresCapture => self.set_status(intent_id, IntentStatus::Succeeded),
            IntentStatus::Succeeded => Ok(current),
            IntentStatus::Refunded => Err(GatewayError::Declined(format!("{intent_id} was refunded"))),
        }
    }

    async fn refund(&self, intent_id: &str, amount: Decimal, _idempotency_key: &str) -> GatewayResult<GatewayIntent> {
        self.delay().await;
        self.enter()?;
        let current = self.intent(intent_id)?;
        if amount > current.amount {
            return Err(GatewayError::Declined("refund exceeds captured amount".into()));
        }
        match current.status {
            IntentStatus::Succeeded => self.set_status(intent_id, IntentStatus::Refunded),
            IntentStatus::Refunded => Ok(current),
            IntentStatus::RequiresCapture => Err(GatewayError::Declined(format!("{intent_id} not captured"))),
        }
    }

    async fn query_status(&self, intent_id: &str) -> GatewayResult<GatewayIntent> {
        self.delay().await;
        self.enter()?;
        self.intent(intent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use rust_decimal_macros::dec;

    fn request(key: &str) -> GatewayRequest {
        GatewayRequest {
            idempotency_key: key.into(),
            amount: dec!(2050),
            currency: Currency::Rwf,
            channel_code: "MOMO".into(),
            channel_account_id: "MOMO-RW-1".into(),
            method: "mobile_money".into(),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = Config::for_tests().gateway;
        assert_eq!(backoff_delay(&cfg, 0), Duration::from_millis(5));
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(&cfg, 10), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let cfg = Config::for_tests().gateway;
        let gw = SandboxGateway::new();
        gw.fail_next([
            GatewayError::Network("reset".into()),
            GatewayError::Unavailable("503".into()),
        ]);
        let intent = charge(&gw, &cfg, &request("PAY1")).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Succeeded);
        // two failures + create + capture
        assert_eq!(gw.call_count(), 4);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let cfg = Config::for_tests().gateway;
        let gw = SandboxGateway::new();
        gw.fail_next([GatewayError::Declined("card blocked".into())]);
        let err = charge(&gw, &cfg, &request("PAY1")).await.unwrap_err();
        assert_eq!(err.category(), FailureCategory::Terminal);
        assert_eq!(gw.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let cfg = Config::for_tests().gateway;
        let gw = SandboxGateway::new();
        gw.fail_next((0..10).map(|_| GatewayError::Network("down".into())));
        let err = charge(&gw, &cfg, &request("PAY1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(gw.call_count(), cfg.max_retries + 1);
    }

    #[tokio::test]
    async fn test_idempotent_create_and_refund() {
        let cfg = Config::for_tests().gateway;
        let gw = SandboxGateway::new();
        gw.push_reference("EX-XYZ");
        let first = charge(&gw, &cfg, &request("PAY1")).await.unwrap();
        let replay = gw.create_intent(&request("PAY1")).await.unwrap();
        assert_eq!(first.intent_id, "EX-XYZ");
        assert_eq!(replay.intent_id, "EX-XYZ");

        let refunded = gw.refund("EX-XYZ", dec!(2050), "PAY1-refund").await.unwrap();
        assert_eq!(refunded.status, IntentStatus::Refunded);
        assert_eq!(gw.query_status("EX-XYZ").await.unwrap().status, IntentStatus::Refunded);
    }
}
