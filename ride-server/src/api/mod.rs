//! API 路由模块
//!
//! 薄 JSON 层，业务都在服务里。
//!
//! - [`health`] - 健康检查
//! - [`pricing`] - 报价、快照、计价规则与优惠券
//! - [`orders`] - 订单状态流转与查询
//! - [`drivers`] - 司机注册、位置、在线状态、接单应答
//! - [`wallets`] - 钱包开户与账本查询
//! - [`withdrawals`] - 提现流程
//! - [`payments`] - 支付路由

pub mod actor;
pub mod drivers;
pub mod health;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod wallets;
pub mod withdrawals;

pub use actor::RequestActor;

use crate::core::ServerState;
use crate::utils::AppError;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use http::{HeaderName, HeaderValue};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// 请求日志: request id, method, path, status, latency
async fn log_request(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    tracing::info!(
        target: "http_access",
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// All routes, no middleware, no state
pub fn build_router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(pricing::router())
        .merge(orders::router())
        .merge(drivers::router())
        .merge(wallets::router())
        .merge(withdrawals::router())
        .merge(payments::router())
}

/// Routes plus middleware; used by the server and by oneshot tests
pub fn build_app() -> Router<ServerState> {
    build_router()
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            REQUEST_ID_HEADER,
        )))
        // outermost: the id exists before logging and propagation see the request
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static(REQUEST_ID_HEADER),
            XRequestId,
        ))
}

/// Run `validator` rules on a payload
pub(crate) fn validated<T: Validate>(payload: T) -> Result<T, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    Ok(payload)
}
