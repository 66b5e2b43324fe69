//! Payment routing API

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::ServerState;
use crate::utils::AppResult;
use shared::models::{PaymentChannel, PaymentRouter, RouteRequest, RouteSelection};
use shared::money::Currency;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/payments/methods", get(methods))
        .route("/api/payments/route", post(route))
        .route("/api/payments/channels", post(save_channel))
        .route("/api/payments/routers", post(add_router))
}

#[derive(Debug, Deserialize)]
pub struct MethodsQuery {
    pub currency: Currency,
    pub amount: Decimal,
    pub region: Option<String>,
}

/// GET /api/payments/methods?currency=&amount=&region=
pub async fn methods(
    State(state): State<ServerState>,
    Query(q): Query<MethodsQuery>,
) -> AppResult<Json<Vec<String>>> {
    Ok(Json(
        state
            .router
            .available_methods(q.currency, q.amount, q.region.as_deref())
            .await?,
    ))
}

/// POST /api/payments/route
pub async fn route(
    State(state): State<ServerState>,
    Json(req): Json<RouteRequest>,
) -> AppResult<Json<RouteSelection>> {
    Ok(Json(state.router.route(&req).await?))
}

pub async fn save_channel(
    State(state): State<ServerState>,
    Json(channel): Json<PaymentChannel>,
) -> AppResult<Json<PaymentChannel>> {
    Ok(Json(state.router.save_channel(channel).await?))
}

pub async fn add_router(
    State(state): State<ServerState>,
    Json(router): Json<PaymentRouter>,
) -> AppResult<Json<PaymentRouter>> {
    Ok(Json(state.router.add_router(router).await?))
}
