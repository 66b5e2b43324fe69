//! Order API
//!
//! Driver-side transitions (arrive / start / complete) take the driver id
//! from the `X-Actor-Id` header.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use super::RequestActor;
use crate::core::ServerState;
use crate::utils::AppResult;
use shared::models::{DispatchRecord, Order, OrderCreate, OrderHistoryLog, OrderTransitionRequest, Payment};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/orders", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", get(get_by_id).delete(delete_cancelled))
        .route("/{id}/history", get(history))
        .route("/{id}/payments", get(payments))
        .route("/{id}/dispatch-records", get(dispatch_records))
        .route("/{id}/cancel", post(cancel))
        .route("/{id}/arrive", post(arrive))
        .route("/{id}/start", post(start))
        .route("/{id}/complete", post(complete))
        .route("/{id}/refund", post(refund))
}

/// POST /api/orders - 下单 (锁定快照, 即时单自动派单)
pub async fn create(
    State(state): State<ServerState>,
    RequestActor(ctx): RequestActor,
    Json(payload): Json<OrderCreate>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.create(payload, &ctx).await?))
}

pub async fn get_by_id(State(state): State<ServerState>, Path(id): Path<String>) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.get(&id).await?))
}

/// GET /api/orders/{id}/history - 审计链, 最早的在前
pub async fn history(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<OrderHistoryLog>>> {
    Ok(Json(state.orders.history(&id).await?))
}

pub async fn payments(State(state): State<ServerState>, Path(id): Path<String>) -> AppResult<Json<Vec<Payment>>> {
    Ok(Json(state.orders.payments(&id).await?))
}

/// DELETE /api/orders/{id} - 仅限已取消订单
pub async fn delete_cancelled(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<()>> {
    state.orders.delete(&id, &ctx).await?;
    Ok(Json(()))
}

pub async fn dispatch_records(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<DispatchRecord>>> {
    Ok(Json(state.orders.dispatch_records(&id).await?))
}

pub async fn cancel(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
    payload: Option<Json<OrderTransitionRequest>>,
) -> AppResult<Json<Order>> {
    let reason = payload.and_then(|Json(p)| p.reason);
    Ok(Json(state.orders.cancel(&id, reason, &ctx).await?))
}

pub async fn arrive(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<Order>> {
    let driver_id = ctx.actor.id.clone();
    Ok(Json(state.orders.arrive(&id, &driver_id, &ctx).await?))
}

pub async fn start(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<Order>> {
    let driver_id = ctx.actor.id.clone();
    Ok(Json(state.orders.start(&id, &driver_id, &ctx).await?))
}

pub async fn complete(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<Order>> {
    let driver_id = ctx.actor.id.clone();
    Ok(Json(state.orders.complete(&id, &driver_id, &ctx).await?))
}

pub async fn refund(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
    payload: Option<Json<OrderTransitionRequest>>,
) -> AppResult<Json<Order>> {
    let reason = payload.and_then(|Json(p)| p.reason);
    Ok(Json(state.orders.refund(&id, reason, &ctx).await?))
}
