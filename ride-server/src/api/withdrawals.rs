//! Withdrawal API
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/withdrawals | POST | 申请提现 (冻结金额 + 手续费) |
//! | /api/withdrawals/{id} | GET | 查询 |
//! | /api/withdrawals/by-account/{account_id} | GET | 账户提现列表 |
//! | /api/withdrawals/{id}/approve | POST | 审核通过 |
//! | /api/withdrawals/{id}/reject | POST | 驳回 (解冻) |
//! | /api/withdrawals/{id}/cancel | POST | 用户取消 (解冻) |
//! | /api/withdrawals/{id}/process | POST | 提交网关打款 |
//! | /api/withdrawals/{id}/fail | POST | 人工置失败 (解冻) |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use super::RequestActor;
use crate::core::ServerState;
use crate::utils::AppResult;
use shared::models::{Withdrawal, WithdrawalDecision, WithdrawalRequest};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/withdrawals", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(request))
        .route("/{id}", get(get_by_id))
        .route("/by-account/{account_id}", get(list_by_account))
        .route("/{id}/approve", post(approve))
        .route("/{id}/reject", post(reject))
        .route("/{id}/cancel", post(cancel))
        .route("/{id}/process", post(process))
        .route("/{id}/fail", post(fail))
}

pub async fn request(
    State(state): State<ServerState>,
    RequestActor(ctx): RequestActor,
    Json(payload): Json<WithdrawalRequest>,
) -> AppResult<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.request(payload, &ctx.actor).await?))
}

pub async fn get_by_id(State(state): State<ServerState>, Path(id): Path<String>) -> AppResult<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.get(&id).await?))
}

pub async fn list_by_account(
    State(state): State<ServerState>,
    Path(account_id): Path<String>,
) -> AppResult<Json<Vec<Withdrawal>>> {
    Ok(Json(state.withdrawals.list(&account_id).await?))
}

pub async fn approve(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.approve(&id, &ctx.actor).await?))
}

pub async fn reject(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
    payload: Option<Json<WithdrawalDecision>>,
) -> AppResult<Json<Withdrawal>> {
    let reason = payload.and_then(|Json(d)| d.reason);
    Ok(Json(state.withdrawals.reject(&id, reason, &ctx.actor).await?))
}

pub async fn cancel(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.cancel(&id, &ctx.actor).await?))
}

pub async fn process(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
) -> AppResult<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.process(&id, &ctx.actor).await?))
}

pub async fn fail(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RequestActor(ctx): RequestActor,
    payload: Option<Json<WithdrawalDecision>>,
) -> AppResult<Json<Withdrawal>> {
    let reason = payload.and_then(|Json(d)| d.reason);
    Ok(Json(state.withdrawals.fail(&id, reason, &ctx.actor).await?))
}
