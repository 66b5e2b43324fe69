//! Pricing API
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/pricing/quote | POST | 报价 (生成快照) |
//! | /api/pricing/snapshots/{id} | GET | 查询快照 |
//! | /api/pricing/rules | POST | 新建计价规则 |
//! | /api/pricing/promotions | POST | 新建优惠模板 |
//! | /api/pricing/promotions/issue | POST | 发券 |
//! | /api/pricing/user-promotions/{id}/reset | POST | 撤销使用 |
//! | /api/pricing/users/{user_id}/promotions | GET | 用户券列表 |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::core::ServerState;
use crate::utils::AppResult;
use shared::models::{
    IssuePromotionRequest, PriceRule, PriceRuleCreate, PriceSnapshot, Promotion, PromotionCreate,
    QuoteRequest, UserPromotion,
};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/pricing/quote", post(quote))
        .route("/api/pricing/snapshots/{id}", get(get_snapshot))
        .route("/api/pricing/rules", post(create_rule))
        .route("/api/pricing/promotions", post(create_promotion))
        .route("/api/pricing/promotions/issue", post(issue_promotion))
        .route("/api/pricing/user-promotions/{id}/reset", post(reset_user_promotion))
        .route("/api/pricing/users/{user_id}/promotions", get(list_user_promotions))
}

/// POST /api/pricing/quote
pub async fn quote(
    State(state): State<ServerState>,
    Json(req): Json<QuoteRequest>,
) -> AppResult<Json<PriceSnapshot>> {
    Ok(Json(state.pricing.quote(req).await?))
}

/// GET /api/pricing/snapshots/{id}
pub async fn get_snapshot(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<PriceSnapshot>> {
    Ok(Json(state.pricing.get_snapshot(&id).await?))
}

pub async fn create_rule(
    State(state): State<ServerState>,
    Json(payload): Json<PriceRuleCreate>,
) -> AppResult<Json<PriceRule>> {
    Ok(Json(state.pricing.create_rule(payload).await?))
}

pub async fn create_promotion(
    State(state): State<ServerState>,
    Json(payload): Json<PromotionCreate>,
) -> AppResult<Json<Promotion>> {
    Ok(Json(state.pricing.create_promotion(payload).await?))
}

pub async fn issue_promotion(
    State(state): State<ServerState>,
    Json(payload): Json<IssuePromotionRequest>,
) -> AppResult<Json<UserPromotion>> {
    Ok(Json(state.pricing.issue_promotion(payload).await?))
}

pub async fn reset_user_promotion(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserPromotion>> {
    Ok(Json(state.pricing.reset_user_promotion(&id).await?))
}

pub async fn list_user_promotions(
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<UserPromotion>>> {
    Ok(Json(state.pricing.list_user_promotions(&user_id).await?))
}
