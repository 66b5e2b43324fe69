//! Driver API
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/drivers | POST | 注册 / 更新司机 |
//! | /api/drivers/{id} | GET | 司机当前投影 |
//! | /api/drivers/{id}/location | PUT | 上报位置 |
//! | /api/drivers/{id}/status | PUT | online / busy / offline |
//! | /api/drivers/{id}/login-attempts | POST | 登录结果上报, 连续失败锁定 |
//! | /api/dispatch/{order_id}/respond | POST | 接单 / 拒单 |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use serde::Deserialize;
use validator::Validate;

use super::validated;
use crate::core::ServerState;
use crate::utils::{AppError, AppResult};
use shared::geo::Coordinate;
use shared::models::{
    DispatchRecord, DriverAccountStatus, DriverProfile, DriverUpsert, LocationUpdate, LoginAttempt,
    OfferResponse, VehicleCategory, VehicleLevel, WorkStatusUpdate,
};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/drivers", post(register))
        .route("/api/drivers/{id}", get(get_by_id))
        .route("/api/drivers/{id}/location", put(update_location))
        .route("/api/drivers/{id}/status", put(set_status))
        .route("/api/drivers/{id}/login-attempts", post(login_attempt))
        .route("/api/dispatch/{order_id}/respond", post(respond))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterDriver {
    #[validate(length(min = 1, max = 64))]
    pub driver_id: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub vehicle_category: VehicleCategory,
    pub vehicle_level: VehicleLevel,
    #[serde(default)]
    pub verified: bool,
    pub location: Option<Coordinate>,
    #[validate(range(min = 0.0, max = 5.0))]
    pub rating: Option<f64>,
    #[validate(range(min = 1, max = 5))]
    pub max_queue_capacity: Option<u32>,
}

impl From<RegisterDriver> for DriverUpsert {
    fn from(r: RegisterDriver) -> Self {
        DriverUpsert {
            driver_id: r.driver_id,
            name: r.name,
            vehicle_category: r.vehicle_category,
            vehicle_level: r.vehicle_level,
            account_status: DriverAccountStatus::Active,
            verified: r.verified,
            location: r.location,
            rating: r.rating.unwrap_or(5.0),
            max_queue_capacity: r.max_queue_capacity.unwrap_or(1),
        }
    }
}

/// POST /api/drivers
pub async fn register(
    State(state): State<ServerState>,
    Json(payload): Json<RegisterDriver>,
) -> AppResult<Json<DriverProfile>> {
    let payload = validated(payload)?;
    Ok(Json(state.dispatch.index().upsert(payload.into()).await?))
}

pub async fn get_by_id(State(state): State<ServerState>, Path(id): Path<String>) -> AppResult<Json<DriverProfile>> {
    state
        .dispatch
        .index()
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Driver {id}")))
}

/// PUT /api/drivers/{id}/location
pub async fn update_location(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<LocationUpdate>,
) -> AppResult<Json<DriverProfile>> {
    let location = Coordinate::new(payload.lat, payload.lng);
    Ok(Json(state.dispatch.index().update_location(&id, location).await?))
}

/// PUT /api/drivers/{id}/status
pub async fn set_status(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkStatusUpdate>,
) -> AppResult<Json<DriverProfile>> {
    Ok(Json(state.dispatch.index().set_work_status(&id, payload.status).await?))
}

/// POST /api/drivers/{id}/login-attempts
pub async fn login_attempt(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<LoginAttempt>,
) -> AppResult<Json<DriverProfile>> {
    let index = state.dispatch.index();
    let profile = if payload.succeeded {
        index.record_login_success(&id).await?
    } else {
        index.record_login_failure(&id).await?
    };
    Ok(Json(profile))
}

/// POST /api/dispatch/{order_id}/respond
pub async fn respond(
    State(state): State<ServerState>,
    Path(order_id): Path<String>,
    Json(payload): Json<OfferResponse>,
) -> AppResult<Json<DispatchRecord>> {
    Ok(Json(state.dispatch.respond(&order_id, payload).await?))
}
