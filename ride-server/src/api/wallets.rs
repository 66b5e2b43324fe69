//! Wallet API

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use validator::Validate;

use super::validated;
use crate::core::ServerState;
use crate::utils::AppResult;
use crate::wallet::service::Reconciliation;
use shared::models::{OpenAccountRequest, UserAccount, Wallet, WalletTransaction};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/wallets", post(open))
        .route("/api/wallets/{account_id}", get(get_wallet))
        .route("/api/wallets/{account_id}/transactions", get(transactions))
        .route("/api/wallets/{account_id}/reconcile", get(reconcile))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransactionsQuery {
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
}

/// POST /api/wallets - 开户 (同一用户同类型幂等)
pub async fn open(
    State(state): State<ServerState>,
    Json(payload): Json<OpenAccountRequest>,
) -> AppResult<Json<UserAccount>> {
    Ok(Json(state.wallet.open_account(payload).await?))
}

/// GET /api/wallets/{account_id} - 余额 + 限额视图
pub async fn get_wallet(
    State(state): State<ServerState>,
    Path(account_id): Path<String>,
) -> AppResult<Json<Wallet>> {
    Ok(Json(state.wallet.get_wallet(&account_id).await?))
}

/// GET /api/wallets/{account_id}/transactions?limit=
pub async fn transactions(
    State(state): State<ServerState>,
    Path(account_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> AppResult<Json<Vec<WalletTransaction>>> {
    let query = validated(query)?;
    Ok(Json(
        state
            .wallet
            .list_transactions(&account_id, query.limit)
            .await?,
    ))
}

pub async fn reconcile(
    State(state): State<ServerState>,
    Path(account_id): Path<String>,
) -> AppResult<Json<Reconciliation>> {
    Ok(Json(state.wallet.reconcile(&account_id).await?))
}
