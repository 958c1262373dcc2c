//! Purchase and transaction-history handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, PurchaseBody, TransactionView, created, ok};
use crate::models::AuditInfo;
use crate::purchase::PurchaseRequest;
use crate::user_auth::AuthUser;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Execute a purchase: hold, price, charge, commit or roll back.
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    request_body = PurchaseBody,
    responses(
        (status = 201, description = "Purchase confirmed", body = TransactionView),
        (status = 402, description = "Payment declined"),
        (status = 409, description = "Seats unavailable or hold lost"),
        (status = 422, description = "Sales window closed"),
    ),
    security(("bearer" = [])),
    tag = "transactions"
)]
pub async fn purchase(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<PurchaseBody>,
) -> ApiResult<TransactionView> {
    let request = PurchaseRequest {
        user,
        function: body.function,
        seats: body.seats,
        method: body.method,
        promo: body.promo,
        audit: AuditInfo::default(),
    };
    match state.coordinator.purchase(request).await {
        Ok(tx) => created(TransactionView::from(&tx)),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Fetch one transaction (owner only).
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Transaction", body = TransactionView),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Unknown transaction"),
    ),
    security(("bearer" = [])),
    tag = "transactions"
)]
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<TransactionView> {
    match state.coordinator.get(user, id).await {
        Ok(tx) => ok(TransactionView::from(&tx)),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Cancel a pending/processing transaction (owner only).
#[utoipa::path(
    post,
    path = "/api/v1/transactions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Transaction cancelled", body = TransactionView),
        (status = 409, description = "Not cancellable in its current state"),
    ),
    security(("bearer" = [])),
    tag = "transactions"
)]
pub async fn cancel_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<TransactionView> {
    match state.coordinator.cancel(user, id).await {
        Ok(tx) => ok(TransactionView::from(&tx)),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// The caller's transactions, most recent first.
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    responses((status = 200, description = "Caller's transactions", body = [TransactionView])),
    security(("bearer" = [])),
    tag = "transactions"
)]
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<Vec<TransactionView>> {
    let limit = query.limit.unwrap_or(50).min(200);
    match state.coordinator.list_for_user(user, limit).await {
        Ok(txs) => ok(txs.iter().map(TransactionView::from).collect()),
        Err(e) => ApiError::from(e).into_err(),
    }
}
