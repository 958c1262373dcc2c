//! Seat-map, hold and ranking handlers.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::with_retry;
use crate::events::consumers::FILM_RANKING_KEY;
use crate::gateway::state::AppState;
use crate::gateway::types::{
    ApiError, ApiResult, HoldRequest, HoldResponse, RankingEntry, ReleaseResponse, ok,
};
use crate::models::{Function, SeatMap};
use crate::user_auth::AuthUser;

async fn load_function(state: &AppState, id: Uuid) -> Result<Function, ApiError> {
    with_retry(|| state.store.functions.find_by_id(id))
        .await
        .map_err(|e| ApiError::from(crate::error::EngineError::from(e)))?
        .ok_or_else(|| {
            ApiError::new(
                axum::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("function {id} not found"),
            )
        })
}

fn parse_seats(raw: &[String]) -> Result<Vec<crate::core_types::SeatCode>, ApiError> {
    raw.iter()
        .map(|s| crate::core_types::SeatCode::parse(s))
        .collect::<Result<_, _>>()
        .map_err(ApiError::from)
}

/// Current seat grid for a function.
#[utoipa::path(
    get,
    path = "/api/v1/functions/{id}/seats",
    params(("id" = Uuid, Path, description = "Function id")),
    responses(
        (status = 200, description = "Point-in-time seat map with occupancy"),
        (status = 404, description = "Unknown function"),
    ),
    tag = "functions"
)]
pub async fn seat_map(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<SeatMap> {
    let function = match load_function(&state, id).await {
        Ok(function) => function,
        Err(e) => return e.into_err(),
    };
    match state.inventory.query_map(&function).await {
        Ok(map) => ok(map),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Hold seats for the caller. All-or-nothing; returns the hold expiry.
#[utoipa::path(
    post,
    path = "/api/v1/functions/{id}/holds",
    params(("id" = Uuid, Path, description = "Function id")),
    request_body = HoldRequest,
    responses(
        (status = 200, description = "Seats held", body = HoldResponse),
        (status = 409, description = "At least one seat unavailable"),
    ),
    security(("bearer" = [])),
    tag = "functions"
)]
pub async fn create_holds(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<HoldRequest>,
) -> ApiResult<HoldResponse> {
    let function = match load_function(&state, id).await {
        Ok(function) => function,
        Err(e) => return e.into_err(),
    };
    let seats = match parse_seats(&body.seats) {
        Ok(seats) => seats,
        Err(e) => return e.into_err(),
    };
    match state.inventory.try_hold(&function, user, &seats).await {
        Ok(expires_at) => ok(HoldResponse {
            seats: seats.iter().map(|s| s.to_string()).collect(),
            expires_at,
        }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Release the caller's holds. Seats not held by the caller are skipped.
#[utoipa::path(
    delete,
    path = "/api/v1/functions/{id}/holds",
    params(("id" = Uuid, Path, description = "Function id")),
    request_body = HoldRequest,
    responses((status = 200, description = "Holds released", body = ReleaseResponse)),
    security(("bearer" = [])),
    tag = "functions"
)]
pub async fn release_holds(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<HoldRequest>,
) -> ApiResult<ReleaseResponse> {
    let function = match load_function(&state, id).await {
        Ok(function) => function,
        Err(e) => return e.into_err(),
    };
    let seats = match parse_seats(&body.seats) {
        Ok(seats) => seats,
        Err(e) => return e.into_err(),
    };
    match state.inventory.release(&function, user, &seats).await {
        Ok(released) => ok(ReleaseResponse {
            released: released.iter().map(|s| s.to_string()).collect(),
        }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Top films by sold seats.
#[utoipa::path(
    get,
    path = "/api/v1/films/ranking",
    responses((status = 200, description = "Films ranked by sold seats", body = [RankingEntry])),
    tag = "films"
)]
pub async fn film_ranking(State(state): State<Arc<AppState>>) -> ApiResult<Vec<RankingEntry>> {
    match with_retry(|| state.cache.zrevrange_withscores(FILM_RANKING_KEY, 0, 9)).await {
        Ok(rows) => ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, (film, sales))| RankingEntry {
                position: i + 1,
                film,
                sales: sales as i64,
            })
            .collect()),
        Err(e) => ApiError::from(crate::error::EngineError::from(e)).into_err(),
    }
}
