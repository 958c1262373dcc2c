//! Registration and login handlers.

use axum::{Json, extract::State};
use std::sync::Arc;
use validator::Validate;

use super::service::{AuthResponse, LoginRequest, RegisterRequest};
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, created, ok};

/// Register a new user.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created, token issued", body = AuthResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<AuthResponse> {
    if let Err(e) = req.validate() {
        return ApiError::bad_request(e.to_string()).into_err();
    }
    match state.auth.register(req).await {
        Ok(response) => created(response),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Verify credentials and issue a bearer token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<AuthResponse> {
    if let Err(e) = req.validate() {
        return ApiError::bad_request(e.to_string()).into_err();
    }
    match state.auth.login(req).await {
        Ok(response) => ok(response),
        Err(e) => ApiError::from(e).into_err(),
    }
}
