//! JWT bearer-token middleware for protected routes.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::core_types::UserId;
use crate::gateway::{state::AppState, types::ApiResponse};

/// Verified caller identity injected into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                "UNAUTHORIZED",
                "Missing Authorization header",
            )),
        ))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or((
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(
            "UNAUTHORIZED",
            "Invalid token format",
        )),
    ))?;

    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                "UNAUTHORIZED",
                "Invalid or expired token",
            )),
        )
    };

    let claims = state.auth.verify_token(token).map_err(|_| unauthorized())?;
    let user: UserId = claims.sub.parse().map_err(|_| unauthorized())?;

    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}
