//! HTTP Gateway
//!
//! Router assembly and server bootstrap. Routes are grouped the same way
//! they are authenticated: `/api/v1/auth` is open, seat maps and the film
//! ranking are public, everything touching holds or transactions sits
//! behind the JWT middleware, and the WebSocket endpoint authenticates via
//! its token query parameter.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::realtime::ws_handler;
use crate::user_auth::jwt_auth_middleware;
use state::AppState;

/// Build the complete application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(crate::user_auth::handlers::register))
        .route("/login", post(crate::user_auth::handlers::login));

    let public_routes = Router::new()
        .route("/functions/{id}/seats", get(handlers::seat_map))
        .route("/films/ranking", get(handlers::film_ranking));

    let private_routes = Router::new()
        .route(
            "/functions/{id}/holds",
            post(handlers::create_holds).delete(handlers::release_holds),
        )
        .route(
            "/transactions",
            post(handlers::purchase).get(handlers::list_transactions),
        )
        .route("/transactions/{id}", get(handlers::get_transaction))
        .route(
            "/transactions/{id}/cancel",
            post(handlers::cancel_transaction),
        )
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    Router::new()
        // WebSocket endpoint (token authenticated in the handler)
        .route("/ws/functions/{function_id}", get(ws_handler))
        // Health check
        .route("/api/v1/health", get(handlers::health_check))
        // API routes
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1", public_routes.merge(private_routes))
        .with_state(state)
}

/// Serve the gateway on an already-bound listener until the process exits.
pub async fn run_server(state: Arc<AppState>, listener: TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Gateway listening");
    axum::serve(listener, build_router(state)).await
}
