//! OpenAPI document assembly.

use utoipa::OpenApi;

use super::handlers;
use super::types;
use crate::user_auth;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "cinemax",
        description = "Cinema ticket-sales backend: seat inventory and transaction engine",
    ),
    paths(
        user_auth::handlers::register,
        user_auth::handlers::login,
        handlers::functions::seat_map,
        handlers::functions::create_holds,
        handlers::functions::release_holds,
        handlers::functions::film_ranking,
        handlers::transactions::purchase,
        handlers::transactions::get_transaction,
        handlers::transactions::cancel_transaction,
        handlers::transactions::list_transactions,
        handlers::health::health_check,
    ),
    components(schemas(
        user_auth::service::RegisterRequest,
        user_auth::service::LoginRequest,
        user_auth::service::AuthResponse,
        types::HoldRequest,
        types::HoldResponse,
        types::ReleaseResponse,
        types::PurchaseBody,
        types::TransactionView,
        types::RankingEntry,
        handlers::health::HealthData,
    )),
    tags(
        (name = "auth", description = "Registration and login"),
        (name = "functions", description = "Seat maps and holds"),
        (name = "transactions", description = "Purchases"),
        (name = "films", description = "Sales ranking"),
        (name = "health", description = "Probes"),
    )
)]
pub struct ApiDoc;
