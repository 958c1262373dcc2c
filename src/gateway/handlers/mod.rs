//! HTTP handlers, grouped by resource.

pub mod functions;
pub mod health;
pub mod transactions;

pub use functions::{create_holds, film_ranking, release_holds, seat_map};
pub use health::health_check;
pub use transactions::{cancel_transaction, get_transaction, list_transactions, purchase};
