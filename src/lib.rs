//! cinemax - Seat Inventory & Transaction Engine
//!
//! A cinema ticket-sales backend. For a given screening ("function") every
//! seat is sold to at most one buyer despite concurrent browsers, WebSocket
//! sessions and checkout attempts, while live seat-map changes are broadcast
//! to all viewers of that screening.
//!
//! # Modules
//!
//! - [`core_types`] - Id aliases and the canonical seat code
//! - [`config`] - Environment-driven configuration
//! - [`models`] - Users, functions, transactions, selections
//! - [`cache`] - Cache store (bitmaps, holds, locks, streams)
//! - [`store`] - Durable document store (users, functions, transactions, selections)
//! - [`lock`] - Per-function single-holder lock
//! - [`inventory`] - Seat inventory service (hold / release / confirm / sweep / rebuild)
//! - [`pricing`] - Integer minor-unit price arithmetic
//! - [`purchase`] - Purchase coordinator and payment capability
//! - [`realtime`] - Session hub and WebSocket handler
//! - [`reaper`] - Hold-expiry and checkout-window sweeper
//! - [`events`] - Append-only event bus and its consumers
//! - [`user_auth`] - Registration, login, JWT verification
//! - [`gateway`] - HTTP router and application state

// Core types - must be first!
pub mod core_types;

// Configuration & observability
pub mod config;
pub mod logging;

// Engine components
pub mod cache;
pub mod error;
pub mod events;
pub mod inventory;
pub mod lock;
pub mod models;
pub mod pricing;
pub mod purchase;
pub mod realtime;
pub mod reaper;
pub mod store;

// Surfaces
pub mod gateway;
pub mod user_auth;

// Convenient re-exports at crate root
pub use cache::{CacheStore, MemoryCache, RedisCache};
pub use config::AppConfig;
pub use core_types::{FilmId, FunctionId, SeatCode, TransactionId, UserId};
pub use error::EngineError;
pub use events::{EventBus, EventRecord};
pub use inventory::SeatInventory;
pub use lock::FunctionLockManager;
pub use models::{Function, SeatMap, SeatState, Transaction, TransactionState, User};
pub use purchase::{PurchaseCoordinator, PurchaseRequest};
pub use realtime::{HubService, SessionManager};
pub use reaper::ExpiryReaper;
pub use store::{DurableStore, MemoryStore, PostgresStore};
