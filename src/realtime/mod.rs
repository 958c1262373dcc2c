//! Realtime Hub: seat sessions, inbound intents, ordered broadcast.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod service;

pub use connection::{SessionId, SessionManager};
pub use handler::ws_handler;
pub use messages::{ClientMessage, SeatEvent, WsMessage};
pub use service::HubService;
