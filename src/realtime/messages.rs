//! Realtime message types
//!
//! Inbound client messages, outbound WebSocket messages, and the internal
//! seat-event queue entries produced under the function lock and drained by
//! the hub service. All outbound messages carry an RFC 3339 UTC timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{FunctionId, SeatCode, TransactionId, UserId};
use crate::models::SeatMap;

/// Inbound message on a seat-selection session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Select { seats: Vec<String> },
    Deselect { seats: Vec<String> },
}

/// Outbound message to a seat-selection session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    ConnectionEstablished {
        function: FunctionId,
        seat_map: SeatMap,
        timestamp: DateTime<Utc>,
    },
    SelectionConfirmed {
        seats: Vec<SeatCode>,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    SelectionFailed {
        code: String,
        message: String,
        conflicts: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    SeatHeld {
        function: FunctionId,
        user: UserId,
        seats: Vec<SeatCode>,
        timestamp: DateTime<Utc>,
    },
    SeatReleased {
        function: FunctionId,
        user: UserId,
        seats: Vec<SeatCode>,
        timestamp: DateTime<Utc>,
    },
    HoldExpired {
        function: FunctionId,
        seats: Vec<SeatCode>,
        timestamp: DateTime<Utc>,
    },
    SaleConfirmed {
        function: FunctionId,
        seats: Vec<SeatCode>,
        transaction: TransactionId,
        timestamp: DateTime<Utc>,
    },
    Error {
        code: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Seat-state change produced inside the function lock.
///
/// The producing order on the queue is the per-function broadcast order;
/// the hub service is the single consumer.
#[derive(Debug, Clone)]
pub enum SeatEvent {
    Held {
        function: FunctionId,
        user: UserId,
        seats: Vec<SeatCode>,
        expires_at: DateTime<Utc>,
    },
    Released {
        function: FunctionId,
        user: UserId,
        seats: Vec<SeatCode>,
    },
    Expired {
        function: FunctionId,
        seats: Vec<SeatCode>,
    },
    SaleConfirmed {
        function: FunctionId,
        user: UserId,
        seats: Vec<SeatCode>,
        transaction: TransactionId,
    },
}

impl SeatEvent {
    pub fn function(&self) -> FunctionId {
        match self {
            SeatEvent::Held { function, .. }
            | SeatEvent::Released { function, .. }
            | SeatEvent::Expired { function, .. }
            | SeatEvent::SaleConfirmed { function, .. } => *function,
        }
    }

    /// Broadcast rendering: the message for the function group and the user
    /// whose own sessions should be skipped (the originator already received
    /// a direct reply).
    pub fn to_broadcast(&self) -> (WsMessage, Option<UserId>) {
        let now = Utc::now();
        match self {
            SeatEvent::Held {
                function,
                user,
                seats,
                ..
            } => (
                WsMessage::SeatHeld {
                    function: *function,
                    user: *user,
                    seats: seats.clone(),
                    timestamp: now,
                },
                Some(*user),
            ),
            SeatEvent::Released {
                function,
                user,
                seats,
            } => (
                WsMessage::SeatReleased {
                    function: *function,
                    user: *user,
                    seats: seats.clone(),
                    timestamp: now,
                },
                Some(*user),
            ),
            SeatEvent::Expired { function, seats } => (
                WsMessage::HoldExpired {
                    function: *function,
                    seats: seats.clone(),
                    timestamp: now,
                },
                None,
            ),
            SeatEvent::SaleConfirmed {
                function,
                seats,
                transaction,
                ..
            } => (
                WsMessage::SaleConfirmed {
                    function: *function,
                    seats: seats.clone(),
                    transaction: *transaction,
                    timestamp: now,
                },
                None,
            ),
        }
    }
}
