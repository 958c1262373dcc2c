//! Event Sink Bus
//!
//! Append-only log of seat/sale events on the cache stream `events:sales`,
//! delivered at-least-once to registered consumers. Each consumer keeps a
//! cursor (`events:cursor:{name}`) of the last stream id it processed;
//! entries past the cursor are re-delivered after a restart until the
//! consumer handles them and the cursor advances.

pub mod consumers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheError, CacheStore};
use crate::core_types::{FilmId, FunctionId, SeatCode, TransactionId, UserId};
use crate::error::with_retry;

pub use consumers::{EmailConsumer, EmailSink, EventConsumer, LogEmailSink, MetricsConsumer};

/// Stream key for the sales event log.
pub const SALES_STREAM: &str = "events:sales";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SaleConfirmed,
    SaleFailed,
    SeatHeld,
    SeatReleased,
    HoldExpired,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SaleConfirmed => "sale_confirmed",
            EventKind::SaleFailed => "sale_failed",
            EventKind::SeatHeld => "seat_held",
            EventKind::SeatReleased => "seat_released",
            EventKind::HoldExpired => "hold_expired",
        }
    }
}

/// One append-only event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub function: FunctionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub film: Option<FilmId>,
    pub seats: Vec<SeatCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(kind: EventKind, function: FunctionId) -> Self {
        Self {
            kind,
            function,
            user: None,
            film: None,
            seats: Vec::new(),
            transaction: None,
            total: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_seats(mut self, seats: Vec<SeatCode>) -> Self {
        self.seats = seats;
        self
    }

    pub fn with_sale(mut self, film: FilmId, transaction: TransactionId, total: i64) -> Self {
        self.film = Some(film);
        self.transaction = Some(transaction);
        self.total = Some(total);
        self
    }
}

/// Producer handle: appends records to the stream. Append order is
/// preserved per producer by the stream itself.
#[derive(Clone)]
pub struct EventBus {
    cache: Arc<dyn CacheStore>,
}

impl EventBus {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub async fn append(&self, record: &EventRecord) -> Result<String, CacheError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| CacheError::Logical(e.to_string()))?;
        let fields = vec![
            ("type".to_string(), record.kind.as_str().to_string()),
            ("payload".to_string(), payload),
        ];
        let id = with_retry(|| self.cache.xadd(SALES_STREAM, &fields)).await?;
        tracing::debug!(kind = record.kind.as_str(), id = %id, "Event appended");
        Ok(id)
    }
}

/// Delivers stream entries to consumers, advancing each consumer's cursor
/// only after a successful handle - at-least-once semantics.
pub struct DispatchWorker {
    cache: Arc<dyn CacheStore>,
    consumers: Vec<Arc<dyn EventConsumer>>,
    tick: Duration,
    batch: usize,
}

impl DispatchWorker {
    pub fn new(cache: Arc<dyn CacheStore>, consumers: Vec<Arc<dyn EventConsumer>>) -> Self {
        Self {
            cache,
            consumers,
            tick: Duration::from_millis(500),
            batch: 100,
        }
    }

    fn cursor_key(name: &str) -> String {
        format!("events:cursor:{name}")
    }

    /// Deliver pending entries once for every consumer. Returns the number
    /// of deliveries that succeeded.
    pub async fn run_once(&self) -> usize {
        let mut delivered = 0;
        for consumer in &self.consumers {
            let cursor_key = Self::cursor_key(consumer.name());
            let cursor = match self.cache.get(&cursor_key).await {
                Ok(c) => c.unwrap_or_else(|| "0".to_string()),
                Err(e) => {
                    tracing::warn!(consumer = consumer.name(), error = %e, "Cursor read failed");
                    continue;
                }
            };

            let entries = match self
                .cache
                .xrange_after(SALES_STREAM, &cursor, self.batch)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(consumer = consumer.name(), error = %e, "Stream read failed");
                    continue;
                }
            };

            for entry in entries {
                let Some(payload) = entry
                    .fields
                    .iter()
                    .find(|(name, _)| name == "payload")
                    .map(|(_, value)| value.clone())
                else {
                    tracing::warn!(id = %entry.id, "Stream entry without payload, skipping");
                    let _ = self.cache.set(&cursor_key, &entry.id, None).await;
                    continue;
                };

                let record: EventRecord = match serde_json::from_str(&payload) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "Undecodable event, skipping");
                        let _ = self.cache.set(&cursor_key, &entry.id, None).await;
                        continue;
                    }
                };

                match consumer.handle(&record).await {
                    Ok(()) => {
                        // Ack: advance the cursor past this entry
                        if let Err(e) = self.cache.set(&cursor_key, &entry.id, None).await {
                            tracing::warn!(
                                consumer = consumer.name(),
                                error = %e,
                                "Cursor write failed; entry will be re-delivered"
                            );
                            break;
                        }
                        delivered += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            consumer = consumer.name(),
                            id = %entry.id,
                            error = %e,
                            "Consumer failed; will retry from this entry"
                        );
                        break;
                    }
                }
            }
        }
        delivered
    }

    /// Run the dispatch loop forever.
    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.tick);
        tracing::info!(
            consumers = self.consumers.len(),
            "Event dispatch worker started"
        );
        loop {
            tick.tick().await;
            self.run_once().await;
        }
    }
}
