//! Event consumers: metrics aggregation and the confirmation-email sink.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{EventKind, EventRecord};
use crate::cache::CacheStore;

/// Sorted set holding the per-film sold-seat ranking.
pub const FILM_RANKING_KEY: &str = "ranking:films:sales";

/// Registered sink on the event bus.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, record: &EventRecord) -> Result<()>;
}

/// Increments sale counters and maintains the per-film sales ranking.
pub struct MetricsConsumer {
    cache: Arc<dyn CacheStore>,
}

impl MetricsConsumer {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventConsumer for MetricsConsumer {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn handle(&self, record: &EventRecord) -> Result<()> {
        if record.kind != EventKind::SaleConfirmed {
            return Ok(());
        }
        let Some(film) = record.film else {
            return Ok(());
        };
        let sold = record.seats.len() as i64;

        self.cache
            .zincrby(FILM_RANKING_KEY, &film.to_string(), sold as f64)
            .await?;
        self.cache
            .hincrby(&format!("metrics:film:{film}"), "sales_total", sold)
            .await?;
        if let Some(total) = record.total {
            self.cache
                .hincrby(&format!("metrics:film:{film}"), "revenue_total", total)
                .await?;
        }
        Ok(())
    }
}

/// Outbound confirmation channel. Rendering and SMTP delivery live outside
/// the engine; this is the injection point.
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn send_confirmation(&self, record: &EventRecord) -> Result<()>;
}

/// Default sink: logs the confirmation instead of sending it.
pub struct LogEmailSink;

#[async_trait]
impl EmailSink for LogEmailSink {
    async fn send_confirmation(&self, record: &EventRecord) -> Result<()> {
        tracing::info!(
            transaction = ?record.transaction,
            user = ?record.user,
            seats = record.seats.len(),
            "Confirmation email queued"
        );
        Ok(())
    }
}

/// Bridges `sale_confirmed` events into the email sink.
pub struct EmailConsumer {
    sink: Arc<dyn EmailSink>,
}

impl EmailConsumer {
    pub fn new(sink: Arc<dyn EmailSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl EventConsumer for EmailConsumer {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn handle(&self, record: &EventRecord) -> Result<()> {
        if record.kind == EventKind::SaleConfirmed {
            self.sink.send_confirmation(record).await?;
        }
        Ok(())
    }
}
