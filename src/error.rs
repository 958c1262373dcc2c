//! Engine Error Types
//!
//! One error enum is surfaced across the core, plus the shared policy for
//! transient failures: business failures are never retried; cache and
//! durable-store I/O failures are re-attempted through [`with_retry`]
//! before being reported as `StoreUnavailable`.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::cache::CacheError;
use crate::store::StoreError;

/// Transient-failure classification shared by the cache and durable-store
/// error types, consulted by [`with_retry`].
pub trait Retryable {
    fn retryable(&self) -> bool;
}

impl Retryable for CacheError {
    fn retryable(&self) -> bool {
        CacheError::retryable(self)
    }
}

impl Retryable for StoreError {
    fn retryable(&self) -> bool {
        StoreError::retryable(self)
    }
}

/// Retry a cache or durable-store operation on transient failures: two
/// re-attempts with the lock manager's backoff profile (100 ms base,
/// doubling to a 1 s cap, ±25% jitter). Logical and business errors pass
/// through untouched.
pub async fn with_retry<T, E, F, Fut>(op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    const MAX_RETRIES: u32 = 2;
    let mut delay = Duration::from_millis(100);
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, error = %e, "Retrying transient store failure");
                let pct = rand::thread_rng().gen_range(75..=125u32);
                tokio::time::sleep(delay * pct / 100).await;
                delay = (delay * 2).min(Duration::from_secs(1));
            }
            other => return other,
        }
    }
}

/// Errors surfaced by the seat inventory, lock manager, purchase
/// coordinator and realtime hub.
///
/// `code()` is the stable, client-visible identifier; internal diagnostics
/// (store error text, backtraces) never leave the process.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    // === Client errors ===
    #[error("Invalid seat code: {0}")]
    InvalidSeat(String),

    #[error("Too many seats in one hold: {requested} (max {max})")]
    TooManySeats { requested: usize, max: usize },

    #[error("Seats unavailable: {0:?}")]
    SeatUnavailable(Vec<String>),

    #[error("Hold expired before confirmation: {0:?}")]
    HoldLost(Vec<String>),

    #[error("Sales window for this function has closed")]
    SalesClosed,

    #[error("Unknown promo code: {0}")]
    PromoUnknown(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    // === Auth / resource errors ===
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not allowed")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    // === Transient / server errors ===
    #[error("Function lock is busy")]
    LockBusy,

    #[error("Payment provider unavailable")]
    PaymentUnavailable,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidSeat(_) => "INVALID_SEAT",
            EngineError::TooManySeats { .. } => "TOO_MANY_SEATS",
            EngineError::SeatUnavailable(_) => "SEAT_UNAVAILABLE",
            EngineError::HoldLost(_) => "HOLD_LOST",
            EngineError::SalesClosed => "SALES_CLOSED",
            EngineError::PromoUnknown(_) => "PROMO_UNKNOWN",
            EngineError::PaymentDeclined(_) => "PAYMENT_DECLINED",
            EngineError::InvalidState(_) => "INVALID_STATE",
            EngineError::Unauthorized => "UNAUTHORIZED",
            EngineError::Forbidden => "FORBIDDEN",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::LockBusy => "LOCK_BUSY",
            EngineError::PaymentUnavailable => "PAYMENT_UNAVAILABLE",
            EngineError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::InvalidSeat(_)
            | EngineError::TooManySeats { .. }
            | EngineError::PromoUnknown(_) => 400,
            EngineError::SeatUnavailable(_)
            | EngineError::HoldLost(_)
            | EngineError::InvalidState(_) => 409,
            EngineError::SalesClosed => 422,
            EngineError::PaymentDeclined(_) => 402,
            EngineError::Unauthorized => 401,
            EngineError::Forbidden => 403,
            EngineError::NotFound(_) => 404,
            EngineError::LockBusy
            | EngineError::PaymentUnavailable
            | EngineError::StoreUnavailable(_) => 503,
            EngineError::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Business outcomes are final; only transient infrastructure failures
    /// qualify.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LockBusy
                | EngineError::PaymentUnavailable
                | EngineError::StoreUnavailable(_)
        )
    }
}

impl From<CacheError> for EngineError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Unavailable(msg) | CacheError::Timeout(msg) => {
                EngineError::StoreUnavailable(msg)
            }
            CacheError::Logical(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            StoreError::Conflict(msg) | StoreError::Logical(msg) => EngineError::Internal(msg),
        }
    }
}
