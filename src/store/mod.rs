//! Durable Store abstraction
//!
//! Document persistence for users, functions, transactions and seat
//! selections. The traits keep the document semantics of the collections;
//! backends are Postgres (JSONB per collection) for production and an
//! in-memory store for tests.
//!
//! The cache owns near-real-time seat state; this layer owns the historical
//! record and the selections mirror the rebuild path reads.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core_types::{FilmId, FunctionId, SeatCode, TransactionId, UserId};
use crate::models::{Function, Selection, SelectionStatus, Transaction, TransactionState, User};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Durable-store failure modes.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Transient I/O failure; retried by callers.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Unique-constraint violation (email, invoice, live hold row).
    #[error("store conflict: {0}")]
    Conflict(String),

    /// Malformed query or document; not retryable.
    #[error("store logical error: {0}")]
    Logical(String),
}

impl StoreError {
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: &User) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait FunctionRepository: Send + Sync {
    async fn upsert(&self, function: &Function) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: FunctionId) -> Result<Option<Function>, StoreError>;
    async fn find_by_film(&self, film: FilmId) -> Result<Vec<Function>, StoreError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError>;
    /// Full-document write. Only the owning coordinator mutates a
    /// transaction this way.
    async fn update(&self, tx: &Transaction) -> Result<(), StoreError>;
    /// Atomic CAS on the state column; returns whether the transition won.
    async fn update_state_if(
        &self,
        id: TransactionId,
        expected: TransactionState,
        new: TransactionState,
    ) -> Result<bool, StoreError>;
    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;
    /// Most recent first.
    async fn find_by_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError>;
    /// Confirmed transactions for one function (rebuild path).
    async fn find_confirmed_by_function(
        &self,
        function: FunctionId,
    ) -> Result<Vec<Transaction>, StoreError>;
    /// `processing` transactions past their checkout expiry (reaper path).
    async fn find_processing_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait SelectionRepository: Send + Sync {
    async fn insert_many(&self, selections: &[Selection]) -> Result<(), StoreError>;
    /// Transition matching rows `from -> to`, optionally filtered by owner.
    /// Returns the number of rows transitioned.
    async fn set_status(
        &self,
        function: FunctionId,
        seats: &[SeatCode],
        user: Option<UserId>,
        from: SelectionStatus,
        to: SelectionStatus,
    ) -> Result<u64, StoreError>;
    async fn find_by_function_status(
        &self,
        function: FunctionId,
        status: SelectionStatus,
    ) -> Result<Vec<Selection>, StoreError>;
    /// Distinct functions that still have temporary selections.
    async fn functions_with_temporaries(&self) -> Result<Vec<FunctionId>, StoreError>;
    /// Temporary selections whose expiry is before `cutoff`, across all
    /// functions (reaper safety net).
    async fn stale_temporaries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Selection>, StoreError>;
}

/// Bundle of the four collections, injected into services at construction.
#[derive(Clone)]
pub struct DurableStore {
    pub users: Arc<dyn UserRepository>,
    pub functions: Arc<dyn FunctionRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub selections: Arc<dyn SelectionRepository>,
}

impl DurableStore {
    /// In-memory store for tests and standalone runs.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            users: store.clone(),
            functions: store.clone(),
            transactions: store.clone(),
            selections: store,
        }
    }

    /// Postgres-backed store sharing one pool across collections.
    pub fn postgres(store: Arc<PostgresStore>) -> Self {
        Self {
            users: store.clone(),
            functions: store.clone(),
            transactions: store.clone(),
            selections: store,
        }
    }
}
