//! In-memory durable store for tests and standalone runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    FunctionRepository, SelectionRepository, StoreError, TransactionRepository, UserRepository,
};
use crate::core_types::{FilmId, FunctionId, SeatCode, TransactionId, UserId};
use crate::models::{Function, Selection, SelectionStatus, Transaction, TransactionState, User};

#[derive(Default)]
struct Collections {
    users: HashMap<UserId, User>,
    functions: HashMap<FunctionId, Function>,
    transactions: HashMap<TransactionId, Transaction>,
    selections: Vec<Selection>,
}

/// All four collections behind one mutex; plenty for test workloads.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }
}

#[async_trait]
impl FunctionRepository for MemoryStore {
    async fn upsert(&self, function: &Function) -> Result<(), StoreError> {
        self.lock().functions.insert(function.id, function.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: FunctionId) -> Result<Option<Function>, StoreError> {
        Ok(self.lock().functions.get(&id).cloned())
    }

    async fn find_by_film(&self, film: FilmId) -> Result<Vec<Function>, StoreError> {
        let mut functions: Vec<Function> = self
            .lock()
            .functions
            .values()
            .filter(|f| f.film_id == film)
            .cloned()
            .collect();
        functions.sort_by_key(|f| f.starts_at);
        Ok(functions)
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.transactions.values().any(|t| t.invoice == tx.invoice) {
            return Err(StoreError::Conflict(format!(
                "duplicate invoice {}",
                tx.invoice
            )));
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.transactions.contains_key(&tx.id) {
            return Err(StoreError::Logical(format!("unknown transaction {}", tx.id)));
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update_state_if(
        &self,
        id: TransactionId,
        expected: TransactionState,
        new: TransactionState,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.transactions.get_mut(&id) {
            Some(tx) if tx.state == expected => {
                tx.state = new;
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn find_by_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut txs: Vec<Transaction> = self
            .lock()
            .transactions
            .values()
            .filter(|t| t.user_id == user)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        txs.truncate(limit);
        Ok(txs)
    }

    async fn find_confirmed_by_function(
        &self,
        function: FunctionId,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| t.function_id == function && t.state == TransactionState::Confirmed)
            .cloned()
            .collect())
    }

    async fn find_processing_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| t.state == TransactionState::Processing && t.expires_at < now)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SelectionRepository for MemoryStore {
    async fn insert_many(&self, selections: &[Selection]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for selection in selections {
            let live_duplicate = inner.selections.iter().any(|s| {
                s.function_id == selection.function_id
                    && s.seat == selection.seat
                    && s.status == SelectionStatus::Temporary
            });
            if live_duplicate {
                return Err(StoreError::Conflict(format!(
                    "live hold row exists for {}:{}",
                    selection.function_id, selection.seat
                )));
            }
            inner.selections.push(selection.clone());
        }
        Ok(())
    }

    async fn set_status(
        &self,
        function: FunctionId,
        seats: &[SeatCode],
        user: Option<UserId>,
        from: SelectionStatus,
        to: SelectionStatus,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut transitioned = 0;
        for selection in inner.selections.iter_mut() {
            if selection.function_id != function
                || selection.status != from
                || !seats.contains(&selection.seat)
            {
                continue;
            }
            if let Some(owner) = user
                && selection.user_id != owner
            {
                continue;
            }
            selection.status = to;
            match to {
                SelectionStatus::Confirmed => selection.confirmed_at = Some(now),
                SelectionStatus::Cancelled | SelectionStatus::Expired => {
                    selection.cancelled_at = Some(now)
                }
                SelectionStatus::Temporary => {}
            }
            transitioned += 1;
        }
        Ok(transitioned)
    }

    async fn find_by_function_status(
        &self,
        function: FunctionId,
        status: SelectionStatus,
    ) -> Result<Vec<Selection>, StoreError> {
        Ok(self
            .lock()
            .selections
            .iter()
            .filter(|s| s.function_id == function && s.status == status)
            .cloned()
            .collect())
    }

    async fn functions_with_temporaries(&self) -> Result<Vec<FunctionId>, StoreError> {
        let mut functions: Vec<FunctionId> = self
            .lock()
            .selections
            .iter()
            .filter(|s| s.status == SelectionStatus::Temporary)
            .map(|s| s.function_id)
            .collect();
        functions.sort();
        functions.dedup();
        Ok(functions)
    }

    async fn stale_temporaries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Selection>, StoreError> {
        Ok(self
            .lock()
            .selections
            .iter()
            .filter(|s| s.status == SelectionStatus::Temporary && s.expires_at < cutoff)
            .cloned()
            .collect())
    }
}
