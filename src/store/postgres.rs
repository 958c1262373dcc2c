//! Postgres-backed durable store.
//!
//! Each collection is a table with indexed scalar columns plus the full
//! document as JSONB. The scalar columns exist only for the indexes the
//! query paths need; the JSONB document is the record of truth and is
//! deserialized whole.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use super::{
    FunctionRepository, SelectionRepository, StoreError, TransactionRepository, UserRepository,
};
use crate::core_types::{FilmId, FunctionId, SeatCode, TransactionId, UserId};
use crate::models::{Function, Selection, SelectionStatus, Transaction, TransactionState, User};

/// Postgres durable store. One pool shared by all collections.
pub struct PostgresStore {
    pool: PgPool,
}

fn map_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Logical(e.to_string()),
    }
}

fn to_doc<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Logical(e.to_string()))
}

fn from_doc<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Logical(e.to_string()))
}

impl PostgresStore {
    /// Connect and prepare the schema.
    pub async fn connect(database_url: &str) -> Result<Arc<Self>, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(map_err)?;
        tracing::info!("PostgreSQL connection pool established");

        let store = Arc::new(Self { pool });
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and the required indexes (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS users_tb (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL,
                doc JSONB NOT NULL
            )"#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users_tb (email)"#,
            r#"CREATE TABLE IF NOT EXISTS functions_tb (
                id UUID PRIMARY KEY,
                film_id UUID NOT NULL,
                starts_at TIMESTAMPTZ NOT NULL,
                state TEXT NOT NULL,
                doc JSONB NOT NULL
            )"#,
            r#"CREATE INDEX IF NOT EXISTS functions_film_start_state_idx
               ON functions_tb (film_id, starts_at, state)"#,
            r#"CREATE TABLE IF NOT EXISTS transactions_tb (
                id UUID PRIMARY KEY,
                invoice TEXT NOT NULL,
                user_id UUID NOT NULL,
                function_id UUID NOT NULL,
                state TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                doc JSONB NOT NULL
            )"#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS transactions_invoice_key
               ON transactions_tb (invoice)"#,
            r#"CREATE INDEX IF NOT EXISTS transactions_user_created_idx
               ON transactions_tb (user_id, created_at DESC)"#,
            r#"CREATE INDEX IF NOT EXISTS transactions_function_idx
               ON transactions_tb (function_id)"#,
            r#"CREATE INDEX IF NOT EXISTS transactions_state_idx
               ON transactions_tb (state)"#,
            r#"CREATE TABLE IF NOT EXISTS selections_tb (
                id UUID PRIMARY KEY,
                function_id UUID NOT NULL,
                seat TEXT NOT NULL,
                user_id UUID NOT NULL,
                status TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                doc JSONB NOT NULL
            )"#,
            r#"CREATE INDEX IF NOT EXISTS selections_function_seat_idx
               ON selections_tb (function_id, seat)"#,
            r#"CREATE INDEX IF NOT EXISTS selections_user_idx ON selections_tb (user_id)"#,
            r#"CREATE INDEX IF NOT EXISTS selections_status_idx ON selections_tb (status)"#,
            // I2: at most one live hold row per (function, seat)
            r#"CREATE UNIQUE INDEX IF NOT EXISTS selections_live_hold_key
               ON selections_tb (function_id, seat) WHERE status = 'temporary'"#,
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(map_err)?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users_tb (id, email, doc) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.email)
            .bind(to_doc(user)?)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT doc FROM users_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT doc FROM users_tb WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .transpose()
    }
}

#[async_trait]
impl FunctionRepository for PostgresStore {
    async fn upsert(&self, function: &Function) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO functions_tb (id, film_id, starts_at, state, doc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET film_id = EXCLUDED.film_id,
                starts_at = EXCLUDED.starts_at,
                state = EXCLUDED.state,
                doc = EXCLUDED.doc
            "#,
        )
        .bind(function.id)
        .bind(function.film_id)
        .bind(function.starts_at)
        .bind(function.state.as_str())
        .bind(to_doc(function)?)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: FunctionId) -> Result<Option<Function>, StoreError> {
        let row = sqlx::query("SELECT doc FROM functions_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .transpose()
    }

    async fn find_by_film(&self, film: FilmId) -> Result<Vec<Function>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM functions_tb WHERE film_id = $1 ORDER BY starts_at",
        )
        .bind(film)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .collect()
    }
}

#[async_trait]
impl TransactionRepository for PostgresStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions_tb
                (id, invoice, user_id, function_id, state, created_at, expires_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(tx.id)
        .bind(&tx.invoice)
        .bind(tx.user_id)
        .bind(tx.function_id)
        .bind(tx.state.as_str())
        .bind(tx.created_at)
        .bind(tx.expires_at)
        .bind(to_doc(tx)?)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE transactions_tb SET state = $2, doc = $3 WHERE id = $1",
        )
        .bind(tx.id)
        .bind(tx.state.as_str())
        .bind(to_doc(tx)?)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Logical(format!("unknown transaction {}", tx.id)));
        }
        Ok(())
    }

    async fn update_state_if(
        &self,
        id: TransactionId,
        expected: TransactionState,
        new: TransactionState,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions_tb
            SET state = $3,
                doc = jsonb_set(doc, '{state}', to_jsonb($3::text))
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query("SELECT doc FROM transactions_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .transpose()
    }

    async fn find_by_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT doc FROM transactions_tb
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .collect()
    }

    async fn find_confirmed_by_function(
        &self,
        function: FunctionId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM transactions_tb WHERE function_id = $1 AND state = 'confirmed'",
        )
        .bind(function)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .collect()
    }

    async fn find_processing_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM transactions_tb WHERE state = 'processing' AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .collect()
    }
}

#[async_trait]
impl SelectionRepository for PostgresStore {
    async fn insert_many(&self, selections: &[Selection]) -> Result<(), StoreError> {
        for selection in selections {
            sqlx::query(
                r#"
                INSERT INTO selections_tb
                    (id, function_id, seat, user_id, status, expires_at, doc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(selection.id)
            .bind(selection.function_id)
            .bind(selection.seat.to_string())
            .bind(selection.user_id)
            .bind(selection.status.as_str())
            .bind(selection.expires_at)
            .bind(to_doc(selection)?)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
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
        let seat_codes: Vec<String> = seats.iter().map(|s| s.to_string()).collect();
        let stamp_field = match to {
            SelectionStatus::Confirmed => "confirmed_at",
            _ => "cancelled_at",
        };
        let sql = format!(
            r#"
            UPDATE selections_tb
            SET status = $4,
                doc = jsonb_set(
                    jsonb_set(doc, '{{status}}', to_jsonb($4::text)),
                    '{{{stamp_field}}}', to_jsonb(now())
                )
            WHERE function_id = $1
              AND seat = ANY($2)
              AND status = $3
              AND ($5::uuid IS NULL OR user_id = $5)
            "#
        );
        let result = sqlx::query(&sql)
            .bind(function)
            .bind(&seat_codes)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn find_by_function_status(
        &self,
        function: FunctionId,
        status: SelectionStatus,
    ) -> Result<Vec<Selection>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM selections_tb WHERE function_id = $1 AND status = $2",
        )
        .bind(function)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .collect()
    }

    async fn functions_with_temporaries(&self) -> Result<Vec<FunctionId>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT function_id FROM selections_tb WHERE status = 'temporary'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<FunctionId, _>("function_id"))
            .collect())
    }

    async fn stale_temporaries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Selection>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM selections_tb WHERE status = 'temporary' AND expires_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<serde_json::Value, _>("doc")))
            .collect()
    }
}
