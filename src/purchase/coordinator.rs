//! Purchase Coordinator
//!
//! Drives the purchase state machine: resolve user and function, hold the
//! seats, price them, persist the transaction in `processing`, charge the
//! payment capability, then commit or compensate. State transitions on the
//! durable record use CAS so an owner cancellation racing a payment can
//! never produce a half-committed sale.
//!
//! Every failure path after `try_hold` releases the holds before returning;
//! a failed release is logged and left to the reaper rather than masking
//! the original error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::core_types::{SeatCode, TransactionId, UserId};
use crate::error::{EngineError, with_retry};
use crate::events::{EventBus, EventKind, EventRecord};
use crate::inventory::SeatInventory;
use crate::models::{
    AuditInfo, Function, PaymentDetail, PaymentMethod, SeatTier, Transaction, TransactionState,
    User,
};
use crate::pricing;
use crate::store::DurableStore;

use super::payment::PaymentGateway;

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct PurchaseConfig {
    pub checkout_window: Duration,
    pub sales_grace: Duration,
    pub payment_timeout: Duration,
    pub tax_rate_bp: u32,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            checkout_window: Duration::from_secs(1800),
            sales_grace: Duration::from_secs(1800),
            payment_timeout: Duration::from_secs(10),
            tax_rate_bp: 1900,
        }
    }
}

/// One purchase request as it arrives from the gateway.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub user: UserId,
    pub function: crate::core_types::FunctionId,
    pub seats: Vec<String>,
    pub method: PaymentMethod,
    pub promo: Option<String>,
    pub audit: AuditInfo,
}

pub struct PurchaseCoordinator {
    store: DurableStore,
    inventory: Arc<SeatInventory>,
    payment: Arc<dyn PaymentGateway>,
    bus: EventBus,
    config: PurchaseConfig,
}

impl PurchaseCoordinator {
    pub fn new(
        store: DurableStore,
        inventory: Arc<SeatInventory>,
        payment: Arc<dyn PaymentGateway>,
        bus: EventBus,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            payment,
            bus,
            config,
        }
    }

    /// Execute a purchase to a terminal state.
    pub async fn purchase(&self, req: PurchaseRequest) -> Result<Transaction, EngineError> {
        // 1. Resolve user
        let user = with_retry(|| self.store.users.find_by_id(req.user))
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", req.user)))?;

        // 2. Resolve function + sales window
        let function = with_retry(|| self.store.functions.find_by_id(req.function))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("function {}", req.function)))?;
        if function.sales_closed(Utc::now(), self.config.sales_grace) {
            return Err(EngineError::SalesClosed);
        }

        // 3. Parse, dedup and validate seats; resolve the promo before any
        //    hold is taken so a bad code costs nothing
        let parsed: Vec<SeatCode> = req
            .seats
            .iter()
            .map(|s| SeatCode::parse(s))
            .collect::<Result<_, _>>()?;
        let seats = self.inventory.validate_seats(&function, &parsed)?;
        if seats.is_empty() {
            return Err(EngineError::InvalidSeat("empty seat list".into()));
        }
        let promo_bp = match &req.promo {
            Some(code) => pricing::promo_discount_bp(code)?,
            None => 0,
        };

        // 4. Establish (or reuse) the holds
        self.inventory.try_hold(&function, user.id, &seats).await?;

        // From here on, every error path must let go of the holds.
        match self
            .purchase_held(&req, &user, &function, &seats, promo_bp)
            .await
        {
            Ok(tx) => Ok(tx),
            Err(e) => {
                self.release_best_effort(&function, user.id, &seats).await;
                Err(e)
            }
        }
    }

    /// Steps 5-9, running with holds established.
    async fn purchase_held(
        &self,
        req: &PurchaseRequest,
        user: &User,
        function: &Function,
        seats: &[SeatCode],
        promo_bp: u32,
    ) -> Result<Transaction, EngineError> {
        // 5. Price the seats
        let priced: Vec<(char, u16, SeatTier, i64)> = seats
            .iter()
            .map(|seat| {
                let descriptor = function
                    .hall
                    .seat(seat)
                    .expect("seats validated against the hall");
                (
                    descriptor.row,
                    descriptor.number,
                    descriptor.tier,
                    function.unit_price(descriptor),
                )
            })
            .collect();
        let customer_bp = user.tier.discount_bp();
        let (lines, totals) =
            pricing::price_seats(&priced, customer_bp, promo_bp, self.config.tax_rate_bp);

        // 6. Persist the transaction in `processing`
        let now = Utc::now();
        let id: TransactionId = Uuid::new_v4();
        let mut tx = Transaction {
            id,
            invoice: Transaction::invoice_number(now, id),
            user_id: user.id,
            function_id: function.id,
            film_id: function.film_id,
            seats: lines,
            subtotal: totals.subtotal,
            customer_discount_bp: customer_bp,
            promo_discount_bp: promo_bp,
            tax: totals.tax,
            total: totals.total,
            payment: PaymentDetail::new(req.method),
            state: TransactionState::Processing,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            expires_at: now
                + ChronoDuration::from_std(self.config.checkout_window)
                    .unwrap_or_else(|_| ChronoDuration::minutes(30)),
            qr_payload: None,
            audit: req.audit.clone(),
        };
        with_retry(|| self.store.transactions.insert(&tx)).await?;

        tracing::info!(
            transaction = %tx.id,
            invoice = %tx.invoice,
            user = %user.id,
            function = %function.id,
            total = tx.total,
            "Purchase processing"
        );

        // 7. Charge. The call is bounded by its own timeout and is never
        //    interrupted once started; exceeding the timeout is a failure.
        let outcome =
            match tokio::time::timeout(self.config.payment_timeout, self.payment.pay(
                tx.total,
                req.method,
                &tx.id.to_string(),
            ))
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(transaction = %tx.id, "Payment timed out");
                    Err(EngineError::PaymentUnavailable)
                }
            };

        match outcome {
            Ok(payment) if payment.ok => {
                self.commit(&mut tx, function, payment.auth_code).await?;
                Ok(tx)
            }
            Ok(payment) => {
                // 9. Declined: release and fail
                let reason = payment
                    .error
                    .unwrap_or_else(|| "payment declined".to_string());
                self.fail_transaction(&mut tx, function).await;
                Err(EngineError::PaymentDeclined(reason))
            }
            Err(e) => {
                self.fail_transaction(&mut tx, function).await;
                Err(e)
            }
        }
    }

    /// Step 8: commit seats and finalize the record.
    ///
    /// The CAS `processing -> confirmed` guards against an owner
    /// cancellation that landed while payment was in flight.
    async fn commit(
        &self,
        tx: &mut Transaction,
        function: &Function,
        auth_code: Option<String>,
    ) -> Result<(), EngineError> {
        let won = with_retry(|| {
            self.store.transactions.update_state_if(
                tx.id,
                TransactionState::Processing,
                TransactionState::Confirmed,
            )
        })
        .await?;
        if !won {
            tracing::warn!(transaction = %tx.id, "Cancelled while payment in flight");
            return Err(EngineError::InvalidState(
                "transaction cancelled during payment".into(),
            ));
        }

        let seats = tx.seat_codes();
        match self
            .inventory
            .confirm(function, tx.user_id, &seats, tx.id)
            .await
        {
            Ok(()) => {
                tx.mark_confirmed(auth_code);
                if let Err(e) = with_retry(|| self.store.transactions.update(tx)).await {
                    tracing::error!(transaction = %tx.id, error = %e, "Confirmed-state write failed");
                }

                let record = EventRecord::new(EventKind::SaleConfirmed, function.id)
                    .with_user(tx.user_id)
                    .with_seats(seats)
                    .with_sale(function.film_id, tx.id, tx.total);
                if let Err(e) = self.bus.append(&record).await {
                    tracing::warn!(transaction = %tx.id, error = %e, "sale_confirmed append failed");
                }

                tracing::info!(transaction = %tx.id, invoice = %tx.invoice, "Purchase confirmed");
                Ok(())
            }
            Err(EngineError::HoldLost(lost)) => {
                // Hold expired between reservation and confirm: the sale is off
                let _ = with_retry(|| {
                    self.store.transactions.update_state_if(
                        tx.id,
                        TransactionState::Confirmed,
                        TransactionState::Failed,
                    )
                })
                .await;
                tx.mark_failed();
                let _ = with_retry(|| self.store.transactions.update(tx)).await;

                let record = EventRecord::new(EventKind::SaleFailed, function.id)
                    .with_user(tx.user_id)
                    .with_seats(tx.seat_codes());
                if let Err(e) = self.bus.append(&record).await {
                    tracing::warn!(error = %e, "sale_failed append failed");
                }

                tracing::warn!(transaction = %tx.id, ?lost, "Hold lost before confirm");
                Err(EngineError::HoldLost(lost))
            }
            Err(e) => {
                let _ = with_retry(|| {
                    self.store.transactions.update_state_if(
                        tx.id,
                        TransactionState::Confirmed,
                        TransactionState::Failed,
                    )
                })
                .await;
                tx.mark_failed();
                let _ = with_retry(|| self.store.transactions.update(tx)).await;
                Err(e)
            }
        }
    }

    /// Mark failed (CAS-guarded) and append the failure event. Hold release
    /// happens in the caller's unwinding path.
    async fn fail_transaction(&self, tx: &mut Transaction, function: &Function) {
        let won = with_retry(|| {
            self.store.transactions.update_state_if(
                tx.id,
                TransactionState::Processing,
                TransactionState::Failed,
            )
        })
        .await
        .unwrap_or(false);
        if won {
            tx.mark_failed();
            if let Err(e) = with_retry(|| self.store.transactions.update(tx)).await {
                tracing::warn!(transaction = %tx.id, error = %e, "Failed-state write failed");
            }
            let record = EventRecord::new(EventKind::SaleFailed, function.id)
                .with_user(tx.user_id)
                .with_seats(tx.seat_codes());
            if let Err(e) = self.bus.append(&record).await {
                tracing::warn!(error = %e, "sale_failed append failed");
            }
        }
    }

    async fn release_best_effort(&self, function: &Function, user: UserId, seats: &[SeatCode]) {
        if let Err(e) = self.inventory.release(function, user, seats).await {
            tracing::warn!(
                function = %function.id,
                user = %user,
                error = %e,
                "Hold release failed; reaper will expire the holds"
            );
        }
    }

    /// Owner-initiated cancellation, allowed while the transaction is still
    /// `pending` or `processing` and payment has not resolved.
    pub async fn cancel(
        &self,
        user: UserId,
        id: TransactionId,
    ) -> Result<Transaction, EngineError> {
        let mut tx = with_retry(|| self.store.transactions.find_by_id(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {id}")))?;
        if tx.user_id != user {
            return Err(EngineError::Forbidden);
        }
        if !tx.state.cancellable() {
            return Err(EngineError::InvalidState(format!(
                "cannot cancel a {} transaction",
                tx.state.as_str()
            )));
        }

        let from = tx.state;
        let won = with_retry(|| {
            self.store
                .transactions
                .update_state_if(id, from, TransactionState::Cancelled)
        })
        .await?;
        if !won {
            return Err(EngineError::InvalidState(
                "transaction state changed concurrently".into(),
            ));
        }

        let function = with_retry(|| self.store.functions.find_by_id(tx.function_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("function {}", tx.function_id)))?;
        self.release_best_effort(&function, user, &tx.seat_codes())
            .await;

        tx.mark_cancelled();
        if let Err(e) = with_retry(|| self.store.transactions.update(&tx)).await {
            tracing::warn!(transaction = %tx.id, error = %e, "Cancelled-state write failed");
        }
        tracing::info!(transaction = %tx.id, "Purchase cancelled by owner");
        Ok(tx)
    }

    /// Owner-only fetch.
    pub async fn get(&self, user: UserId, id: TransactionId) -> Result<Transaction, EngineError> {
        let tx = with_retry(|| self.store.transactions.find_by_id(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {id}")))?;
        if tx.user_id != user {
            return Err(EngineError::Forbidden);
        }
        Ok(tx)
    }

    /// Caller's purchase history, most recent first.
    pub async fn list_for_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, EngineError> {
        Ok(with_retry(|| self.store.transactions.find_by_user(user, limit)).await?)
    }

    /// Reaper entry point: force-fail `processing` transactions past their
    /// checkout expiry and free their seats. Returns how many were failed.
    pub async fn expire_stale_checkouts(&self) -> Result<usize, EngineError> {
        let stale = with_retry(|| self.store.transactions.find_processing_expired(Utc::now()))
            .await?;
        let mut failed = 0;
        for mut tx in stale {
            let won = with_retry(|| {
                self.store.transactions.update_state_if(
                    tx.id,
                    TransactionState::Processing,
                    TransactionState::Failed,
                )
            })
            .await
            .unwrap_or(false);
            if !won {
                continue;
            }

            if let Ok(Some(function)) =
                with_retry(|| self.store.functions.find_by_id(tx.function_id)).await
            {
                self.release_best_effort(&function, tx.user_id, &tx.seat_codes())
                    .await;
                let record = EventRecord::new(EventKind::SaleFailed, function.id)
                    .with_user(tx.user_id)
                    .with_seats(tx.seat_codes());
                let _ = self.bus.append(&record).await;
            }

            tx.mark_failed();
            let _ = with_retry(|| self.store.transactions.update(&tx)).await;
            tracing::warn!(transaction = %tx.id, "Checkout window elapsed, purchase failed");
            failed += 1;
        }
        Ok(failed)
    }
}
