//! Expiry Reaper
//!
//! Background sweeper. The cache auto-expires hold records, but the bitmap
//! bit and the durable selection row do not auto-clear; the reaper closes
//! that gap every tick. It also force-fails `processing` transactions whose
//! checkout window elapsed, so no transaction outlives `expires_at`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, error, info};

use crate::error::{EngineError, with_retry};
use crate::inventory::SeatInventory;
use crate::models::SelectionStatus;
use crate::purchase::PurchaseCoordinator;
use crate::store::DurableStore;

/// Configuration for the reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to sweep.
    pub tick: Duration,
    /// Extra slack past a selection's expiry before the orphan safety net
    /// marks it expired without touching the cache.
    pub selection_grace: Duration,
    /// Maximum functions to sweep per tick.
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            selection_grace: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Periodic sweeper over functions with active holds.
pub struct ExpiryReaper {
    inventory: Arc<SeatInventory>,
    coordinator: Arc<PurchaseCoordinator>,
    store: DurableStore,
    config: ReaperConfig,
}

impl ExpiryReaper {
    pub fn new(
        inventory: Arc<SeatInventory>,
        coordinator: Arc<PurchaseCoordinator>,
        store: DurableStore,
        config: ReaperConfig,
    ) -> Self {
        Self {
            inventory,
            coordinator,
            store,
            config,
        }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) -> ! {
        info!(
            tick_secs = self.config.tick.as_secs(),
            "Expiry reaper started"
        );
        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Reaper sweep failed");
            }
            tokio::time::sleep(self.config.tick).await;
        }
    }

    /// One full sweep cycle. Returns the number of seats expired.
    pub async fn sweep_once(&self) -> Result<usize, EngineError> {
        let mut expired_seats = 0;

        // Expire holds per function with live temporary selections
        let functions =
            with_retry(|| self.store.selections.functions_with_temporaries()).await?;
        for function_id in functions.iter().take(self.config.batch_size) {
            let found = with_retry(|| self.store.functions.find_by_id(*function_id)).await?;
            let function = match found {
                Some(function) => function,
                None => {
                    debug!(function = %function_id, "Temporaries for unknown function");
                    continue;
                }
            };
            match self.inventory.sweep_expired(&function).await {
                Ok(seats) => expired_seats += seats.len(),
                Err(EngineError::LockBusy) => {
                    // Contended function: the next tick gets it
                    debug!(function = %function_id, "Sweep skipped, lock busy");
                }
                Err(e) => {
                    error!(function = %function_id, error = %e, "Sweep failed");
                }
            }
        }

        // Safety net: temporary rows long past expiry whose function sweep
        // never reached them (deleted function, partial failures)
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.selection_grace)
                .unwrap_or_else(|_| ChronoDuration::seconds(60));
        let orphans = with_retry(|| self.store.selections.stale_temporaries(cutoff)).await?;
        for orphan in &orphans {
            let seats = [orphan.seat];
            let _ = with_retry(|| {
                self.store.selections.set_status(
                    orphan.function_id,
                    &seats,
                    None,
                    SelectionStatus::Temporary,
                    SelectionStatus::Expired,
                )
            })
            .await;
        }
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Orphaned selections expired");
        }

        // Transactions stuck in processing past the checkout window
        let failed = self.coordinator.expire_stale_checkouts().await?;
        if failed > 0 {
            info!(count = failed, "Stale checkouts failed");
        }

        Ok(expired_seats)
    }
}
