//! Seat Inventory Service
//!
//! Source of truth for per-function seat state. The cache bitmap plus the
//! hold records are authoritative in near-real-time; the durable selections
//! mirror exists for audit and for `rebuild` after a cache cold start.
//!
//! State per seat:
//! - free: bit 0, no hold record
//! - held: bit 1, hold record `hold:{function}:{seat}` with TTL
//! - sold: bit 1, no hold record, seat inside a confirmed transaction
//!
//! Every mutation runs under the function's lock, and the seat events it
//! produces are pushed to the hub queue before the lock is released, which
//! is what makes per-function broadcasts linearizable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_queue::ArrayQueue;
use rustc_hash::FxHashSet;

use crate::cache::CacheStore;
use crate::core_types::{FunctionId, SeatCode, TransactionId, UserId};
use crate::error::{EngineError, with_retry};
use crate::events::{EventBus, EventKind, EventRecord};
use crate::lock::FunctionLockManager;
use crate::models::{
    Function, HoldEntry, Occupancy, SeatMap, SeatMapEntry, SeatState, Selection, SelectionStatus,
};
use crate::realtime::messages::SeatEvent;
use crate::store::DurableStore;

/// Inventory tunables.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub hold_window: Duration,
    pub max_seats_per_hold: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            hold_window: Duration::from_secs(300),
            max_seats_per_hold: 10,
        }
    }
}

/// Atomic reserve/release/confirm over the per-function bitmap and holds.
pub struct SeatInventory {
    cache: Arc<dyn CacheStore>,
    store: DurableStore,
    locks: FunctionLockManager,
    events_out: Arc<ArrayQueue<SeatEvent>>,
    bus: EventBus,
    config: InventoryConfig,
}

fn bitmap_key(function: FunctionId) -> String {
    format!("bitmap:function:{function}")
}

fn hold_key(function: FunctionId, seat: SeatCode) -> String {
    format!("hold:{function}:{seat}")
}

fn bit_at(bytes: &[u8], offset: u64) -> bool {
    let byte_idx = (offset / 8) as usize;
    let bit_idx = 7 - (offset % 8) as u8;
    bytes
        .get(byte_idx)
        .map(|b| b & (1 << bit_idx) != 0)
        .unwrap_or(false)
}

impl SeatInventory {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        store: DurableStore,
        locks: FunctionLockManager,
        events_out: Arc<ArrayQueue<SeatEvent>>,
        bus: EventBus,
        config: InventoryConfig,
    ) -> Self {
        Self {
            cache,
            store,
            locks,
            events_out,
            bus,
            config,
        }
    }

    /// Deduplicate and validate seat codes against the function's hall.
    ///
    /// Duplicates collapse before the lock is taken; unknown seats fail with
    /// `InvalidSeat`; batches exceeding the hold cap fail with
    /// `TooManySeats`. The cap binds hold requests only - release, confirm
    /// and sweep must handle whatever a session accumulated.
    pub fn validate_seats(
        &self,
        function: &Function,
        seats: &[SeatCode],
    ) -> Result<Vec<SeatCode>, EngineError> {
        let deduped = Self::dedup_known(function, seats)?;
        if deduped.len() > self.config.max_seats_per_hold {
            return Err(EngineError::TooManySeats {
                requested: deduped.len(),
                max: self.config.max_seats_per_hold,
            });
        }
        Ok(deduped)
    }

    fn dedup_known(function: &Function, seats: &[SeatCode]) -> Result<Vec<SeatCode>, EngineError> {
        let mut seen = FxHashSet::default();
        let mut deduped = Vec::with_capacity(seats.len());
        for seat in seats {
            if !seen.insert(*seat) {
                continue;
            }
            if function.hall.seat(seat).is_none() {
                return Err(EngineError::InvalidSeat(seat.to_string()));
            }
            deduped.push(*seat);
        }
        Ok(deduped)
    }

    async fn read_hold(
        &self,
        function: FunctionId,
        seat: SeatCode,
    ) -> Result<Option<HoldEntry>, EngineError> {
        let key = hold_key(function, seat);
        let raw = with_retry(|| self.cache.get(&key)).await?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| EngineError::Internal(format!("corrupt hold record: {e}"))),
            None => Ok(None),
        }
    }

    fn push_event(&self, event: SeatEvent) {
        if self.events_out.push(event).is_err() {
            tracing::warn!("Seat event queue full, broadcast dropped");
        }
    }

    // ========================================================================
    // query_map
    // ========================================================================

    /// Point-in-time seat grid with aggregate counts.
    ///
    /// The snapshot may miss a hold acquired mid-read but never reports a
    /// sold seat as free: the bitmap is read before the holds, and sold
    /// seats have their bit set for as long as they stay sold.
    pub async fn query_map(&self, function: &Function) -> Result<SeatMap, EngineError> {
        let bkey = bitmap_key(function.id);
        let bytes = with_retry(|| self.cache.get_bytes(&bkey))
            .await?
            .unwrap_or_default();

        let pattern = format!("hold:{}:*", function.id);
        let hold_keys = with_retry(|| self.cache.scan_keys(&pattern)).await?;
        let held: FxHashSet<String> = hold_keys
            .iter()
            .filter_map(|k| k.rsplit(':').next().map(String::from))
            .collect();

        let spr = function.hall.seats_per_row;
        let mut occupied = 0u32;
        let mut seats = Vec::with_capacity(function.hall.seats.len());
        for descriptor in &function.hall.seats {
            let code = descriptor.code();
            let state = if !bit_at(&bytes, code.bit_offset(spr)) {
                SeatState::Free
            } else if held.contains(&code.to_string()) {
                SeatState::Held
            } else {
                SeatState::Sold
            };
            if state != SeatState::Free {
                occupied += 1;
            }
            seats.push(SeatMapEntry {
                code,
                row: descriptor.row,
                number: descriptor.number,
                tier: descriptor.tier,
                state,
            });
        }

        Ok(SeatMap {
            function_id: function.id,
            seats,
            occupancy: Occupancy::from_counts(occupied, function.hall.capacity),
        })
    }

    // ========================================================================
    // try_hold
    // ========================================================================

    /// Atomically hold `seats` for `user`. All-or-nothing: any unavailable
    /// seat fails the whole batch with the conflict list. Re-holding seats
    /// already held by the same user is a no-op success returning the
    /// surviving expiry.
    pub async fn try_hold(
        &self,
        function: &Function,
        user: UserId,
        seats: &[SeatCode],
    ) -> Result<DateTime<Utc>, EngineError> {
        let seats = self.validate_seats(function, seats)?;
        if seats.is_empty() {
            return Err(EngineError::InvalidSeat("empty seat list".into()));
        }

        let lock = self.locks.acquire(function.id).await?;
        let result = self.try_hold_locked(function, user, &seats).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(function = %function.id, error = %e, "Lock release failed");
        }
        result
    }

    async fn try_hold_locked(
        &self,
        function: &Function,
        user: UserId,
        seats: &[SeatCode],
    ) -> Result<DateTime<Utc>, EngineError> {
        let spr = function.hall.seats_per_row;
        let bkey = bitmap_key(function.id);

        // Classify each seat: free, already mine, or conflicting
        let mut free: Vec<SeatCode> = Vec::new();
        let mut mine: Vec<(SeatCode, HoldEntry)> = Vec::new();
        let mut conflicts: Vec<String> = Vec::new();
        for seat in seats {
            let taken = with_retry(|| self.cache.getbit(&bkey, seat.bit_offset(spr))).await?;
            if !taken {
                free.push(*seat);
                continue;
            }
            match self.read_hold(function.id, *seat).await? {
                Some(entry) if entry.user == user => mine.push((*seat, entry)),
                _ => conflicts.push(seat.to_string()),
            }
        }

        if !conflicts.is_empty() {
            return Err(EngineError::SeatUnavailable(conflicts));
        }

        let now = Utc::now();
        let window = ChronoDuration::from_std(self.config.hold_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));

        if free.is_empty() {
            // Pure re-hold: idempotent no-op, report the earliest surviving expiry
            let expiry = mine
                .iter()
                .map(|(_, entry)| entry.created_at + window)
                .min()
                .unwrap_or(now + window);
            return Ok(expiry);
        }

        let expires_at = now + window;
        let entry_json = serde_json::to_string(&HoldEntry {
            user,
            created_at: now,
        })
        .map_err(|e| EngineError::Internal(e.to_string()))?;

        let mut written: Vec<SeatCode> = Vec::new();
        for seat in &free {
            if let Err(e) = with_retry(|| self.cache.setbit(&bkey, seat.bit_offset(spr), true)).await
            {
                self.rollback_holds(function, &written).await;
                return Err(e.into());
            }
            written.push(*seat);
            let hkey = hold_key(function.id, *seat);
            if let Err(e) = with_retry(|| {
                self.cache
                    .set(&hkey, &entry_json, Some(self.config.hold_window))
            })
            .await
            {
                self.rollback_holds(function, &written).await;
                return Err(e.into());
            }
        }

        // Mirror to the durable store; on failure undo the cache writes
        let selections: Vec<Selection> = free
            .iter()
            .map(|seat| Selection::temporary(function.id, user, *seat, expires_at))
            .collect();
        let mirrored = with_retry(|| self.store.selections.insert_many(&selections)).await;
        if let Err(e) = mirrored {
            self.rollback_holds(function, &written).await;
            return Err(e.into());
        }

        tracing::info!(
            function = %function.id,
            user = %user,
            seats = free.len(),
            "Seats held"
        );

        self.push_event(SeatEvent::Held {
            function: function.id,
            user,
            seats: free.clone(),
            expires_at,
        });
        let record = EventRecord::new(EventKind::SeatHeld, function.id)
            .with_user(user)
            .with_seats(free);
        if let Err(e) = self.bus.append(&record).await {
            tracing::warn!(error = %e, "Event append failed for seat_held");
        }

        Ok(expires_at)
    }

    /// Best-effort cache undo for a partially written hold batch.
    async fn rollback_holds(&self, function: &Function, seats: &[SeatCode]) {
        let spr = function.hall.seats_per_row;
        let bkey = bitmap_key(function.id);
        for seat in seats {
            let hkey = hold_key(function.id, *seat);
            let _ = with_retry(|| self.cache.delete(&hkey)).await;
            let _ = with_retry(|| self.cache.setbit(&bkey, seat.bit_offset(spr), false)).await;
        }
    }

    // ========================================================================
    // release
    // ========================================================================

    /// Release `user`'s holds on `seats`. Seats not held by `user` are
    /// skipped silently so double-release is safe. Returns the seats that
    /// were actually released.
    pub async fn release(
        &self,
        function: &Function,
        user: UserId,
        seats: &[SeatCode],
    ) -> Result<Vec<SeatCode>, EngineError> {
        let seats = Self::dedup_known(function, seats)?;
        if seats.is_empty() {
            return Ok(Vec::new());
        }

        let lock = self.locks.acquire(function.id).await?;
        let result = self.release_locked(function, user, &seats).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(function = %function.id, error = %e, "Lock release failed");
        }
        result
    }

    async fn release_locked(
        &self,
        function: &Function,
        user: UserId,
        seats: &[SeatCode],
    ) -> Result<Vec<SeatCode>, EngineError> {
        let spr = function.hall.seats_per_row;
        let bkey = bitmap_key(function.id);

        let mut released: Vec<SeatCode> = Vec::new();
        for seat in seats {
            match self.read_hold(function.id, *seat).await? {
                Some(entry) if entry.user == user => {
                    let hkey = hold_key(function.id, *seat);
                    with_retry(|| self.cache.delete(&hkey)).await?;
                    with_retry(|| self.cache.setbit(&bkey, seat.bit_offset(spr), false)).await?;
                    released.push(*seat);
                }
                _ => {} // not ours (or already gone): skip silently
            }
        }

        if released.is_empty() {
            return Ok(released);
        }

        let marked = with_retry(|| {
            self.store.selections.set_status(
                function.id,
                &released,
                Some(user),
                SelectionStatus::Temporary,
                SelectionStatus::Cancelled,
            )
        })
        .await;
        if let Err(e) = marked {
            // Cache state is already consistent; the reaper will reconcile rows
            tracing::warn!(function = %function.id, error = %e, "Selection cancel failed");
        }

        tracing::info!(
            function = %function.id,
            user = %user,
            seats = released.len(),
            "Seats released"
        );

        self.push_event(SeatEvent::Released {
            function: function.id,
            user,
            seats: released.clone(),
        });
        let record = EventRecord::new(EventKind::SeatReleased, function.id)
            .with_user(user)
            .with_seats(released.clone());
        if let Err(e) = self.bus.append(&record).await {
            tracing::warn!(error = %e, "Event append failed for seat_released");
        }

        Ok(released)
    }

    // ========================================================================
    // confirm
    // ========================================================================

    /// Convert `user`'s holds into sold seats. Fails atomically with
    /// `HoldLost` when any requested seat is no longer held by `user`; the
    /// caller must treat the purchase as failed.
    pub async fn confirm(
        &self,
        function: &Function,
        user: UserId,
        seats: &[SeatCode],
        transaction: TransactionId,
    ) -> Result<(), EngineError> {
        let seats = Self::dedup_known(function, seats)?;

        let lock = self.locks.acquire(function.id).await?;
        let result = self
            .confirm_locked(function, user, &seats, transaction)
            .await;
        if let Err(e) = lock.release().await {
            tracing::warn!(function = %function.id, error = %e, "Lock release failed");
        }
        result
    }

    async fn confirm_locked(
        &self,
        function: &Function,
        user: UserId,
        seats: &[SeatCode],
        transaction: TransactionId,
    ) -> Result<(), EngineError> {
        // Verify every hold first; nothing is mutated on a lost hold
        let mut lost: Vec<String> = Vec::new();
        for seat in seats {
            match self.read_hold(function.id, *seat).await? {
                Some(entry) if entry.user == user => {}
                _ => lost.push(seat.to_string()),
            }
        }
        if !lost.is_empty() {
            return Err(EngineError::HoldLost(lost));
        }

        // Drop the hold records; the bitmap bits stay set (sold)
        for seat in seats {
            let hkey = hold_key(function.id, *seat);
            with_retry(|| self.cache.delete(&hkey)).await?;
        }

        let marked = with_retry(|| {
            self.store.selections.set_status(
                function.id,
                seats,
                Some(user),
                SelectionStatus::Temporary,
                SelectionStatus::Confirmed,
            )
        })
        .await;
        if let Err(e) = marked {
            tracing::warn!(function = %function.id, error = %e, "Selection confirm failed");
        }

        tracing::info!(
            function = %function.id,
            user = %user,
            transaction = %transaction,
            seats = seats.len(),
            "Seats sold"
        );

        self.push_event(SeatEvent::SaleConfirmed {
            function: function.id,
            user,
            seats: seats.to_vec(),
            transaction,
        });

        Ok(())
    }

    // ========================================================================
    // sweep_expired
    // ========================================================================

    /// Reaper entry point: close the gap between a hold's TTL expiring in
    /// the cache and the bitmap bit / selection row that do not auto-clear.
    /// Returns the expired seats.
    pub async fn sweep_expired(
        &self,
        function: &Function,
    ) -> Result<Vec<SeatCode>, EngineError> {
        let lock = self.locks.acquire(function.id).await?;
        let result = self.sweep_locked(function).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(function = %function.id, error = %e, "Lock release failed");
        }
        result
    }

    async fn sweep_locked(&self, function: &Function) -> Result<Vec<SeatCode>, EngineError> {
        let spr = function.hall.seats_per_row;
        let bkey = bitmap_key(function.id);
        let now = Utc::now();

        let temporaries = with_retry(|| {
            self.store
                .selections
                .find_by_function_status(function.id, SelectionStatus::Temporary)
        })
        .await?;

        let mut expired: Vec<SeatCode> = Vec::new();
        for selection in temporaries {
            if selection.expires_at > now {
                continue;
            }
            // TTL elapsed: the hold record is (or is about to be) gone
            let hkey = hold_key(function.id, selection.seat);
            with_retry(|| self.cache.delete(&hkey)).await?;
            with_retry(|| {
                self.cache
                    .setbit(&bkey, selection.seat.bit_offset(spr), false)
            })
            .await?;
            expired.push(selection.seat);
        }

        if expired.is_empty() {
            return Ok(expired);
        }

        let marked = with_retry(|| {
            self.store.selections.set_status(
                function.id,
                &expired,
                None,
                SelectionStatus::Temporary,
                SelectionStatus::Expired,
            )
        })
        .await;
        if let Err(e) = marked {
            tracing::warn!(function = %function.id, error = %e, "Selection expire failed");
        }

        tracing::info!(
            function = %function.id,
            seats = expired.len(),
            "Holds expired"
        );

        self.push_event(SeatEvent::Expired {
            function: function.id,
            seats: expired.clone(),
        });
        let record = EventRecord::new(EventKind::HoldExpired, function.id)
            .with_seats(expired.clone());
        if let Err(e) = self.bus.append(&record).await {
            tracing::warn!(error = %e, "Event append failed for hold_expired");
        }

        Ok(expired)
    }

    // ========================================================================
    // rebuild
    // ========================================================================

    /// Cold-start bootstrap: rewrite the bitmap and hold records from the
    /// durable record (confirmed transactions + non-expired temporary
    /// selections).
    pub async fn rebuild(&self, function: &Function) -> Result<(), EngineError> {
        let lock = self.locks.acquire(function.id).await?;
        let result = self.rebuild_locked(function).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(function = %function.id, error = %e, "Lock release failed");
        }
        result
    }

    async fn rebuild_locked(&self, function: &Function) -> Result<(), EngineError> {
        let spr = function.hall.seats_per_row;
        let bkey = bitmap_key(function.id);
        let now = Utc::now();

        // Start clean
        with_retry(|| self.cache.delete(&bkey)).await?;
        let pattern = format!("hold:{}:*", function.id);
        for key in with_retry(|| self.cache.scan_keys(&pattern)).await? {
            with_retry(|| self.cache.delete(&key)).await?;
        }

        // Sold seats from confirmed transactions
        let confirmed = with_retry(|| {
            self.store
                .transactions
                .find_confirmed_by_function(function.id)
        })
        .await?;
        let mut sold = 0u32;
        for tx in &confirmed {
            for line in &tx.seats {
                with_retry(|| self.cache.setbit(&bkey, line.code.bit_offset(spr), true)).await?;
                sold += 1;
            }
        }

        // Live holds from non-expired temporary selections
        let temporaries = with_retry(|| {
            self.store
                .selections
                .find_by_function_status(function.id, SelectionStatus::Temporary)
        })
        .await?;
        let mut held = 0u32;
        let mut stale: Vec<SeatCode> = Vec::new();
        for selection in temporaries {
            if selection.expires_at <= now {
                stale.push(selection.seat);
                continue;
            }
            let remaining = (selection.expires_at - now)
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            let entry = serde_json::to_string(&HoldEntry {
                user: selection.user_id,
                created_at: selection.selected_at,
            })
            .map_err(|e| EngineError::Internal(e.to_string()))?;
            let hkey = hold_key(function.id, selection.seat);
            with_retry(|| self.cache.set(&hkey, &entry, Some(remaining))).await?;
            with_retry(|| {
                self.cache
                    .setbit(&bkey, selection.seat.bit_offset(spr), true)
            })
            .await?;
            held += 1;
        }

        if !stale.is_empty() {
            let _ = self
                .store
                .selections
                .set_status(
                    function.id,
                    &stale,
                    None,
                    SelectionStatus::Temporary,
                    SelectionStatus::Expired,
                )
                .await;
        }

        tracing::info!(
            function = %function.id,
            sold,
            held,
            expired = stale.len(),
            "Seat state rebuilt from durable store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::lock::LockConfig;
    use crate::models::{FunctionState, Hall};
    use uuid::Uuid;

    fn test_inventory() -> SeatInventory {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        SeatInventory::new(
            cache.clone(),
            DurableStore::in_memory(),
            FunctionLockManager::new(cache.clone(), LockConfig::default()),
            Arc::new(ArrayQueue::new(64)),
            EventBus::new(cache),
            InventoryConfig {
                hold_window: Duration::from_secs(60),
                max_seats_per_hold: 3,
            },
        )
    }

    fn test_function() -> Function {
        Function {
            id: Uuid::new_v4(),
            film_id: Uuid::new_v4(),
            hall: Hall::grid("h1", "Sala 1", 2, 5),
            starts_at: Utc::now(),
            ends_at: Utc::now(),
            base_price: 25_000,
            vip_price: None,
            language: "es".into(),
            subtitles: false,
            state: FunctionState::Scheduled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn codes(raw: &[&str]) -> Vec<SeatCode> {
        raw.iter().map(|c| SeatCode::parse(c).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_validate_seats_dedup_and_bounds() {
        let inventory = test_inventory();
        let function = test_function();

        let deduped = inventory
            .validate_seats(&function, &codes(&["A1", "a1", "B2"]))
            .unwrap();
        assert_eq!(deduped, codes(&["A1", "B2"]));

        assert!(matches!(
            inventory.validate_seats(&function, &codes(&["C1"])),
            Err(EngineError::InvalidSeat(_))
        ));
        assert!(matches!(
            inventory.validate_seats(&function, &codes(&["A1", "A2", "A3", "A4"])),
            Err(EngineError::TooManySeats { requested: 4, max: 3 })
        ));
    }

    #[tokio::test]
    async fn test_confirm_keeps_bit_and_drops_hold() {
        let inventory = test_inventory();
        let function = test_function();
        let user = Uuid::new_v4();
        let batch = codes(&["A2"]);

        inventory.try_hold(&function, user, &batch).await.unwrap();
        inventory
            .confirm(&function, user, &batch, Uuid::new_v4())
            .await
            .unwrap();

        // Sold: bit stays set, hold record gone
        assert!(
            inventory
                .cache
                .getbit(&bitmap_key(function.id), batch[0].bit_offset(5))
                .await
                .unwrap()
        );
        assert!(
            inventory
                .cache
                .get(&hold_key(function.id, batch[0]))
                .await
                .unwrap()
                .is_none()
        );

        // Confirming again fails: nothing is held anymore
        assert!(matches!(
            inventory
                .confirm(&function, user, &batch, Uuid::new_v4())
                .await,
            Err(EngineError::HoldLost(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_is_all_or_nothing() {
        let inventory = test_inventory();
        let function = test_function();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

        inventory.try_hold(&function, u1, &codes(&["A1"])).await.unwrap();
        inventory.try_hold(&function, u2, &codes(&["A2"])).await.unwrap();

        // u1 cannot confirm a batch including u2's seat; u1's own hold survives
        let result = inventory
            .confirm(&function, u1, &codes(&["A1", "A2"]), Uuid::new_v4())
            .await;
        assert!(matches!(
            result,
            Err(EngineError::HoldLost(ref lost)) if lost == &vec!["A2".to_string()]
        ));
        assert!(
            inventory
                .cache
                .get(&hold_key(function.id, SeatCode::parse("A1").unwrap()))
                .await
                .unwrap()
                .is_some()
        );
    }
}
