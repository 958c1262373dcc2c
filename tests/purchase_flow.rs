//! End-to-end purchase scenarios over the in-memory backends.
//!
//! Exercises the seat engine the way the gateway drives it: hold, purchase,
//! conflict, expiry, payment failure, reaper sweep and cache rebuild.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crossbeam_queue::ArrayQueue;
use uuid::Uuid;

use cinemax::cache::{CacheStore, MemoryCache};
use cinemax::core_types::SeatCode;
use cinemax::error::EngineError;
use cinemax::events::{EventBus, SALES_STREAM};
use cinemax::inventory::{InventoryConfig, SeatInventory};
use cinemax::lock::{FunctionLockManager, LockConfig};
use cinemax::models::{
    AuditInfo, Function, FunctionState, Hall, PaymentMethod, SeatState, SelectionStatus,
    Transaction, TransactionState, User,
};
use cinemax::purchase::{
    MockBehavior, MockPaymentGateway, PaymentGateway, PaymentOutcome, PurchaseConfig,
    PurchaseCoordinator, PurchaseRequest,
};
use cinemax::realtime::SeatEvent;
use cinemax::reaper::{ExpiryReaper, ReaperConfig};
use cinemax::store::DurableStore;

struct Harness {
    cache: Arc<dyn CacheStore>,
    store: DurableStore,
    inventory: Arc<SeatInventory>,
    coordinator: Arc<PurchaseCoordinator>,
    payment: Arc<MockPaymentGateway>,
    #[allow(dead_code)]
    queue: Arc<ArrayQueue<SeatEvent>>,
}

fn build_harness(
    hold_window: Duration,
    gateway: Arc<dyn PaymentGateway>,
    mock: Arc<MockPaymentGateway>,
) -> Harness {
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let store = DurableStore::in_memory();
    let queue = Arc::new(ArrayQueue::new(1024));
    let bus = EventBus::new(cache.clone());

    let locks = FunctionLockManager::new(cache.clone(), LockConfig::default());
    let inventory = Arc::new(SeatInventory::new(
        cache.clone(),
        store.clone(),
        locks,
        queue.clone(),
        bus.clone(),
        InventoryConfig {
            hold_window,
            max_seats_per_hold: 10,
        },
    ));

    let coordinator = Arc::new(PurchaseCoordinator::new(
        store.clone(),
        inventory.clone(),
        gateway,
        bus,
        PurchaseConfig {
            checkout_window: Duration::from_secs(1800),
            sales_grace: Duration::from_secs(1800),
            payment_timeout: Duration::from_secs(5),
            tax_rate_bp: 1900,
        },
    ));

    Harness {
        cache,
        store,
        inventory,
        coordinator,
        payment: mock,
        queue,
    }
}

fn harness() -> Harness {
    let mock = Arc::new(MockPaymentGateway::approving());
    build_harness(Duration::from_secs(300), mock.clone(), mock)
}

async fn seed_function(store: &DurableStore) -> Function {
    let function = Function {
        id: Uuid::new_v4(),
        film_id: Uuid::new_v4(),
        hall: Hall::grid("h1", "Sala 1", 4, 10),
        starts_at: Utc::now() + ChronoDuration::hours(2),
        ends_at: Utc::now() + ChronoDuration::hours(4),
        base_price: 25_000,
        vip_price: Some(40_000),
        language: "es".into(),
        subtitles: false,
        state: FunctionState::Scheduled,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.functions.upsert(&function).await.unwrap();
    function
}

async fn seed_user(store: &DurableStore, email: &str) -> User {
    let user = User::new(email.into(), "Test User".into(), "hash".into());
    store.users.insert(&user).await.unwrap();
    user
}

fn seats(codes: &[&str]) -> Vec<SeatCode> {
    codes.iter().map(|c| SeatCode::parse(c).unwrap()).collect()
}

fn purchase_req(user: &User, function: &Function, codes: &[&str]) -> PurchaseRequest {
    PurchaseRequest {
        user: user.id,
        function: function.id,
        seats: codes.iter().map(|c| c.to_string()).collect(),
        method: PaymentMethod::Card,
        promo: None,
        audit: AuditInfo::default(),
    }
}

async fn seat_states(h: &Harness, f: &Function, codes: &[&str]) -> Vec<SeatState> {
    let map = h.inventory.query_map(f).await.unwrap();
    codes
        .iter()
        .map(|c| {
            let code = SeatCode::parse(c).unwrap();
            map.seats
                .iter()
                .find(|s| s.code == code)
                .map(|s| s.state)
                .unwrap()
        })
        .collect()
}

/// P1: popcount(bitmap) == |holds| + |sold|.
async fn assert_bitmap_invariant(h: &Harness, f: &Function) {
    let bits = h
        .cache
        .bitcount(&format!("bitmap:function:{}", f.id))
        .await
        .unwrap();
    let holds = h
        .cache
        .scan_keys(&format!("hold:{}:*", f.id))
        .await
        .unwrap()
        .len() as u64;
    let sold: u64 = h
        .store
        .transactions
        .find_confirmed_by_function(f.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.seats.len() as u64)
        .sum();
    assert_eq!(bits, holds + sold, "P1 violated: bits != holds + sold");
}

// ============================================================================
// Scenario 1: happy path
// ============================================================================

#[tokio::test]
async fn test_happy_path_purchase() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;

    let tx = h
        .coordinator
        .purchase(purchase_req(&user, &function, &["A5", "A6"]))
        .await
        .unwrap();

    assert_eq!(tx.state, TransactionState::Confirmed);
    assert_eq!(tx.subtotal, 50_000);
    assert_eq!(tx.tax, 9_500);
    assert_eq!(tx.total, 59_500);
    assert!(tx.invoice.starts_with("CIN-"));
    assert!(tx.qr_payload.is_some());
    assert!(tx.confirmed_at.is_some());

    // Seats report sold on a subsequent map query
    assert_eq!(
        seat_states(&h, &function, &["A5", "A6", "A7"]).await,
        vec![SeatState::Sold, SeatState::Sold, SeatState::Free]
    );

    // sale_confirmed reached the event stream
    let entries = h.cache.xrange_after(SALES_STREAM, "0", 100).await.unwrap();
    assert!(
        entries
            .iter()
            .any(|e| e.fields.iter().any(|(k, v)| k == "type" && v == "sale_confirmed"))
    );

    // Selections mirrored as confirmed
    let confirmed = h
        .store
        .selections
        .find_by_function_status(function.id, SelectionStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 2);

    assert_bitmap_invariant(&h, &function).await;
}

// ============================================================================
// Scenario 2: concurrent conflict (P3)
// ============================================================================

#[tokio::test]
async fn test_concurrent_hold_exactly_one_winner() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let u1 = seed_user(&h.store, "u1@example.com").await;
    let u2 = seed_user(&h.store, "u2@example.com").await;

    let contested = seats(&["A7"]);
    let (r1, r2) = tokio::join!(
        h.inventory.try_hold(&function, u1.id, &contested),
        h.inventory.try_hold(&function, u2.id, &contested),
    );

    let r1_ok = r1.is_ok();
    let r2_ok = r2.is_ok();
    assert_eq!(
        r1_ok as u8 + r2_ok as u8,
        1,
        "exactly one concurrent hold must win"
    );
    let loser_err = if r1_ok { r2.unwrap_err() } else { r1.unwrap_err() };
    match loser_err {
        EngineError::SeatUnavailable(conflicts) => assert_eq!(conflicts, vec!["A7".to_string()]),
        other => panic!("expected SeatUnavailable, got {other:?}"),
    }

    // The winner purchases successfully; the loser's purchase fails
    let (winner, loser) = if r1_ok { (&u1, &u2) } else { (&u2, &u1) };
    let tx = h
        .coordinator
        .purchase(purchase_req(winner, &function, &["A7"]))
        .await
        .unwrap();
    assert_eq!(tx.state, TransactionState::Confirmed);

    let denied = h
        .coordinator
        .purchase(purchase_req(loser, &function, &["A7"]))
        .await;
    assert!(matches!(denied, Err(EngineError::SeatUnavailable(_))));

    assert_bitmap_invariant(&h, &function).await;
}

// ============================================================================
// Scenario 3: hold expiry during payment -> HoldLost
// ============================================================================

/// Approves after a configurable pause; long enough for a short hold TTL to
/// lapse mid-payment.
struct SlowApprovingGateway {
    delay: Duration,
}

#[async_trait]
impl PaymentGateway for SlowApprovingGateway {
    async fn pay(
        &self,
        _total: i64,
        _method: PaymentMethod,
        _reference: &str,
    ) -> Result<PaymentOutcome, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(PaymentOutcome {
            ok: true,
            auth_code: Some("AUTH-SLOW".into()),
            error: None,
        })
    }
}

#[tokio::test]
async fn test_hold_lost_when_hold_expires_during_payment() {
    let slow: Arc<dyn PaymentGateway> = Arc::new(SlowApprovingGateway {
        delay: Duration::from_millis(300),
    });
    let h = build_harness(
        Duration::from_millis(100),
        slow,
        Arc::new(MockPaymentGateway::approving()),
    );
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;

    // u1 already holds A8; the purchase reuses the hold, then the TTL lapses
    // while the (slow) payment is in flight
    h.inventory
        .try_hold(&function, user.id, &seats(&["A8"]))
        .await
        .unwrap();

    let result = h
        .coordinator
        .purchase(purchase_req(&user, &function, &["A8"]))
        .await;
    assert!(matches!(result, Err(EngineError::HoldLost(ref lost)) if lost == &vec!["A8".to_string()]));

    // Transaction is failed, not confirmed
    let history = h.store.transactions.find_by_user(user.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, TransactionState::Failed);

    // The reaper closes the bitmap gap: A8 ends up free
    let function_doc = h.store.functions.find_by_id(function.id).await.unwrap().unwrap();
    h.inventory.sweep_expired(&function_doc).await.unwrap();
    assert_eq!(
        seat_states(&h, &function, &["A8"]).await,
        vec![SeatState::Free]
    );
    assert_bitmap_invariant(&h, &function).await;
}

// ============================================================================
// Scenario 4: payment failure (P6)
// ============================================================================

#[tokio::test]
async fn test_payment_declined_releases_seats() {
    let h = harness();
    h.payment
        .set_behavior(MockBehavior::Decline("declined".into()));
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;

    let before = h.inventory.query_map(&function).await.unwrap();
    let result = h
        .coordinator
        .purchase(purchase_req(&user, &function, &["A9"]))
        .await;
    assert!(matches!(result, Err(EngineError::PaymentDeclined(ref r)) if r == "declined"));

    // P6: held and sold counts are unchanged from pre-purchase
    let after = h.inventory.query_map(&function).await.unwrap();
    assert_eq!(before.occupancy.occupied, after.occupancy.occupied);
    assert_eq!(
        seat_states(&h, &function, &["A9"]).await,
        vec![SeatState::Free]
    );

    // The failed attempt is on the user's history; no sale event was emitted
    let history = h.store.transactions.find_by_user(user.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, TransactionState::Failed);
    let entries = h.cache.xrange_after(SALES_STREAM, "0", 100).await.unwrap();
    assert!(
        !entries
            .iter()
            .any(|e| e.fields.iter().any(|(k, v)| k == "type" && v == "sale_confirmed"))
    );

    assert_bitmap_invariant(&h, &function).await;
}

// ============================================================================
// Scenario 5: abandoned holds expire via the reaper (P4)
// ============================================================================

#[tokio::test]
async fn test_reaper_expires_abandoned_holds() {
    let mock = Arc::new(MockPaymentGateway::approving());
    let h = build_harness(Duration::from_millis(80), mock.clone(), mock);
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;

    h.inventory
        .try_hold(&function, user.id, &seats(&["A3", "A4"]))
        .await
        .unwrap();
    assert_eq!(
        seat_states(&h, &function, &["A3", "A4"]).await,
        vec![SeatState::Held, SeatState::Held]
    );

    tokio::time::sleep(Duration::from_millis(120)).await;

    let reaper = ExpiryReaper::new(
        h.inventory.clone(),
        h.coordinator.clone(),
        h.store.clone(),
        ReaperConfig::default(),
    );
    let expired = reaper.sweep_once().await.unwrap();
    assert_eq!(expired, 2);

    assert_eq!(
        seat_states(&h, &function, &["A3", "A4"]).await,
        vec![SeatState::Free, SeatState::Free]
    );
    let expired_rows = h
        .store
        .selections
        .find_by_function_status(function.id, SelectionStatus::Expired)
        .await
        .unwrap();
    assert_eq!(expired_rows.len(), 2);

    // hold_expired went to the event stream for observers
    let entries = h.cache.xrange_after(SALES_STREAM, "0", 100).await.unwrap();
    assert!(
        entries
            .iter()
            .any(|e| e.fields.iter().any(|(k, v)| k == "type" && v == "hold_expired"))
    );
    assert_bitmap_invariant(&h, &function).await;
}

// ============================================================================
// Scenario 6: cache cold start + rebuild (P7)
// ============================================================================

#[tokio::test]
async fn test_rebuild_after_cache_flush() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let u1 = seed_user(&h.store, "u1@example.com").await;
    let u2 = seed_user(&h.store, "u2@example.com").await;

    for seat in ["A1", "B2", "C3"] {
        h.coordinator
            .purchase(purchase_req(&u1, &function, &[seat]))
            .await
            .unwrap();
    }
    h.inventory
        .try_hold(&function, u2.id, &seats(&["D4"]))
        .await
        .unwrap();

    // Cold cache: same durable store, fresh everything cache-side
    let fresh_cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let queue = Arc::new(ArrayQueue::new(64));
    let rebuilt = SeatInventory::new(
        fresh_cache.clone(),
        h.store.clone(),
        FunctionLockManager::new(fresh_cache.clone(), LockConfig::default()),
        queue,
        EventBus::new(fresh_cache.clone()),
        InventoryConfig::default(),
    );

    rebuilt.rebuild(&function).await.unwrap();

    let map = rebuilt.query_map(&function).await.unwrap();
    let state_of = |code: &str| {
        let code = SeatCode::parse(code).unwrap();
        map.seats.iter().find(|s| s.code == code).unwrap().state
    };
    assert_eq!(state_of("A1"), SeatState::Sold);
    assert_eq!(state_of("B2"), SeatState::Sold);
    assert_eq!(state_of("C3"), SeatState::Sold);
    assert_eq!(state_of("D4"), SeatState::Held);
    let non_free = map
        .seats
        .iter()
        .filter(|s| s.state != SeatState::Free)
        .count();
    assert_eq!(non_free, 4);

    // P7: cache-derived counts match the durable record
    assert_eq!(
        fresh_cache
            .bitcount(&format!("bitmap:function:{}", function.id))
            .await
            .unwrap(),
        4
    );
}

// ============================================================================
// Boundary cases & idempotence
// ============================================================================

#[tokio::test]
async fn test_try_hold_is_idempotent_within_window() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;

    let batch = seats(&["A1", "A2"]);
    let first = h.inventory.try_hold(&function, user.id, &batch).await.unwrap();
    let second = h.inventory.try_hold(&function, user.id, &batch).await.unwrap();
    assert!(second <= first, "repeat hold must not extend the window");

    // Still exactly one hold record per seat (I2) and one selection row each
    let holds = h
        .cache
        .scan_keys(&format!("hold:{}:*", function.id))
        .await
        .unwrap();
    assert_eq!(holds.len(), 2);
    let rows = h
        .store
        .selections
        .find_by_function_status(function.id, SelectionStatus::Temporary)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_batch_boundaries() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let u1 = seed_user(&h.store, "u1@example.com").await;
    let u2 = seed_user(&h.store, "u2@example.com").await;

    // Duplicates collapse before the lock
    h.inventory
        .try_hold(&function, u1.id, &seats(&["B1", "B1", "B2"]))
        .await
        .unwrap();
    assert_eq!(
        seat_states(&h, &function, &["B1", "B2"]).await,
        vec![SeatState::Held, SeatState::Held]
    );

    // Max batch size passes; one more fails
    let max_batch: Vec<String> = (1..=10).map(|n| format!("C{n}")).collect();
    let max_batch: Vec<SeatCode> = max_batch.iter().map(|s| SeatCode::parse(s).unwrap()).collect();
    h.inventory.try_hold(&function, u2.id, &max_batch).await.unwrap();

    let oversized: Vec<SeatCode> = (1..=10)
        .map(|n| SeatCode::parse(&format!("D{n}")).unwrap())
        .chain(std::iter::once(SeatCode::parse("A10").unwrap()))
        .collect();
    assert!(matches!(
        h.inventory.try_hold(&function, u1.id, &oversized).await,
        Err(EngineError::TooManySeats { requested: 11, max: 10 })
    ));

    // Mixed free + foreign-held batch fails whole with the conflict listed,
    // and leaves the free seat untouched (no partial holds). C1 is u2's.
    let mixed = h
        .inventory
        .try_hold(&function, u1.id, &seats(&["A6", "C1"]))
        .await;
    assert!(matches!(
        mixed,
        Err(EngineError::SeatUnavailable(ref conflicts)) if conflicts == &vec!["C1".to_string()]
    ));
    assert_eq!(
        seat_states(&h, &function, &["A6"]).await,
        vec![SeatState::Free],
        "no partial hold may survive a conflicted batch"
    );

    // A batch mixing a seat the user already holds with a fresh one extends
    // the hold set instead of conflicting with itself
    h.inventory
        .try_hold(&function, u1.id, &seats(&["B1", "B3"]))
        .await
        .unwrap();
    assert_eq!(
        seat_states(&h, &function, &["B1", "B3"]).await,
        vec![SeatState::Held, SeatState::Held]
    );

    // Unknown and malformed codes
    assert!(matches!(
        h.inventory.try_hold(&function, u1.id, &seats(&["Z9"])).await,
        Err(EngineError::InvalidSeat(_))
    ));
    assert!(matches!(SeatCode::parse("5A"), Err(EngineError::InvalidSeat(_))));
}

#[tokio::test]
async fn test_release_then_rehold_round_trip() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let u1 = seed_user(&h.store, "u1@example.com").await;
    let u2 = seed_user(&h.store, "u2@example.com").await;

    let batch = seats(&["A1"]);
    h.inventory.try_hold(&function, u1.id, &batch).await.unwrap();

    // Double release is safe; a foreign release is a silent no-op
    let released = h.inventory.release(&function, u2.id, &batch).await.unwrap();
    assert!(released.is_empty());
    let released = h.inventory.release(&function, u1.id, &batch).await.unwrap();
    assert_eq!(released, batch);
    let released = h.inventory.release(&function, u1.id, &batch).await.unwrap();
    assert!(released.is_empty());

    // Seat is free again in both cache and durable store
    assert_eq!(seat_states(&h, &function, &["A1"]).await, vec![SeatState::Free]);
    let cancelled = h
        .store
        .selections
        .find_by_function_status(function.id, SelectionStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);

    // And another user can take it
    h.inventory.try_hold(&function, u2.id, &batch).await.unwrap();
    assert_bitmap_invariant(&h, &function).await;
}

#[tokio::test]
async fn test_sales_close_after_grace() {
    let h = harness();
    let mut function = seed_function(&h.store).await;
    // Started 31 minutes ago: one minute past the 30-minute grace
    function.starts_at = Utc::now() - ChronoDuration::minutes(31);
    h.store.functions.upsert(&function).await.unwrap();
    let user = seed_user(&h.store, "u1@example.com").await;

    let result = h
        .coordinator
        .purchase(purchase_req(&user, &function, &["A1"]))
        .await;
    assert!(matches!(result, Err(EngineError::SalesClosed)));
}

#[tokio::test]
async fn test_owner_cancel_releases_holds() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;
    let other = seed_user(&h.store, "u2@example.com").await;

    // Seed a processing transaction by hand (as if payment never resolved)
    h.inventory
        .try_hold(&function, user.id, &seats(&["A5"]))
        .await
        .unwrap();
    let now = Utc::now();
    let id = Uuid::new_v4();
    let tx = Transaction {
        id,
        invoice: Transaction::invoice_number(now, id),
        user_id: user.id,
        function_id: function.id,
        film_id: function.film_id,
        seats: vec![],
        subtotal: 25_000,
        customer_discount_bp: 0,
        promo_discount_bp: 0,
        tax: 4_750,
        total: 29_750,
        payment: cinemax::models::PaymentDetail::new(PaymentMethod::Card),
        state: TransactionState::Processing,
        created_at: now,
        updated_at: now,
        confirmed_at: None,
        expires_at: now + ChronoDuration::minutes(30),
        qr_payload: None,
        audit: AuditInfo::default(),
    };
    h.store.transactions.insert(&tx).await.unwrap();

    // Only the owner may cancel
    assert!(matches!(
        h.coordinator.cancel(other.id, tx.id).await,
        Err(EngineError::Forbidden)
    ));

    let cancelled = h.coordinator.cancel(user.id, tx.id).await.unwrap();
    assert_eq!(cancelled.state, TransactionState::Cancelled);

    // Cancelling again is rejected: the state is terminal
    assert!(matches!(
        h.coordinator.cancel(user.id, tx.id).await,
        Err(EngineError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_checkout_window_force_fail() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let user = seed_user(&h.store, "u1@example.com").await;

    h.inventory
        .try_hold(&function, user.id, &seats(&["A2"]))
        .await
        .unwrap();
    let now = Utc::now();
    let id = Uuid::new_v4();
    let tx = Transaction {
        id,
        invoice: Transaction::invoice_number(now, id),
        user_id: user.id,
        function_id: function.id,
        film_id: function.film_id,
        seats: vec![],
        subtotal: 25_000,
        customer_discount_bp: 0,
        promo_discount_bp: 0,
        tax: 4_750,
        total: 29_750,
        payment: cinemax::models::PaymentDetail::new(PaymentMethod::Card),
        state: TransactionState::Processing,
        created_at: now - ChronoDuration::hours(1),
        updated_at: now - ChronoDuration::hours(1),
        confirmed_at: None,
        expires_at: now - ChronoDuration::minutes(1),
        qr_payload: None,
        audit: AuditInfo::default(),
    };
    h.store.transactions.insert(&tx).await.unwrap();

    // P5: the reaper forces the stale checkout into a terminal state
    let failed = h.coordinator.expire_stale_checkouts().await.unwrap();
    assert_eq!(failed, 1);
    let stored = h.store.transactions.find_by_id(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TransactionState::Failed);
}

// ============================================================================
// P2: no two confirmed transactions share a seat
// ============================================================================

#[tokio::test]
async fn test_no_double_sale_under_concurrent_purchases() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let u1 = seed_user(&h.store, "u1@example.com").await;
    let u2 = seed_user(&h.store, "u2@example.com").await;

    let (r1, r2) = tokio::join!(
        h.coordinator.purchase(purchase_req(&u1, &function, &["B5", "B6"])),
        h.coordinator.purchase(purchase_req(&u2, &function, &["B6", "B7"])),
    );
    // Overlap on B6: at most one of the two purchases may confirm it
    let confirmed = h
        .store
        .transactions
        .find_confirmed_by_function(function.id)
        .await
        .unwrap();
    let mut sold_seats: Vec<String> = confirmed
        .iter()
        .flat_map(|t| t.seats.iter().map(|l| l.code.to_string()))
        .collect();
    let before_dedup = sold_seats.len();
    sold_seats.sort();
    sold_seats.dedup();
    assert_eq!(before_dedup, sold_seats.len(), "P2 violated: seat sold twice");
    assert!(r1.is_ok() || r2.is_ok(), "at least one purchase should win");

    assert_bitmap_invariant(&h, &function).await;
}

// ============================================================================
// Pricing through the coordinator: discounts and promo codes
// ============================================================================

#[tokio::test]
async fn test_premium_tier_and_promo_discounts() {
    let h = harness();
    let function = seed_function(&h.store).await;
    let mut user = User::new("vip@example.com".into(), "Premium".into(), "hash".into());
    user.tier = cinemax::models::CustomerTier::Premium;
    h.store.users.insert(&user).await.unwrap();

    let mut req = purchase_req(&user, &function, &["A1"]);
    req.promo = Some("CINE10".into());
    let tx = h.coordinator.purchase(req).await.unwrap();

    // 25,000 with 20% + 10% off = 17,500; tax 19% = 3,325
    assert_eq!(tx.customer_discount_bp, 2_000);
    assert_eq!(tx.promo_discount_bp, 1_000);
    assert_eq!(tx.subtotal, 25_000);
    assert_eq!(tx.total, 17_500 + 3_325);

    // Unknown promo fails before any hold is taken
    let mut bad = purchase_req(&user, &function, &["A2"]);
    bad.promo = Some("NOPE".into());
    assert!(matches!(
        h.coordinator.purchase(bad).await,
        Err(EngineError::PromoUnknown(_))
    ));
    assert_eq!(seat_states(&h, &function, &["A2"]).await, vec![SeatState::Free]);
}
