//! Gateway application state (shared)
//!
//! Explicit dependency container built once at startup and passed into
//! every handler, the WebSocket layer and the background workers. Tests
//! substitute the in-memory cache/store fakes here directly.

use std::sync::Arc;

use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::inventory::SeatInventory;
use crate::purchase::PurchaseCoordinator;
use crate::realtime::SessionManager;
use crate::store::DurableStore;
use crate::user_auth::UserAuthService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<dyn CacheStore>,
    pub store: DurableStore,
    pub inventory: Arc<SeatInventory>,
    pub coordinator: Arc<PurchaseCoordinator>,
    pub hub: Arc<SessionManager>,
    pub auth: Arc<UserAuthService>,
    pub bus: EventBus,
}

/// Background workers produced by assembly; the caller decides where to
/// spawn them (the server binary spawns all three, tests drive them by
/// hand).
pub struct BackgroundTasks {
    pub hub_service: crate::realtime::HubService,
    pub reaper: crate::reaper::ExpiryReaper,
    pub dispatcher: crate::events::DispatchWorker,
}

impl AppState {
    /// Wire the full engine over the given backends.
    pub fn assemble(
        config: AppConfig,
        cache: Arc<dyn CacheStore>,
        store: DurableStore,
        payment: Arc<dyn crate::purchase::PaymentGateway>,
    ) -> (Arc<AppState>, BackgroundTasks) {
        use crossbeam_queue::ArrayQueue;

        use crate::events::{DispatchWorker, EmailConsumer, EventConsumer, LogEmailSink, MetricsConsumer};
        use crate::inventory::InventoryConfig;
        use crate::lock::{FunctionLockManager, LockConfig};
        use crate::purchase::PurchaseConfig;
        use crate::reaper::{ExpiryReaper, ReaperConfig};

        let hub = Arc::new(SessionManager::new());
        let seat_events = Arc::new(ArrayQueue::new(4096));
        let bus = EventBus::new(cache.clone());

        let locks = FunctionLockManager::new(
            cache.clone(),
            LockConfig {
                ttl: config.lock_ttl,
                wait_max: config.lock_wait_max,
                ..LockConfig::default()
            },
        );

        let inventory = Arc::new(SeatInventory::new(
            cache.clone(),
            store.clone(),
            locks,
            seat_events.clone(),
            bus.clone(),
            InventoryConfig {
                hold_window: config.hold_window,
                max_seats_per_hold: config.max_seats_per_hold,
            },
        ));

        let coordinator = Arc::new(PurchaseCoordinator::new(
            store.clone(),
            inventory.clone(),
            payment,
            bus.clone(),
            PurchaseConfig {
                checkout_window: config.checkout_window,
                sales_grace: config.sales_grace,
                payment_timeout: config.payment_timeout,
                tax_rate_bp: config.tax_rate_bp,
            },
        ));

        let auth = Arc::new(UserAuthService::new(
            store.users.clone(),
            config.jwt_secret.clone(),
            config.token_expire_hours,
        ));

        let consumers: Vec<Arc<dyn EventConsumer>> = vec![
            Arc::new(MetricsConsumer::new(cache.clone())),
            Arc::new(EmailConsumer::new(Arc::new(LogEmailSink))),
        ];
        let dispatcher = DispatchWorker::new(cache.clone(), consumers);

        let reaper = ExpiryReaper::new(
            inventory.clone(),
            coordinator.clone(),
            store.clone(),
            ReaperConfig {
                tick: config.reaper_tick,
                ..ReaperConfig::default()
            },
        );

        let hub_service = crate::realtime::HubService::new(hub.clone(), seat_events);

        let state = Arc::new(AppState {
            config: Arc::new(config),
            cache,
            store,
            inventory,
            coordinator,
            hub,
            auth,
            bus,
        });

        (
            state,
            BackgroundTasks {
                hub_service,
                reaper,
                dispatcher,
            },
        )
    }
}
