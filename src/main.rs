//! cinemax - Seat Inventory & Transaction Engine
//!
//! Server entry point. Architecture:
//!
//! ```text
//! ┌─────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────┐
//! │ Gateway │──▶│ Inventory │──▶│ Coordinator │──▶│ EventBus │
//! │ HTTP/WS │   │ (Redis)   │   │ (Postgres)  │   │ (stream) │
//! └─────────┘   └───────────┘   └─────────────┘   └──────────┘
//!       ▲              │ seat events
//!       └──── Hub ◀────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use cinemax::cache::{CacheStore, MemoryCache, RedisCache};
use cinemax::config::AppConfig;
use cinemax::gateway::{self, state::AppState};
use cinemax::logging::init_logging;
use cinemax::purchase::{HttpPaymentGateway, PaymentGateway};
use cinemax::store::{DurableStore, PostgresStore};

#[cfg(feature = "mock-payment")]
fn fallback_payment() -> anyhow::Result<Arc<dyn PaymentGateway>> {
    println!("[3] Payment gateway: MOCK (approves everything; dev only)");
    Ok(Arc::new(cinemax::purchase::MockPaymentGateway::approving()))
}

#[cfg(not(feature = "mock-payment"))]
fn fallback_payment() -> anyhow::Result<Arc<dyn PaymentGateway>> {
    anyhow::bail!("PAYMENT_GATEWAY_URL and PAYMENT_GATEWAY_API_KEY are required")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = init_logging(&config);

    println!("=== cinemax: seat inventory & transaction engine ===");

    // Step 1: Cache store (seat state of record)
    println!("[1] Connecting cache at {} ...", config.cache_url);
    let cache: Arc<dyn CacheStore> = match RedisCache::connect(&config.cache_url).await {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, using in-process cache");
            println!("    Redis unavailable ({e}); falling back to in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    // Step 2: Durable store (historical record)
    println!("[2] Connecting durable store ...");
    let store = match PostgresStore::connect(&config.database_url).await {
        Ok(pg) => DurableStore::postgres(pg),
        Err(e) => {
            tracing::warn!(error = %e, "PostgreSQL unavailable, using in-memory store");
            println!("    PostgreSQL unavailable ({e}); falling back to in-memory store");
            DurableStore::in_memory()
        }
    };

    // Step 3: Payment capability
    let payment: Arc<dyn PaymentGateway> =
        match (&config.payment_gateway_url, &config.payment_gateway_api_key) {
            (Some(url), Some(key)) => {
                println!("[3] Payment gateway: {url}");
                Arc::new(HttpPaymentGateway::new(url.clone(), key.clone()))
            }
            _ => fallback_payment()?,
        };

    // Step 4: Assemble the engine and spawn the background workers
    println!("[4] Assembling engine ...");
    let (state, tasks) = AppState::assemble(config.clone(), cache, store, payment);

    tokio::spawn(tasks.hub_service.run());
    println!("    Hub broadcast service started");
    tokio::spawn(tasks.dispatcher.run());
    println!("    Event dispatch worker started");
    let reaper = tasks.reaper;
    tokio::spawn(async move { reaper.run().await });
    println!("    Expiry reaper started (tick {:?})", config.reaper_tick);

    // Step 5: Serve
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    println!("[5] Listening on {addr}");
    gateway::run_server(state, listener).await?;

    Ok(())
}
