//! Cache Store abstraction
//!
//! Low-latency key/value store with the seat-engine capability set: TTL'd
//! strings, hashes, bitmaps, sets, sorted sets and append-only streams, plus
//! the atomic `set-if-absent-with-TTL` primitive the lock manager builds on.
//!
//! Every trait operation is atomic on its own. Compound seat mutations
//! (bitmap + hold record + selection mirror) are serialized by the
//! per-function lock, never by multi-key cache transactions. Stream "ack" is
//! modeled as a per-consumer cursor persisted through `set`.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Cache failure modes.
///
/// `Unavailable` and `Timeout` are transient and retried by callers;
/// `Logical` means the request itself is wrong and must not be retried.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache timeout: {0}")]
    Timeout(String),

    #[error("cache logical error: {0}")]
    Logical(String),
}

impl CacheError {
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_) | CacheError::Timeout(_))
    }
}

/// One entry read from an append-only stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

/// Capability set required by the seat engine.
#[async_trait]
pub trait CacheStore: Send + Sync {
    // === Strings / counters ===
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    /// Raw byte read; the whole-bitmap fetch for seat-map snapshots.
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    /// SET NX EX - the locking primitive. Returns whether the key was set.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
    /// Compare-and-delete: removes the key only while it still holds
    /// `expected`. Used for safe lock release.
    async fn delete_if_value(&self, key: &str, expected: &str) -> Result<bool, CacheError>;
    /// Compare-and-expire: refreshes the TTL only while the key still holds
    /// `expected`. Used for lock renewal.
    async fn expire_if_value(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    // === Hashes ===
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError>;

    // === Bitmaps (seat occupancy) ===
    /// Returns the previous bit value.
    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, CacheError>;
    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, CacheError>;
    async fn bitcount(&self, key: &str) -> Result<u64, CacheError>;

    // === Sets ===
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, CacheError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;

    // === Sorted sets (rankings) ===
    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, CacheError>;
    /// Descending by score, inclusive range, with scores.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CacheError>;

    // === Streams (event log) ===
    /// Append an entry; returns the assigned stream id.
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String, CacheError>;
    /// Read up to `count` entries strictly after `after_id` (`"0"` reads
    /// from the beginning).
    async fn xrange_after(
        &self,
        stream: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, CacheError>;
    async fn xlen(&self, stream: &str) -> Result<u64, CacheError>;

    // === Key scan ===
    /// Match keys against a glob-ish pattern (`*` wildcard only).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}
