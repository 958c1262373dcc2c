//! In-memory cache backend.
//!
//! Used by tests and standalone runs. Semantics match the Redis backend
//! closely enough for the seat engine: TTLs are honored lazily at access
//! time, stream ids are `{seq}-0`, and every operation is atomic under one
//! process-wide mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheError, CacheStore, StreamEntry};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, String>>,
    bitmaps: HashMap<String, Vec<u8>>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    streams: HashMap<String, Vec<StreamEntry>>,
    stream_seq: u64,
}

impl Inner {
    fn purge(&mut self) {
        self.kv.retain(|_, e| e.live());
    }
}

/// Process-local `CacheStore` implementation.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // '*' wildcard only, which is all the engine's key layout needs
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => {
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + part.len()..];
            }
            None => return false,
        }
    }
    parts.last().map(|p| p.is_empty()).unwrap_or(true) || rest.is_empty()
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        Ok(inner.kv.get(key).map(|e| e.value.clone()))
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        if let Some(bytes) = inner.bitmaps.get(key) {
            return Ok(Some(bytes.clone()));
        }
        Ok(inner.kv.get(key).map(|e| e.value.clone().into_bytes()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut inner = self.lock();
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        if inner.kv.contains_key(key) {
            return Ok(false);
        }
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        let removed = inner.kv.remove(key).is_some()
            | inner.hashes.remove(key).is_some()
            | inner.bitmaps.remove(key).is_some()
            | inner.sets.remove(key).is_some()
            | inner.zsets.remove(key).is_some();
        Ok(removed)
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        match inner.kv.get(key) {
            Some(e) if e.value == expected => {
                inner.kv.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_if_value(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        match inner.kv.get_mut(key) {
            Some(e) if e.value == expected => {
                e.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        Ok(inner.kv.contains_key(key)
            || inner.hashes.contains_key(key)
            || inner.bitmaps.contains_key(key))
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        let current: i64 = inner
            .kv
            .get(key)
            .map(|e| e.value.parse().unwrap_or(0))
            .unwrap_or(0);
        let next = current + 1;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError> {
        let mut inner = self.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (f, v) in fields {
            hash.insert(f.clone(), v.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let inner = self.lock();
        Ok(inner
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        let mut inner = self.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        let bytes = inner.bitmaps.entry(key.to_string()).or_default();
        let byte_idx = (offset / 8) as usize;
        let bit_idx = 7 - (offset % 8) as u8; // Redis bit order: MSB first
        if bytes.len() <= byte_idx {
            bytes.resize(byte_idx + 1, 0);
        }
        let mask = 1u8 << bit_idx;
        let previous = bytes[byte_idx] & mask != 0;
        if value {
            bytes[byte_idx] |= mask;
        } else {
            bytes[byte_idx] &= !mask;
        }
        Ok(previous)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, CacheError> {
        let inner = self.lock();
        let Some(bytes) = inner.bitmaps.get(key) else {
            return Ok(false);
        };
        let byte_idx = (offset / 8) as usize;
        let bit_idx = 7 - (offset % 8) as u8;
        Ok(bytes
            .get(byte_idx)
            .map(|b| b & (1 << bit_idx) != 0)
            .unwrap_or(false))
    }

    async fn bitcount(&self, key: &str) -> Result<u64, CacheError> {
        let inner = self.lock();
        Ok(inner
            .bitmaps
            .get(key)
            .map(|bytes| bytes.iter().map(|b| b.count_ones() as u64).sum())
            .unwrap_or(0))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        Ok(inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        Ok(inner
            .sets
            .get_mut(key)
            .map(|s| s.remove(member))
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let inner = self.lock();
        Ok(inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, CacheError> {
        let mut inner = self.lock();
        let zset = inner.zsets.entry(key.to_string()).or_default();
        let score = zset.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        let inner = self.lock();
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut pairs: Vec<(String, f64)> =
            zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let len = pairs.len() as isize;
        let norm = |i: isize| -> usize {
            if i < 0 {
                (len + i).max(0) as usize
            } else {
                i.min(len) as usize
            }
        };
        let (from, to) = (norm(start), norm(stop));
        if from >= pairs.len() {
            return Ok(Vec::new());
        }
        Ok(pairs[from..=(to.min(pairs.len() - 1))].to_vec())
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String, CacheError> {
        let mut inner = self.lock();
        inner.stream_seq += 1;
        let id = format!("{}-0", inner.stream_seq);
        inner
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(StreamEntry {
                id: id.clone(),
                fields: fields.to_vec(),
            });
        Ok(id)
    }

    async fn xrange_after(
        &self,
        stream: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, CacheError> {
        let inner = self.lock();
        let Some(entries) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let after_seq: u64 = after_id
            .split('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(entries
            .iter()
            .filter(|e| {
                e.id.split('-')
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|seq| seq > after_seq)
                    .unwrap_or(false)
            })
            .take(count)
            .cloned()
            .collect())
    }

    async fn xlen(&self, stream: &str) -> Result<u64, CacheError> {
        let inner = self.lock();
        Ok(inner.streams.get(stream).map(|e| e.len() as u64).unwrap_or(0))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut inner = self.lock();
        inner.purge();
        let mut keys: Vec<String> = inner
            .kv
            .keys()
            .chain(inner.hashes.keys())
            .chain(inner.bitmaps.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
