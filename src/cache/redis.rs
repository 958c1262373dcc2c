//! Redis-backed cache store.
//!
//! Uses `ConnectionManager` for pooling/reconnects. Compare-and-delete and
//! compare-and-expire run as Lua scripts so lock release/renewal stay atomic
//! against TTL expiry and re-acquisition.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;
use redis::{AsyncCommands, Client, RedisError, Script};

use super::{CacheError, CacheStore, StreamEntry};

/// Production `CacheStore` backend.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

fn map_err(e: RedisError) -> CacheError {
    if e.is_timeout() {
        CacheError::Timeout(e.to_string())
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::Logical(e.to_string())
    }
}

const CAD_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const CAE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

impl RedisCache {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(map_err)?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        tracing::info!(url, "Redis connection manager established");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(map_err)
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn();
        match ttl {
            Some(d) => conn
                .set_ex::<_, _, ()>(key, value, d.as_secs().max(1))
                .await
                .map_err(map_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(map_err),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(key).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let removed: i64 = Script::new(CAD_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn expire_if_value(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let refreshed: i64 = Script::new(CAE_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(refreshed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        conn.exists(key).await.map_err(map_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.conn();
        conn.incr(key, 1).await.map_err(map_err)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError> {
        let mut conn = self.conn();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(map_err)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        conn.hget(key, field).await.map_err(map_err)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn();
        conn.hincr(key, field, delta).await.map_err(map_err)
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let previous: i64 = conn
            .setbit(key, offset as usize, value)
            .await
            .map_err(map_err)?;
        Ok(previous != 0)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let bit: i64 = conn.getbit(key, offset as usize).await.map_err(map_err)?;
        Ok(bit != 0)
    }

    async fn bitcount(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn();
        let count: i64 = conn.bitcount(key).await.map_err(map_err)?;
        Ok(count.max(0) as u64)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await.map_err(map_err)?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key, member).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        conn.smembers(key).await.map_err(map_err)
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, CacheError> {
        let mut conn = self.conn();
        conn.zincr(key, member, delta).await.map_err(map_err)
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        let mut conn = self.conn();
        conn.zrevrange_withscores(key, start, stop)
            .await
            .map_err(map_err)
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String, CacheError> {
        let mut conn = self.conn();
        conn.xadd(stream, "*", fields).await.map_err(map_err)
    }

    async fn xrange_after(
        &self,
        stream: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, CacheError> {
        let mut conn = self.conn();
        // Exclusive start syntax requires Redis >= 6.2
        let start = if after_id == "0" {
            "-".to_string()
        } else {
            format!("({after_id}")
        };
        let reply: StreamRangeReply = conn
            .xrange_count(stream, start, "+", count)
            .await
            .map_err(map_err)?;

        let mut entries = Vec::with_capacity(reply.ids.len());
        for stream_id in reply.ids {
            let mut fields = Vec::with_capacity(stream_id.map.len());
            for (name, value) in stream_id.map {
                let text: String = redis::from_redis_value(&value).map_err(map_err)?;
                fields.push((name, text));
            }
            fields.sort();
            entries.push(StreamEntry {
                id: stream_id.id,
                fields,
            });
        }
        Ok(entries)
    }

    async fn xlen(&self, stream: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn();
        let len: i64 = conn.xlen(stream).await.map_err(map_err)?;
        Ok(len.max(0) as u64)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}
