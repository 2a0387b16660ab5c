use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::DbPool;

/// A stored snapshot; `written_at_ms` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value_json: String,
    pub written_at_ms: i64,
}

/// Last-known-good read results with a TTL checked on read. Entries are
/// never invalidated by writes elsewhere; staleness is bounded by the TTL.
#[derive(Clone)]
pub struct OfflineCache {
    pool: DbPool,
    ttl_ms: i64,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl OfflineCache {
    pub fn new(pool: DbPool, ttl_hours: i64) -> Self {
        OfflineCache {
            pool,
            ttl_ms: ttl_hours.max(0) * 3_600_000,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Stable key for a named read and its arguments.
    pub fn derive_key(name: &str, args: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(args.to_string().as_bytes());
        format!("{}:{}", name, &hex::encode(hasher.finalize())[..16])
    }

    pub fn is_fresh(&self, written_at_ms: i64, now_ms: i64) -> bool {
        now_ms - written_at_ms <= self.ttl_ms
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), String> {
        self.put_at(key, value, now_ms())
    }

    pub fn put_at<T: Serialize>(&self, key: &str, value: &T, written_at_ms: i64) -> Result<(), String> {
        let json = serde_json::to_string(value).map_err(|e| e.to_string())?;
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO offline_cache (key, value_json, written_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = ?2, written_at_ms = ?3",
            params![key, json, written_at_ms],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Keep whichever copy was written last. Returns true if the incoming
    /// entry replaced or created the local one.
    pub fn merge(&self, entry: &CacheEntry) -> Result<bool, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "INSERT INTO offline_cache (key, value_json, written_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json,
                     written_at_ms = excluded.written_at_ms
                 WHERE excluded.written_at_ms > offline_cache.written_at_ms",
                params![entry.key, entry.value_json, entry.written_at_ms],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed > 0)
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let conn = self.pool.get().ok()?;
        conn.query_row(
            "SELECT key, value_json, written_at_ms FROM offline_cache WHERE key = ?1",
            params![key],
            |row| {
                Ok(CacheEntry {
                    key: row.get(0)?,
                    value_json: row.get(1)?,
                    written_at_ms: row.get(2)?,
                })
            },
        )
        .ok()
    }

    pub fn fresh_entry_at(&self, key: &str, now_ms: i64) -> Option<CacheEntry> {
        self.entry(key).filter(|e| self.is_fresh(e.written_at_ms, now_ms))
    }

    pub fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_fresh_at(key, now_ms())
    }

    /// Missing, stale and undecodable entries all read as `None`.
    pub fn get_fresh_at<T: DeserializeOwned>(&self, key: &str, now_ms: i64) -> Option<T> {
        let entry = self.fresh_entry_at(key, now_ms)?;
        serde_json::from_str(&entry.value_json).ok()
    }

    /// Read through the cache. Online: fetch, store on success, and fall
    /// back to the cached copy if the fetch fails. Offline: cached copy only.
    pub fn read<T, F>(&self, online: bool, key: &str, fetch: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, String>,
    {
        if !online {
            return self.get_fresh(key);
        }
        match fetch() {
            Ok(value) => {
                if let Err(e) = self.put(key, &value) {
                    log::warn!("[cache] Failed to store {}: {}", key, e);
                }
                Some(value)
            }
            Err(e) => {
                log::warn!("[cache] Fetch for {} failed, serving cached copy: {}", key, e);
                self.get_fresh(key)
            }
        }
    }

    /// Key → write time of every entry still fresh at `now_ms`.
    pub fn fresh_inventory(&self, now_ms: i64) -> BTreeMap<String, i64> {
        let conn = match self.pool.get() {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        let mut stmt = match conn
            .prepare("SELECT key, written_at_ms FROM offline_cache WHERE written_at_ms >= ?1 ORDER BY key")
        {
            Ok(s) => s,
            Err(_) => return BTreeMap::new(),
        };
        stmt.query_map(params![now_ms - self.ttl_ms], |row| Ok((row.get(0)?, row.get(1)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn clean_expired(&self) -> Result<usize, String> {
        self.clean_expired_at(now_ms())
    }

    pub fn clean_expired_at(&self, now_ms: i64) -> Result<usize, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM offline_cache WHERE written_at_ms < ?1",
            params![now_ms - self.ttl_ms],
        )
        .map_err(|e| e.to_string())
    }
}
