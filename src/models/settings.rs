use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::DbPool;

/// Keys whose values never leave the server in API responses.
const SECRET_SUFFIXES: &[&str] = &["_password", "_api_key", "_secret", "_private_key"];

#[derive(Debug, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn get(pool: &DbPool, key: &str) -> Option<String> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn get_or(pool: &DbPool, key: &str, default: &str) -> String {
        Self::get(pool, key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(pool: &DbPool, key: &str) -> bool {
        Self::get(pool, key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }

    pub fn get_i64(pool: &DbPool, key: &str) -> i64 {
        Self::get(pool, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn set_many(pool: &DbPool, settings: &HashMap<String, String>) -> Result<(), String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        for (key, value) in settings {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )
            .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())
    }

    pub fn all(pool: &DbPool) -> HashMap<String, String> {
        Self::query_pairs(pool, "SELECT key, value FROM settings", None)
    }

    pub fn get_group(pool: &DbPool, prefix: &str) -> HashMap<String, String> {
        let pattern = format!("{}%", prefix);
        Self::query_pairs(
            pool,
            "SELECT key, value FROM settings WHERE key LIKE ?1",
            Some(&pattern),
        )
    }

    /// Settings with secrets masked, for admin display.
    pub fn redacted(pool: &DbPool) -> HashMap<String, String> {
        Self::all(pool)
            .into_iter()
            .map(|(k, v)| {
                if SECRET_SUFFIXES.iter().any(|s| k.ends_with(s)) && !v.is_empty() {
                    (k, "********".to_string())
                } else {
                    (k, v)
                }
            })
            .collect()
    }

    fn query_pairs(pool: &DbPool, sql: &str, arg: Option<&str>) -> HashMap<String, String> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let mut stmt = match conn.prepare(sql) {
            Ok(s) => s,
            Err(_) => return HashMap::new(),
        };
        let map_row = |row: &rusqlite::Row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        };
        let rows = match arg {
            Some(a) => stmt.query_map(params![a], map_row),
            None => stmt.query_map([], map_row),
        };
        rows.map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }
}
