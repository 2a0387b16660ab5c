use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Browser push subscription keys, as produced by `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    pub active: bool,
}

impl PushSubscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PushSubscription {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            endpoint: row.get("endpoint")?,
            keys: SubscriptionKeys {
                p256dh: row.get("p256dh")?,
                auth: row.get("auth")?,
            },
            active: row.get::<_, i32>("active")? != 0,
        })
    }

    /// Register or refresh. An endpoint is re-bound to the latest user and
    /// reactivated.
    pub fn upsert(pool: &DbPool, user_id: i64, endpoint: &str, keys: &SubscriptionKeys) -> Result<(), String> {
        let parsed = url::Url::parse(endpoint).map_err(|e| format!("Invalid push endpoint: {}", e))?;
        if parsed.scheme() != "https" || parsed.host_str().is_none() {
            return Err("Push endpoint must be an https URL".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO push_subscriptions (user_id, endpoint, p256dh, auth, active)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(endpoint) DO UPDATE SET user_id = ?1, p256dh = ?3, auth = ?4, active = 1",
            params![user_id, endpoint, keys.p256dh, keys.auth],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn active_for_user(pool: &DbPool, user_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn
            .prepare("SELECT * FROM push_subscriptions WHERE user_id = ?1 AND active = 1 ORDER BY id")
        {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![user_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn find_by_endpoint(pool: &DbPool, endpoint: &str) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM push_subscriptions WHERE endpoint = ?1",
            params![endpoint],
            Self::from_row,
        )
        .ok()
    }

    pub fn deactivate(pool: &DbPool, endpoint: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE push_subscriptions SET active = 0 WHERE endpoint = ?1",
            params![endpoint],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn remove(pool: &DbPool, user_id: i64, endpoint: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM push_subscriptions WHERE user_id = ?1 AND endpoint = ?2",
            params![user_id, endpoint],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}
