use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::models::team::PaymentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiverCode {
    pub id: i64,
    pub tournament_id: i64,
    pub code: String,
    pub usage_limit: i64,
    pub usage_count: i64,
    pub expires_at: Option<NaiveDateTime>,
}

impl WaiverCode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WaiverCode {
            id: row.get("id")?,
            tournament_id: row.get("tournament_id")?,
            code: row.get("code")?,
            usage_limit: row.get("usage_limit")?,
            usage_count: row.get("usage_count")?,
            expires_at: row.get("expires_at")?,
        })
    }

    /// Codes are stored upper-case and matched case-insensitively.
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Random 8-character code from an alphabet without look-alikes.
    pub fn generate_code() -> String {
        use rand::Rng;
        const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        let mut rng = rand::thread_rng();
        (0..8)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }

    pub fn create(
        pool: &DbPool,
        tournament_id: i64,
        code: Option<&str>,
        usage_limit: i64,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<Self, String> {
        if usage_limit < 1 {
            return Err("Usage limit must be at least 1".into());
        }
        let code = match code {
            Some(c) if !c.trim().is_empty() => Self::normalize(c),
            _ => Self::generate_code(),
        };
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO waiver_codes (tournament_id, code, usage_limit, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![tournament_id, code, usage_limit, expires_at],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                format!("Waiver code {} already exists", code)
            } else {
                e.to_string()
            }
        })?;
        Ok(WaiverCode {
            id: conn.last_insert_rowid(),
            tournament_id,
            code,
            usage_limit,
            usage_count: 0,
            expires_at,
        })
    }

    pub fn find_by_code(pool: &DbPool, code: &str) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT * FROM waiver_codes WHERE code = ?1",
            params![Self::normalize(code)],
            Self::from_row,
        )
        .ok()
    }

    pub fn for_tournament(pool: &DbPool, tournament_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare("SELECT * FROM waiver_codes WHERE tournament_id = ?1 ORDER BY id") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![tournament_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn redeem(pool: &DbPool, code: &str, team_id: i64) -> Result<WaiverCode, String> {
        Self::redeem_at(pool, code, team_id, Utc::now().naive_utc())
    }

    /// Redeem for a team. The usage bump is one conditional UPDATE, and the
    /// team's payment status moves to waived in the same transaction.
    pub fn redeem_at(pool: &DbPool, code: &str, team_id: i64, now: NaiveDateTime) -> Result<WaiverCode, String> {
        let waiver = Self::find_by_code(pool, code).ok_or("Invalid waiver code")?;
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;

        let (team_tournament, payment): (i64, String) = tx
            .query_row(
                "SELECT tournament_id, payment_status FROM teams WHERE id = ?1",
                params![team_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| "Team not found".to_string())?;
        if team_tournament != waiver.tournament_id {
            return Err("This code is not valid for this tournament".into());
        }
        if payment != PaymentStatus::Pending.as_str() {
            return Err(format!("Team payment is already {}", payment));
        }
        if waiver.expires_at.map(|e| e <= now).unwrap_or(false) {
            return Err("This waiver code has expired".into());
        }

        let changed = tx
            .execute(
                "UPDATE waiver_codes SET usage_count = usage_count + 1
                 WHERE id = ?1 AND usage_count < usage_limit",
                params![waiver.id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("This waiver code has reached its usage limit".into());
        }
        tx.execute(
            "UPDATE teams SET payment_status = ?1 WHERE id = ?2",
            params![PaymentStatus::Waived.as_str(), team_id],
        )
        .map_err(|e| e.to_string())?;
        tx.commit().map_err(|e| e.to_string())?;

        Ok(WaiverCode {
            usage_count: waiver.usage_count + 1,
            ..waiver
        })
    }
}
