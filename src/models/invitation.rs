use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: i64,
    pub tournament_id: i64,
    pub school_id: i64,
    pub school_name: String,
    pub status: String, // pending, accepted, declined
    pub responded_at: Option<String>,
    pub created_at: String,
}

impl Invitation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Invitation {
            id: row.get("id")?,
            tournament_id: row.get("tournament_id")?,
            school_id: row.get("school_id")?,
            school_name: row.get("school_name")?,
            status: row.get("status")?,
            responded_at: row.get("responded_at")?,
            created_at: row.get("created_at")?,
        })
    }

    const SELECT: &'static str = "SELECT i.*, s.name AS school_name FROM invitations i
         JOIN schools s ON s.id = i.school_id";

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("{} WHERE i.id = ?1", Self::SELECT),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn for_tournament(pool: &DbPool, tournament_id: i64) -> Vec<Self> {
        Self::query(pool, "i.tournament_id = ?1", tournament_id)
    }

    pub fn for_school(pool: &DbPool, school_id: i64) -> Vec<Self> {
        Self::query(pool, "i.school_id = ?1", school_id)
    }

    fn query(pool: &DbPool, filter: &str, id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "{} WHERE {} ORDER BY i.created_at DESC, i.id DESC",
            Self::SELECT,
            filter
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Invite a school. Re-inviting the same school is rejected.
    pub fn create(pool: &DbPool, tournament_id: i64, school_id: i64) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO invitations (tournament_id, school_id) VALUES (?1, ?2)",
            params![tournament_id, school_id],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                "This school has already been invited".to_string()
            } else {
                e.to_string()
            }
        })?;
        Ok(conn.last_insert_rowid())
    }

    /// Accept or decline; only a pending invitation can be answered.
    pub fn respond(pool: &DbPool, id: i64, accept: bool) -> Result<(), String> {
        let status = if accept { "accepted" } else { "declined" };
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE invitations SET status = ?1, responded_at = CURRENT_TIMESTAMP
                 WHERE id = ?2 AND status = 'pending'",
                params![status, id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Invitation not found or already answered".into());
        }
        Ok(())
    }
}
