use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Waived,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Waived => "waived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "waived" => Some(PaymentStatus::Waived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub tournament_id: i64,
    pub school_id: Option<i64>,
    pub name: String,
    /// User ids in speaking order.
    pub members: Vec<i64>,
    pub confirmed: bool,
    pub payment_status: PaymentStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamForm {
    pub name: String,
    #[serde(default)]
    pub school_id: Option<i64>,
    #[serde(default)]
    pub members: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Standing {
    pub rank: usize,
    pub team_id: i64,
    pub team_name: String,
    pub wins: i64,
    pub debates: i64,
}

impl Team {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let members: String = row.get("members_json")?;
        let payment: String = row.get("payment_status")?;
        Ok(Team {
            id: row.get("id")?,
            tournament_id: row.get("tournament_id")?,
            school_id: row.get("school_id")?,
            name: row.get("name")?,
            members: serde_json::from_str(&members).unwrap_or_default(),
            confirmed: row.get::<_, i32>("confirmed")? != 0,
            payment_status: PaymentStatus::parse(&payment).unwrap_or(PaymentStatus::Pending),
            created_at: row.get("created_at")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM teams WHERE id = ?1", params![id], Self::from_row)
            .ok()
    }

    pub fn for_tournament(pool: &DbPool, tournament_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare("SELECT * FROM teams WHERE tournament_id = ?1 ORDER BY name ASC") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![tournament_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn create(pool: &DbPool, tournament_id: i64, form: &TeamForm) -> Result<i64, String> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err("Team name is required".into());
        }
        let mut seen = std::collections::HashSet::new();
        if !form.members.iter().all(|m| seen.insert(*m)) {
            return Err("A member cannot appear twice in a team".into());
        }
        let members = serde_json::to_string(&form.members).map_err(|e| e.to_string())?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO teams (tournament_id, school_id, name, members_json) VALUES (?1, ?2, ?3, ?4)",
            params![tournament_id, form.school_id, name, members],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                format!("A team named '{}' is already registered", name)
            } else {
                e.to_string()
            }
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_members(pool: &DbPool, id: i64, members: &[i64]) -> Result<(), String> {
        let json = serde_json::to_string(members).map_err(|e| e.to_string())?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("UPDATE teams SET members_json = ?1 WHERE id = ?2", params![json, id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn set_confirmed(pool: &DbPool, id: i64, confirmed: bool) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE teams SET confirmed = ?1 WHERE id = ?2",
                params![confirmed as i32, id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Team not found".into());
        }
        Ok(())
    }

    pub fn set_payment_status(pool: &DbPool, id: i64, status: PaymentStatus) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE teams SET payment_status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Ranking by debates won, then fewer debates played, then name.
    pub fn standings(pool: &DbPool, tournament_id: i64) -> Vec<Standing> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT t.id, t.name,
                    COALESCE(SUM(CASE WHEN d.winner_team_id = t.id THEN 1 ELSE 0 END), 0) AS wins,
                    COUNT(d.id) AS debates
             FROM teams t
             LEFT JOIN debates d
               ON d.winner_team_id IS NOT NULL
              AND (d.proposition_team_id = t.id OR d.opposition_team_id = t.id)
             WHERE t.tournament_id = ?1
             GROUP BY t.id, t.name
             ORDER BY wins DESC, debates ASC, t.name ASC",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let rows: Vec<(i64, String, i64, i64)> = stmt
            .query_map(params![tournament_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default();
        rows.into_iter()
            .enumerate()
            .map(|(i, (team_id, team_name, wins, debates))| Standing {
                rank: i + 1,
                team_id,
                team_name,
                wins,
                debates,
            })
            .collect()
    }
}
