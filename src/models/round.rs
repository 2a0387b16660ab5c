use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    Preliminary,
    Elimination,
    Final,
}

impl RoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundType::Preliminary => "preliminary",
            RoundType::Elimination => "elimination",
            RoundType::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preliminary" => Some(RoundType::Preliminary),
            "elimination" => Some(RoundType::Elimination),
            "final" => Some(RoundType::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: i64,
    pub tournament_id: i64,
    pub number: i64,
    pub round_type: RoundType,
    pub motion: String,
}

/// Real-time judging state; owned by the judging UI, stored opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSession {
    #[serde(default)]
    pub current_speaker: Option<String>,
    #[serde(default)]
    pub time_remaining: Option<u32>,
    #[serde(default)]
    pub argument_flow: Vec<serde_json::Value>,
    #[serde(default)]
    pub fact_checks: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub id: i64,
    pub round_id: i64,
    pub proposition_team_id: i64,
    pub opposition_team_id: i64,
    pub judges: Vec<i64>,
    pub room: String,
    pub winner_team_id: Option<i64>,
    pub live: LiveSession,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebateForm {
    pub proposition_team_id: i64,
    pub opposition_team_id: i64,
    #[serde(default)]
    pub judges: Vec<i64>,
    #[serde(default)]
    pub room: String,
}

impl Round {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind: String = row.get("round_type")?;
        Ok(Round {
            id: row.get("id")?,
            tournament_id: row.get("tournament_id")?,
            number: row.get("number")?,
            round_type: RoundType::parse(&kind).unwrap_or(RoundType::Preliminary),
            motion: row.get("motion")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM rounds WHERE id = ?1", params![id], Self::from_row)
            .ok()
    }

    pub fn for_tournament(pool: &DbPool, tournament_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare("SELECT * FROM rounds WHERE tournament_id = ?1 ORDER BY number ASC") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![tournament_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Append the next round; numbers are assigned sequentially from 1.
    pub fn create(pool: &DbPool, tournament_id: i64, round_type: RoundType, motion: &str) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let next: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(number), 0) + 1 FROM rounds WHERE tournament_id = ?1",
                params![tournament_id],
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO rounds (tournament_id, number, round_type, motion) VALUES (?1, ?2, ?3, ?4)",
            params![tournament_id, next, round_type.as_str(), motion],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }
}

impl Debate {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let judges: String = row.get("judges_json")?;
        let live: String = row.get("live_json")?;
        Ok(Debate {
            id: row.get("id")?,
            round_id: row.get("round_id")?,
            proposition_team_id: row.get("proposition_team_id")?,
            opposition_team_id: row.get("opposition_team_id")?,
            judges: serde_json::from_str(&judges).unwrap_or_default(),
            room: row.get("room")?,
            winner_team_id: row.get("winner_team_id")?,
            live: serde_json::from_str(&live).unwrap_or_default(),
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM debates WHERE id = ?1", params![id], Self::from_row)
            .ok()
    }

    pub fn for_round(pool: &DbPool, round_id: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare("SELECT * FROM debates WHERE round_id = ?1 ORDER BY id ASC") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![round_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Pair two distinct teams of the round's tournament.
    pub fn create(pool: &DbPool, round_id: i64, form: &DebateForm) -> Result<i64, String> {
        if form.proposition_team_id == form.opposition_team_id {
            return Err("A team cannot debate itself".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        let in_tournament: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM teams t JOIN rounds r ON r.tournament_id = t.tournament_id
                 WHERE r.id = ?1 AND t.id IN (?2, ?3)",
                params![round_id, form.proposition_team_id, form.opposition_team_id],
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())?;
        if in_tournament != 2 {
            return Err("Both teams must be registered in this round's tournament".into());
        }
        let judges = serde_json::to_string(&form.judges).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO debates (round_id, proposition_team_id, opposition_team_id, judges_json, room)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![round_id, form.proposition_team_id, form.opposition_team_id, judges, form.room],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn record_winner(pool: &DbPool, id: i64, winner_team_id: i64) -> Result<(), String> {
        let debate = Self::find_by_id(pool, id).ok_or("Debate not found")?;
        if winner_team_id != debate.proposition_team_id && winner_team_id != debate.opposition_team_id {
            return Err("Winner must be one of the two teams in the debate".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE debates SET winner_team_id = ?1 WHERE id = ?2",
            params![winner_team_id, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn update_live(pool: &DbPool, id: i64, live: &LiveSession) -> Result<(), String> {
        let json = serde_json::to_string(live).map_err(|e| e.to_string())?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute("UPDATE debates SET live_json = ?1 WHERE id = ?2", params![json, id])
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Debate not found".into());
        }
        Ok(())
    }

    pub fn is_judge(&self, user_id: i64) -> bool {
        self.judges.contains(&user_id)
    }
}
