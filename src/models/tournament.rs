use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Draft,
    Published,
    InProgress,
    Completed,
    Cancelled,
}

impl TournamentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentStatus::Draft => "draft",
            TournamentStatus::Published => "published",
            TournamentStatus::InProgress => "in_progress",
            TournamentStatus::Completed => "completed",
            TournamentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TournamentStatus::Draft),
            "published" => Some(TournamentStatus::Published),
            "in_progress" => Some(TournamentStatus::InProgress),
            "completed" => Some(TournamentStatus::Completed),
            "cancelled" => Some(TournamentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TournamentStatus::Completed | TournamentStatus::Cancelled)
    }

    /// draft → published → in_progress → completed; cancelled from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: TournamentStatus) -> bool {
        use TournamentStatus::*;
        match (self, next) {
            (Draft, Published) | (Published, InProgress) | (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateFormat {
    WorldSchools,
    BritishParliamentary,
    PublicForum,
    AsianParliamentary,
}

impl DebateFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebateFormat::WorldSchools => "world_schools",
            DebateFormat::BritishParliamentary => "british_parliamentary",
            DebateFormat::PublicForum => "public_forum",
            DebateFormat::AsianParliamentary => "asian_parliamentary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "world_schools" => Some(DebateFormat::WorldSchools),
            "british_parliamentary" => Some(DebateFormat::BritishParliamentary),
            "public_forum" => Some(DebateFormat::PublicForum),
            "asian_parliamentary" => Some(DebateFormat::AsianParliamentary),
            _ => None,
        }
    }

    /// Speaking minutes per position used when the organiser gives none.
    pub fn default_speaking_times(&self) -> BTreeMap<String, u32> {
        let pairs: &[(&str, u32)] = match self {
            DebateFormat::WorldSchools => &[("first_speaker", 8), ("second_speaker", 8), ("third_speaker", 8), ("reply_speaker", 4)],
            DebateFormat::BritishParliamentary => &[("prime_minister", 7), ("leader_of_opposition", 7), ("member", 7), ("whip", 7)],
            DebateFormat::PublicForum => &[("constructive", 4), ("rebuttal", 4), ("summary", 3), ("final_focus", 2)],
            DebateFormat::AsianParliamentary => &[("first_speaker", 7), ("second_speaker", 7), ("third_speaker", 7), ("reply_speaker", 5)],
        };
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub format: DebateFormat,
    pub speaking_times: BTreeMap<String, u32>,
    pub league_id: Option<i64>,
    pub location: String,
    pub fee: f64,
    pub status: TournamentStatus,
    pub created_by: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TournamentForm {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub format: DebateFormat,
    #[serde(default)]
    pub speaking_times: Option<BTreeMap<String, u32>>,
    #[serde(default)]
    pub league_id: Option<i64>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub fee: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct League {
    pub id: i64,
    pub name: String,
    pub description: String,
}

impl League {
    pub fn create(pool: &DbPool, name: &str, description: &str) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO leagues (name, description) VALUES (?1, ?2)",
            params![name.trim(), description],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list(pool: &DbPool) -> Vec<League> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare("SELECT id, name, description FROM leagues ORDER BY name") {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map([], |row| {
            Ok(League {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }
}

fn conversion_err(col: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, msg.into())
}

impl Tournament {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let start: String = row.get("start_date")?;
        let end: String = row.get("end_date")?;
        let format: String = row.get("format")?;
        let status: String = row.get("status")?;
        let times: String = row.get("speaking_times_json")?;
        Ok(Tournament {
            id: row.get("id")?,
            name: row.get("name")?,
            slug: row.get("slug")?,
            start_date: NaiveDate::parse_from_str(&start, "%Y-%m-%d").map_err(|e| conversion_err(3, e.to_string()))?,
            end_date: NaiveDate::parse_from_str(&end, "%Y-%m-%d").map_err(|e| conversion_err(4, e.to_string()))?,
            format: DebateFormat::parse(&format).ok_or_else(|| conversion_err(5, format!("unknown format {}", format)))?,
            speaking_times: serde_json::from_str(&times).unwrap_or_default(),
            league_id: row.get("league_id")?,
            location: row.get("location")?,
            fee: row.get("fee")?,
            status: TournamentStatus::parse(&status).ok_or_else(|| conversion_err(10, format!("unknown status {}", status)))?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM tournaments WHERE id = ?1", params![id], Self::from_row)
            .ok()
    }

    pub fn find_by_slug(pool: &DbPool, slug: &str) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM tournaments WHERE slug = ?1", params![slug], Self::from_row)
            .ok()
    }

    /// Drafts are only listed when `include_drafts` is set (admins).
    pub fn list(pool: &DbPool, status: Option<&str>, include_drafts: bool, limit: i64, offset: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT * FROM tournaments
             WHERE (?1 IS NULL OR status = ?1) AND (?2 = 1 OR status != 'draft')
             ORDER BY start_date DESC, id DESC LIMIT ?3 OFFSET ?4",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![status, include_drafts as i32, limit, offset], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    fn validate(form: &TournamentForm) -> Result<(), String> {
        if form.name.trim().is_empty() {
            return Err("Tournament name is required".into());
        }
        if form.end_date < form.start_date {
            return Err("End date must not be before start date".into());
        }
        if form.fee < 0.0 {
            return Err("Fee cannot be negative".into());
        }
        Ok(())
    }

    /// Slug from the name; collisions get `-2`, `-3`, ...
    pub fn unique_slug(pool: &DbPool, name: &str) -> Result<String, String> {
        let base = slug::slugify(name);
        let base = if base.is_empty() { "tournament".to_string() } else { base };
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut candidate = base.clone();
        let mut n = 1;
        loop {
            let taken: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tournaments WHERE slug = ?1",
                    params![candidate],
                    |row| row.get(0),
                )
                .map_err(|e| e.to_string())?;
            if taken == 0 {
                return Ok(candidate);
            }
            n += 1;
            candidate = format!("{}-{}", base, n);
        }
    }

    pub fn create(pool: &DbPool, form: &TournamentForm, created_by: i64) -> Result<i64, String> {
        Self::validate(form)?;
        let slug = Self::unique_slug(pool, &form.name)?;
        let times = form
            .speaking_times
            .clone()
            .unwrap_or_else(|| form.format.default_speaking_times());
        let times_json = serde_json::to_string(&times).map_err(|e| e.to_string())?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO tournaments (name, slug, start_date, end_date, format, speaking_times_json,
             league_id, location, fee, status, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'draft', ?10)",
            params![
                form.name.trim(),
                slug,
                form.start_date.format("%Y-%m-%d").to_string(),
                form.end_date.format("%Y-%m-%d").to_string(),
                form.format.as_str(),
                times_json,
                form.league_id,
                form.location,
                form.fee,
                created_by
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    /// Details are editable until the tournament starts.
    pub fn update(pool: &DbPool, id: i64, form: &TournamentForm) -> Result<(), String> {
        Self::validate(form)?;
        let current = Self::find_by_id(pool, id).ok_or("Tournament not found")?;
        if !matches!(current.status, TournamentStatus::Draft | TournamentStatus::Published) {
            return Err(format!("Cannot edit a tournament that is {}", current.status.as_str()));
        }
        let times = form.speaking_times.clone().unwrap_or(current.speaking_times);
        let times_json = serde_json::to_string(&times).map_err(|e| e.to_string())?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE tournaments SET name = ?1, start_date = ?2, end_date = ?3, format = ?4,
             speaking_times_json = ?5, league_id = ?6, location = ?7, fee = ?8,
             updated_at = CURRENT_TIMESTAMP WHERE id = ?9",
            params![
                form.name.trim(),
                form.start_date.format("%Y-%m-%d").to_string(),
                form.end_date.format("%Y-%m-%d").to_string(),
                form.format.as_str(),
                times_json,
                form.league_id,
                form.location,
                form.fee,
                id
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Apply a status transition. The update is conditional on the status
    /// read, so a concurrent transition makes this one fail.
    pub fn transition(pool: &DbPool, id: i64, next: TournamentStatus) -> Result<TournamentStatus, String> {
        let current = Self::find_by_id(pool, id).ok_or("Tournament not found")?;
        if !current.status.can_transition_to(next) {
            return Err(format!(
                "Cannot move tournament from {} to {}",
                current.status.as_str(),
                next.as_str()
            ));
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE tournaments SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2 AND status = ?3",
                params![next.as_str(), id, current.status.as_str()],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Tournament status changed concurrently, reload and retry".into());
        }
        Ok(current.status)
    }
}
