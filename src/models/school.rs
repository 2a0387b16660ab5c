use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Administrative location. Levels below district are Rwanda-specific and
/// optional elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct School {
    pub id: i64,
    pub name: String,
    pub location: Location,
    pub contact_email: String,
    pub created_by: i64,
    pub verified: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchoolForm {
    pub name: String,
    pub location: Location,
    pub contact_email: String,
}

impl School {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(School {
            id: row.get("id")?,
            name: row.get("name")?,
            location: Location {
                country: row.get("country")?,
                province: row.get("province")?,
                district: row.get("district")?,
                sector: row.get("sector")?,
                cell: row.get("cell")?,
                village: row.get("village")?,
            },
            contact_email: row.get("contact_email")?,
            created_by: row.get("created_by")?,
            verified: row.get::<_, i32>("verified")? != 0,
            created_at: row.get("created_at")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM schools WHERE id = ?1", params![id], Self::from_row)
            .ok()
    }

    pub fn list(pool: &DbPool, country: Option<&str>, verified_only: bool) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT * FROM schools
             WHERE (?1 IS NULL OR country = ?1) AND (?2 = 0 OR verified = 1)
             ORDER BY name ASC",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![country, verified_only as i32], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn create(pool: &DbPool, form: &SchoolForm, created_by: i64) -> Result<i64, String> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err("School name is required".into());
        }
        if form.location.country.trim().is_empty() {
            return Err("Country is required".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        let loc = &form.location;
        conn.execute(
            "INSERT INTO schools (name, country, province, district, sector, cell, village, contact_email, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                name,
                loc.country.trim(),
                loc.province,
                loc.district,
                loc.sector,
                loc.cell,
                loc.village,
                form.contact_email.trim(),
                created_by
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                format!("A school named '{}' already exists", name)
            } else {
                e.to_string()
            }
        })?;
        Ok(conn.last_insert_rowid())
    }

    /// Owners may edit until an admin verifies the school.
    pub fn update(pool: &DbPool, id: i64, form: &SchoolForm, editor_id: i64, editor_is_admin: bool) -> Result<(), String> {
        let school = Self::find_by_id(pool, id).ok_or("School not found")?;
        if !editor_is_admin && (school.created_by != editor_id || school.verified) {
            return Err("You cannot edit this school".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        let loc = &form.location;
        conn.execute(
            "UPDATE schools SET name = ?1, country = ?2, province = ?3, district = ?4, sector = ?5,
             cell = ?6, village = ?7, contact_email = ?8 WHERE id = ?9",
            params![
                form.name.trim(),
                loc.country.trim(),
                loc.province,
                loc.district,
                loc.sector,
                loc.cell,
                loc.village,
                form.contact_email.trim(),
                id
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn verify(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute("UPDATE schools SET verified = 1 WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("School not found".into());
        }
        Ok(())
    }
}
