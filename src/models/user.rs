use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Role plus the fields that only make sense for that role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProfile {
    Student {
        #[serde(default)]
        grade: Option<String>,
        #[serde(default)]
        school_id: Option<i64>,
    },
    SchoolAdmin {
        position: String,
        #[serde(default)]
        school_id: Option<i64>,
    },
    Volunteer {
        #[serde(default)]
        safeguarding_certificate: Option<String>,
        #[serde(default)]
        national_id: Option<String>,
    },
    Admin,
}

impl RoleProfile {
    pub fn role(&self) -> &'static str {
        match self {
            RoleProfile::Student { .. } => "student",
            RoleProfile::SchoolAdmin { .. } => "school_admin",
            RoleProfile::Volunteer { .. } => "volunteer",
            RoleProfile::Admin => "admin",
        }
    }

    pub fn school_id(&self) -> Option<i64> {
        match self {
            RoleProfile::Student { school_id, .. } | RoleProfile::SchoolAdmin { school_id, .. } => *school_id,
            _ => None,
        }
    }
}

pub const ROLES: &[&str] = &["student", "school_admin", "volunteer", "admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Banned => "banned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            "banned" => Some(UserStatus::Banned),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub profile: RoleProfile,
    pub status: UserStatus,
    pub verified: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: Option<&'a str>,
    pub profile: &'a RoleProfile,
}

impl User {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let profile_json: String = row.get(4)?;
        let status: String = row.get(5)?;
        let verified: i32 = row.get(6)?;
        let profile = serde_json::from_str(&profile_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            password_hash: row.get(3)?,
            profile,
            status: UserStatus::parse(&status).unwrap_or(UserStatus::Inactive),
            verified: verified != 0,
            last_login_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    const SELECT_COLS: &'static str =
        "id, email, name, password_hash, profile_json, status, verified, last_login_at, created_at";

    // ── Lookups ──

    pub fn get_by_id(pool: &DbPool, id: i64) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn get_by_email(pool: &DbPool, email: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1 COLLATE NOCASE", Self::SELECT_COLS),
            params![email.trim()],
            Self::from_row,
        )
        .ok()
    }

    pub fn list_paginated(
        pool: &DbPool,
        role: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<User> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM users
             WHERE (?1 IS NULL OR role = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY id ASC LIMIT ?3 OFFSET ?4",
            Self::SELECT_COLS
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![role, status, limit, offset], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn count_filtered(pool: &DbPool, role: Option<&str>, status: Option<&str>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM users WHERE (?1 IS NULL OR role = ?1) AND (?2 IS NULL OR status = ?2)",
            params![role, status],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Active user ids, optionally limited to one role, for broadcasts.
    pub fn active_ids(pool: &DbPool, role: Option<&str>) -> Vec<i64> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT id FROM users WHERE status = 'active' AND (?1 IS NULL OR role = ?1) ORDER BY id",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![role], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Active school admins attached to a school.
    pub fn school_admin_ids(pool: &DbPool, school_id: i64) -> Vec<i64> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT id FROM users
             WHERE role = 'school_admin' AND status = 'active'
               AND json_extract(profile_json, '$.school_id') = ?1
             ORDER BY id",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![school_id], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    // ── Create ──

    /// New accounts start inactive and unverified; admins start active.
    pub fn create(pool: &DbPool, new: &NewUser) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let email = new.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err("A valid email address is required".into());
        }
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1 COLLATE NOCASE",
                params![email],
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())?;
        if exists > 0 {
            return Err("An account with this email already exists".into());
        }
        let profile_json = serde_json::to_string(new.profile).map_err(|e| e.to_string())?;
        let status = match new.profile {
            RoleProfile::Admin => UserStatus::Active,
            _ => UserStatus::Inactive,
        };
        conn.execute(
            "INSERT INTO users (email, name, password_hash, role, profile_json, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                email,
                new.name.trim(),
                new.password_hash,
                new.profile.role(),
                profile_json,
                status.as_str()
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    // ── Update ──

    pub fn update_profile(pool: &DbPool, id: i64, name: &str, profile: &RoleProfile) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let profile_json = serde_json::to_string(profile).map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE users SET name = ?1, role = ?2, profile_json = ?3, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?4",
                params![name.trim(), profile.role(), profile_json, id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("User not found".into());
        }
        Ok(())
    }

    pub fn update_password(pool: &DbPool, id: i64, password_hash: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![password_hash, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn mark_verified(pool: &DbPool, email: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET verified = 1, updated_at = CURRENT_TIMESTAMP WHERE email = ?1 COLLATE NOCASE",
            params![email],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn touch_last_login(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET last_login_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Status management ──

    /// Admin approval. Banned accounts must be unbanned explicitly.
    pub fn approve(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE users SET status = 'active', updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND status = 'inactive'",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("User not found or not awaiting approval".into());
        }
        Ok(())
    }

    pub fn ban(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE users SET status = 'banned', updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("User not found".into());
        }
        conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn unban(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET status = 'active', updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'banned'",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Helpers ──

    pub fn role(&self) -> &'static str {
        self.profile.role()
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.profile, RoleProfile::Admin)
    }

    pub fn is_school_admin(&self) -> bool {
        matches!(self.profile, RoleProfile::SchoolAdmin { .. })
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Public view without the password hash.
    pub fn safe_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "email": self.email,
            "name": self.name,
            "profile": self.profile,
            "status": self.status,
            "verified": self.verified,
            "last_login_at": self.last_login_at,
            "created_at": self.created_at,
        })
    }
}
