use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Tournament,
    Team,
    Debate,
    System,
    Account,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Tournament => "tournament",
            NotificationKind::Team => "team",
            NotificationKind::Debate => "debate",
            NotificationKind::System => "system",
            NotificationKind::Account => "account",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tournament" => Some(NotificationKind::Tournament),
            "team" => Some(NotificationKind::Team),
            "debate" => Some(NotificationKind::Debate),
            "system" => Some(NotificationKind::System),
            "account" => Some(NotificationKind::Account),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub expires_at: Option<NaiveDateTime>,
    pub email_sent: bool,
    pub push_sent: bool,
    pub sms_sent: bool,
    pub created_at: String,
}

pub struct NewNotification<'a> {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: &'a str,
    pub body: &'a str,
    pub link: Option<&'a str>,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy)]
pub enum Channel {
    Email,
    Push,
    Sms,
}

impl Notification {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        Ok(Notification {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            kind: NotificationKind::parse(&kind).unwrap_or(NotificationKind::System),
            title: row.get("title")?,
            body: row.get("body")?,
            link: row.get("link")?,
            is_read: row.get::<_, i32>("is_read")? != 0,
            expires_at: row.get("expires_at")?,
            email_sent: row.get::<_, i32>("email_sent")? != 0,
            push_sent: row.get::<_, i32>("push_sent")? != 0,
            sms_sent: row.get::<_, i32>("sms_sent")? != 0,
            created_at: row.get("created_at")?,
        })
    }

    pub fn create(pool: &DbPool, new: &NewNotification) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO notifications (user_id, kind, title, body, link, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![new.user_id, new.kind.as_str(), new.title, new.body, new.link, new.expires_at],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Self> {
        let conn = pool.get().ok()?;
        conn.query_row("SELECT * FROM notifications WHERE id = ?1", params![id], Self::from_row)
            .ok()
    }

    /// Unexpired notifications for a user, newest first.
    pub fn for_user(pool: &DbPool, user_id: i64, unread_only: bool, limit: i64, offset: i64) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT * FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY created_at DESC, id DESC LIMIT ?4 OFFSET ?5",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(
            params![user_id, unread_only as i32, Utc::now().naive_utc(), limit, offset],
            Self::from_row,
        )
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn unread_count(pool: &DbPool, user_id: i64) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE user_id = ?1 AND is_read = 0 AND (expires_at IS NULL OR expires_at > ?2)",
            params![user_id, Utc::now().naive_utc()],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Scoped to the owner so users cannot touch each other's rows.
    pub fn mark_read(pool: &DbPool, id: i64, user_id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Notification not found".into());
        }
        Ok(())
    }

    pub fn mark_all_read(pool: &DbPool, user_id: i64) -> Result<usize, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
        )
        .map_err(|e| e.to_string())
    }

    /// Channel flags record that a send was started, not that it arrived.
    pub fn mark_channel_sent(pool: &DbPool, id: i64, channel: Channel) -> Result<(), String> {
        let column = match channel {
            Channel::Email => "email_sent",
            Channel::Push => "push_sent",
            Channel::Sms => "sms_sent",
        };
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            &format!("UPDATE notifications SET {} = 1 WHERE id = ?1", column),
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn cleanup_expired(pool: &DbPool) -> Result<usize, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![Utc::now().naive_utc()],
        )
        .map_err(|e| e.to_string())
    }
}
