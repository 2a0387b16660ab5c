use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

pub const TOKEN_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Login,
    PasswordReset,
    EmailVerification,
    AccountRecovery,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Login => "login",
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::AccountRecovery => "account_recovery",
        }
    }

    /// Front-end path the emailed link points at.
    pub fn path(&self) -> &'static str {
        match self {
            TokenPurpose::Login => "magic-link",
            TokenPurpose::PasswordReset => "reset-password",
            TokenPurpose::EmailVerification => "verify-email",
            TokenPurpose::AccountRecovery => "recover",
        }
    }
}

pub struct AuthToken;

impl AuthToken {
    pub fn create(pool: &DbPool, email: &str, purpose: TokenPurpose) -> Result<String, String> {
        Self::create_at(pool, email, purpose, Utc::now().naive_utc())
    }

    pub fn create_at(
        pool: &DbPool,
        email: &str,
        purpose: TokenPurpose,
        now: NaiveDateTime,
    ) -> Result<String, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires = now + Duration::minutes(TOKEN_TTL_MINUTES);
        conn.execute(
            "INSERT INTO auth_tokens (token, email, purpose, expires_at, used, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![token, email.trim().to_lowercase(), purpose.as_str(), expires, now],
        )
        .map_err(|e| e.to_string())?;
        Ok(token)
    }

    /// Consume a token. Returns the associated email when the token exists,
    /// matches `purpose`, is unexpired and unused; marks it used.
    pub fn consume(pool: &DbPool, token: &str, purpose: TokenPurpose) -> Result<String, String> {
        Self::consume_at(pool, token, purpose, Utc::now().naive_utc())
    }

    pub fn consume_at(
        pool: &DbPool,
        token: &str,
        purpose: TokenPurpose,
        now: NaiveDateTime,
    ) -> Result<String, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let result: Result<(String, bool), _> = conn.query_row(
            "SELECT email, used FROM auth_tokens WHERE token = ?1 AND purpose = ?2 AND expires_at > ?3",
            params![token, purpose.as_str(), now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        match result {
            Ok((_, true)) => Err("This link has already been used".into()),
            Ok((email, false)) => {
                let changed = conn
                    .execute(
                        "UPDATE auth_tokens SET used = 1 WHERE token = ?1 AND used = 0",
                        params![token],
                    )
                    .map_err(|e| e.to_string())?;
                if changed == 0 {
                    return Err("This link has already been used".into());
                }
                Ok(email)
            }
            Err(_) => Err("Invalid or expired link".into()),
        }
    }

    pub fn cleanup_expired(pool: &DbPool) -> Result<usize, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM auth_tokens WHERE expires_at <= ?1 OR used = 1",
            params![Utc::now().naive_utc()],
        )
        .map_err(|e| e.to_string())
    }
}
