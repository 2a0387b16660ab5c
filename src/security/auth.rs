use chrono::{Duration, Utc};
use rocket::http::{Cookie, CookieJar, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::db::DbPool;
use crate::models::settings::Setting;
use crate::models::user::User;

const SESSION_COOKIE: &str = "irankhub_session";

// ── Client IP request guard ──

/// Real client IP: X-Real-IP, then the first X-Forwarded-For hop, then
/// the socket peer address.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = request.headers();

        if let Some(ip) = headers.get_one("X-Real-IP").map(str::trim).filter(|ip| !ip.is_empty()) {
            return Outcome::Success(ClientIp(ip.to_string()));
        }

        if let Some(ip) = headers
            .get_one("X-Forwarded-For")
            .and_then(|f| f.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return Outcome::Success(ClientIp(ip.to_string()));
        }

        let ip = request
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

// ── Authenticated user guard (any active user with a valid session) ──

pub struct AuthenticatedUser {
    pub user: User,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve_session_user(request).await {
            Some(user) => Outcome::Success(AuthenticatedUser { user }),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

// ── Role-specific guards ──

pub struct AdminUser {
    pub user: User,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve_session_user(request).await {
            Some(user) if user.is_admin() => Outcome::Success(AdminUser { user }),
            Some(_) => Outcome::Forward(Status::Forbidden),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

/// Guard: school admins (for their own school) and admins.
pub struct SchoolManager {
    pub user: User,
}

impl SchoolManager {
    pub fn can_manage(&self, school_id: i64) -> bool {
        self.user.is_admin() || self.user.profile.school_id() == Some(school_id)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SchoolManager {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve_session_user(request).await {
            Some(user) if user.is_admin() || user.is_school_admin() => Outcome::Success(SchoolManager { user }),
            Some(_) => Outcome::Forward(Status::Forbidden),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

// ── Shared session resolution ──

async fn resolve_session_user(request: &Request<'_>) -> Option<User> {
    let pool = request.guard::<&State<DbPool>>().await.succeeded()?;
    let cookies = request.cookies();
    let session_id = cookies.get_private(SESSION_COOKIE)?.value().to_string();

    match get_session_user(pool, &session_id) {
        Some(user) if user.is_active() => Some(user),
        _ => {
            cookies.remove_private(Cookie::from(SESSION_COOKIE));
            None
        }
    }
}

// ── Password utilities ──

pub fn hash_password(password: &str) -> Result<String, String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| e.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters".into());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) || !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain letters and numbers".into());
    }
    Ok(())
}

// ── Session management ──

pub fn create_session(pool: &DbPool, user_id: i64, ip: Option<&str>) -> Result<String, String> {
    let expiry_hours = Setting::get_i64(pool, "session_expiry_hours").max(1);
    let session_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().naive_utc();
    let expires = now + Duration::hours(expiry_hours);

    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO sessions (id, user_id, created_at, expires_at, ip_address) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![session_id, user_id, now, expires, ip.map(hash_ip)],
    )
    .map_err(|e| e.to_string())?;

    Ok(session_id)
}

/// The session's user, if the session exists and has not expired.
pub fn get_session_user(pool: &DbPool, session_id: &str) -> Option<User> {
    let conn = pool.get().ok()?;
    let user_id: i64 = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE id = ?1 AND expires_at > ?2",
            params![session_id, Utc::now().naive_utc()],
            |row| row.get(0),
        )
        .ok()?;
    User::get_by_id(pool, user_id)
}

pub fn destroy_session(pool: &DbPool, session_id: &str) -> Result<(), String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
        .map_err(|e| e.to_string())?;
    Ok(())
}

pub fn cleanup_expired_sessions(pool: &DbPool) -> Result<usize, String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![Utc::now().naive_utc()],
    )
    .map_err(|e| e.to_string())
}

pub fn session_id_from_cookies(cookies: &CookieJar<'_>) -> Option<String> {
    cookies.get_private(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Secure flag follows the configured site URL scheme.
pub fn set_session_cookie(cookies: &CookieJar<'_>, session_id: &str, pool: &DbPool) {
    let site_url = Setting::get_or(pool, "site_url", "");

    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(rocket::http::SameSite::Strict);
    cookie.set_path("/");
    if site_url.starts_with("https://") {
        cookie.set_secure(true);
    }
    cookies.add_private(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::from(SESSION_COOKIE));
}

pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}
