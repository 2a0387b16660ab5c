use std::collections::HashMap;
use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_json, page_window, result_json, PER_PAGE};
use crate::db::DbPool;
use crate::email::dispatch::EmailDispatcher;
use crate::email::templates;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::settings::Setting;
use crate::models::user::{User, ROLES};
use crate::notify::Notifier;
use crate::security::auth::AdminUser;

// ── Users ──

#[get("/users?<role>&<status>&<page>")]
pub fn users_list(
    pool: &State<DbPool>,
    _admin: AdminUser,
    role: Option<String>,
    status: Option<String>,
    page: Option<i64>,
) -> Json<Value> {
    let (limit, offset) = page_window(page);
    let users = User::list_paginated(pool, role.as_deref(), status.as_deref(), limit, offset);
    let total = User::count_filtered(pool, role.as_deref(), status.as_deref());
    let total_pages = ((total as f64) / (PER_PAGE as f64)).ceil() as i64;
    let users_json: Vec<Value> = users.iter().map(|u| u.safe_json()).collect();
    Json(json!({
        "success": true,
        "users": users_json,
        "total": total,
        "total_pages": total_pages,
        "current_page": page.unwrap_or(1).max(1),
    }))
}

#[post("/users/<id>/approve")]
pub fn user_approve(pool: &State<DbPool>, notifier: &State<Notifier>, admin: AdminUser, id: i64) -> Json<Value> {
    if let Err(e) = User::approve(pool, id) {
        return Json(error_json(e));
    }
    log::info!("[admin] User {} approved by {}", id, admin.user.id);
    let new = NewNotification {
        user_id: id,
        kind: NotificationKind::Account,
        title: "Your account is active",
        body: "An administrator approved your account. You can now sign in.",
        link: Some("/dashboard"),
        expires_at: None,
    };
    if let Err(e) = notifier.notify_user(&new) {
        log::warn!("[admin] Approval notice for {} failed: {}", id, e);
    }
    Json(json!({"success": true}))
}

#[post("/users/<id>/ban")]
pub fn user_ban(pool: &State<DbPool>, admin: AdminUser, id: i64) -> Json<Value> {
    if id == admin.user.id {
        return Json(error_json("You cannot ban yourself"));
    }
    Json(result_json(User::ban(pool, id), |_| {
        log::info!("[admin] User {} banned by {}", id, admin.user.id);
        json!({"success": true})
    }))
}

#[post("/users/<id>/unban")]
pub fn user_unban(pool: &State<DbPool>, _admin: AdminUser, id: i64) -> Json<Value> {
    Json(result_json(User::unban(pool, id), |_| json!({"success": true})))
}

// ── Broadcast ──

#[derive(Debug, Deserialize)]
pub struct BroadcastForm {
    #[serde(default)]
    pub role: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub link: Option<String>,
}

/// Notify every active user (optionally one role). Emails go out in paced
/// batches.
#[post("/broadcast", format = "json", data = "<form>")]
pub fn broadcast(pool: &State<DbPool>, notifier: &State<Notifier>, _admin: AdminUser, form: Json<BroadcastForm>) -> Json<Value> {
    if let Some(role) = form.role.as_deref() {
        if !ROLES.contains(&role) {
            return Json(error_json(format!("Unknown role '{}'", role)));
        }
    }
    if form.title.trim().is_empty() {
        return Json(error_json("Title is required"));
    }
    let recipients = User::active_ids(pool, form.role.as_deref());
    let sent = notifier.notify_users(
        &recipients,
        &NewNotification {
            user_id: 0,
            kind: NotificationKind::System,
            title: form.title.trim(),
            body: &form.body,
            link: form.link.as_deref(),
            expires_at: None,
        },
    );
    log::info!("[admin] Broadcast '{}' to {} users", form.title.trim(), sent);
    Json(json!({"success": true, "recipients": sent}))
}

// ── Settings ──

#[get("/settings")]
pub fn settings_get(pool: &State<DbPool>, _admin: AdminUser) -> Json<Value> {
    Json(json!({"success": true, "settings": Setting::redacted(pool)}))
}

/// Masked secrets sent back unchanged are not written over the real value.
#[post("/settings", format = "json", data = "<form>")]
pub fn settings_save(pool: &State<DbPool>, _admin: AdminUser, form: Json<HashMap<String, String>>) -> Json<Value> {
    let changes: HashMap<String, String> = form
        .into_inner()
        .into_iter()
        .filter(|(_, v)| v != "********")
        .collect();
    Json(result_json(Setting::set_many(pool, &changes), |_| {
        json!({"success": true, "updated": changes.len()})
    }))
}

#[derive(Debug, Deserialize)]
pub struct TestEmailForm {
    pub to: String,
}

/// Send once with retries and report the outcome, for checking provider
/// settings.
#[post("/email/test", format = "json", data = "<form>")]
pub async fn email_test(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    _admin: AdminUser,
    form: Json<TestEmailForm>,
) -> Json<Value> {
    let settings = Setting::all(pool);
    let email = templates::notification_email(
        &settings,
        form.to.trim(),
        "Test email",
        "Your email provider settings are working.",
        None,
    );
    let report = mailer.send_with_retry(&email).await;
    Json(json!({
        "success": report.is_delivered(),
        "attempts": report.attempts,
        "error": report.error,
    }))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        users_list,
        user_approve,
        user_ban,
        user_unban,
        broadcast,
        settings_get,
        settings_save,
        email_test
    ]
}
