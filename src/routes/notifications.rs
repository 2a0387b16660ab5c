use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_json, page_window, result_json};
use crate::db::DbPool;
use crate::models::notification::Notification;
use crate::models::push_subscription::{PushSubscription, SubscriptionKeys};
use crate::models::settings::Setting;
use crate::security::auth::AuthenticatedUser;

#[get("/notifications?<unread>&<page>")]
pub fn list(pool: &State<DbPool>, current: AuthenticatedUser, unread: Option<bool>, page: Option<i64>) -> Json<Value> {
    let (limit, offset) = page_window(page);
    let items = Notification::for_user(pool, current.user.id, unread.unwrap_or(false), limit, offset);
    Json(json!({
        "success": true,
        "notifications": items,
        "unread": Notification::unread_count(pool, current.user.id),
    }))
}

#[get("/notifications/unread-count")]
pub fn unread_count(pool: &State<DbPool>, current: AuthenticatedUser) -> Json<Value> {
    Json(json!({"success": true, "unread": Notification::unread_count(pool, current.user.id)}))
}

#[post("/notifications/<id>/read")]
pub fn mark_read(pool: &State<DbPool>, current: AuthenticatedUser, id: i64) -> Json<Value> {
    Json(result_json(Notification::mark_read(pool, id, current.user.id), |_| {
        json!({"success": true})
    }))
}

#[post("/notifications/read-all")]
pub fn mark_all_read(pool: &State<DbPool>, current: AuthenticatedUser) -> Json<Value> {
    Json(result_json(Notification::mark_all_read(pool, current.user.id), |count| {
        json!({"success": true, "updated": count})
    }))
}

// ── Web Push subscriptions ──

#[derive(Debug, Deserialize)]
pub struct SubscribeForm {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeForm {
    pub endpoint: String,
}

/// Application server key the browser needs for `pushManager.subscribe`.
#[get("/push/public-key")]
pub fn vapid_public_key(pool: &State<DbPool>) -> Json<Value> {
    let key = Setting::get_or(pool, "push_vapid_public_key", "");
    if key.is_empty() {
        return Json(error_json("Push notifications are not configured"));
    }
    Json(json!({"success": true, "public_key": key}))
}

#[post("/push/subscribe", format = "json", data = "<form>")]
pub fn subscribe(pool: &State<DbPool>, current: AuthenticatedUser, form: Json<SubscribeForm>) -> Json<Value> {
    if !Setting::get_bool(pool, "notifications_push_enabled") {
        return Json(error_json("Push notifications are disabled"));
    }
    Json(result_json(
        PushSubscription::upsert(pool, current.user.id, &form.endpoint, &form.keys),
        |_| json!({"success": true}),
    ))
}

#[post("/push/unsubscribe", format = "json", data = "<form>")]
pub fn unsubscribe(pool: &State<DbPool>, current: AuthenticatedUser, form: Json<UnsubscribeForm>) -> Json<Value> {
    Json(result_json(PushSubscription::remove(pool, current.user.id, &form.endpoint), |_| {
        json!({"success": true})
    }))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list, unread_count, mark_read, mark_all_read, vapid_public_key, subscribe, unsubscribe]
}
