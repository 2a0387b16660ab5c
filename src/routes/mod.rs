pub mod admin;
pub mod auth;
pub mod notifications;
pub mod offline;
pub mod schools;
pub mod teams;
pub mod tournaments;

use serde_json::{json, Value};

pub const PER_PAGE: i64 = 20;

/// (limit, offset) for a 1-based page number.
pub fn page_window(page: Option<i64>) -> (i64, i64) {
    let current = page.unwrap_or(1).max(1);
    (PER_PAGE, (current - 1) * PER_PAGE)
}

pub fn error_json(msg: impl Into<String>) -> Value {
    json!({"success": false, "error": msg.into()})
}

pub fn result_json<T>(result: Result<T, String>, ok: impl FnOnce(T) -> Value) -> Value {
    match result {
        Ok(v) => ok(v),
        Err(e) => error_json(e),
    }
}
