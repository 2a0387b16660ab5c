#[macro_use]
extern crate rocket;

mod boot;
mod config;
mod db;
mod email;
mod models;
mod notify;
mod offline;
mod push;
mod rate_limit;
mod routes;
mod security;
mod tasks;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use rocket::serde::json::Json;
use serde_json::{json, Value};

use config::AppConfig;
use db::DbPool;
use email::dispatch::EmailDispatcher;
use email::ConfiguredMailer;
use models::settings::Setting;
use notify::Notifier;
use offline::connectivity::HttpPinger;
use offline::strategy::CacheStrategyHeaders;
use offline::sync::SyncHub;
use offline::{ConnectivityDetector, OfflineCache};
use push::HttpPushSender;
use rate_limit::RateLimiter;

#[catch(401)]
fn unauthorized() -> Json<Value> {
    Json(json!({"success": false, "error": "Authentication required"}))
}

#[catch(403)]
fn forbidden() -> Json<Value> {
    Json(json!({"success": false, "error": "You do not have access to this resource"}))
}

#[catch(404)]
fn not_found() -> Json<Value> {
    Json(json!({"success": false, "error": "Not found"}))
}

#[catch(500)]
fn server_error() -> Json<Value> {
    Json(json!({"success": false, "error": "Internal server error"}))
}

/// Stable identity of this hub in peer sync, generated once and stored.
fn device_id(pool: &DbPool) -> String {
    match Setting::get(pool, "sync_device_id") {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            if let Err(e) = Setting::set(pool, "sync_device_id", &id) {
                log::warn!("[boot] Could not persist device id: {}", e);
            }
            id
        }
    }
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let config = AppConfig::load().expect("Failed to load configuration");
    boot::run(&config).expect("Boot check failed");

    let pool = db::init_pool(&config.database_path).expect("Failed to initialize database pool");
    db::run_migrations(&pool).expect("Failed to run database migrations");
    db::seed_defaults(&pool).expect("Failed to seed default settings");

    let mailer = Arc::new(EmailDispatcher::new(
        Arc::new(ConfiguredMailer::new(pool.clone())),
        config.email.retry_schedule(),
        config.email.batch_policy(),
    ));

    let push_ttl = Setting::get_i64(&pool, "push_ttl_secs").clamp(0, u32::MAX as i64) as u32;
    let push_sender = Arc::new(HttpPushSender::new(pool.clone(), push_ttl).expect("Failed to build push client"));
    if push::VapidKeys::from_settings(&pool).is_none() {
        log::warn!("[push] VAPID keys not configured; web push disabled until set");
    }
    let notifier = Notifier::new(pool.clone(), Arc::clone(&mailer), push_sender);

    let cache = OfflineCache::new(pool.clone(), config.cache.ttl_hours);
    let pinger = Arc::new(HttpPinger::new().expect("Failed to build connectivity client"));
    let detector = Arc::new(ConnectivityDetector::new(config.connectivity.clone(), pinger));

    let device_id = device_id(&pool);
    log::info!("[boot] Hub device id {}", device_id);
    let hub = Arc::new(SyncHub::new(cache.clone(), &device_id));

    rocket::build()
        .manage(pool)
        .manage(mailer)
        .manage(notifier)
        .manage(Arc::new(RateLimiter::new()))
        .manage(cache)
        .manage(detector)
        .manage(hub)
        .attach(CacheStrategyHeaders)
        .attach(tasks::BackgroundTasks {
            config: config.tasks.clone(),
        })
        .mount("/", routes::offline::root_routes())
        .mount("/api/auth", routes::auth::routes())
        .mount("/api", routes::tournaments::routes())
        .mount("/api", routes::teams::routes())
        .mount("/api", routes::schools::routes())
        .mount("/api", routes::notifications::routes())
        .mount("/api", routes::offline::routes())
        .mount("/api/admin", routes::admin::routes())
        .register("/", catchers![unauthorized, forbidden, not_found, server_error])
}
