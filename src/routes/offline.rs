use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::tokio;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error_json;
use crate::offline::connectivity::SocketEvent;
use crate::offline::strategy;
use crate::offline::sync::{SyncHub, SyncMessage};
use crate::offline::ConnectivityDetector;
use crate::security::auth::AdminUser;

/// Precache list and routing table for the service worker.
#[get("/sw-manifest.json")]
pub fn sw_manifest() -> Json<Value> {
    Json(strategy::manifest())
}

// ── Connectivity ──

#[get("/connectivity")]
pub fn status(detector: &State<Arc<ConnectivityDetector>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "state": detector.state(),
        "link_up": detector.link_up(),
        "socket_open": detector.socket_open(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LinkForm {
    pub up: bool,
}

/// Link reports from the host's network manager hook.
#[post("/connectivity/link", format = "json", data = "<form>")]
pub fn report_link(detector: &State<Arc<ConnectivityDetector>>, _admin: AdminUser, form: Json<LinkForm>) -> Json<Value> {
    let state = detector.set_link_status(form.up);
    if form.up && !detector.socket_open() {
        let detector = Arc::clone(detector);
        tokio::spawn(async move {
            detector.check().await;
        });
    }
    Json(json!({"success": true, "state": state}))
}

#[derive(Debug, Deserialize)]
pub struct SocketForm {
    pub event: String,
}

#[post("/connectivity/socket", format = "json", data = "<form>")]
pub fn report_socket(
    detector: &State<Arc<ConnectivityDetector>>,
    _admin: AdminUser,
    form: Json<SocketForm>,
) -> Json<Value> {
    let event = match SocketEvent::parse(&form.event) {
        Some(e) => e,
        None => return Json(error_json(format!("Unknown socket event '{}'", form.event))),
    };
    if detector.on_socket_event(event) {
        let detector = Arc::clone(detector);
        tokio::spawn(async move {
            detector.check().await;
        });
    }
    Json(json!({"success": true, "state": detector.state()}))
}

#[post("/connectivity/check")]
pub async fn check_now(detector: &State<Arc<ConnectivityDetector>>, _admin: AdminUser) -> Json<Value> {
    let state = detector.check().await;
    Json(json!({"success": true, "state": state}))
}

// ── Peer sync ──

#[derive(Debug, Deserialize)]
pub struct SyncBatch {
    pub messages: Vec<SyncMessage>,
}

/// One round trip of a peer sync session; replies go back in the body.
#[post("/sync/<session_id>", format = "json", data = "<batch>")]
pub fn sync_exchange(hub: &State<Arc<SyncHub>>, _admin: AdminUser, session_id: &str, batch: Json<SyncBatch>) -> Json<Value> {
    match hub.exchange(session_id, batch.into_inner().messages) {
        Ok((state, messages)) => Json(json!({
            "success": true,
            "device_id": hub.device_id(),
            "state": state,
            "messages": messages,
        })),
        Err(e) => Json(error_json(e)),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![status, report_link, report_socket, check_now, sync_exchange]
}

pub fn root_routes() -> Vec<rocket::Route> {
    routes![sw_manifest]
}
