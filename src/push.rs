use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_push::{ContentEncoding, SubscriptionInfo, Urgency, VapidSignatureBuilder, WebPushMessage, WebPushMessageBuilder};

use crate::db::DbPool;
use crate::models::push_subscription::PushSubscription;
use crate::models::settings::Setting;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushAction {
    pub action: String,
    pub title: String,
}

/// Payload the service worker turns into `showNotification(title, options)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub actions: Vec<PushAction>,
    #[serde(default)]
    pub require_interaction: bool,
}

impl PushPayload {
    pub fn new(title: &str, body: &str) -> Self {
        PushPayload {
            title: title.to_string(),
            body: body.to_string(),
            icon: None,
            badge: None,
            tag: None,
            data: serde_json::Value::Null,
            actions: Vec::new(),
            require_interaction: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The push service no longer knows this subscription (404/410).
    Gone,
    Failed(String),
}

#[rocket::async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushOutcome;
}

/// Application server identity for push services (RFC 8292).
#[derive(Debug, Clone)]
pub struct VapidKeys {
    /// Raw P-256 private key, base64url without padding.
    pub private_key: String,
    /// `mailto:` or `https:` contact sent in the `sub` claim.
    pub subject: String,
}

impl VapidKeys {
    /// None until an admin has configured the key pair.
    pub fn from_settings(pool: &DbPool) -> Option<VapidKeys> {
        let private_key = Setting::get_or(pool, "push_vapid_private_key", "");
        if private_key.is_empty() {
            return None;
        }
        let mut subject = Setting::get_or(pool, "push_vapid_subject", "");
        if subject.is_empty() {
            let admin = Setting::get_or(pool, "admin_email", "");
            subject = if admin.is_empty() {
                Setting::get_or(pool, "site_url", "")
            } else {
                format!("mailto:{}", admin)
            };
        }
        Some(VapidKeys { private_key, subject })
    }
}

/// Encrypt `payload` for one subscription (RFC 8291, aes128gcm) and sign the
/// request with the VAPID key.
pub fn build_message(
    subscription: &PushSubscription,
    payload: &PushPayload,
    vapid: &VapidKeys,
    ttl_secs: u32,
) -> Result<WebPushMessage, String> {
    let info = SubscriptionInfo::new(
        subscription.endpoint.clone(),
        subscription.keys.p256dh.clone(),
        subscription.keys.auth.clone(),
    );

    let mut signer =
        VapidSignatureBuilder::from_base64(&vapid.private_key, web_push::URL_SAFE_NO_PAD, &info).map_err(|e| format!("Invalid VAPID key: {}", e))?;
    signer.add_claim("sub", vapid.subject.as_str());
    let signature = signer.build().map_err(|e| format!("VAPID signing failed: {}", e))?;

    let content = serde_json::to_vec(payload).map_err(|e| format!("Payload encoding failed: {}", e))?;
    let mut builder = WebPushMessageBuilder::new(&info);
    builder.set_ttl(ttl_secs);
    builder.set_urgency(Urgency::Normal);
    builder.set_payload(ContentEncoding::Aes128Gcm, &content);
    builder.set_vapid_signature(signature);
    builder.build().map_err(|e| format!("Push encryption failed: {}", e))
}

/// Delivers over reqwest. Keys are read from settings on every send so a
/// newly configured pair takes effect without a restart.
pub struct HttpPushSender {
    client: reqwest::Client,
    pool: DbPool,
    ttl_secs: u32,
}

impl HttpPushSender {
    pub fn new(pool: DbPool, ttl_secs: u32) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| format!("HTTP client error: {}", e))?;
        Ok(HttpPushSender { client, pool, ttl_secs })
    }
}

pub fn outcome_for_status(status: u16, body: String) -> PushOutcome {
    match status {
        200..=299 => PushOutcome::Delivered,
        404 | 410 => PushOutcome::Gone,
        _ => PushOutcome::Failed(format!("push service returned {}: {}", status, body)),
    }
}

#[rocket::async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushOutcome {
        let vapid = match VapidKeys::from_settings(&self.pool) {
            Some(v) => v,
            None => return PushOutcome::Failed("VAPID keys are not configured".into()),
        };
        let message = match build_message(subscription, payload, &vapid, self.ttl_secs) {
            Ok(m) => m,
            Err(e) => return PushOutcome::Failed(e),
        };

        let mut req = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", message.ttl.to_string())
            .header("Urgency", "normal");
        if let Some(body) = message.payload {
            // The encryption headers include the VAPID Authorization.
            for (name, value) in &body.crypto_headers {
                req = req.header(*name, value.as_str());
            }
            req = req
                .header("Content-Encoding", body.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream")
                .body(body.content);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = if resp.status().is_success() {
                    String::new()
                } else {
                    resp.text().await.unwrap_or_default()
                };
                outcome_for_status(status, body)
            }
            Err(e) => PushOutcome::Failed(format!("push request failed: {}", e)),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub delivered: usize,
    pub gone: usize,
    pub failed: usize,
}

/// Push to every active subscription of a user. Gone subscriptions are
/// deactivated; other failures are logged and left active.
pub async fn send_to_user(
    pool: &DbPool,
    sender: &dyn PushSender,
    user_id: i64,
    payload: &PushPayload,
) -> PushSummary {
    let mut summary = PushSummary::default();
    for sub in PushSubscription::active_for_user(pool, user_id) {
        match sender.send(&sub, payload).await {
            PushOutcome::Delivered => summary.delivered += 1,
            PushOutcome::Gone => {
                summary.gone += 1;
                log::info!("[push] Subscription {} is gone, deactivating", sub.id);
                if let Err(e) = PushSubscription::deactivate(pool, &sub.endpoint) {
                    log::error!("[push] Failed to deactivate subscription {}: {}", sub.id, e);
                }
            }
            PushOutcome::Failed(e) => {
                summary.failed += 1;
                log::warn!("[push] Send to subscription {} failed: {}", sub.id, e);
            }
        }
    }
    summary
}
