pub mod dispatch;
pub mod resend;
pub mod smtp;
pub mod templates;

use std::collections::HashMap;

use crate::db::DbPool;
use crate::models::settings::Setting;

/// A rendered transactional email addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    pub fn new(to: &str, subject: &str, html: String) -> Self {
        OutgoingEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html,
        }
    }
}

/// One delivery attempt over some provider. Implementations must not retry
/// internally; retries belong to the dispatcher.
#[rocket::async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), String>;
}

/// Transport that resolves the provider from the settings table on every
/// send, so provider changes take effect without a restart.
pub struct ConfiguredMailer {
    pool: DbPool,
}

impl ConfiguredMailer {
    pub fn new(pool: DbPool) -> Self {
        ConfiguredMailer { pool }
    }
}

#[rocket::async_trait]
impl MailTransport for ConfiguredMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), String> {
        let settings = Setting::all(&self.pool);
        send_via_provider(&settings, email).await
    }
}

/// Determine the "from" address: explicit setting first, then the SMTP user,
/// then the admin address.
pub fn get_from_email(settings: &HashMap<String, String>) -> Option<String> {
    let from_addr = settings.get("email_from_address").cloned().unwrap_or_default();
    if !from_addr.is_empty() {
        return Some(from_addr);
    }
    if settings.get("email_provider").map(|v| v.as_str()) == Some("smtp") {
        if let Some(user) = settings.get("email_smtp_username").filter(|s| !s.is_empty()) {
            return Some(user.clone());
        }
    }
    settings.get("admin_email").cloned().filter(|s| !s.is_empty())
}

/// Send through the provider named by `email_provider`.
pub async fn send_via_provider(
    settings: &HashMap<String, String>,
    email: &OutgoingEmail,
) -> Result<(), String> {
    let provider = settings
        .get("email_provider")
        .cloned()
        .unwrap_or_else(|| "log".to_string());

    if provider == "log" {
        log::info!(
            "[email] (log provider) to={} subject={:?} bytes={}",
            email.to,
            email.subject,
            email.html.len()
        );
        return Ok(());
    }

    let from = get_from_email(settings)
        .ok_or("No from address configured. Set email_from_address or admin_email.")?;

    match provider.as_str() {
        "smtp" => smtp::send(settings, &from, email).await,
        "resend" => resend::send(settings, &from, email).await,
        other => Err(format!("Unknown email provider: {}", other)),
    }
}
