use std::collections::HashMap;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::OutgoingEmail;

pub async fn send(
    settings: &HashMap<String, String>,
    from: &str,
    email: &OutgoingEmail,
) -> Result<(), String> {
    let host = settings.get("email_smtp_host").cloned().unwrap_or_default();
    let port: u16 = settings.get("email_smtp_port").and_then(|v| v.parse().ok()).unwrap_or(587);
    let username = settings.get("email_smtp_username").cloned().unwrap_or_default();
    let password = settings.get("email_smtp_password").cloned().unwrap_or_default();

    if host.is_empty() || username.is_empty() {
        return Err("SMTP host or username not configured".into());
    }

    let message = Message::builder()
        .from(from.parse().map_err(|e| format!("Invalid from address: {}", e))?)
        .to(email.to.parse().map_err(|e| format!("Invalid to address: {}", e))?)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.html.clone())
        .map_err(|e| format!("Failed to build email: {}", e))?;

    let creds = Credentials::new(username, password);

    let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        .map_err(|e| format!("SMTP relay error: {}", e))?
        .port(port)
        .credentials(creds)
        .build();

    mailer
        .send(message)
        .await
        .map_err(|e| format!("SMTP send error: {}", e))?;
    Ok(())
}
