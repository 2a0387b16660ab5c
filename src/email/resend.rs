use serde_json::json;
use std::collections::HashMap;

use super::OutgoingEmail;

/// Send email via Resend API (https://resend.com/docs/api-reference/emails/send-email)
pub async fn send(
    settings: &HashMap<String, String>,
    from: &str,
    email: &OutgoingEmail,
) -> Result<(), String> {
    let api_key = settings
        .get("email_resend_api_key")
        .cloned()
        .unwrap_or_default();
    if api_key.is_empty() {
        return Err("Resend API key not configured".into());
    }

    let payload = json!({
        "from": from,
        "to": [email.to],
        "subject": email.subject,
        "html": email.html
    });

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| format!("HTTP client error: {}", e))?;

    let resp = client
        .post("https://api.resend.com/emails")
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&payload)
        .send()
        .await
        .map_err(|e| format!("Resend request failed: {}", e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(format!("Resend returned {}: {}", status, text));
    }

    Ok(())
}
