use std::collections::HashMap;

use super::OutgoingEmail;
use crate::models::auth_token::{TokenPurpose, TOKEN_TTL_MINUTES};

fn site(settings: &HashMap<String, String>) -> (String, String) {
    let site_name = settings
        .get("site_name")
        .cloned()
        .unwrap_or_else(|| "iRankHub".to_string());
    let site_url = settings
        .get("site_url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    (site_name, site_url.trim_end_matches('/').to_string())
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(site_name: &str, inner: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Arial,sans-serif;background:#f4f5f7;padding:24px\">\
         <div style=\"max-width:560px;margin:0 auto;background:#fff;border-radius:8px;padding:32px\">\
         <h2 style=\"margin-top:0;color:#1f2937\">{}</h2>{}\
         <p style=\"color:#9ca3af;font-size:12px;margin-top:32px\">&copy; {}</p>\
         </div></body></html>",
        escape_html(site_name),
        inner,
        escape_html(site_name)
    )
}

fn button(href: &str, label: &str) -> String {
    format!(
        "<p style=\"text-align:center;margin:28px 0\"><a href=\"{}\" \
         style=\"background:#2563eb;color:#fff;padding:12px 24px;border-radius:6px;text-decoration:none\">{}</a></p>\
         <p style=\"font-size:13px;color:#6b7280\">Or paste this link into your browser:<br>{}</p>",
        escape_html(href),
        escape_html(label),
        escape_html(href)
    )
}

/// Link email for a single-use auth token.
pub fn auth_link_email(
    settings: &HashMap<String, String>,
    purpose: TokenPurpose,
    to: &str,
    token: &str,
) -> OutgoingEmail {
    let (site_name, site_url) = site(settings);
    let link = format!("{}/auth/{}?token={}", site_url, purpose.path(), token);

    let (subject, intro, label) = match purpose {
        TokenPurpose::Login => (
            format!("Sign in to {}", site_name),
            "Click the button below to sign in. No password needed.",
            "Sign in",
        ),
        TokenPurpose::PasswordReset => (
            format!("Reset your {} password", site_name),
            "We received a request to reset your password. Choose a new one below.",
            "Reset password",
        ),
        TokenPurpose::EmailVerification => (
            format!("Verify your email for {}", site_name),
            "Confirm this address to finish setting up your account.",
            "Verify email",
        ),
        TokenPurpose::AccountRecovery => (
            format!("Recover your {} account", site_name),
            "Use the link below to regain access to your account.",
            "Recover account",
        ),
    };

    let inner = format!(
        "<p>Hello,</p><p>{}</p>{}\
         <p>This link expires in {} minutes and can only be used once.</p>\
         <p>If you didn't request this, you can safely ignore this email.</p>",
        intro,
        button(&link, label),
        TOKEN_TTL_MINUTES
    );

    OutgoingEmail::new(to, &subject, layout(&site_name, &inner))
}

/// Email mirror of an in-app notification.
pub fn notification_email(
    settings: &HashMap<String, String>,
    to: &str,
    title: &str,
    body: &str,
    link: Option<&str>,
) -> OutgoingEmail {
    let (site_name, site_url) = site(settings);
    let mut inner = format!("<h3>{}</h3><p>{}</p>", escape_html(title), escape_html(body));
    if let Some(link) = link {
        let href = if link.starts_with("http") {
            link.to_string()
        } else {
            format!("{}{}", site_url, link)
        };
        inner.push_str(&button(&href, "Open in iRankHub"));
    }
    OutgoingEmail::new(to, &format!("{} | {}", title, site_name), layout(&site_name, &inner))
}
