use std::collections::HashMap;
use std::sync::Arc;

use rocket::tokio;

use crate::db::DbPool;
use crate::email::dispatch::EmailDispatcher;
use crate::email::templates;
use crate::email::OutgoingEmail;
use crate::models::notification::{Channel, NewNotification, Notification};
use crate::models::push_subscription::PushSubscription;
use crate::models::settings::Setting;
use crate::models::user::User;
use crate::push::{self, PushPayload, PushSender};

/// Fans a notification out to the in-app inbox, email and Web Push.
/// Channel flags are set when a send is started; outcomes only reach the log.
pub struct Notifier {
    pool: DbPool,
    email: Arc<EmailDispatcher>,
    push: Arc<dyn PushSender>,
}

impl Notifier {
    pub fn new(pool: DbPool, email: Arc<EmailDispatcher>, push: Arc<dyn PushSender>) -> Self {
        Notifier { pool, email, push }
    }

    pub fn email(&self) -> &Arc<EmailDispatcher> {
        &self.email
    }

    pub fn notify_user(&self, new: &NewNotification) -> Result<i64, String> {
        let settings = Setting::all(&self.pool);
        let (id, email) = self.record(&settings, new)?;
        if let Some(email) = email {
            self.email.queue(email);
        }
        Ok(id)
    }

    /// Store the notification, start the push, and hand back the email
    /// mirror (already flagged as sent) for the caller to queue.
    fn record(
        &self,
        settings: &HashMap<String, String>,
        new: &NewNotification,
    ) -> Result<(i64, Option<OutgoingEmail>), String> {
        let user = User::get_by_id(&self.pool, new.user_id).ok_or("User not found")?;
        let id = Notification::create(&self.pool, new)?;

        let mut email = None;
        if settings.get("notifications_email_enabled").map(|v| v == "true").unwrap_or(false) {
            email = Some(templates::notification_email(settings, &user.email, new.title, new.body, new.link));
            if let Err(e) = Notification::mark_channel_sent(&self.pool, id, Channel::Email) {
                log::error!("[notify] Failed to flag email for notification {}: {}", id, e);
            }
        }

        let push_enabled = settings.get("notifications_push_enabled").map(|v| v == "true").unwrap_or(false);
        if push_enabled && !PushSubscription::active_for_user(&self.pool, user.id).is_empty() {
            let mut payload = PushPayload::new(new.title, new.body);
            payload.icon = settings.get("push_icon").cloned().filter(|s| !s.is_empty());
            payload.badge = settings.get("push_badge").cloned().filter(|s| !s.is_empty());
            payload.tag = Some(format!("{}-{}", new.kind.as_str(), id));
            payload.data = serde_json::json!({ "notification_id": id, "url": new.link });

            if let Err(e) = Notification::mark_channel_sent(&self.pool, id, Channel::Push) {
                log::error!("[notify] Failed to flag push for notification {}: {}", id, e);
            }
            let pool = self.pool.clone();
            let sender = Arc::clone(&self.push);
            let user_id = user.id;
            tokio::spawn(async move {
                let summary = push::send_to_user(&pool, &*sender, user_id, &payload).await;
                log::info!(
                    "[push] Notification {}: {} delivered, {} gone, {} failed",
                    id,
                    summary.delivered,
                    summary.gone,
                    summary.failed
                );
            });
        }

        Ok((id, email))
    }

    /// Notify several users; a failure for one does not stop the rest.
    /// Their emails go out through the batch sender.
    pub fn notify_users(&self, user_ids: &[i64], template: &NewNotification) -> usize {
        let settings = Setting::all(&self.pool);
        let mut created = 0;
        let mut emails = Vec::new();
        for user_id in user_ids {
            let new = NewNotification {
                user_id: *user_id,
                ..*template
            };
            match self.record(&settings, &new) {
                Ok((_, email)) => {
                    created += 1;
                    emails.extend(email);
                }
                Err(e) => log::warn!("[notify] Skipped user {}: {}", user_id, e),
            }
        }
        if !emails.is_empty() {
            self.email.queue_batch(emails);
        }
        created
    }
}
