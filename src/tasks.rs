use rocket::fairing::{Fairing, Info, Kind};
use rocket::tokio;
use rocket::{Orbit, Rocket};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TaskConfig;
use crate::db::DbPool;
use crate::models::auth_token::AuthToken;
use crate::models::notification::Notification;
use crate::offline::sync::SyncHub;
use crate::offline::{ConnectivityDetector, OfflineCache};
use crate::rate_limit::RateLimiter;
use crate::security::auth;

/// Starts the cleanup loops and the connectivity monitor once Rocket is up.
pub struct BackgroundTasks {
    pub config: TaskConfig,
}

fn every(minutes: u64) -> Duration {
    Duration::from_secs(minutes.max(1) * 60)
}

fn spawn_cleanup<F>(name: &'static str, interval: Duration, job: F)
where
    F: Fn() -> Result<usize, String> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match job() {
                Ok(count) => {
                    if count > 0 {
                        log::info!("[task] Cleaned up {} {}", count, name);
                    }
                }
                Err(e) => log::error!("[task] {} cleanup failed: {}", name, e),
            }
        }
    });
}

#[rocket::async_trait]
impl Fairing for BackgroundTasks {
    fn info(&self) -> Info {
        Info {
            name: "Background Tasks",
            kind: Kind::Liftoff | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let pool = match rocket.state::<DbPool>() {
            Some(p) => p.clone(),
            None => {
                log::error!("[task] Database pool missing from managed state; background tasks not started");
                return;
            }
        };

        let p = pool.clone();
        spawn_cleanup("expired sessions", every(self.config.session_cleanup_interval), move || {
            auth::cleanup_expired_sessions(&p)
        });

        let p = pool.clone();
        spawn_cleanup("expired auth tokens", every(self.config.auth_token_cleanup_interval), move || {
            AuthToken::cleanup_expired(&p)
        });

        let p = pool.clone();
        spawn_cleanup(
            "expired notifications",
            every(self.config.notification_cleanup_interval),
            move || Notification::cleanup_expired(&p),
        );

        if let Some(cache) = rocket.state::<OfflineCache>() {
            let cache = cache.clone();
            spawn_cleanup("stale cache entries", every(self.config.cache_cleanup_interval), move || {
                cache.clean_expired()
            });
        }

        if let Some(limiter) = rocket.state::<Arc<RateLimiter>>() {
            let limiter = Arc::clone(limiter);
            spawn_cleanup("rate limit buckets", every(self.config.session_cleanup_interval), move || {
                Ok(limiter.cleanup(Duration::from_secs(60 * 60)))
            });
        }

        if let Some(hub) = rocket.state::<Arc<SyncHub>>() {
            let hub = Arc::clone(hub);
            let max_idle = every(self.config.sync_session_idle);
            spawn_cleanup("idle sync sessions", every(self.config.session_cleanup_interval), move || {
                Ok(hub.expire_idle(max_idle))
            });
        }

        if let Some(detector) = rocket.state::<Arc<ConnectivityDetector>>() {
            detector.start();
        }

        log::info!("[task] Background tasks started");
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(detector) = rocket.state::<Arc<ConnectivityDetector>>() {
            detector.shutdown();
        }
    }
}
