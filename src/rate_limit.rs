use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Endpoints that send mail or check credentials, each with its own budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Login,
    MagicLink,
    PasswordReset,
    Signup,
}

impl Bucket {
    fn name(self) -> &'static str {
        match self {
            Bucket::Login => "login",
            Bucket::MagicLink => "magic_link",
            Bucket::PasswordReset => "password_reset",
            Bucket::Signup => "signup",
        }
    }

    /// (max attempts, window)
    pub fn limit(self) -> (u64, Duration) {
        match self {
            Bucket::Login => (10, Duration::from_secs(15 * 60)),
            Bucket::MagicLink => (5, Duration::from_secs(15 * 60)),
            Bucket::PasswordReset => (3, Duration::from_secs(60 * 60)),
            Bucket::Signup => (5, Duration::from_secs(60 * 60)),
        }
    }
}

/// In-memory sliding-window limiter keyed by bucket and a caller identity
/// (hashed IP or normalised email).
pub struct RateLimiter {
    entries: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt; true if it was under the bucket's limit.
    pub fn allow(&self, bucket: Bucket, who: &str) -> bool {
        let (max, window) = bucket.limit();
        self.check_and_record(&format!("{}:{}", bucket.name(), who.to_lowercase()), max, window)
    }

    pub fn check_and_record(&self, key: &str, max_attempts: u64, window: Duration) -> bool {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let attempts = map.entry(key.to_string()).or_default();
        attempts.retain(|t| now.duration_since(*t) < window);

        if (attempts.len() as u64) < max_attempts {
            attempts.push(now);
            true
        } else {
            false
        }
    }

    /// Drop keys with no attempts younger than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < max_age);
            !attempts.is_empty()
        });
        before - map.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
