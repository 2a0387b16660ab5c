use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::email::dispatch::{BatchPolicy, RetrySchedule};

pub const DEFAULT_CONFIG_PATH: &str = "irankhub.toml";

/// Boot-time configuration. Every field has a default so an empty or
/// missing file yields a working server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: String,
    pub database_path: String,
    pub email: EmailConfig,
    pub cache: CacheConfig,
    pub connectivity: ConnectivityConfig,
    pub tasks: TaskConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_dir: "data".to_string(),
            database_path: "data/irankhub.db".to_string(),
            email: EmailConfig::default(),
            cache: CacheConfig::default(),
            connectivity: ConnectivityConfig::default(),
            tasks: TaskConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Delay before each retry, indexed by the attempt that just failed.
    pub retry_schedule_ms: Vec<u64>,
    pub max_attempts: u32,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        EmailConfig {
            retry_schedule_ms: vec![1000, 3000, 5000],
            max_attempts: 3,
            batch_size: 10,
            batch_pause_ms: 1000,
        }
    }
}

impl EmailConfig {
    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::new(
            self.max_attempts,
            self.retry_schedule_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            size: self.batch_size.max(1),
            pause: Duration::from_millis(self.batch_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { ttl_hours: 24 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub ping_urls: Vec<String>,
    pub ping_timeout_ms: u64,
    /// Failed ping rounds in one check before the detector reports offline.
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub check_interval_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        ConnectivityConfig {
            ping_urls: vec![
                "https://www.google.com/favicon.ico".to_string(),
                "https://www.cloudflare.com/favicon.ico".to_string(),
                "https://www.microsoft.com/favicon.ico".to_string(),
            ],
            ping_timeout_ms: 5000,
            retry_count: 3,
            retry_delay_ms: 1000,
            check_interval_secs: 30,
        }
    }
}

/// Background task intervals, in minutes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub session_cleanup_interval: u64,
    pub auth_token_cleanup_interval: u64,
    pub cache_cleanup_interval: u64,
    pub notification_cleanup_interval: u64,
    /// Minutes a peer sync session may sit without an exchange.
    pub sync_session_idle: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            session_cleanup_interval: 30,
            auth_token_cleanup_interval: 60,
            cache_cleanup_interval: 360,
            notification_cleanup_interval: 1440,
            sync_session_idle: 30,
        }
    }
}

impl AppConfig {
    /// Load from `IRANKHUB_CONFIG` or `irankhub.toml`. A missing file falls
    /// back to defaults; a malformed one is an error.
    pub fn load() -> Result<AppConfig, String> {
        let path = std::env::var("IRANKHUB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        if !Path::new(&path).exists() {
            log::info!("[config] {} not found, using defaults", path);
            return Ok(AppConfig::default());
        }
        let raw = fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
        Self::parse(&raw).map_err(|e| format!("{}: {}", path, e))
    }

    pub fn parse(raw: &str) -> Result<AppConfig, String> {
        let cfg: AppConfig = toml::from_str(raw).map_err(|e| format!("Invalid configuration: {}", e))?;
        for ping in &cfg.connectivity.ping_urls {
            url::Url::parse(ping).map_err(|e| format!("Invalid ping URL '{}': {}", ping, e))?;
        }
        Ok(cfg)
    }
}
