use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use rocket::tokio;
use rocket::tokio::sync::watch;
use serde::Serialize;

use crate::config::ConnectivityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

/// Events from the realtime channel to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Close,
    Error,
}

impl SocketEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SocketEvent::Open),
            "close" => Some(SocketEvent::Close),
            "error" => Some(SocketEvent::Error),
            _ => None,
        }
    }
}

#[rocket::async_trait]
pub trait Pinger: Send + Sync {
    /// True if `url` answered at all within `timeout`.
    async fn ping(&self, url: &str, timeout: Duration) -> bool;
}

pub struct HttpPinger {
    client: reqwest::Client,
}

impl HttpPinger {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("HTTP client error: {}", e))?;
        Ok(HttpPinger { client })
    }
}

#[rocket::async_trait]
impl Pinger for HttpPinger {
    async fn ping(&self, url: &str, timeout: Duration) -> bool {
        // Any HTTP response proves reachability, whatever its status.
        self.client.head(url).timeout(timeout).send().await.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
struct Signals {
    link_up: bool,
    socket_open: bool,
}

/// Tracks whether the backend is reachable. A down link always wins; an
/// open socket on an up link means online; otherwise HEAD pings decide,
/// and only after `retry_count` failed rounds.
pub struct ConnectivityDetector {
    signals: Mutex<Signals>,
    status: watch::Sender<Connectivity>,
    stop: watch::Sender<bool>,
    pinger: Arc<dyn Pinger>,
    config: ConnectivityConfig,
}

impl ConnectivityDetector {
    pub fn new(config: ConnectivityConfig, pinger: Arc<dyn Pinger>) -> Self {
        let (status, _) = watch::channel(Connectivity::Online);
        let (stop, _) = watch::channel(false);
        ConnectivityDetector {
            signals: Mutex::new(Signals {
                link_up: true,
                socket_open: false,
            }),
            status,
            stop,
            pinger,
            config,
        }
    }

    fn signals(&self) -> Signals {
        *self.signals.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_signals(&self, f: impl FnOnce(&mut Signals)) -> Signals {
        let mut guard = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
        *guard
    }

    fn set(&self, next: Connectivity) -> Connectivity {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            log::info!("[connectivity] Now {:?}", next);
        }
        next
    }

    pub fn state(&self) -> Connectivity {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Receivers see every state change after they subscribe.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.status.subscribe()
    }

    pub fn link_up(&self) -> bool {
        self.signals().link_up
    }

    pub fn socket_open(&self) -> bool {
        self.signals().socket_open
    }

    /// Network interface report. Down flips offline at once; up is only
    /// trusted when the socket is also open, otherwise the next check decides.
    pub fn set_link_status(&self, up: bool) -> Connectivity {
        let s = self.update_signals(|s| s.link_up = up);
        if !s.link_up {
            self.set(Connectivity::Offline)
        } else if s.socket_open {
            self.set(Connectivity::Online)
        } else {
            self.state()
        }
    }

    /// Returns true when the event leaves connectivity in doubt and a check
    /// should run.
    pub fn on_socket_event(&self, event: SocketEvent) -> bool {
        let s = self.update_signals(|s| s.socket_open = event == SocketEvent::Open);
        match event {
            SocketEvent::Open if s.link_up => {
                self.set(Connectivity::Online);
                false
            }
            SocketEvent::Open => false,
            SocketEvent::Close | SocketEvent::Error => {
                log::debug!("[connectivity] Socket {:?}, verifying", event);
                true
            }
        }
    }

    async fn ping_round(&self) -> bool {
        let timeout = Duration::from_millis(self.config.ping_timeout_ms);
        let pings = self.config.ping_urls.iter().map(|url| self.pinger.ping(url, timeout));
        join_all(pings).await.into_iter().any(|ok| ok)
    }

    /// The state the signals alone decide, if they decide one.
    fn settled(&self) -> Option<Connectivity> {
        let s = self.signals();
        if !s.link_up {
            Some(Connectivity::Offline)
        } else if s.socket_open {
            Some(Connectivity::Online)
        } else {
            None
        }
    }

    /// Re-evaluate from the current signals, pinging if needed. Signals that
    /// change while a round is in flight take precedence over its outcome.
    pub async fn check(&self) -> Connectivity {
        let rounds = self.config.retry_count.max(1);
        for round in 1..=rounds {
            if let Some(state) = self.settled() {
                return self.set(state);
            }
            if self.ping_round().await {
                return self.set(self.settled().unwrap_or(Connectivity::Online));
            }
            log::debug!("[connectivity] Ping round {}/{} failed", round, rounds);
            if round < rounds {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }
        self.set(self.settled().unwrap_or(Connectivity::Offline))
    }

    /// Periodic checks until `shutdown` is called.
    pub async fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            return;
        }
        let interval = Duration::from_secs(self.config.check_interval_secs.max(1));
        log::info!("[connectivity] Monitor started ({}s interval)", interval.as_secs());
        loop {
            self.check().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => break,
            }
        }
        log::info!("[connectivity] Monitor stopped");
    }

    pub fn start(self: &Arc<Self>) {
        tokio::spawn(Arc::clone(self).run());
    }

    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}
