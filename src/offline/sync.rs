//! Peer-to-peer exchange of offline cache entries between two devices.
//!
//! Both sides open with `Hello`, trade inventories of fresh entries, request
//! what they are missing (or hold an older copy of), then stream `Chunk`s and
//! acknowledge them. Conflicts resolve last-writer-wins on `written_at_ms`.
//! The session is transport-agnostic: feed it incoming messages, send back
//! whatever it returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::cache::{self, CacheEntry, OfflineCache};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    Hello { device_id: String, version: u32 },
    Inventory { entries: BTreeMap<String, i64> },
    Request { keys: Vec<String> },
    Chunk { entry: CacheEntry },
    Ack { key: String },
    Done,
}

impl SyncMessage {
    fn name(&self) -> &'static str {
        match self {
            SyncMessage::Hello { .. } => "hello",
            SyncMessage::Inventory { .. } => "inventory",
            SyncMessage::Request { .. } => "request",
            SyncMessage::Chunk { .. } => "chunk",
            SyncMessage::Ack { .. } => "ack",
            SyncMessage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Handshake,
    Inventory,
    Transferring,
    Complete,
    Failed(String),
}

/// Keys the remote side should send us: ones we lack or hold an older copy of.
pub fn wanted_keys(local: &BTreeMap<String, i64>, remote: &BTreeMap<String, i64>) -> Vec<String> {
    remote
        .iter()
        .filter(|(key, remote_at)| local.get(*key).map(|local_at| *remote_at > local_at).unwrap_or(true))
        .map(|(key, _)| key.clone())
        .collect()
}

pub struct SyncSession {
    cache: OfflineCache,
    device_id: String,
    now_ms: i64,
    state: SyncState,
    peer_id: Option<String>,
    local_inventory: BTreeMap<String, i64>,
    requested: BTreeSet<String>,
    awaiting_ack: BTreeSet<String>,
    peer_done: bool,
    sent_done: bool,
    received: usize,
    merged: usize,
    sent: usize,
}

impl SyncSession {
    /// `now_ms` fixes which entries count as fresh for the whole session.
    pub fn new(cache: OfflineCache, device_id: &str, now_ms: i64) -> Self {
        SyncSession {
            cache,
            device_id: device_id.to_string(),
            now_ms,
            state: SyncState::Idle,
            peer_id: None,
            local_inventory: BTreeMap::new(),
            requested: BTreeSet::new(),
            awaiting_ack: BTreeSet::new(),
            peer_done: false,
            sent_done: false,
            received: 0,
            merged: 0,
            sent: 0,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// Chunks received, chunks that changed the local cache, chunks sent.
    pub fn stats(&self) -> (usize, usize, usize) {
        (self.received, self.merged, self.sent)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SyncState::Complete | SyncState::Failed(_))
    }

    pub fn start(&mut self) -> Result<Vec<SyncMessage>, String> {
        if self.state != SyncState::Idle {
            return self.fail("session already started".to_string());
        }
        self.state = SyncState::Handshake;
        Ok(vec![SyncMessage::Hello {
            device_id: self.device_id.clone(),
            version: PROTOCOL_VERSION,
        }])
    }

    /// Apply one incoming message and return the replies to send. Any
    /// message out of order fails the session.
    pub fn handle(&mut self, msg: SyncMessage) -> Result<Vec<SyncMessage>, String> {
        let replies = match (self.state.clone(), msg) {
            (SyncState::Handshake, SyncMessage::Hello { device_id, version }) => {
                if version != PROTOCOL_VERSION {
                    return self.fail(format!("unsupported protocol version {}", version));
                }
                if device_id == self.device_id {
                    return self.fail("peer has the same device id".to_string());
                }
                log::info!("[sync] {} connected to {}", self.device_id, device_id);
                self.peer_id = Some(device_id);
                self.local_inventory = self.cache.fresh_inventory(self.now_ms);
                self.state = SyncState::Inventory;
                vec![SyncMessage::Inventory {
                    entries: self.local_inventory.clone(),
                }]
            }
            (SyncState::Inventory, SyncMessage::Inventory { entries }) => {
                let keys = wanted_keys(&self.local_inventory, &entries);
                self.requested = keys.iter().cloned().collect();
                self.state = SyncState::Transferring;
                vec![SyncMessage::Request { keys }]
            }
            (SyncState::Transferring, SyncMessage::Request { .. }) if self.sent_done => {
                return self.fail("duplicate request".to_string());
            }
            (SyncState::Transferring, SyncMessage::Request { keys }) => {
                let mut out = Vec::new();
                for key in keys {
                    // Entries that expired or vanished since the inventory are skipped.
                    if let Some(entry) = self.cache.fresh_entry_at(&key, self.now_ms) {
                        self.awaiting_ack.insert(key);
                        self.sent += 1;
                        out.push(SyncMessage::Chunk { entry });
                    }
                }
                out.push(SyncMessage::Done);
                self.sent_done = true;
                out
            }
            (SyncState::Transferring, SyncMessage::Chunk { entry }) => {
                if !self.requested.remove(&entry.key) {
                    return self.fail(format!("unrequested chunk {}", entry.key));
                }
                self.received += 1;
                match self.cache.merge(&entry) {
                    Ok(true) => self.merged += 1,
                    Ok(false) => {}
                    Err(e) => return self.fail(format!("failed to store {}: {}", entry.key, e)),
                }
                vec![SyncMessage::Ack { key: entry.key }]
            }
            (SyncState::Transferring, SyncMessage::Ack { key }) => {
                if !self.awaiting_ack.remove(&key) {
                    return self.fail(format!("unexpected ack for {}", key));
                }
                Vec::new()
            }
            (SyncState::Transferring, SyncMessage::Done) => {
                // The peer sent every chunk it had; the rest will not arrive.
                if !self.requested.is_empty() {
                    log::debug!("[sync] Peer had no fresh copy of {} requested keys", self.requested.len());
                    self.requested.clear();
                }
                self.peer_done = true;
                Vec::new()
            }
            (state, msg) => {
                let reason = format!("unexpected {} while {:?}", msg.name(), state);
                return self.fail(reason);
            }
        };

        if self.state == SyncState::Transferring && self.peer_done && self.sent_done && self.awaiting_ack.is_empty() {
            self.state = SyncState::Complete;
            log::info!(
                "[sync] Session with {} complete: {} received, {} merged, {} sent",
                self.peer_id.as_deref().unwrap_or("?"),
                self.received,
                self.merged,
                self.sent
            );
        }
        Ok(replies)
    }

    fn fail(&mut self, reason: String) -> Result<Vec<SyncMessage>, String> {
        log::warn!("[sync] Session failed: {}", reason);
        self.state = SyncState::Failed(reason.clone());
        Err(reason)
    }
}

struct HubSession {
    session: SyncSession,
    last_seen: Instant,
}

/// Sessions driven over HTTP. Each request carries a batch of messages for
/// one session and gets the replies back; finished sessions are dropped, and
/// abandoned ones are expired by `expire_idle`.
pub struct SyncHub {
    cache: OfflineCache,
    device_id: String,
    sessions: Mutex<HashMap<String, HubSession>>,
}

impl SyncHub {
    pub fn new(cache: OfflineCache, device_id: &str) -> Self {
        SyncHub {
            cache,
            device_id: device_id.to_string(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn exchange(&self, session_id: &str, incoming: Vec<SyncMessage>) -> Result<(SyncState, Vec<SyncMessage>), String> {
        self.exchange_at(session_id, incoming, Instant::now())
    }

    pub fn exchange_at(
        &self,
        session_id: &str,
        incoming: Vec<SyncMessage>,
        now: Instant,
    ) -> Result<(SyncState, Vec<SyncMessage>), String> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut replies = Vec::new();

        if !sessions.contains_key(session_id) {
            let mut session = SyncSession::new(self.cache.clone(), &self.device_id, cache::now_ms());
            replies.extend(session.start()?);
            sessions.insert(session_id.to_string(), HubSession { session, last_seen: now });
        }
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| "sync session vanished".to_string())?;
        entry.last_seen = now;

        for msg in incoming {
            match entry.session.handle(msg) {
                Ok(out) => replies.extend(out),
                Err(e) => {
                    sessions.remove(session_id);
                    return Err(e);
                }
            }
        }

        let state = entry.session.state().clone();
        if entry.session.is_finished() {
            sessions.remove(session_id);
        }
        Ok((state, replies))
    }

    /// Drop sessions with no exchange for `max_idle`. Returns how many.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        self.expire_idle_at(Instant::now(), max_idle)
    }

    pub fn expire_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.last_seen) < max_idle;
            if !keep {
                log::debug!("[sync] Expiring idle session {} in state {:?}", id, entry.session.state());
            }
            keep
        });
        before - sessions.len()
    }
}
