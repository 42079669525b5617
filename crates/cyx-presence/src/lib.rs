//! Presence engine: broadcast status, cache peers' presence, auto-away
//! (spec §4.8).

pub mod wire;

use std::collections::HashMap;

use cyx_types::NodeId;
use wire::{PresenceFrame, Status};

pub const CACHE_CAP: usize = 128;
pub const STALE_AFTER_MS: u64 = 300_000;

struct CachedPresence {
    status: Status,
    text: String,
    updated_at: u64,
}

/// This identity's own presence state, including the pending auto-away
/// bookkeeping.
pub struct PresenceEngine {
    status: Status,
    text: String,
    last_activity: u64,
    away_timeout_ms: Option<u64>,
    pre_away: Option<(Status, String)>,
    cache: HashMap<NodeId, CachedPresence>,
}

impl Default for PresenceEngine {
    fn default() -> Self {
        Self {
            status: Status::Online,
            text: String::new(),
            last_activity: 0,
            away_timeout_ms: None,
            pre_away: None,
            cache: HashMap::new(),
        }
    }
}

impl PresenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_auto_away(&mut self, timeout_ms: Option<u64>) {
        self.away_timeout_ms = timeout_ms;
    }

    pub fn status(&self) -> (Status, &str) {
        (self.status, &self.text)
    }

    /// Set our own status; returns the `PRESENCE_STATUS` frame to broadcast
    /// to every known contact.
    pub fn set_status(&mut self, status: Status, text: String, now_ms: u64) -> Vec<u8> {
        self.status = status;
        self.text = text.clone();
        self.last_activity = now_ms;
        self.pre_away = None;
        PresenceFrame::Status { status, text }.to_bytes()
    }

    /// Record local activity. If we were auto-away, restores the prior
    /// status and returns a broadcast frame.
    pub fn activity(&mut self, now_ms: u64) -> Option<Vec<u8>> {
        self.last_activity = now_ms;
        if let Some((status, text)) = self.pre_away.take() {
            self.status = status;
            self.text = text.clone();
            return Some(PresenceFrame::Status { status, text }.to_bytes());
        }
        None
    }

    /// Transition to `Away` if idle past the configured timeout. Returns
    /// the broadcast frame on transition.
    pub fn poll(&mut self, now_ms: u64) -> Option<Vec<u8>> {
        let timeout = self.away_timeout_ms?;
        if self.status == Status::Away {
            return None;
        }
        if now_ms.saturating_sub(self.last_activity) < timeout {
            return None;
        }
        self.pre_away = Some((self.status, self.text.clone()));
        self.status = Status::Away;
        Some(
            PresenceFrame::Status {
                status: Status::Away,
                text: self.text.clone(),
            }
            .to_bytes(),
        )
    }

    /// Cache an inbound `PRESENCE_STATUS` from `peer`.
    pub fn handle_status(&mut self, peer: NodeId, status: Status, text: String, now_ms: u64) {
        if !self.cache.contains_key(&peer) && self.cache.len() >= CACHE_CAP {
            if let Some(oldest) = self.cache.iter().min_by_key(|(_, p)| p.updated_at).map(|(id, _)| *id) {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(peer, CachedPresence { status, text, updated_at: now_ms });
    }

    /// A cached presence older than [`STALE_AFTER_MS`] reads as `Offline`.
    pub fn presence_of(&self, peer: &NodeId, now_ms: u64) -> (Status, &str) {
        match self.cache.get(peer) {
            Some(cached) if now_ms.saturating_sub(cached.updated_at) <= STALE_AFTER_MS => (cached.status, &cached.text),
            _ => (Status::Offline, ""),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
