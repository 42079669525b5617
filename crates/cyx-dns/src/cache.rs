//! LRU name cache with strict timestamp monotonicity, modeled on the
//! sequence-number rejection rule in a BEP44-style mutable record store.

use std::collections::HashMap;

use crate::record::DnsRecord;

pub const CACHE_CAP: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("stale record: got timestamp {got}, cache holds {have}")]
    StaleTimestamp { got: u64, have: u64 },
}

struct Entry {
    record: DnsRecord,
    last_touched: u64,
}

/// Name -> record cache. Insertion order doubles as the LRU clock via
/// `last_touched`; eviction picks the least-recently-touched entry.
#[derive(Default)]
pub struct NameCache {
    entries: HashMap<String, Entry>,
}

impl NameCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, name: &str, now_tick: u64) -> Option<&DnsRecord> {
        let entry = self.entries.get_mut(name)?;
        entry.last_touched = now_tick;
        Some(&entry.record)
    }

    pub fn peek(&self, name: &str) -> Option<&DnsRecord> {
        self.entries.get(name).map(|e| &e.record)
    }

    /// Insert or replace a record. Rejects a record whose `timestamp` does
    /// not strictly exceed the cached one's — a replay or a reordered
    /// gossip message can never roll a name backwards.
    pub fn put(&mut self, record: DnsRecord, now_tick: u64) -> Result<(), CacheError> {
        if let Some(existing) = self.entries.get(&record.name) {
            if record.timestamp <= existing.record.timestamp {
                return Err(CacheError::StaleTimestamp {
                    got: record.timestamp,
                    have: existing.record.timestamp,
                });
            }
        } else if self.entries.len() >= CACHE_CAP {
            self.evict_lru();
        }
        self.entries.insert(
            record.name.clone(),
            Entry {
                record,
                last_touched: now_tick,
            },
        );
        Ok(())
    }

    fn evict_lru(&mut self) {
        if let Some(name) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_touched)
            .map(|(name, _)| name.clone())
        {
            self.entries.remove(&name);
        }
    }

    pub fn expire(&mut self, now_s: u64) {
        self.entries.retain(|_, e| !e.record.is_expired(now_s));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}
