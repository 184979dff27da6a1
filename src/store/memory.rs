//! In-process presence store.
//!
//! DESIGN
//! ======
//! One `RwLock<HashMap>` holds every key. Expired entries are invisible to
//! readers immediately and physically removed by writers, by `purge_expired`,
//! or by the sweep task. A whole `apply` batch runs under one write guard,
//! which gives the batch the same all-or-nothing visibility as `MULTI/EXEC`.
//!
//! Time comes from `tokio::time::Instant` so tests can pause the clock.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{PresenceStore, SetOp, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Spawn the periodic expiry sweep.
pub fn spawn_sweeper(store: Arc<MemoryStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                let live = store.len().await;
                tracing::debug!(removed, live, "memory store: purged expired keys");
            }
        }
    })
}

fn live_entry<'a>(entries: &'a HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a Entry> {
    entries.get(key).filter(|e| e.is_live(now))
}

fn apply_one(entries: &mut HashMap<String, Entry>, op: &SetOp, now: Instant) -> Result<(), StoreError> {
    match op {
        SetOp::Add { key, member } => {
            let entry = match entries.entry(key.clone()) {
                MapEntry::Occupied(occupied) => {
                    let slot = occupied.into_mut();
                    if !slot.is_live(now) {
                        *slot = Entry { value: Value::Set(HashSet::new()), expires_at: None };
                    }
                    slot
                }
                MapEntry::Vacant(vacant) => vacant.insert(Entry { value: Value::Set(HashSet::new()), expires_at: None }),
            };
            let Value::Set(set) = &mut entry.value else {
                return Err(StoreError::Corrupt(key.clone()));
            };
            set.insert(member.clone());
        }
        SetOp::Remove { key, member } => {
            let Some(entry) = entries.get_mut(key).filter(|e| e.is_live(now)) else {
                return Ok(());
            };
            let Value::Set(set) = &mut entry.value else {
                return Err(StoreError::Corrupt(key.clone()));
            };
            set.remove(member);
            if set.is_empty() {
                entries.remove(key);
            }
        }
        SetOp::Expire { key, ttl } => {
            if let Some(entry) = entries.get_mut(key).filter(|e| e.is_live(now)) {
                entry.expires_at = Some(now + *ttl);
            }
        }
    }
    Ok(())
}

fn validate(entries: &HashMap<String, Entry>, ops: &[SetOp], now: Instant) -> Result<(), StoreError> {
    for op in ops {
        let (SetOp::Add { key, .. } | SetOp::Remove { key, .. }) = op else {
            continue;
        };
        if let Some(Entry { value: Value::Text(_), .. }) = live_entry(entries, key, now) {
            return Err(StoreError::Corrupt(key.clone()));
        }
    }
    Ok(())
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(key.to_owned(), Entry { value: Value::Text(value.to_owned()), expires_at: Some(now + ttl) });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match live_entry(&entries, key, now) {
            None => Ok(None),
            Some(Entry { value: Value::Text(v), .. }) => Ok(Some(v.clone())),
            Some(_) => Err(StoreError::Corrupt(key.to_owned())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        apply_one(&mut entries, &SetOp::Expire { key: key.to_owned(), ttl }, now)
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match live_entry(&entries, key, now) {
            None => Ok(HashSet::new()),
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.clone()),
            Some(_) => Err(StoreError::Corrupt(key.to_owned())),
        }
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match live_entry(&entries, key, now) {
            None => Ok(false),
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.contains(member)),
            Some(_) => Err(StoreError::Corrupt(key.to_owned())),
        }
    }

    async fn apply(&self, ops: &[SetOp]) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // Type errors are detected up front so a failing batch leaves no trace.
        validate(&entries, ops, now)?;
        for op in ops {
            apply_one(&mut entries, op, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
