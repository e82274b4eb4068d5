//! # Expiring Registry Module
//!
//! A time-to-live keyed map with independently adjustable per-entry expiry.
//! Two things live in it: cached route-resolution results and the page state
//! bound to live connections.
//!
//! ## Expiry model
//!
//! Each entry carries an [`Expiry`]: a fixed deadline or `Never`. The deadline
//! can be extended, shortened, or pinned after insertion via
//! [`ExpiringRegistry::set_expiry`] — a disconnecting client demotes its entry
//! from `Never` to a grace window, a reconnecting one promotes it back.
//!
//! There are no background timers to cancel. Expiry is evaluated lazily on
//! access (an expired entry reads as absent and is removed), and
//! [`ExpiringRegistry::sweep`] removes and returns everything expired so the
//! caller can release pooled state. Removing an entry early is just a map
//! removal.
//!
//! ## Thread Safety
//!
//! `RwLock<HashMap>` interior locking: reads take the read lock, expiry
//! reclamation and writes take the write lock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// When a registry entry stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The entry never expires (live connection open).
    Never,
    /// The entry expires at the given instant.
    At(Instant),
}

impl Expiry {
    /// An expiry `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        Expiry::At(Instant::now() + ttl)
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(deadline) => now >= *deadline,
        }
    }
}

struct Entry<V> {
    value: V,
    expiry: Expiry,
}

/// TTL-keyed map with per-entry expiry.
pub struct ExpiringRegistry<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone> ExpiringRegistry<V> {
    pub fn new(default_ttl: Duration) -> Self {
        ExpiringRegistry {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Insert with the registry's default TTL, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with(key, value, Expiry::after(self.default_ttl));
    }

    /// Insert with an explicit expiry, replacing any previous entry.
    pub fn insert_with(&self, key: impl Into<String>, value: V, expiry: Expiry) {
        let key = key.into();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.insert(key, Entry { value, expiry });
    }

    /// Look up an entry. An expired entry reads as absent and is reclaimed.
    ///
    /// A hit does NOT renew the expiry: entries live out a fixed window.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().expect("registry lock poisoned");
            match entries.get(key) {
                Some(entry) if !entry.expiry.is_expired(now) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but expired: reclaim it under the write lock. Re-check
        // the expiry because a writer may have refreshed it in between.
        let mut entries = self.entries.write().expect("registry lock poisoned");
        match entries.get(key).map(|entry| entry.expiry.is_expired(now)) {
            Some(true) => {
                entries.remove(key);
                debug!(key = key, "Expired registry entry reclaimed on access");
                None
            }
            Some(false) => entries.get(key).map(|entry| entry.value.clone()),
            None => None,
        }
    }

    /// Adjust the expiry of an existing, unexpired entry.
    ///
    /// Returns `false` if the key is absent or already expired.
    pub fn set_expiry(&self, key: &str, expiry: Expiry) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        match entries.get_mut(key) {
            Some(entry) if !entry.expiry.is_expired(now) => {
                entry.expiry = expiry;
                true
            }
            _ => false,
        }
    }

    /// Remove an entry early, returning its value if it was still live.
    pub fn remove(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries
            .remove(key)
            .filter(|entry| !entry.expiry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Remove every expired entry and hand the values back so the caller can
    /// release pooled state they reference.
    pub fn sweep(&self) -> Vec<(String, V)> {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expiry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        let mut reclaimed = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = entries.remove(&key) {
                reclaimed.push((key, entry.value));
            }
        }
        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "Swept expired registry entries");
        }
        reclaimed
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .values()
            .filter(|entry| !entry.expiry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
