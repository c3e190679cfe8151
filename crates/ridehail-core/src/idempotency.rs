// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotency store: key to cached response with TTL.
//!
//! First-writer-wins: once a key holds an unexpired value, later writes are
//! rejected and readers get the original value back, byte for byte. Used to
//! replay payment responses for retried requests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

struct CachedEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process idempotency cache.
#[derive(Default)]
pub struct IdempotencyStore {
    entries: Mutex<HashMap<String, CachedEntry>>,
}

impl IdempotencyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("idempotency lock poisoned");
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` under `key` for `ttl` unless an unexpired value is
    /// already present. Returns whether this call won the write.
    pub fn set_nx(&self, key: &str, value: Value, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => false,
            _ => {
                entries.insert(
                    key.to_string(),
                    CachedEntry {
                        value,
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of live entries (expired-but-unswept included).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("idempotency lock poisoned").len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_first_writer_wins() {
        let store = IdempotencyStore::new();
        assert!(store.set_nx("payment:k1", json!({"attempt": 1}), HOUR));
        assert!(!store.set_nx("payment:k1", json!({"attempt": 2}), HOUR));
        assert_eq!(store.get("payment:k1").unwrap()["attempt"], 1);
    }

    #[test]
    fn test_missing_key_is_none() {
        let store = IdempotencyStore::new();
        assert!(store.get("payment:absent").is_none());
    }

    #[test]
    fn test_expired_entry_is_invisible_and_rewritable() {
        let store = IdempotencyStore::new();
        store.set_nx("k", json!(1), Duration::from_millis(0));
        assert!(store.get("k").is_none());
        assert!(store.set_nx("k", json!(2), HOUR));
        assert_eq!(store.get("k").unwrap(), json!(2));
    }

    #[test]
    fn test_sweep_drops_expired_only() {
        let store = IdempotencyStore::new();
        store.set_nx("dead", json!(1), Duration::from_millis(0));
        store.set_nx("live", json!(2), HOUR);
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("live").is_some());
    }
}
