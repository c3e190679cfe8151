// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named, TTL-bounded mutual exclusion with ownership fencing.
//!
//! A lock is a name bound to a freshly minted token until released or
//! expired. Release only succeeds when the stored token matches the
//! caller's (compare-and-swap), so a worker that lost its lock to TTL
//! expiry cannot release a successor's binding. Expired bindings are
//! reclaimed lazily on acquire and by the runtime's sweep task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Fencing token proving lock ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Opaque token value, for diagnostics.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct LockEntry {
    token: String,
    expires_at: Instant,
}

/// In-process lock table.
#[derive(Default)]
pub struct LockService {
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl LockService {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically bind `name` to a fresh token for `ttl`.
    ///
    /// Returns `None` when the name is already bound and unexpired.
    pub fn acquire(&self, name: &str, ttl: Duration) -> Option<LockToken> {
        let now = Instant::now();
        let mut locks = self.locks.lock().expect("lock table poisoned");
        match locks.get(name) {
            Some(entry) if entry.expires_at > now => None,
            _ => {
                let token = LockToken::mint();
                locks.insert(
                    name.to_string(),
                    LockEntry {
                        token: token.0.clone(),
                        expires_at: now + ttl,
                    },
                );
                Some(token)
            }
        }
    }

    /// Delete the binding iff the stored token matches. Returns whether a
    /// binding was removed.
    pub fn release(&self, name: &str, token: &LockToken) -> bool {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        match locks.get(name) {
            Some(entry) if entry.token == token.0 => {
                locks.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Whether `name` is currently bound and unexpired.
    pub fn is_held(&self, name: &str) -> bool {
        let now = Instant::now();
        let locks = self.locks.lock().expect("lock table poisoned");
        locks.get(name).is_some_and(|entry| entry.expires_at > now)
    }

    /// Remove expired bindings. Returns how many were reclaimed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let before = locks.len();
        locks.retain(|_, entry| entry.expires_at > now);
        before - locks.len()
    }

    /// Acquire `name`, run `body`, release on the success and failure path
    /// alike. Failing to acquire is a `Conflict`.
    pub async fn with_lock<T, F, Fut>(&self, name: &str, ttl: Duration, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.acquire(name, ttl).ok_or_else(|| {
            EngineError::conflict(name.to_string(), "lock is held by another worker")
        })?;
        let result = body().await;
        self.release(name, &token);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_acquire_is_exclusive() {
        let locks = LockService::new();
        let token = locks.acquire("lock:ride:r-1:matching", TTL);
        assert!(token.is_some());
        assert!(locks.acquire("lock:ride:r-1:matching", TTL).is_none());
        // A different name is unaffected.
        assert!(locks.acquire("lock:ride:r-2:matching", TTL).is_some());
    }

    #[test]
    fn test_release_requires_matching_token() {
        let locks = LockService::new();
        let token = locks.acquire("l", TTL).unwrap();
        let stranger = LockToken::mint();
        assert!(!locks.release("l", &stranger));
        assert!(locks.is_held("l"));
        assert!(locks.release("l", &token));
        assert!(!locks.is_held("l"));
        // Releasing an unbound name fails.
        assert!(!locks.release("l", &token));
    }

    #[test]
    fn test_expired_lock_can_be_reacquired_but_not_released() {
        let locks = LockService::new();
        let stale = locks.acquire("l", Duration::from_millis(0)).unwrap();
        // TTL elapsed; a new worker takes the lock.
        let fresh = locks.acquire("l", TTL).unwrap();
        // The old holder's token no longer releases.
        assert!(!locks.release("l", &stale));
        assert!(locks.release("l", &fresh));
    }

    #[test]
    fn test_sweep_reclaims_only_expired() {
        let locks = LockService::new();
        let _ = locks.acquire("expired", Duration::from_millis(0));
        let _ = locks.acquire("held", TTL);
        assert_eq!(locks.sweep_expired(), 1);
        assert!(locks.is_held("held"));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_success_and_failure() {
        let locks = LockService::new();

        let ok: Result<u32> = locks.with_lock("l", TTL, || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert!(!locks.is_held("l"));

        let err: Result<u32> = locks
            .with_lock("l", TTL, || async {
                Err(EngineError::validation("body failed"))
            })
            .await;
        assert!(err.is_err());
        assert!(!locks.is_held("l"));
    }

    #[tokio::test]
    async fn test_with_lock_conflicts_while_held() {
        let locks = LockService::new();
        let _token = locks.acquire("l", TTL).unwrap();
        let result: Result<()> = locks.with_lock("l", TTL, || async { Ok(()) }).await;
        match result {
            Err(e) => assert_eq!(e.error_code(), "CONFLICT"),
            Ok(()) => panic!("expected conflict"),
        }
    }

    #[tokio::test]
    async fn test_with_lock_never_overlaps() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let locks = Arc::new(LockService::new());
        let inside = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let _ = locks
                        .with_lock("hot", TTL, || async {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
