//! Idempotency cache for retried mutating requests
//!
//! ## Protocol
//!
//! 1. A caller attaches an idempotency key to a mutating request
//! 2. The service claims `(owner_id, key)` before running the operation:
//!    - Unknown key: mark in progress and proceed
//!    - Completed for the same operation: replay the cached response
//!    - Still in progress: fail with a retryable conflict
//!    - Used for a different operation: fail validation
//! 3. On success the response is cached; on failure the claim is released,
//!    so errors are never replayed. A [`ClaimGuard`] also releases the claim
//!    when the request is dropped before it finished
//!
//! Entries live in a bounded LRU; an evicted key behaves like an unknown one.

use super::error::TreeError;
use crate::models::ValidationError;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
enum Entry {
    InProgress {
        operation: String,
    },
    Completed {
        operation: String,
        response: serde_json::Value,
    },
}

impl Entry {
    fn operation(&self) -> &str {
        match self {
            Entry::InProgress { operation } | Entry::Completed { operation, .. } => operation,
        }
    }
}

/// Result of claiming a key
#[derive(Debug, Clone, PartialEq)]
pub enum Claim<T> {
    /// First use of the key: run the operation
    Proceed,
    /// The operation already succeeded with this response
    Replay(T),
}

/// Bounded map of `(owner_id, key)` to operation outcome
pub struct IdempotencyCache {
    entries: Mutex<LruCache<(String, String), Entry>>,
}

fn key_reused(key: &str, operation: &str) -> TreeError {
    TreeError::Validation(ValidationError::IdempotencyKeyReused {
        key: key.to_string(),
        operation: operation.to_string(),
    })
}

impl IdempotencyCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn claim<T: DeserializeOwned>(
        &self,
        owner_id: &str,
        key: &str,
        operation: &str,
    ) -> Result<Claim<T>, TreeError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let cache_key = (owner_id.to_string(), key.to_string());

        match entries.get(&cache_key) {
            None => {
                entries.put(
                    cache_key,
                    Entry::InProgress {
                        operation: operation.to_string(),
                    },
                );
                Ok(Claim::Proceed)
            }
            Some(entry) if entry.operation() != operation => {
                Err(key_reused(key, entry.operation()))
            }
            Some(Entry::InProgress { .. }) => Err(TreeError::transaction_conflict(format!(
                "request with idempotency key '{}' is still in progress",
                key
            ))),
            Some(Entry::Completed { response, .. }) => {
                debug!(owner_id, key, operation, "Replaying idempotent response");
                serde_json::from_value(response.clone())
                    .map(Claim::Replay)
                    .map_err(|_| key_reused(key, operation))
            }
        }
    }

    /// Record a successful response for replay
    pub fn complete<T: Serialize>(&self, owner_id: &str, key: &str, operation: &str, response: &T) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let cache_key = (owner_id.to_string(), key.to_string());
        match serde_json::to_value(response) {
            Ok(response) => {
                entries.put(
                    cache_key,
                    Entry::Completed {
                        operation: operation.to_string(),
                        response,
                    },
                );
            }
            Err(_) => {
                entries.pop(&cache_key);
            }
        }
    }

    /// Drop an in-progress claim after a failed attempt
    pub fn release(&self, owner_id: &str, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let cache_key = (owner_id.to_string(), key.to_string());
        if matches!(entries.peek(&cache_key), Some(Entry::InProgress { .. })) {
            entries.pop(&cache_key);
        }
    }

    /// Guard for a claim that returned `Claim::Proceed`
    pub fn guard<'a>(&'a self, owner_id: &str, key: &str, operation: &str) -> ClaimGuard<'a> {
        ClaimGuard {
            cache: self,
            owner_id: owner_id.to_string(),
            key: key.to_string(),
            operation: operation.to_string(),
            completed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases an in-progress claim on drop unless it was completed
pub struct ClaimGuard<'a> {
    cache: &'a IdempotencyCache,
    owner_id: String,
    key: String,
    operation: String,
    completed: bool,
}

impl ClaimGuard<'_> {
    /// Record the successful response and keep the entry for replay
    pub fn complete<T: Serialize>(mut self, response: &T) {
        self.cache
            .complete(&self.owner_id, &self.key, &self.operation, response);
        self.completed = true;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            debug!(
                owner_id = %self.owner_id,
                key = %self.key,
                "Releasing unfinished idempotency claim"
            );
            self.cache.release(&self.owner_id, &self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> IdempotencyCache {
        IdempotencyCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_completed_key_replays() {
        let cache = cache(8);
        assert_eq!(
            cache.claim::<String>("alice", "k1", "trash").unwrap(),
            Claim::Proceed
        );
        cache.complete("alice", "k1", "trash", &"done".to_string());

        assert_eq!(
            cache.claim::<String>("alice", "k1", "trash").unwrap(),
            Claim::Replay("done".to_string())
        );
    }

    #[test]
    fn test_keys_are_owner_scoped() {
        let cache = cache(8);
        cache.claim::<()>("alice", "k1", "trash").unwrap();
        cache.complete("alice", "k1", "trash", &());
        assert_eq!(cache.claim::<()>("bob", "k1", "trash").unwrap(), Claim::Proceed);
    }

    #[test]
    fn test_in_progress_key_conflicts() {
        let cache = cache(8);
        cache.claim::<()>("alice", "k1", "purge").unwrap();
        let err = cache.claim::<()>("alice", "k1", "purge").unwrap_err();
        assert!(matches!(err, TreeError::TransactionConflict(_)));
    }

    #[test]
    fn test_key_reuse_for_other_operation_fails_validation() {
        let cache = cache(8);
        cache.claim::<()>("alice", "k1", "trash").unwrap();
        cache.complete("alice", "k1", "trash", &());
        let err = cache.claim::<()>("alice", "k1", "restore").unwrap_err();
        assert!(matches!(
            err,
            TreeError::Validation(ValidationError::IdempotencyKeyReused { .. })
        ));
    }

    #[test]
    fn test_release_allows_retry() {
        let cache = cache(8);
        cache.claim::<()>("alice", "k1", "trash").unwrap();
        cache.release("alice", "k1");
        assert!(cache.is_empty());
        assert_eq!(cache.claim::<()>("alice", "k1", "trash").unwrap(), Claim::Proceed);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = cache(2);
        for key in ["a", "b", "c"] {
            cache.claim::<()>("alice", key, "trash").unwrap();
            cache.complete("alice", key, "trash", &());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.claim::<()>("alice", "a", "trash").unwrap(), Claim::Proceed);
    }

    #[test]
    fn test_dropped_guard_releases_claim() {
        let cache = cache(8);
        cache.claim::<()>("alice", "k1", "trash").unwrap();
        drop(cache.guard("alice", "k1", "trash"));

        assert!(cache.is_empty());
        assert_eq!(cache.claim::<()>("alice", "k1", "trash").unwrap(), Claim::Proceed);
    }

    #[test]
    fn test_completed_guard_keeps_response() {
        let cache = cache(8);
        cache.claim::<u32>("alice", "k1", "trash").unwrap();
        cache.guard("alice", "k1", "trash").complete(&7u32);

        assert_eq!(cache.claim::<u32>("alice", "k1", "trash").unwrap(), Claim::Replay(7));
    }
}
