//! Presence store: shared key/value and set storage with expiry.
//!
//! SYSTEM CONTEXT
//! ==============
//! All presence state (session → user, board → usernames, user → boards)
//! lives behind this trait so no process owns unrecoverable in-memory
//! authority. `RedisStore` is the shared deployment backend; `MemoryStore`
//! serves single-process runs and tests.
//!
//! DESIGN
//! ======
//! Compound set updates go through `apply`, which executes its operations
//! in order and atomically with respect to other callers. Every mutation is
//! a set add/remove or an overwrite, so concurrent writers never need a
//! distributed lock.

pub mod memory;
pub mod redis;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
    #[error("presence store timed out")]
    Timeout,
    #[error("presence store holds unexpected data at {0}")]
    Corrupt(String),
}

/// One step of an atomic set batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOp {
    Add { key: String, member: String },
    /// Removing the last member deletes the key.
    Remove { key: String, member: String },
    /// Refresh expiry; no-op when the key does not exist.
    Expire { key: String, ttl: Duration },
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Store a string value with expiry, overwriting any previous value.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Idempotent; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Refresh expiry; no-op when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set members; empty on miss.
    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Apply set operations in order as one atomic unit.
    async fn apply(&self, ops: &[SetOp]) -> Result<(), StoreError>;
}

/// Saturating millisecond conversion for expiry commands.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}
