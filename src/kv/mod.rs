//! KV cache interface
//!
//! Key/value cache with scripted atomic operations. The scripted recipes the
//! service relies on (render-lock acquire, quota decrement) are exposed as
//! typed trait methods so every implementation provides them atomically.
//!
//! The cache is an optional collaborator: callers hold `Option<Arc<dyn
//! KvCache>>` and must stay correct when it is absent or unreachable.

mod keys;
mod memory;

pub use keys::*;
pub use memory::MemoryKv;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    /// Transport-level failure; callers degrade to durable fallback paths.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, KvError>;

/// Outcome of the render-lock acquire script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock taken; the caller's job id is now the holder.
    Acquired,
    /// Another job holds the per-document lock.
    Busy { holder: String },
    /// The global active-job cap is reached.
    Throttled { active: u32 },
}

/// Outcome of the quota decrement script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecrement {
    /// No counter hash in the cache; the caller seeds from the durable store.
    Miss,
    /// Remaining was already zero or negative.
    Denied,
    /// Decremented; the new remaining value.
    Remaining(i64),
}

/// Key/value cache with the scripted atomics the service depends on.
#[async_trait]
pub trait KvCache: Send + Sync {
    /// Per-document render lock acquire.
    ///
    /// Atomically: if the lock key exists return `Busy` with the holder; if
    /// `max_active > 0` and the active counter is at the cap return
    /// `Throttled`; otherwise set the lock key to `job_id` with `ttl`,
    /// increment the active counter, and record a per-job membership key
    /// with the same `ttl`.
    async fn acquire_render_lock(
        &self,
        document_id: &str,
        job_id: &str,
        ttl: Duration,
        max_active: u32,
    ) -> Result<LockOutcome>;

    /// Owner-checked lock release: only deletes when `job_id` is the current
    /// holder. The active counter is decremented only while the membership
    /// key is present, so retried releases cannot double-decrement.
    async fn release_render_lock(&self, document_id: &str, job_id: &str) -> Result<()>;

    /// Current value of the global active-job counter.
    async fn active_render_jobs(&self) -> Result<u32>;

    /// `SET key value NX EX ttl`; returns whether the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Quota decrement script over the counter hash at `key`:
    /// missing hash → `Miss`; `remaining <= 0` → `Denied`; otherwise
    /// decrement and return the new remaining.
    async fn quota_decrement(&self, key: &str) -> Result<QuotaDecrement>;

    /// Seed the counter hash at `key` with a computed remaining value.
    async fn quota_seed(&self, key: &str, remaining: i64) -> Result<()>;
}
