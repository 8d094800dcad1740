//! Per-document render lock
//!
//! Wraps the KV cache's scripted lock with the cache-optional policy: when
//! no cache is configured, admission proceeds without exclusivity and the
//! caller accepts the weaker guarantee.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RenderConfig;
use crate::kv::{KvCache, LockOutcome};

/// Outcome of a lock attempt at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    /// Lock held by this job.
    Acquired,
    /// Another job already renders this document.
    AlreadyHeld { holder: String },
    /// Global cap reached.
    Throttled { active: u32 },
    /// No cache configured; proceeding lock-less.
    NoCache,
}

/// Attempt the per-document lock. Cache transport failures degrade to
/// lock-less admission rather than failing the request.
pub async fn acquire_render_lock(
    kv: &Option<Arc<dyn KvCache>>,
    config: &RenderConfig,
    document_id: &str,
    job_id: &str,
) -> LockDecision {
    let Some(kv) = kv else {
        return LockDecision::NoCache;
    };

    let ttl = Duration::from_secs(config.render_lock_ttl_seconds);
    match kv
        .acquire_render_lock(document_id, job_id, ttl, config.max_active_jobs)
        .await
    {
        Ok(LockOutcome::Acquired) => LockDecision::Acquired,
        Ok(LockOutcome::Busy { holder }) => LockDecision::AlreadyHeld { holder },
        Ok(LockOutcome::Throttled { active }) => LockDecision::Throttled { active },
        Err(e) => {
            tracing::warn!(document_id, error = %e, "render lock unavailable, admitting without lock");
            LockDecision::NoCache
        }
    }
}

/// Release the lock. Failures are logged and swallowed; the TTL and the
/// reaper guarantee eventual progress.
pub async fn release_render_lock(
    kv: &Option<Arc<dyn KvCache>>,
    document_id: &str,
    job_id: &str,
) {
    if let Some(kv) = kv {
        if let Err(e) = kv.release_render_lock(document_id, job_id).await {
            tracing::warn!(document_id, job_id, error = %e, "render lock release failed");
        }
    }
}
