//! In-memory KV cache
//!
//! Single-process implementation of [`KvCache`]. One mutex guards all state,
//! which makes every scripted operation atomic by construction. Entries
//! expire lazily on access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    render_active_member_key, render_lock_key, KvCache, LockOutcome, QuotaDecrement, Result,
};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Counter hashes keyed by quota key; single field "remaining".
    counters: HashMap<String, i64>,
    active: u32,
}

impl State {
    fn get_live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.live(now) {
                self.entries.remove(key);
                return None;
            }
        }
        self.entries.get(key)
    }
}

/// Map-backed [`KvCache`] with TTL expiry.
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<Mutex<State>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the counter hash for a key, simulating cache loss.
    pub fn evict_counter(&self, key: &str) {
        self.state.lock().counters.remove(key);
    }

    /// Current remaining value of a counter hash, if seeded.
    pub fn counter(&self, key: &str) -> Option<i64> {
        self.state.lock().counters.get(key).copied()
    }

    /// Whether a live entry exists for the key.
    pub fn contains(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.get_live(key, Instant::now()).is_some()
    }
}

#[async_trait]
impl KvCache for MemoryKv {
    async fn acquire_render_lock(
        &self,
        document_id: &str,
        job_id: &str,
        ttl: Duration,
        max_active: u32,
    ) -> Result<LockOutcome> {
        let now = Instant::now();
        let lock_key = render_lock_key(document_id);
        let member_key = render_active_member_key(job_id);
        let mut state = self.state.lock();

        if let Some(entry) = state.get_live(&lock_key, now) {
            return Ok(LockOutcome::Busy {
                holder: entry.value.clone(),
            });
        }
        if max_active > 0 && state.active >= max_active {
            return Ok(LockOutcome::Throttled {
                active: state.active,
            });
        }

        let expires_at = Some(now + ttl);
        state.entries.insert(
            lock_key,
            Entry {
                value: job_id.to_string(),
                expires_at,
            },
        );
        state.entries.insert(
            member_key,
            Entry {
                value: "1".to_string(),
                expires_at,
            },
        );
        state.active += 1;
        Ok(LockOutcome::Acquired)
    }

    async fn release_render_lock(&self, document_id: &str, job_id: &str) -> Result<()> {
        let now = Instant::now();
        let lock_key = render_lock_key(document_id);
        let member_key = render_active_member_key(job_id);
        let mut state = self.state.lock();

        let is_holder = state
            .get_live(&lock_key, now)
            .map(|e| e.value == job_id)
            .unwrap_or(false);
        if is_holder {
            state.entries.remove(&lock_key);
        }

        // The membership key guards the decrement so a retried release (or a
        // release racing lock expiry) cannot drive the counter below the
        // number of live jobs.
        if state.get_live(&member_key, now).is_some() {
            state.entries.remove(&member_key);
            state.active = state.active.saturating_sub(1);
        }
        Ok(())
    }

    async fn active_render_jobs(&self) -> Result<u32> {
        Ok(self.state.lock().active)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.get_live(key, now).is_some() {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.lock().entries.remove(key);
        Ok(())
    }

    async fn quota_decrement(&self, key: &str) -> Result<QuotaDecrement> {
        let mut state = self.state.lock();
        match state.counters.get_mut(key) {
            None => Ok(QuotaDecrement::Miss),
            Some(remaining) if *remaining <= 0 => Ok(QuotaDecrement::Denied),
            Some(remaining) => {
                *remaining -= 1;
                Ok(QuotaDecrement::Remaining(*remaining))
            }
        }
    }

    async fn quota_seed(&self, key: &str, remaining: i64) -> Result<()> {
        self.state.lock().counters.insert(key.to_string(), remaining);
        Ok(())
    }
}
