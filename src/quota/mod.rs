//! Quota consumption engine
//!
//! Two-tier per-(document, user) print counter: an atomic decrement against
//! the KV cache on the fast path, idempotent per request id, with lost-cache
//! recovery from the durable store and a correctness-preserving optimistic
//! fallback when the cache is unavailable. The durable `prints_used` never
//! exceeds `print_quota`, and a given request id consumes at most once
//! within its idempotency window.

mod error;

pub use error::{QuotaError, Result};

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::access::AccessRepository;
use crate::kv::{quota_key, request_key, KvCache, QuotaDecrement};

/// Successful consumption result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// One print consumed. `remaining` is known on the cache path.
    Consumed { remaining: Option<i64> },
    /// The request id was already honored inside the idempotency window;
    /// no side effects.
    Replayed,
}

/// The quota consumption engine.
#[derive(Clone)]
pub struct QuotaEngine {
    kv: Option<Arc<dyn KvCache>>,
    pool: SqlitePool,
    request_ttl: Duration,
}

impl QuotaEngine {
    pub fn new(kv: Option<Arc<dyn KvCache>>, pool: SqlitePool, request_ttl: Duration) -> Self {
        Self {
            kv,
            pool,
            request_ttl,
        }
    }

    fn access(&self) -> AccessRepository<'_> {
        AccessRepository::new(&self.pool)
    }

    /// Consume one print for (document, user) under `request_id`.
    pub async fn consume(
        &self,
        document_id: &str,
        user_id: &str,
        request_id: &str,
    ) -> Result<Consumption> {
        if request_id.trim().is_empty() {
            return Err(QuotaError::BadRequest);
        }

        let Some(kv) = self.kv.clone() else {
            return self.durable_consume(document_id, user_id).await;
        };

        let req_key = request_key(document_id, user_id, request_id);
        match kv.set_nx_ex(&req_key, "1", self.request_ttl).await {
            // Replay inside the window: success without side effects.
            Ok(false) => return Ok(Consumption::Replayed),
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(document_id, user_id, error = %e, "idempotency gate unavailable");
                return self.durable_consume(document_id, user_id).await;
            }
        }

        let counter_key = quota_key(document_id, user_id);
        match kv.quota_decrement(&counter_key).await {
            Ok(QuotaDecrement::Remaining(remaining)) => {
                self.write_behind(document_id, user_id).await;
                Ok(Consumption::Consumed {
                    remaining: Some(remaining),
                })
            }
            Ok(QuotaDecrement::Denied) => {
                // Free the request id so the same request may succeed after
                // the quota is raised.
                let _ = kv.delete(&req_key).await;
                Err(QuotaError::Limit)
            }
            Ok(QuotaDecrement::Miss) => {
                self.recover_and_decrement(&kv, document_id, user_id, &req_key, &counter_key)
                    .await
            }
            Err(e) => {
                tracing::warn!(document_id, user_id, error = %e, "quota cache unavailable");
                self.durable_consume(document_id, user_id).await
            }
        }
    }

    /// Cache-miss recovery: seed the counter from the durable record, then
    /// decrement once. Transport errors degrade to the durable fallback.
    async fn recover_and_decrement(
        &self,
        kv: &Arc<dyn KvCache>,
        document_id: &str,
        user_id: &str,
        req_key: &str,
        counter_key: &str,
    ) -> Result<Consumption> {
        let access = self
            .access()
            .get(document_id, user_id)
            .await?
            .ok_or(QuotaError::NoAccess)?;
        if access.revoked {
            return Err(QuotaError::Revoked);
        }

        let remaining = access.remaining();
        self.access()
            .backfill_counters(
                document_id,
                user_id,
                access.print_quota.unwrap_or(0),
                access.prints_used.unwrap_or(0),
            )
            .await?;

        let seeded = kv.quota_seed(counter_key, remaining).await;
        let decremented = match seeded {
            Ok(()) => kv.quota_decrement(counter_key).await,
            Err(e) => Err(e),
        };
        match decremented {
            Ok(QuotaDecrement::Remaining(remaining)) => {
                self.write_behind(document_id, user_id).await;
                Ok(Consumption::Consumed {
                    remaining: Some(remaining),
                })
            }
            Ok(QuotaDecrement::Denied) => {
                let _ = kv.delete(req_key).await;
                Err(QuotaError::Limit)
            }
            Ok(QuotaDecrement::Miss) | Err(_) => {
                tracing::warn!(document_id, user_id, "quota recovery degraded to durable path");
                self.durable_consume(document_id, user_id).await
            }
        }
    }

    /// Write-behind after a cache-accepted consumption: bump the canonical
    /// counter on the durable record, filtered by the revocation flag.
    async fn write_behind(&self, document_id: &str, user_id: &str) {
        match self.access().record_consumption(document_id, user_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(document_id, user_id, "write-behind matched no unrevoked grant");
            }
            Err(e) => {
                tracing::error!(document_id, user_id, error = %e, "write-behind failed");
            }
        }
    }

    /// Durable optimistic consume: a single conditional update that keeps
    /// `prints_used < print_quota` invariant under concurrency, with a
    /// differentiating read only on rejection.
    async fn durable_consume(&self, document_id: &str, user_id: &str) -> Result<Consumption> {
        if self.access().optimistic_consume(document_id, user_id).await? {
            return Ok(Consumption::Consumed { remaining: None });
        }

        match self.access().get(document_id, user_id).await? {
            None => Err(QuotaError::NoAccess),
            Some(access) if access.revoked => Err(QuotaError::Revoked),
            Some(_) => Err(QuotaError::Limit),
        }
    }
}
