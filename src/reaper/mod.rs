//! Job reaper
//!
//! Periodic sweep over the durable job store: expires RUNNING jobs whose
//! output or updates went stale, expires DONE jobs past their output TTL,
//! and archives long-dead failures. Each record update is independent and
//! idempotent, so overlapping sweeps are harmless. Output blobs are only
//! deleted inside the derived-output key namespaces.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use crate::blob::{is_deletable_key, BlobStore};
use crate::config::ReaperConfig;
use crate::db::Result;
use crate::job::{events, JobRepository, PrintJob};

/// Counts of jobs touched by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub running_output_expired: usize,
    pub running_stale: usize,
    pub done_expired: usize,
    pub failed_archived: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.running_output_expired + self.running_stale + self.done_expired + self.failed_archived
    }
}

/// The reaper and its collaborators.
pub struct Reaper {
    pool: SqlitePool,
    blob: Arc<dyn BlobStore>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(pool: SqlitePool, blob: Arc<dyn BlobStore>, config: ReaperConfig) -> Self {
        Self { pool, blob, config }
    }

    /// Run one sweep: four independent queries, in order.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let repo = JobRepository::new(&self.pool);
        let now = Utc::now();
        let mut stats = SweepStats::default();

        // 1. RUNNING with a materialized output past its expiry.
        for job in repo.running_with_expired_output(now).await? {
            self.delete_output(&job).await;
            repo.expire(&job.id, true).await?;
            repo.append_audit(
                &job.id,
                events::RUNNING_JOB_EXPIRED_AND_OUTPUT_DELETED,
                output_details(&job),
            )
            .await?;
            stats.running_output_expired += 1;
        }

        // 2. RUNNING with no output and no update inside the staleness window.
        let stale_cutoff = now - chrono::Duration::milliseconds(self.config.job_stale_ms);
        for job in repo.running_stale(stale_cutoff).await? {
            repo.expire(&job.id, false).await?;
            repo.append_audit(&job.id, events::JOB_EXPIRED, Some(json!({ "reason": "stale" })))
                .await?;
            stats.running_stale += 1;
        }

        // 3. DONE past the output expiry.
        for job in repo.done_expired(now).await? {
            self.delete_output(&job).await;
            repo.expire(&job.id, true).await?;
            repo.append_audit(&job.id, events::JOB_EXPIRED, output_details(&job))
                .await?;
            stats.done_expired += 1;
        }

        // 4. FAILED older than the archive window.
        let archive_cutoff = now - chrono::Duration::days(self.config.failed_archive_days);
        for job in repo.failed_before(archive_cutoff).await? {
            repo.expire(&job.id, false).await?;
            repo.append_audit(&job.id, events::JOB_ARCHIVED, None).await?;
            stats.failed_archived += 1;
        }

        if stats.total() > 0 {
            tracing::info!(
                running_output_expired = stats.running_output_expired,
                running_stale = stats.running_stale,
                done_expired = stats.done_expired,
                failed_archived = stats.failed_archived,
                "reaper sweep complete"
            );
        }
        Ok(stats)
    }

    /// Delete a job's output blob. Keys outside the deletable namespaces are
    /// never touched; delete failures are swallowed, the next sweep retries.
    async fn delete_output(&self, job: &PrintJob) {
        let Some(output) = &job.output else {
            return;
        };
        if !is_deletable_key(&output.key) {
            tracing::warn!(job_id = %job.id, key = %output.key, "refusing to delete non-output key");
            return;
        }
        if let Err(e) = self.blob.delete(&output.key).await {
            tracing::warn!(job_id = %job.id, key = %output.key, error = %e, "output delete failed");
        }
    }

    /// Spawn the periodic sweep task.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.cleanup_interval_ms.max(1000));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    tracing::error!(error = %e, "reaper sweep failed");
                }
            }
        })
    }
}

fn output_details(job: &PrintJob) -> Option<serde_json::Value> {
    job.output
        .as_ref()
        .map(|output| json!({ "key": output.key }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::db::create_test_pool;
    use crate::job::{JobFailure, JobOutput, JobStatus, PrintJob};
    use crate::metadata::VectorMetadata;
    use serde_json::json;

    fn sample_metadata() -> VectorMetadata {
        serde_json::from_value(json!({
            "sourcePdfKey": "documents/original/x.pdf",
            "ticketCrop": { "xRatio": 0.1, "yRatio": 0.1,
                            "widthRatio": 0.8, "heightRatio": 0.6 },
            "layout": { "totalPages": 1, "repeatPerPage": 1 }
        }))
        .unwrap()
    }

    fn job(id: &str) -> PrintJob {
        let now = Utc::now();
        PrintJob {
            id: id.into(),
            owner_id: "admin".into(),
            document_id: "d1".into(),
            metadata: sample_metadata(),
            mac: "00".into(),
            status: JobStatus::Pending,
            progress: 0,
            total_pages: 1,
            output: None,
            error: None,
            audit: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn config() -> ReaperConfig {
        ReaperConfig {
            cleanup_interval_ms: 300_000,
            job_stale_ms: 15 * 60 * 1000,
            failed_archive_days: 7,
        }
    }

    #[tokio::test]
    async fn expires_done_job_and_deletes_output() {
        let pool = create_test_pool().await.unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        let repo = JobRepository::new(&pool);

        repo.create(&job("j1")).await.unwrap();
        repo.mark_running("j1").await.unwrap();
        blob.put("documents/final/j1.pdf", b"%PDF-1.5".to_vec(), "application/pdf")
            .await
            .unwrap();
        repo.mark_done(
            "j1",
            &JobOutput {
                key: "documents/final/j1.pdf".into(),
                url: None,
                expires_at: Utc::now() - chrono::Duration::seconds(1),
            },
        )
        .await
        .unwrap();

        let reaper = Reaper::new(pool.clone(), blob.clone(), config());
        let stats = reaper.sweep().await.unwrap();
        assert_eq!(stats.done_expired, 1);

        let reloaded = repo.load("j1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Expired);
        assert!(reloaded.output.is_none());
        assert!(!blob.exists("documents/final/j1.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn expires_stale_running_job_without_blob_action() {
        let pool = create_test_pool().await.unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        let repo = JobRepository::new(&pool);
        repo.create(&job("j1")).await.unwrap();
        repo.mark_running("j1").await.unwrap();

        // Not yet stale.
        let reaper = Reaper::new(pool.clone(), blob.clone(), config());
        assert_eq!(reaper.sweep().await.unwrap().running_stale, 0);

        // With a zero staleness window the job is immediately stale.
        let reaper = Reaper::new(
            pool.clone(),
            blob.clone(),
            ReaperConfig {
                job_stale_ms: 0,
                ..config()
            },
        );
        let stats = reaper.sweep().await.unwrap();
        assert_eq!(stats.running_stale, 1);
        assert_eq!(blob.len().await, 0);

        let reloaded = repo.load("j1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Expired);
    }

    #[tokio::test]
    async fn archives_old_failed_jobs() {
        let pool = create_test_pool().await.unwrap();
        let repo = JobRepository::new(&pool);
        repo.create(&job("j1")).await.unwrap();
        repo.mark_running("j1").await.unwrap();
        repo.mark_failed(
            "j1",
            &JobFailure {
                message: "boom".into(),
                stack: None,
            },
        )
        .await
        .unwrap();

        let blob = Arc::new(MemoryBlobStore::new());
        // A seven-day window leaves the fresh failure alone.
        let reaper = Reaper::new(pool.clone(), blob.clone(), config());
        assert_eq!(reaper.sweep().await.unwrap().failed_archived, 0);

        let reaper = Reaper::new(
            pool.clone(),
            blob,
            ReaperConfig {
                failed_archive_days: 0,
                ..config()
            },
        );
        assert_eq!(reaper.sweep().await.unwrap().failed_archived, 1);
        let reloaded = repo.load("j1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Expired);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let pool = create_test_pool().await.unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        let repo = JobRepository::new(&pool);

        repo.create(&job("j1")).await.unwrap();
        repo.mark_running("j1").await.unwrap();
        repo.mark_done(
            "j1",
            &JobOutput {
                key: "documents/final/j1.pdf".into(),
                url: None,
                expires_at: Utc::now() - chrono::Duration::seconds(1),
            },
        )
        .await
        .unwrap();

        let reaper = Reaper::new(pool.clone(), blob, config());
        let first = reaper.sweep().await.unwrap();
        let second = reaper.sweep().await.unwrap();
        assert_eq!(first.done_expired, 1);
        assert_eq!(second.total(), 0);

        let reloaded = repo.load("j1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Expired);
    }
}
