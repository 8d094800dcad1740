//! End-to-end scheduler scenarios over in-memory collaborators.

mod common;

use std::time::Duration;

use chrono::Utc;
use sqlx::Row;

use imprenta_server::blob::BlobStore;
use imprenta_server::job::{events, JobRepository, JobStatus};
use imprenta_server::kv::{quota_key, KvCache, LockOutcome};
use imprenta_server::quota::{Consumption, QuotaEngine, QuotaError};
use imprenta_server::reaper::Reaper;
use imprenta_server::scheduler::{submit, AdmissionOutcome, SchedulerError};

use common::*;

#[tokio::test]
async fn admit_render_merge_produces_final_artifact() {
    let h = harness().await;
    seed_source(&h).await;

    let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(2, 1))
        .await
        .unwrap();
    let AdmissionOutcome::Accepted { job_id } = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };

    let job = wait_for_terminal(&h.pool, &job_id).await;
    assert_status(&job, JobStatus::Done);
    assert_eq!(job.progress, 100);

    let output = job.output.expect("done job has output");
    assert_eq!(output.key, format!("documents/final/{job_id}.pdf"));
    assert!(output.url.is_some());
    assert!(output.expires_at > Utc::now());

    let bytes = h.blob.get(&output.key).await.unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    assert!(page_text(&bytes, 1).contains("A001"));
    assert!(page_text(&bytes, 2).contains("A002"));

    // Terminal audit trail, in order.
    let names: Vec<&str> = job.audit.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(names.first(), Some(&events::JOB_CREATED));
    assert!(names.contains(&events::JOB_DONE));
    assert!(names.contains(&events::MERGE_TIME));

    // The render lock is free again.
    let lock = h
        .kv
        .acquire_render_lock("documents/original/src.pdf", "probe", Duration::from_secs(5), 0)
        .await
        .unwrap();
    assert_eq!(lock, LockOutcome::Acquired);
}

#[tokio::test]
async fn busy_lock_returns_holder_job_id_idempotently() {
    let h = harness().await;
    seed_source(&h).await;

    // Another worker already holds the document lock.
    h.kv.acquire_render_lock(
        "documents/original/src.pdf",
        "existing-job",
        Duration::from_secs(60),
        0,
    )
    .await
    .unwrap();

    for _ in 0..2 {
        let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(2, 1))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AdmissionOutcome::AlreadyPending {
                job_id: "existing-job".to_string()
            }
        );
    }
}

#[tokio::test]
async fn active_job_cap_throttles_other_documents() {
    let h = harness_with(|config| config.max_active_jobs = 1).await;
    seed_source(&h).await;

    h.kv.acquire_render_lock("some-other-document", "j1", Duration::from_secs(60), 1)
        .await
        .unwrap();

    let err = submit(&h.ctx, &h.queue, "admin", ticket_metadata(2, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Throttled { active: 1 }));
}

#[tokio::test]
async fn oversized_job_is_rejected_at_admission() {
    let h = harness().await;
    let mut meta = ticket_metadata(2, 1);
    meta.layout.total_pages = h.ctx.config.max_pages + 1;

    let err = submit(&h.ctx, &h.queue, "admin", meta).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidMetadata(_)));

    // Nothing was enqueued and no lock is held.
    let lock = h
        .kv
        .acquire_render_lock("documents/original/src.pdf", "probe", Duration::from_secs(5), 0)
        .await
        .unwrap();
    assert_eq!(lock, LockOutcome::Acquired);
}

#[tokio::test]
async fn missing_source_fails_job_and_releases_lock() {
    let h = harness_with(|config| config.batch_attempts = 1).await;
    // No source uploaded.

    let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(1, 1))
        .await
        .unwrap();
    let job_id = outcome.job_id().to_string();

    let job = wait_for_terminal(&h.pool, &job_id).await;
    assert_status(&job, JobStatus::Failed);
    let failure = job.error.expect("failed job carries an error");
    assert!(failure.message.contains("not found"), "{}", failure.message);

    let names: Vec<&str> = job.audit.iter().map(|e| e.event.as_str()).collect();
    assert!(names.contains(&events::JOB_FAILED));

    let lock = h
        .kv
        .acquire_render_lock("documents/original/src.pdf", "probe", Duration::from_secs(5), 0)
        .await
        .unwrap();
    assert_eq!(lock, LockOutcome::Acquired);
}

#[tokio::test]
async fn single_page_job_still_merges() {
    let h = harness().await;
    seed_source(&h).await;

    let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(1, 1))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.pool, outcome.job_id()).await;
    assert_status(&job, JobStatus::Done);

    let bytes = h.blob.get(&job.output.unwrap().key).await.unwrap();
    let doc = lopdf::Document::load_mem(&bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
}

#[tokio::test]
async fn quota_cache_miss_recovery_and_replay() {
    let h = harness().await;
    use imprenta_server::access::{AccessRepository, DocumentAccess};
    AccessRepository::new(&h.pool)
        .grant(&DocumentAccess {
            document_id: "doc-1".into(),
            user_id: "user-1".into(),
            print_quota: Some(3),
            prints_used: Some(1),
            legacy_used_prints: None,
            revoked: false,
            last_print_at: None,
        })
        .await
        .unwrap();

    let quota = QuotaEngine::new(
        Some(h.kv.clone()),
        h.pool.clone(),
        Duration::from_secs(300),
    );

    // The counter hash is absent (simulated cache loss).
    let result = quota.consume("doc-1", "user-1", "r1").await.unwrap();
    assert_eq!(result, Consumption::Consumed { remaining: Some(1) });
    assert_eq!(h.kv.counter(&quota_key("doc-1", "user-1")), Some(1));

    // Same request id inside the window: no further change.
    let replay = quota.consume("doc-1", "user-1", "r1").await.unwrap();
    assert_eq!(replay, Consumption::Replayed);
    assert_eq!(h.kv.counter(&quota_key("doc-1", "user-1")), Some(1));
}

#[tokio::test]
async fn quota_limit_allows_retry_after_bump() {
    let h = harness().await;
    use imprenta_server::access::{AccessRepository, DocumentAccess};
    let grant = |quota: i64, used: i64| DocumentAccess {
        document_id: "doc-1".into(),
        user_id: "user-1".into(),
        print_quota: Some(quota),
        prints_used: Some(used),
        legacy_used_prints: None,
        revoked: false,
        last_print_at: None,
    };
    AccessRepository::new(&h.pool).grant(&grant(1, 1)).await.unwrap();

    let quota = QuotaEngine::new(
        Some(h.kv.clone()),
        h.pool.clone(),
        Duration::from_secs(300),
    );
    assert!(matches!(
        quota.consume("doc-1", "user-1", "r2").await,
        Err(QuotaError::Limit)
    ));

    // Quota bump; the freed request id consumes now.
    AccessRepository::new(&h.pool).grant(&grant(2, 1)).await.unwrap();
    h.kv.evict_counter(&quota_key("doc-1", "user-1"));
    let result = quota.consume("doc-1", "user-1", "r2").await.unwrap();
    assert_eq!(result, Consumption::Consumed { remaining: Some(0) });
}

#[tokio::test]
async fn reaper_expires_dead_jobs_and_deletes_outputs() {
    let h = harness().await;
    let repo = JobRepository::new(&h.pool);

    // One DONE job whose output just expired.
    seed_source(&h).await;
    let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(1, 1))
        .await
        .unwrap();
    let done_id = outcome.job_id().to_string();
    let done = wait_for_terminal(&h.pool, &done_id).await;
    assert_status(&done, JobStatus::Done);
    // Backdate the output expiry under the reaper's feet.
    sqlx::query("UPDATE print_jobs SET output_expires_at = ? WHERE id = ?")
        .bind((Utc::now() - chrono::Duration::seconds(1)).to_rfc3339())
        .bind(&done_id)
        .execute(&h.pool)
        .await
        .unwrap();

    // One RUNNING job untouched for 16 minutes.
    let stale = common::ticket_metadata(1, 1);
    let stale_outcome = submit(&h.ctx, &h.queue, "admin-2", {
        let mut meta = stale;
        meta.document_id = Some("other-document".into());
        meta
    })
    .await
    .unwrap();
    let stale_id = stale_outcome.job_id().to_string();
    wait_for_terminal(&h.pool, &stale_id).await;
    sqlx::query("UPDATE print_jobs SET status = 'RUNNING', output_key = NULL, output_url = NULL, output_expires_at = NULL, updated_at = ? WHERE id = ?")
        .bind((Utc::now() - chrono::Duration::minutes(16)).to_rfc3339())
        .bind(&stale_id)
        .execute(&h.pool)
        .await
        .unwrap();

    let reaper = Reaper::new(
        h.pool.clone(),
        h.blob.clone(),
        imprenta_server::config::Config::default().reaper,
    );
    let stats = reaper.sweep().await.unwrap();
    assert_eq!(stats.done_expired, 1);
    assert_eq!(stats.running_stale, 1);

    // First job: expired with its blob deleted. Second: expired, no blob action.
    let done = repo.load(&done_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Expired);
    assert!(done.output.is_none());
    assert!(!h
        .blob
        .exists(&format!("documents/final/{done_id}.pdf"))
        .await
        .unwrap());

    let stale = repo.load(&stale_id).await.unwrap().unwrap();
    assert_eq!(stale.status, JobStatus::Expired);

    // Back-to-back sweep is a no-op.
    assert_eq!(reaper.sweep().await.unwrap().total(), 0);
}

#[tokio::test]
async fn expired_job_skips_batches_without_side_effects() {
    let h = harness().await;
    seed_source(&h).await;

    // Admit, then immediately expire before the flow can finish.
    let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(50, 1))
        .await
        .unwrap();
    let job_id = outcome.job_id().to_string();
    JobRepository::new(&h.pool).expire(&job_id, false).await.unwrap();

    let job = wait_for_terminal(&h.pool, &job_id).await;
    assert_eq!(job.status, JobStatus::Expired);

    // No artifact was uploaded for the expired job.
    assert!(!h
        .blob
        .exists(&format!("documents/final/{job_id}.pdf"))
        .await
        .unwrap());
}

#[tokio::test]
async fn progress_rows_never_decrease() {
    let h = harness().await;
    seed_source(&h).await;

    let outcome = submit(&h.ctx, &h.queue, "admin", ticket_metadata(30, 1))
        .await
        .unwrap();
    let job_id = outcome.job_id().to_string();

    // Sample progress while the flow runs; the sequence must be monotone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut samples = Vec::new();
    loop {
        assert!(tokio::time::Instant::now() < deadline, "job never terminalized");
        let row = sqlx::query("SELECT progress, status FROM print_jobs WHERE id = ?")
            .bind(&job_id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
        let progress: i64 = row.get("progress");
        let status: String = row.get("status");
        samples.push(progress);
        if status != "PENDING" && status != "RUNNING" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{samples:?}");
    assert_eq!(*samples.last().unwrap(), 100);
}
