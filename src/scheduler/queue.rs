//! In-process render queue
//!
//! Fan-out/fan-in over tokio: batch children run concurrently under a
//! per-worker permit, the merge parent runs strictly after every child has
//! resolved, and child results are handed to the merge at dispatch time.
//! Batch children retry with exponential backoff before the job fails.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::job::events;

use super::error::SchedulerError;
use super::lock::release_render_lock;
use super::worker::{merge_job, render_batch, BatchOutcome, MergeOutcome};
use super::{plan_batches, BatchPayload, MergePayload, RenderContext};

/// Backoff base between batch attempts.
const RETRY_BASE: Duration = Duration::from_secs(2);

/// Dispatches render flows onto the tokio runtime.
pub struct RenderQueue {
    permits: Arc<Semaphore>,
}

impl RenderQueue {
    /// `concurrency` bounds how many job steps run at once in this process.
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Enqueue the batch/merge flow for an admitted job. Returns the flow
    /// task handle; callers that only need fire-and-forget may drop it.
    pub fn enqueue_render_flow(
        &self,
        ctx: RenderContext,
        job_id: String,
        document_id: String,
        total_pages: u32,
    ) -> JoinHandle<()> {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            run_render_flow(ctx, permits, job_id, document_id, total_pages).await;
        })
    }
}

async fn run_render_flow(
    ctx: RenderContext,
    permits: Arc<Semaphore>,
    job_id: String,
    document_id: String,
    total_pages: u32,
) {
    let batches = plan_batches(&job_id, &document_id, total_pages, ctx.config.batch_size);
    let queue_job_id = Uuid::new_v4().to_string();

    let mut children = JoinSet::new();
    for payload in batches {
        let ctx = ctx.clone();
        let permits = permits.clone();
        children.spawn(async move {
            let _permit = permits.acquire_owned().await;
            run_batch_with_retries(&ctx, &payload).await
        });
    }

    let mut results = Vec::new();
    let mut failure: Option<SchedulerError> = None;
    while let Some(joined) = children.join_next().await {
        match joined {
            Ok(Ok(outcome)) => results.push(outcome),
            Ok(Err(e)) => failure = Some(e),
            Err(e) => {
                failure = Some(SchedulerError::CorruptBatch(format!("batch task died: {e}")))
            }
        }
    }
    if let Some(error) = failure {
        fail_job(&ctx, &job_id, &document_id, &queue_job_id, "vector-batch", error).await;
        return;
    }

    let merge_payload = MergePayload {
        print_job_id: job_id.clone(),
        document_id: document_id.clone(),
    };
    let merge_result = {
        let _permit = permits.acquire().await;
        merge_job(&ctx, &merge_payload, results).await
    };

    match merge_result {
        Ok(MergeOutcome::Done { .. }) | Ok(MergeOutcome::Skipped) => {
            release_render_lock(&ctx.kv, &document_id, &job_id).await;
        }
        Err(error) => {
            fail_job(&ctx, &job_id, &document_id, &queue_job_id, "vector-merge", error).await;
        }
    }
}

async fn run_batch_with_retries(
    ctx: &RenderContext,
    payload: &BatchPayload,
) -> Result<BatchOutcome, SchedulerError> {
    let attempts = ctx.config.batch_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            let backoff = RETRY_BASE * 2u32.saturating_pow(attempt - 2);
            tokio::time::sleep(backoff).await;
        }
        match render_batch(ctx, payload).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) => {
                tracing::warn!(
                    job_id = %payload.print_job_id,
                    document_id = %payload.document_id,
                    start_page = payload.start_page,
                    attempt,
                    attempts,
                    error = %error,
                    "batch attempt failed"
                );
                if !error.is_retryable() {
                    return Err(error);
                }
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or(SchedulerError::BadPdfHeader))
}

/// Terminalize a job after the final failed attempt and release the lock
/// regardless of which phase failed.
async fn fail_job(
    ctx: &RenderContext,
    job_id: &str,
    document_id: &str,
    queue_job_id: &str,
    queue_job_name: &str,
    error: SchedulerError,
) {
    tracing::error!(job_id, document_id, queue_job_name, error = %error, "render job failed");

    let repo = ctx.jobs();
    let failure = crate::job::JobFailure {
        message: error.to_string(),
        stack: Some(format!("{error:?}")),
    };
    if let Err(e) = repo.mark_failed(job_id, &failure).await {
        tracing::error!(job_id, error = %e, "could not mark job failed");
    }
    if let Err(e) = repo
        .append_audit(
            job_id,
            events::JOB_FAILED,
            Some(serde_json::json!({
                "queueJobId": queue_job_id,
                "queueJobName": queue_job_name,
                "message": failure.message,
            })),
        )
        .await
    {
        tracing::error!(job_id, error = %e, "could not append failure audit");
    }

    release_render_lock(&ctx.kv, document_id, job_id).await;
}
