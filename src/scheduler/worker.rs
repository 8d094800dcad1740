//! Batch and merge worker steps
//!
//! A batch child renders its page range and returns the pages base64-encoded
//! keyed by page index; the merge parent asserts completeness, assembles the
//! final artifact in ascending page order, uploads it, and terminalizes the
//! job. Every step begins by reloading the job and skips without side
//! effects when the reaper expired it.

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::json;

use crate::access::DocumentRepository;
use crate::blob::final_pdf_key;
use crate::job::{events, JobOutput, JobStatus, PrintJob};
use crate::layout::PdfMerger;
use crate::metadata::{self, VectorMetadata};

use super::error::{Result, SchedulerError};
use super::{BatchPayload, MergePayload, RenderContext, RenderedPage};

/// Result of one batch child.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Job was expired before or during the batch; no side effects.
    Skipped,
    Pages(Vec<RenderedPage>),
}

/// Result of the merge parent.
#[derive(Debug)]
pub enum MergeOutcome {
    Skipped,
    Done { key: String },
}

/// Audit granularity for per-page and merge progress events.
const PROGRESS_EVENT_EVERY: u32 = 10;

async fn reload_job(ctx: &RenderContext, job_id: &str) -> Result<PrintJob> {
    ctx.jobs()
        .load(job_id)
        .await?
        .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
}

/// Resolve a `document:{id}` source reference to its blob key.
async fn resolve_source_key(ctx: &RenderContext, meta: &VectorMetadata) -> Result<String> {
    match meta.document_reference() {
        Some(document_id) => {
            let documents = DocumentRepository::new(&ctx.pool);
            let document = documents
                .get(document_id)
                .await?
                .ok_or_else(|| SchedulerError::DocumentNotFound(document_id.to_string()))?;
            Ok(document.blob_key)
        }
        None => Ok(meta.source_pdf_key.clone()),
    }
}

/// Render the pages `[start_page, end_page)` of one job.
pub async fn render_batch(ctx: &RenderContext, payload: &BatchPayload) -> Result<BatchOutcome> {
    let repo = ctx.jobs();

    let job = reload_job(ctx, &payload.print_job_id).await?;
    if job.status == JobStatus::Expired {
        return Ok(BatchOutcome::Skipped);
    }
    repo.mark_running(&payload.print_job_id).await?;
    let source_key = resolve_source_key(ctx, &job.metadata).await?;

    let mut pages = Vec::with_capacity((payload.end_page - payload.start_page) as usize);
    for page_index in payload.start_page..payload.end_page {
        // Reload at every page boundary so an expiry observed mid-batch
        // stops the work without side effects.
        let job = reload_job(ctx, &payload.print_job_id).await?;
        if job.status == JobStatus::Expired {
            return Ok(BatchOutcome::Skipped);
        }

        metadata::validate(&job.metadata)?;
        metadata::verify_mac(ctx.mac_key(), &job.metadata, &job.mac)?;

        let bytes = ctx
            .engine
            .render_page(&job.metadata, &source_key, page_index)
            .await?;
        if !bytes.starts_with(b"%PDF-") {
            return Err(SchedulerError::BadPdfHeader);
        }

        let rendered = page_index + 1;
        let progress = (rendered as i64 * 80) / payload.total_pages as i64;
        repo.update_progress(&payload.print_job_id, progress).await?;
        if rendered % PROGRESS_EVENT_EVERY == 0 || rendered == payload.end_page {
            repo.append_audit(
                &payload.print_job_id,
                events::PAGE_RENDERED,
                Some(json!({
                    "documentId": payload.document_id,
                    "pageIndex": page_index,
                    "progress": progress,
                })),
            )
            .await?;
        }

        tracing::debug!(
            job_id = %payload.print_job_id,
            document_id = %payload.document_id,
            page_index,
            "page rendered"
        );
        pages.push(RenderedPage {
            page_index,
            pdf_base64: BASE64.encode(&bytes),
        });
    }

    Ok(BatchOutcome::Pages(pages))
}

/// Merge all batch results into the final artifact.
pub async fn merge_job(
    ctx: &RenderContext,
    payload: &MergePayload,
    batch_results: Vec<BatchOutcome>,
) -> Result<MergeOutcome> {
    let repo = ctx.jobs();
    let started = Instant::now();

    let job = reload_job(ctx, &payload.print_job_id).await?;
    if job.status == JobStatus::Expired {
        return Ok(MergeOutcome::Skipped);
    }

    let total = job.total_pages as usize;
    let mut slots: Vec<Option<String>> = vec![None; total];
    for result in batch_results {
        match result {
            // A skipped child means the job expired mid-flight; stop here
            // with no side effects as well.
            BatchOutcome::Skipped => return Ok(MergeOutcome::Skipped),
            BatchOutcome::Pages(pages) => {
                for page in pages {
                    let index = page.page_index as usize;
                    if index >= total {
                        return Err(SchedulerError::CorruptBatch(format!(
                            "page index {index} outside 0..{total}"
                        )));
                    }
                    slots[index] = Some(page.pdf_base64);
                }
            }
        }
    }

    let missing = slots.iter().filter(|slot| slot.is_none()).count();
    if missing > 0 {
        return Err(SchedulerError::MissingPages(missing));
    }

    let deadline = (ctx.config.merge_max_ms > 0)
        .then(|| started + std::time::Duration::from_millis(ctx.config.merge_max_ms));

    let mut merger = PdfMerger::new();
    for index in 0..total {
        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(SchedulerError::MergeDeadline(ctx.config.merge_max_ms));
            }
        }
        // Take the slot so the decoded page buffer is dropped as soon as it
        // is copied into the output.
        let Some(encoded) = slots[index].take() else {
            return Err(SchedulerError::MissingPages(1));
        };
        let bytes = BASE64.decode(encoded)?;
        merger.append_first_page(&bytes)?;

        let done = (index + 1) as u32;
        if index == 0 || done % PROGRESS_EVENT_EVERY == 0 || done == total as u32 {
            let progress = 80 + (done as i64 * 15) / total as i64;
            repo.update_progress(&payload.print_job_id, progress).await?;
        }
    }

    repo.update_progress(&payload.print_job_id, 95).await?;
    let bytes = merger.finish()?;
    if !bytes.starts_with(b"%PDF-") {
        return Err(SchedulerError::BadPdfHeader);
    }

    let key = final_pdf_key(&payload.print_job_id);
    ctx.blob.put(&key, bytes, "application/pdf").await?;
    let ttl = chrono::Duration::hours(ctx.config.final_pdf_ttl_hours);
    let url = ctx
        .blob
        .presign_get(&key, ttl.to_std().unwrap_or_default())
        .await
        .ok();

    let output = JobOutput {
        key: key.clone(),
        url,
        expires_at: Utc::now() + ttl,
    };
    repo.mark_done(&payload.print_job_id, &output).await?;
    repo.append_audit(
        &payload.print_job_id,
        events::JOB_DONE,
        Some(json!({ "key": key })),
    )
    .await?;
    repo.append_audit(
        &payload.print_job_id,
        events::MERGE_TIME,
        Some(json!({ "ms": started.elapsed().as_millis() as u64 })),
    )
    .await?;

    tracing::info!(
        job_id = %payload.print_job_id,
        document_id = %payload.document_id,
        key = %key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "merge complete"
    );
    Ok(MergeOutcome::Done { key })
}
