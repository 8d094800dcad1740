//! Render admission
//!
//! Validates the metadata, takes the per-document render lock, persists the
//! PENDING job, and enqueues the render flow. Admission against a held lock
//! is idempotent: the caller gets the holder's job id back.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::job::{events, AuditEvent, JobStatus, PrintJob};
use crate::metadata::{self, VectorMetadata};

use super::error::{Result, SchedulerError};
use super::lock::{acquire_render_lock, release_render_lock, LockDecision};
use super::{RenderContext, RenderQueue};

/// Outcome of a successful admission call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// A new job was created and enqueued.
    Accepted { job_id: String },
    /// Another job already renders this document; its id is returned as the
    /// effective pending job.
    AlreadyPending { job_id: String },
}

impl AdmissionOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            AdmissionOutcome::Accepted { job_id } => job_id,
            AdmissionOutcome::AlreadyPending { job_id } => job_id,
        }
    }
}

/// Admit one render request.
pub async fn submit(
    ctx: &RenderContext,
    queue: &RenderQueue,
    owner_id: &str,
    meta: VectorMetadata,
) -> Result<AdmissionOutcome> {
    metadata::validate_for_enqueue(&meta, &ctx.config)?;

    let document_id = meta.lock_document_id().to_string();
    let job_id = Uuid::new_v4().to_string();

    match acquire_render_lock(&ctx.kv, &ctx.config, &document_id, &job_id).await {
        LockDecision::AlreadyHeld { holder } => {
            tracing::info!(document_id, holder = %holder, "render lock busy, returning holder");
            return Ok(AdmissionOutcome::AlreadyPending { job_id: holder });
        }
        LockDecision::Throttled { active } => {
            return Err(SchedulerError::Throttled { active });
        }
        LockDecision::Acquired | LockDecision::NoCache => {}
    }

    let mac = metadata::compute_mac(ctx.mac_key(), &meta)
        .map_err(|_| SchedulerError::MacMismatch)?;
    let now = Utc::now();
    let total_pages = meta.layout.total_pages;
    let job = PrintJob {
        id: job_id.clone(),
        owner_id: owner_id.to_string(),
        document_id: document_id.clone(),
        metadata: meta,
        mac,
        status: JobStatus::Pending,
        progress: 0,
        total_pages,
        output: None,
        error: None,
        audit: vec![AuditEvent {
            at: now,
            event: events::JOB_CREATED.to_string(),
            details: Some(json!({ "owner": owner_id, "totalPages": total_pages })),
        }],
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = ctx.jobs().create(&job).await {
        // The lock must not outlive a job that never existed.
        release_render_lock(&ctx.kv, &document_id, &job_id).await;
        return Err(e.into());
    }

    queue.enqueue_render_flow(ctx.clone(), job_id.clone(), document_id.clone(), total_pages);

    let batches = total_pages.div_ceil(ctx.config.batch_size.max(1));
    ctx.jobs()
        .append_audit(
            &job_id,
            events::JOB_ENQUEUED,
            Some(json!({ "batches": batches, "batchSize": ctx.config.batch_size })),
        )
        .await?;

    tracing::info!(job_id = %job_id, document_id = %document_id, total_pages, "render job admitted");
    Ok(AdmissionOutcome::Accepted { job_id })
}
