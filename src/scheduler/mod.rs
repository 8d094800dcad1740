//! Render job scheduler
//!
//! Admission acquires the per-document render lock and persists the job;
//! the queue fans the page range out into batch children and runs the merge
//! parent strictly after every child resolves; failure handling terminalizes
//! the job and always releases the lock.

mod admission;
mod error;
mod lock;
mod queue;
mod worker;

pub use admission::{submit, AdmissionOutcome};
pub use error::{Result, SchedulerError};
pub use lock::{acquire_render_lock, release_render_lock, LockDecision};
pub use queue::RenderQueue;
pub use worker::{merge_job, render_batch, BatchOutcome, MergeOutcome};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::blob::BlobStore;
use crate::config::RenderConfig;
use crate::job::JobRepository;
use crate::kv::KvCache;
use crate::layout::LayoutEngine;

/// Shared handles every scheduler step runs against.
#[derive(Clone)]
pub struct RenderContext {
    pub config: Arc<RenderConfig>,
    pub pool: SqlitePool,
    pub kv: Option<Arc<dyn KvCache>>,
    pub blob: Arc<dyn BlobStore>,
    pub engine: Arc<LayoutEngine>,
}

impl RenderContext {
    pub fn jobs(&self) -> JobRepository<'_> {
        JobRepository::new(&self.pool)
    }

    pub(crate) fn mac_key(&self) -> &[u8] {
        self.config.payload_mac_key.as_bytes()
    }
}

/// Queue contract: one batch child renders pages `[start_page, end_page)`.
/// The document id travels in the payload so batch-scope logging never has
/// to re-derive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub print_job_id: String,
    pub document_id: String,
    pub start_page: u32,
    pub end_page: u32,
    pub total_pages: u32,
}

/// Queue contract: the merge parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePayload {
    pub print_job_id: String,
    pub document_id: String,
}

/// One rendered page, base64-encoded and keyed by page index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPage {
    pub page_index: u32,
    pub pdf_base64: String,
}

/// Split a job into batch payloads of at most `batch_size` pages.
pub fn plan_batches(
    job_id: &str,
    document_id: &str,
    total_pages: u32,
    batch_size: u32,
) -> Vec<BatchPayload> {
    let batch_size = batch_size.max(1);
    (0..total_pages)
        .step_by(batch_size as usize)
        .map(|start| BatchPayload {
            print_job_id: job_id.to_string(),
            document_id: document_id.to_string(),
            start_page: start,
            end_page: (start + batch_size).min(total_pages),
            total_pages,
        })
        .collect()
}
