//! Scheduler error types

use thiserror::Error;

use crate::blob::BlobError;
use crate::db::StoreError;
use crate::layout::LayoutError;
use crate::metadata::{MacError, ValidationErrors};

/// Unified scheduler error type
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Metadata failed validation; never enqueued.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(#[from] ValidationErrors),

    /// Global active-job cap reached; retryable.
    #[error("Render admission throttled: {active} jobs active")]
    Throttled { active: u32 },

    /// Stored MAC does not match the reloaded metadata.
    #[error("Metadata payload MAC mismatch")]
    MacMismatch,

    /// A render step produced bytes without the `%PDF-` header.
    #[error("Render pipeline broken: page bytes are not a PDF")]
    BadPdfHeader,

    /// Merge received an incomplete page set.
    #[error("Missing rendered pages: {0} slots empty")]
    MissingPages(usize),

    /// Merge exceeded its wall-clock budget.
    #[error("Merge exceeded time budget of {0} ms")]
    MergeDeadline(u64),

    /// A batch result could not be decoded.
    #[error("Corrupt batch result: {0}")]
    CorruptBatch(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Whether a batch retry could ever succeed. Structural failures (MAC
    /// mismatch, bad PDF bytes, invalid metadata) are final on the first
    /// attempt; only transport-shaped errors earn another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Layout(e) => !e.is_fatal(),
            SchedulerError::Store(_) => true,
            SchedulerError::Blob(BlobError::Backend(_)) => true,
            _ => false,
        }
    }
}

impl From<MacError> for SchedulerError {
    fn from(_: MacError) -> Self {
        SchedulerError::MacMismatch
    }
}

impl From<base64::DecodeError> for SchedulerError {
    fn from(e: base64::DecodeError) -> Self {
        SchedulerError::CorruptBatch(e.to_string())
    }
}
