//! Top-level error type for Imprenta Server

use thiserror::Error;

use crate::blob::BlobError;
use crate::convert::ConvertError;
use crate::job::StoreError;
use crate::kv::KvError;
use crate::layout::LayoutError;
use crate::metadata::ValidationErrors;
use crate::quota::QuotaError;
use crate::scheduler::SchedulerError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Cache error: {0}")]
    Kv(#[from] KvError),

    #[error("Converter error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Internal error: {0}")]
    Internal(String),
}
