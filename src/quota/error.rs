//! Quota error taxonomy

use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum QuotaError {
    /// Request id missing or empty.
    #[error("Print request id is required")]
    BadRequest,

    /// No grant exists for this (document, user).
    #[error("No print access for this document")]
    NoAccess,

    /// The grant has been revoked.
    #[error("Print access has been revoked")]
    Revoked,

    /// The print quota is exhausted.
    #[error("Print quota exhausted")]
    Limit,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, QuotaError>;
