//! Print render jobs
//!
//! The durable record of one render request: status machine, progress,
//! append-only audit log, and the materialized output reference.

mod store;
mod types;

pub use store::JobRepository;
pub use types::*;

pub use crate::db::StoreError;
