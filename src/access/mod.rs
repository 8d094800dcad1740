//! Document grants and document records
//!
//! `DocumentAccess` is a user's grant against a document: the authoritative
//! print quota and the canonical consumption counter. Grants are never
//! deleted; revocation is a flag. `Document` carries artifact metadata and
//! the export staleness counter.

mod store;
mod types;

pub use store::{AccessRepository, DocumentRepository};
pub use types::*;

pub use crate::db::StoreError;
