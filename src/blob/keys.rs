//! Blob key namespaces
//!
//! All object keys the service reads or writes live under `documents/`.
//! Only the derived-output prefixes may ever be deleted; original and source
//! uploads are immutable.

/// Prefix for uploaded original PDFs.
pub const ORIGINAL_PREFIX: &str = "documents/original/";
/// Prefix for uploaded SVG sources.
pub const SOURCE_PREFIX: &str = "documents/source/";
/// Prefix for merged final render artifacts.
pub const FINAL_PREFIX: &str = "documents/final/";
/// Prefix for per-print derived copies.
pub const PRINT_PREFIX: &str = "documents/print/";
/// Prefix for materialized document exports.
pub const EXPORT_PREFIX: &str = "documents/export/";

/// Key of the merged artifact for a render job.
pub fn final_pdf_key(job_id: &str) -> String {
    format!("{FINAL_PREFIX}{job_id}.pdf")
}

/// Key of a materialized export for (document, version, color mode).
pub fn export_pdf_key(document_id: &str, version: i64, mode: &str) -> String {
    format!("{EXPORT_PREFIX}{document_id}/{version}/{mode}.pdf")
}

/// Whether the reaper and cleanup paths are allowed to delete this key.
/// Everything outside `documents/final/` and `documents/print/` is treated
/// as an immutable source.
pub fn is_deletable_key(key: &str) -> bool {
    key.starts_with(FINAL_PREFIX) || key.starts_with(PRINT_PREFIX)
}
