//! Cache key builders

/// Per-document render lock; value is the holder job id.
pub fn render_lock_key(document_id: &str) -> String {
    format!("vector:render:lock:{document_id}")
}

/// Global active render-job counter.
pub const RENDER_ACTIVE_KEY: &str = "vector:render:active";

/// Membership key marking one job's contribution to the active counter.
pub fn render_active_member_key(job_id: &str) -> String {
    format!("vector:render:active:{job_id}")
}

/// Per-(document, user) quota counter hash.
pub fn quota_key(document_id: &str, user_id: &str) -> String {
    format!("print_quota:{document_id}:{user_id}")
}

/// Idempotency key for one print request.
pub fn request_key(document_id: &str, user_id: &str, request_id: &str) -> String {
    format!("print_req:{document_id}:{user_id}:{request_id}")
}

/// Cache slot for a materialized export artifact.
pub fn final_pdf_cache_key(document_id: &str, version: i64, mode: &str) -> String {
    format!("final_pdf:{document_id}:{version}:{mode}")
}
