//! Print job model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::VectorMetadata;

/// Audit event names.
pub mod events {
    pub const JOB_CREATED: &str = "JOB_CREATED";
    pub const JOB_ENQUEUED: &str = "JOB_ENQUEUED";
    pub const PAGE_RENDERED: &str = "PAGE_RENDERED";
    pub const JOB_DONE: &str = "JOB_DONE";
    pub const MERGE_TIME: &str = "MERGE_TIME";
    pub const JOB_FAILED: &str = "JOB_FAILED";
    pub const RUNNING_JOB_EXPIRED_AND_OUTPUT_DELETED: &str =
        "RUNNING_JOB_EXPIRED_AND_OUTPUT_DELETED";
    pub const JOB_EXPIRED: &str = "JOB_EXPIRED";
    pub const JOB_ARCHIVED: &str = "JOB_ARCHIVED";
}

/// Render job lifecycle state.
///
/// Transitions form a DAG: PENDING → RUNNING → {DONE, FAILED}; any state may
/// be moved to EXPIRED by the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<JobStatus> {
        match value {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            "EXPIRED" => Some(JobStatus::Expired),
            _ => None,
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Expired)
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Materialized output reference; present in DONE (and briefly during
/// RUNNING for pull-to-device fetches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Failure payload recorded on FAILED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A render request and its durable lifecycle state.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: String,
    pub owner_id: String,
    /// Lock-scope identity resolved at admission; batch and merge reuse it
    /// rather than recomputing.
    pub document_id: String,
    pub metadata: VectorMetadata,
    /// Hex HMAC over the canonical metadata serialization.
    pub mac: String,
    pub status: JobStatus,
    /// 0..=100, non-decreasing until terminal.
    pub progress: i64,
    pub total_pages: u32,
    pub output: Option<JobOutput>,
    pub error: Option<JobFailure>,
    pub audit: Vec<AuditEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Expired,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("UNKNOWN"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Expired.is_terminal());
    }
}
