//! Print job persistence
//!
//! SQLite repository for the job lifecycle. Progress updates are monotone
//! (`MAX(progress, ?)`) and audit appends are atomic (`json_insert`), so
//! concurrent batch workers cannot regress or clobber each other's updates.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{Result, StoreError};
use crate::metadata::VectorMetadata;

use super::types::{AuditEvent, JobFailure, JobOutput, JobStatus, PrintJob};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS print_jobs (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    metadata TEXT NOT NULL,
    mac TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER NOT NULL,
    output_key TEXT,
    output_url TEXT,
    output_expires_at TEXT,
    error_message TEXT,
    error_stack TEXT,
    audit TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_print_jobs_status ON print_jobs(status);
CREATE INDEX IF NOT EXISTS idx_print_jobs_updated ON print_jobs(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_print_jobs_expiry ON print_jobs(status, output_expires_at);
"#;

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    owner_id: String,
    document_id: String,
    metadata: String,
    mac: String,
    status: String,
    progress: i64,
    total_pages: i64,
    output_key: Option<String>,
    output_url: Option<String>,
    output_expires_at: Option<String>,
    error_message: Option<String>,
    error_stack: Option<String>,
    audit: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_job(self) -> Result<PrintJob> {
        let metadata: VectorMetadata = serde_json::from_str(&self.metadata)?;
        let audit: Vec<AuditEvent> = serde_json::from_str(&self.audit)?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job status {}", self.status)))?;

        let output = match (self.output_key, self.output_expires_at) {
            (Some(key), Some(expires_at)) => Some(JobOutput {
                key,
                url: self.output_url,
                expires_at: parse_time(&expires_at)?,
            }),
            _ => None,
        };
        let error = self.error_message.map(|message| JobFailure {
            message,
            stack: self.error_stack,
        });

        Ok(PrintJob {
            id: self.id,
            owner_id: self.owner_id,
            document_id: self.document_id,
            metadata,
            mac: self.mac,
            status,
            progress: self.progress,
            total_pages: self.total_pages as u32,
            output,
            error,
            audit,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {value}: {e}")))
}

const SELECT_COLUMNS: &str = "id, owner_id, document_id, metadata, mac, status, progress, \
     total_pages, output_key, output_url, output_expires_at, error_message, error_stack, \
     audit, created_at, updated_at";

/// Repository for print job persistence.
pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the job tables.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(pool).await?;
        Ok(())
    }

    /// Persist a newly admitted job.
    pub async fn create(&self, job: &PrintJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO print_jobs (
                id, owner_id, document_id, metadata, mac, status, progress,
                total_pages, audit, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner_id)
        .bind(&job.document_id)
        .bind(serde_json::to_string(&job.metadata)?)
        .bind(&job.mac)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.total_pages as i64)
        .bind(serde_json::to_string(&job.audit)?)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Load one job.
    pub async fn load(&self, id: &str) -> Result<Option<PrintJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM print_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Move PENDING → RUNNING. A no-op for any other current state, so a
    /// late batch cannot resurrect a terminal job.
    pub async fn mark_running(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE print_jobs SET status = 'RUNNING', updated_at = ? \
             WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Monotone progress update; never decrements and never touches a
    /// terminal job.
    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<()> {
        sqlx::query(
            "UPDATE print_jobs SET progress = MAX(progress, ?), updated_at = ? \
             WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(progress.clamp(0, 100))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Append one audit record.
    pub async fn append_audit(
        &self,
        id: &str,
        event: &str,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let record = AuditEvent {
            at: Utc::now(),
            event: event.to_string(),
            details,
        };
        sqlx::query(
            "UPDATE print_jobs SET audit = json_insert(audit, '$[#]', json(?)), updated_at = ? \
             WHERE id = ?",
        )
        .bind(serde_json::to_string(&record)?)
        .bind(record.at.to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Record the materialized output while the job is still RUNNING.
    pub async fn set_output(&self, id: &str, output: &JobOutput) -> Result<()> {
        sqlx::query(
            "UPDATE print_jobs SET output_key = ?, output_url = ?, output_expires_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&output.key)
        .bind(&output.url)
        .bind(output.expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Terminalize as DONE with the final output.
    pub async fn mark_done(&self, id: &str, output: &JobOutput) -> Result<()> {
        sqlx::query(
            "UPDATE print_jobs SET status = 'DONE', progress = 100, output_key = ?, \
             output_url = ?, output_expires_at = ?, updated_at = ? \
             WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(&output.key)
        .bind(&output.url)
        .bind(output.expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Terminalize as FAILED.
    pub async fn mark_failed(&self, id: &str, failure: &JobFailure) -> Result<()> {
        sqlx::query(
            "UPDATE print_jobs SET status = 'FAILED', error_message = ?, error_stack = ?, \
             updated_at = ? WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(&failure.message)
        .bind(&failure.stack)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Move to EXPIRED, optionally nulling the output reference.
    pub async fn expire(&self, id: &str, clear_output: bool) -> Result<()> {
        let sql = if clear_output {
            "UPDATE print_jobs SET status = 'EXPIRED', output_key = NULL, output_url = NULL, \
             output_expires_at = NULL, updated_at = ? WHERE id = ?"
        } else {
            "UPDATE print_jobs SET status = 'EXPIRED', updated_at = ? WHERE id = ?"
        };
        sqlx::query(sql)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reaper queries
    // ------------------------------------------------------------------

    /// RUNNING jobs whose materialized output has expired.
    pub async fn running_with_expired_output(&self, now: DateTime<Utc>) -> Result<Vec<PrintJob>> {
        self.fetch_jobs(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM print_jobs \
                 WHERE status = 'RUNNING' AND output_key IS NOT NULL AND output_expires_at <= ?"
            ),
            &now.to_rfc3339(),
        )
        .await
    }

    /// RUNNING jobs with no output and no update since the cutoff.
    pub async fn running_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<PrintJob>> {
        self.fetch_jobs(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM print_jobs \
                 WHERE status = 'RUNNING' AND output_key IS NULL AND updated_at <= ?"
            ),
            &cutoff.to_rfc3339(),
        )
        .await
    }

    /// DONE jobs whose output has expired.
    pub async fn done_expired(&self, now: DateTime<Utc>) -> Result<Vec<PrintJob>> {
        self.fetch_jobs(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM print_jobs \
                 WHERE status = 'DONE' AND output_expires_at <= ?"
            ),
            &now.to_rfc3339(),
        )
        .await
    }

    /// PENDING jobs with no update since the cutoff. These are flows lost
    /// to a worker restart; the dispatcher re-enqueues them.
    pub async fn pending_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<PrintJob>> {
        self.fetch_jobs(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM print_jobs \
                 WHERE status = 'PENDING' AND updated_at <= ?"
            ),
            &cutoff.to_rfc3339(),
        )
        .await
    }

    /// FAILED jobs not updated since the cutoff.
    pub async fn failed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PrintJob>> {
        self.fetch_jobs(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM print_jobs \
                 WHERE status = 'FAILED' AND updated_at <= ?"
            ),
            &cutoff.to_rfc3339(),
        )
        .await
    }

    async fn fetch_jobs(&self, sql: &str, bound: &str) -> Result<Vec<PrintJob>> {
        let rows = sqlx::query_as::<_, JobRow>(sql)
            .bind(bound)
            .fetch_all(self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}
