//! Grant and document persistence

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{Result, StoreError};
use crate::metadata::ColorMode;

use super::types::{Document, DocumentAccess};

const ACCESS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS document_access (
    document_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    print_quota INTEGER,
    prints_used INTEGER,
    legacy_used_prints INTEGER,
    revoked INTEGER NOT NULL DEFAULT 0,
    last_print_at TEXT,
    PRIMARY KEY (document_id, user_id)
);
"#;

const DOCUMENT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    blob_key TEXT NOT NULL,
    mime TEXT NOT NULL,
    color_mode TEXT NOT NULL DEFAULT 'RGB',
    export_version INTEGER NOT NULL DEFAULT 0
);
"#;

#[derive(sqlx::FromRow)]
struct AccessRow {
    document_id: String,
    user_id: String,
    print_quota: Option<i64>,
    prints_used: Option<i64>,
    legacy_used_prints: Option<i64>,
    revoked: i64,
    last_print_at: Option<String>,
}

impl AccessRow {
    fn into_access(self) -> Result<DocumentAccess> {
        let last_print_at = self
            .last_print_at
            .map(|t| {
                DateTime::parse_from_rfc3339(&t)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StoreError::Corrupt(format!("bad timestamp {t}: {e}")))
            })
            .transpose()?;
        Ok(DocumentAccess {
            document_id: self.document_id,
            user_id: self.user_id,
            print_quota: self.print_quota,
            prints_used: self.prints_used,
            legacy_used_prints: self.legacy_used_prints,
            revoked: self.revoked != 0,
            last_print_at,
        })
    }
}

/// Repository for document grants.
pub struct AccessRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccessRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(ACCESS_SCHEMA_SQL).execute(pool).await?;
        Ok(())
    }

    /// Create or replace a grant (admin surface; tests use this too).
    pub async fn grant(&self, access: &DocumentAccess) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_access (
                document_id, user_id, print_quota, prints_used,
                legacy_used_prints, revoked, last_print_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (document_id, user_id) DO UPDATE SET
                print_quota = excluded.print_quota,
                prints_used = excluded.prints_used,
                legacy_used_prints = excluded.legacy_used_prints,
                revoked = excluded.revoked
            "#,
        )
        .bind(&access.document_id)
        .bind(&access.user_id)
        .bind(access.print_quota)
        .bind(access.prints_used)
        .bind(access.legacy_used_prints)
        .bind(access.revoked as i64)
        .bind(access.last_print_at.map(|t| t.to_rfc3339()))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, document_id: &str, user_id: &str) -> Result<Option<DocumentAccess>> {
        let row = sqlx::query_as::<_, AccessRow>(
            "SELECT document_id, user_id, print_quota, prints_used, legacy_used_prints, \
             revoked, last_print_at FROM document_access \
             WHERE document_id = ? AND user_id = ?",
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        row.map(AccessRow::into_access).transpose()
    }

    /// Lazily backfill null quota fields after a cache-miss recovery
    /// computed them. Only fills nulls; existing values are untouched.
    pub async fn backfill_counters(
        &self,
        document_id: &str,
        user_id: &str,
        print_quota: i64,
        prints_used: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE document_access SET \
             print_quota = COALESCE(print_quota, ?), \
             prints_used = COALESCE(prints_used, ?) \
             WHERE document_id = ? AND user_id = ?",
        )
        .bind(print_quota)
        .bind(prints_used)
        .bind(document_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Write-behind increment after a cache-accepted consumption. Filtered
    /// by the revocation flag only; the cache already enforced the cap.
    pub async fn record_consumption(&self, document_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE document_access SET \
             prints_used = COALESCE(prints_used, 0) + 1, last_print_at = ? \
             WHERE document_id = ? AND user_id = ? AND revoked = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(document_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Durable optimistic consume: one conditional update that requires an
    /// unrevoked grant with headroom. Returns whether a row matched.
    pub async fn optimistic_consume(&self, document_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE document_access SET \
             prints_used = COALESCE(prints_used, 0) + 1, last_print_at = ? \
             WHERE document_id = ? AND user_id = ? AND revoked = 0 \
               AND COALESCE(prints_used, 0) < COALESCE(print_quota, 0)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(document_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    blob_key: String,
    mime: String,
    color_mode: String,
    export_version: i64,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let color_mode = match self.color_mode.as_str() {
            "RGB" => ColorMode::Rgb,
            "CMYK" => ColorMode::Cmyk,
            other => {
                return Err(StoreError::Corrupt(format!("unknown color mode {other}")));
            }
        };
        Ok(Document {
            id: self.id,
            title: self.title,
            blob_key: self.blob_key,
            mime: self.mime,
            color_mode,
            export_version: self.export_version,
        })
    }
}

/// Repository for document records.
pub struct DocumentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DocumentRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(DOCUMENT_SCHEMA_SQL).execute(pool).await?;
        Ok(())
    }

    pub async fn create(&self, document: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, title, blob_key, mime, color_mode, export_version) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.blob_key)
        .bind(&document.mime)
        .bind(document.color_mode.as_str())
        .bind(document.export_version)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, title, blob_key, mime, color_mode, export_version \
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    /// Mark the materialized export stale.
    pub async fn bump_export_version(&self, id: &str) -> Result<i64> {
        sqlx::query("UPDATE documents SET export_version = export_version + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        let (version,): (i64,) =
            sqlx::query_as("SELECT export_version FROM documents WHERE id = ?")
                .bind(id)
                .fetch_one(self.pool)
                .await?;
        Ok(version)
    }
}
