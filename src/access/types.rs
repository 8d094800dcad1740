//! Grant and document models

use chrono::{DateTime, Utc};

use crate::metadata::ColorMode;

/// A user's grant against a document.
///
/// `prints_used` is the canonical consumption counter. `legacy_used_prints`
/// is a read-only historical field that only participates in backfill
/// computations; nothing ever writes it.
#[derive(Debug, Clone)]
pub struct DocumentAccess {
    pub document_id: String,
    pub user_id: String,
    pub print_quota: Option<i64>,
    pub prints_used: Option<i64>,
    pub legacy_used_prints: Option<i64>,
    pub revoked: bool,
    pub last_print_at: Option<DateTime<Utc>>,
}

impl DocumentAccess {
    /// Remaining prints, treating missing counters as zero and taking the
    /// larger of the canonical and legacy used counts.
    pub fn remaining(&self) -> i64 {
        let quota = self.print_quota.unwrap_or(0);
        let used = self
            .prints_used
            .unwrap_or(0)
            .max(self.legacy_used_prints.unwrap_or(0));
        (quota - used).max(0)
    }
}

/// Stored artifact metadata.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub blob_key: String,
    pub mime: String,
    pub color_mode: ColorMode,
    /// Incremented whenever the materialized export becomes stale.
    pub export_version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(quota: Option<i64>, used: Option<i64>, legacy: Option<i64>) -> DocumentAccess {
        DocumentAccess {
            document_id: "d".into(),
            user_id: "u".into(),
            print_quota: quota,
            prints_used: used,
            legacy_used_prints: legacy,
            revoked: false,
            last_print_at: None,
        }
    }

    #[test]
    fn remaining_uses_max_of_counters() {
        assert_eq!(grant(Some(5), Some(2), None).remaining(), 3);
        assert_eq!(grant(Some(5), Some(2), Some(4)).remaining(), 1);
        assert_eq!(grant(Some(5), Some(6), None).remaining(), 0);
        assert_eq!(grant(None, None, None).remaining(), 0);
        assert_eq!(grant(Some(3), None, None).remaining(), 3);
    }
}
