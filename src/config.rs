//! Configuration management for Imprenta Server

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub render: RenderConfig,
    pub quota: QuotaConfig,
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Knobs for the render scheduler and layout engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Queue concurrency per worker process.
    pub worker_concurrency: usize,
    /// Upper bound on `layout.totalPages` accepted at enqueue time.
    pub max_pages: u32,
    /// Upper bound on the last value of any serial-number series.
    pub max_series_end: i64,
    /// Pages per batch child job (capped at 50).
    pub batch_size: u32,
    /// Attempts per batch child before the job fails.
    pub batch_attempts: u32,
    /// Per-document render lock TTL in seconds (minimum 60).
    pub render_lock_ttl_seconds: u64,
    /// Global active-job cap; 0 disables the cap.
    pub max_active_jobs: u32,
    /// Wall-clock budget for the merge step in milliseconds; 0 disables.
    pub merge_max_ms: u64,
    /// Lifetime of the final artifact in hours.
    pub final_pdf_ttl_hours: i64,
    /// Keyed-MAC secret for metadata payload integrity.
    pub payload_mac_key: String,
    /// Path to the external SVG→PDF converter binary, if installed.
    pub svg_converter_bin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Idempotency window for request ids, in seconds.
    pub request_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// Sweep interval in milliseconds.
    pub cleanup_interval_ms: u64,
    /// A RUNNING job with no progress update for this long is stale.
    pub job_stale_ms: i64,
    /// FAILED jobs older than this many days are archived to EXPIRED.
    pub failed_archive_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                url: "sqlite:./imprenta.db".to_string(),
            },
            render: RenderConfig::default(),
            quota: QuotaConfig {
                request_ttl_seconds: 300,
            },
            reaper: ReaperConfig {
                cleanup_interval_ms: 5 * 60 * 1000,
                job_stale_ms: 15 * 60 * 1000,
                failed_archive_days: 7,
            },
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            worker_concurrency: 4,
            max_pages: 700,
            max_series_end: 1_000_000_000,
            batch_size: 10,
            batch_attempts: 3,
            render_lock_ttl_seconds: 1800,
            max_active_jobs: 0,
            merge_max_ms: 0,
            final_pdf_ttl_hours: 24,
            payload_mac_key: String::new(),
            svg_converter_bin: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let render_defaults = RenderConfig::default();

        let batch_size: u32 = env_parse("VECTOR_BATCH_SIZE", render_defaults.batch_size);
        let lock_ttl: u64 = env_parse(
            "VECTOR_RENDER_LOCK_TTL_SECONDS",
            render_defaults.render_lock_ttl_seconds,
        );

        Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            render: RenderConfig {
                worker_concurrency: env_parse(
                    "VECTOR_WORKER_CONCURRENCY",
                    render_defaults.worker_concurrency,
                ),
                max_pages: env_parse("VECTOR_MAX_PAGES", render_defaults.max_pages),
                max_series_end: env_parse("VECTOR_MAX_SERIES_END", render_defaults.max_series_end),
                // Batch size is capped so a single child never holds an
                // unbounded number of rendered pages in memory.
                batch_size: batch_size.clamp(1, 50),
                batch_attempts: env_parse("VECTOR_BATCH_ATTEMPTS", render_defaults.batch_attempts)
                    .max(1),
                // The lock must outlive the worst-case render+merge; there is
                // no renewal, the reaper reclaims abandoned locks.
                render_lock_ttl_seconds: lock_ttl.max(60),
                max_active_jobs: env_parse("VECTOR_MAX_ACTIVE_JOBS", render_defaults.max_active_jobs),
                merge_max_ms: env_parse("VECTOR_MERGE_MAX_MS", render_defaults.merge_max_ms),
                final_pdf_ttl_hours: env_parse(
                    "FINAL_PDF_TTL_HOURS",
                    render_defaults.final_pdf_ttl_hours,
                ),
                payload_mac_key: env::var("PAYLOAD_MAC_KEY").unwrap_or_default(),
                svg_converter_bin: env::var("SVG_CONVERTER_BIN").ok(),
            },
            quota: QuotaConfig {
                request_ttl_seconds: env_parse(
                    "PRINT_REQUEST_TTL_SECONDS",
                    defaults.quota.request_ttl_seconds,
                ),
            },
            reaper: ReaperConfig {
                cleanup_interval_ms: env_parse(
                    "JOB_CLEANUP_INTERVAL_MS",
                    defaults.reaper.cleanup_interval_ms,
                ),
                job_stale_ms: env_parse("PRINT_JOB_STALE_MS", defaults.reaper.job_stale_ms),
                failed_archive_days: env_parse(
                    "FAILED_JOB_ARCHIVE_DAYS",
                    defaults.reaper.failed_archive_days,
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let config = Config::default();
        assert_eq!(config.render.max_pages, 700);
        assert_eq!(config.render.max_series_end, 1_000_000_000);
        assert_eq!(config.render.batch_attempts, 3);
        assert_eq!(config.render.render_lock_ttl_seconds, 1800);
        assert_eq!(config.render.max_active_jobs, 0);
        assert_eq!(config.render.final_pdf_ttl_hours, 24);
        assert_eq!(config.quota.request_ttl_seconds, 300);
        assert_eq!(config.reaper.cleanup_interval_ms, 300_000);
        assert_eq!(config.reaper.job_stale_ms, 900_000);
    }
}
