//! Imprenta Server worker daemon
//!
//! Wires the durable store, caches, layout engine, and render queue; runs
//! the job reaper and the orphaned-job dispatcher until shutdown. The HTTP
//! surface lives in a separate process and drives this crate as a library.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imprenta_server::blob::{BlobStore, MemoryBlobStore};
use imprenta_server::config::Config;
use imprenta_server::convert::{CommandConverter, SvgConverter};
use imprenta_server::db;
use imprenta_server::job::JobRepository;
use imprenta_server::kv::{KvCache, MemoryKv};
use imprenta_server::layout::{LayoutEngine, RenderCaches};
use imprenta_server::reaper::Reaper;
use imprenta_server::scheduler::{RenderContext, RenderQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imprenta_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env();
    anyhow::ensure!(
        !config.render.payload_mac_key.is_empty(),
        "PAYLOAD_MAC_KEY must be set"
    );

    tracing::info!("Starting Imprenta Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", config.database.url);

    let pool = db::create_pool(&config.database.url)
        .await
        .context("failed to initialize database")?;

    // Blob and KV transports are deployment-specific; the in-process
    // implementations back single-node installs.
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let kv: Option<Arc<dyn KvCache>> = Some(Arc::new(MemoryKv::new()));

    let converter = CommandConverter::from_config(config.render.svg_converter_bin.as_deref())
        .map(|c| Arc::new(c) as Arc<dyn SvgConverter>);
    if converter.is_none() {
        tracing::warn!("SVG_CONVERTER_BIN not set; SVG sources will be rejected");
    }

    let engine = Arc::new(LayoutEngine::new(
        blob.clone(),
        converter,
        Arc::new(RenderCaches::default()),
    ));
    let ctx = RenderContext {
        config: Arc::new(config.render.clone()),
        pool: pool.clone(),
        kv,
        blob: blob.clone(),
        engine,
    };
    let queue = Arc::new(RenderQueue::new(config.render.worker_concurrency));

    let reaper = Arc::new(Reaper::new(pool.clone(), blob, config.reaper.clone()));
    let reaper_handle = reaper.start();
    let dispatcher_handle = tokio::spawn(dispatch_orphaned_jobs(
        ctx,
        queue,
        Duration::from_millis(config.reaper.cleanup_interval_ms.max(1000)),
    ));

    tracing::info!(
        concurrency = config.render.worker_concurrency,
        "worker daemon ready"
    );
    shutdown_signal().await;

    reaper_handle.abort();
    dispatcher_handle.abort();
    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Re-enqueue PENDING jobs whose flow did not survive a worker restart. A
/// job is only picked up once it has sat untouched for a minute, so freshly
/// admitted jobs in other processes are left alone. Each tick also reports
/// the global active-job counter.
async fn dispatch_orphaned_jobs(ctx: RenderContext, queue: Arc<RenderQueue>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        if let Some(kv) = &ctx.kv {
            match kv.active_render_jobs().await {
                Ok(active) if active > 0 => {
                    tracing::info!(active, "render jobs in flight");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "active-job counter unavailable"),
            }
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(60);
        let orphaned = match JobRepository::new(&ctx.pool).pending_stale(cutoff).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "orphaned-job scan failed");
                continue;
            }
        };
        for job in orphaned {
            tracing::info!(job_id = %job.id, document_id = %job.document_id, "resuming orphaned job");
            queue.enqueue_render_flow(
                ctx.clone(),
                job.id.clone(),
                job.document_id.clone(),
                job.total_pages,
            );
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
