//! Shared helpers for integration tests

use std::sync::Arc;
use std::time::Duration;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::json;
use sqlx::SqlitePool;

use imprenta_server::blob::MemoryBlobStore;
use imprenta_server::config::RenderConfig;
use imprenta_server::db;
use imprenta_server::job::{JobRepository, JobStatus, PrintJob};
use imprenta_server::kv::MemoryKv;
use imprenta_server::layout::{LayoutEngine, RenderCaches};
use imprenta_server::metadata::VectorMetadata;
use imprenta_server::scheduler::{RenderContext, RenderQueue};

/// Build a minimal single-page PDF with the given page size.
pub fn minimal_pdf(width: f64, height: f64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "re",
                vec![
                    Object::Real(10.0),
                    Object::Real(10.0),
                    Object::Real((width - 20.0) as f32),
                    Object::Real((height - 20.0) as f32),
                ],
            ),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {},
        "MediaBox" => vec![
            Object::Real(0.0),
            Object::Real(0.0),
            Object::Real(width as f32),
            Object::Real(height as f32),
        ],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// A fully wired scheduler environment over in-memory collaborators.
pub struct Harness {
    pub pool: SqlitePool,
    pub blob: Arc<MemoryBlobStore>,
    pub kv: Arc<MemoryKv>,
    pub ctx: RenderContext,
    pub queue: RenderQueue,
}

pub async fn harness_with(configure: impl FnOnce(&mut RenderConfig)) -> Harness {
    let pool = db::create_test_pool().await.unwrap();
    let blob = Arc::new(MemoryBlobStore::new());
    let kv = Arc::new(MemoryKv::new());

    let mut config = RenderConfig {
        payload_mac_key: "test-secret".to_string(),
        ..RenderConfig::default()
    };
    configure(&mut config);

    let engine = Arc::new(LayoutEngine::new(
        blob.clone(),
        None,
        Arc::new(RenderCaches::default()),
    ));
    let ctx = RenderContext {
        config: Arc::new(config),
        pool: pool.clone(),
        kv: Some(kv.clone()),
        blob: blob.clone(),
        engine,
    };
    let queue = RenderQueue::new(4);

    Harness {
        pool,
        blob,
        kv,
        ctx,
        queue,
    }
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

/// Metadata for the standard test ticket sheet over `src.pdf`.
pub fn ticket_metadata(total_pages: u32, repeat_per_page: u32) -> VectorMetadata {
    serde_json::from_value(json!({
        "sourcePdfKey": "documents/original/src.pdf",
        "ticketCrop": { "pageIndex": 0, "xRatio": 0.1, "yRatio": 0.1,
                        "widthRatio": 0.8, "heightRatio": 0.6 },
        "layout": { "pageSize": "A4", "totalPages": total_pages,
                    "repeatPerPage": repeat_per_page, "slotSpacingPt": 0 },
        "series": [ { "id": "s1", "prefix": "A", "padLength": 3, "start": 1,
                      "step": 1, "font": "Helvetica", "fontSize": 12,
                      "slots": [ { "xRatio": 0.1, "yRatio": 0.1 } ] } ],
        "watermarks": []
    }))
    .unwrap()
}

/// Upload the standard source PDF for [`ticket_metadata`].
pub async fn seed_source(harness: &Harness) {
    use imprenta_server::blob::BlobStore;
    harness
        .blob
        .put(
            "documents/original/src.pdf",
            minimal_pdf(595.28, 841.89),
            "application/pdf",
        )
        .await
        .unwrap();
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_terminal(pool: &SqlitePool, job_id: &str) -> PrintJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = JobRepository::new(pool)
            .load(job_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("job {job_id} vanished"));
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {job_id} stuck in {:?}", job.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Page content of page `number` (1-based) as text.
pub fn page_text(pdf: &[u8], number: u32) -> String {
    let doc = Document::load_mem(pdf).unwrap();
    let pages = doc.get_pages();
    let page_id = pages[&number];
    String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
}

/// Assert a terminal status with a readable failure message.
pub fn assert_status(job: &PrintJob, expected: JobStatus) {
    assert_eq!(
        job.status,
        expected,
        "job {} ended as {:?} (error: {:?})",
        job.id,
        job.status,
        job.error
    );
}
