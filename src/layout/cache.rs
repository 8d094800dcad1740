//! Render caches
//!
//! Content-addressed per-process caches for the layout engine: compiled
//! watermark SVG and converted source PDFs. Keys are SHA-256 of the input
//! bytes, so identical content always maps to the same entry regardless of
//! which job produced it. Bounded with LRU eviction.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::svg_path::CompiledSvg;

/// Cache configuration options
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of compiled watermark SVGs to keep.
    pub max_svg: usize,
    /// Maximum number of converted source PDFs to keep.
    pub max_sources: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_svg: 64,
            max_sources: 8,
        }
    }
}

/// SHA-256 content key.
pub type ContentKey = [u8; 32];

/// Hash bytes into a cache key.
pub fn content_key(bytes: &[u8]) -> ContentKey {
    let digest = Sha256::digest(bytes);
    digest.into()
}

/// Per-process content-addressed caches, passed to the engine explicitly.
pub struct RenderCaches {
    svg: Mutex<LruCache<ContentKey, Arc<CompiledSvg>>>,
    sources: Mutex<LruCache<ContentKey, Arc<Vec<u8>>>>,
}

impl Default for RenderCaches {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl RenderCaches {
    pub fn new(config: CacheConfig) -> Self {
        let svg_size = NonZeroUsize::new(config.max_svg.max(1)).unwrap();
        let source_size = NonZeroUsize::new(config.max_sources.max(1)).unwrap();
        Self {
            svg: Mutex::new(LruCache::new(svg_size)),
            sources: Mutex::new(LruCache::new(source_size)),
        }
    }

    pub fn get_svg(&self, key: &ContentKey) -> Option<Arc<CompiledSvg>> {
        self.svg.lock().get(key).cloned()
    }

    pub fn put_svg(&self, key: ContentKey, compiled: Arc<CompiledSvg>) {
        self.svg.lock().put(key, compiled);
    }

    pub fn get_source(&self, key: &ContentKey) -> Option<Arc<Vec<u8>>> {
        self.sources.lock().get(key).cloned()
    }

    pub fn put_source(&self, key: ContentKey, pdf: Arc<Vec<u8>>) {
        self.sources.lock().put(key, pdf);
    }
}
