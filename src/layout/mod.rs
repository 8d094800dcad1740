//! Vector layout engine
//!
//! Deterministic, side-effect-free transformation from (metadata, source
//! bytes) to a single A4 PDF page. Identical inputs produce byte-equivalent
//! output; the only I/O is fetching the source and invoking the external
//! SVG→PDF converter, both behind explicit collaborators.

mod cache;
mod error;
pub mod fonts;
pub mod geometry;
mod page;
mod svg_path;
mod svg_source;

pub use cache::{content_key, CacheConfig, RenderCaches};
pub use error::{LayoutError, Result};
pub use page::{PageComposer, PdfMerger, TextRun, Transform};
pub use svg_path::{compile_watermark, CompiledSvg};
pub use svg_source::normalize_source_svg;

use std::sync::Arc;

use lopdf::Document;

use crate::blob::BlobStore;
use crate::convert::{ConvertError, SvgConverter};
use crate::metadata::{
    Color, Series, SvgWatermark, TextWatermark, VectorMetadata, Watermark, BLACK,
};

use fonts::FontMetrics;
use geometry::{slot_grid, ContentBox};
use page::page_media_box;

/// The layout engine and its collaborators.
pub struct LayoutEngine {
    blob: Arc<dyn BlobStore>,
    converter: Option<Arc<dyn SvgConverter>>,
    caches: Arc<RenderCaches>,
}

impl LayoutEngine {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        converter: Option<Arc<dyn SvgConverter>>,
        caches: Arc<RenderCaches>,
    ) -> Self {
        Self {
            blob,
            converter,
            caches,
        }
    }

    /// Render one output page. `source_key` is the resolved blob key of the
    /// source artifact (any `document:{id}` indirection is resolved by the
    /// caller).
    pub async fn render_page(
        &self,
        meta: &VectorMetadata,
        source_key: &str,
        page_index: u32,
    ) -> Result<Vec<u8>> {
        let source = self.resolve_source(source_key).await?;
        compose_page(meta, &source, page_index, &self.caches)
    }

    /// Fetch the source artifact and deliver it as PDF bytes, converting
    /// SVG sources through the external converter. Converted sources are
    /// cached by content hash.
    pub async fn resolve_source(&self, source_key: &str) -> Result<Arc<Vec<u8>>> {
        let raw = self.blob.get(source_key).await?;
        if raw.starts_with(b"%PDF-") {
            return Ok(Arc::new(raw));
        }

        let text = String::from_utf8_lossy(&raw).into_owned();
        if !text.contains("<svg") {
            return Err(LayoutError::UnsupportedSource);
        }

        let key = content_key(&raw);
        if let Some(pdf) = self.caches.get_source(&key) {
            return Ok(pdf);
        }

        let converter = self
            .converter
            .as_ref()
            .ok_or(ConvertError::ConverterMissing)?;
        let normalized = normalize_source_svg(&text)?;
        let pdf = converter.convert(&normalized).await?;
        if !pdf.starts_with(b"%PDF-") {
            return Err(LayoutError::BadPdfHeader("svg conversion"));
        }

        let pdf = Arc::new(pdf);
        self.caches.put_source(key, pdf.clone());
        Ok(pdf)
    }
}

/// Pure page composition. `page_index` only affects serial-number values;
/// everything else is identical across the job's pages.
pub fn compose_page(
    meta: &VectorMetadata,
    source_pdf: &[u8],
    page_index: u32,
    caches: &RenderCaches,
) -> Result<Vec<u8>> {
    let src = Document::load_mem(source_pdf)?;
    let pages = src.get_pages();
    let page_number = meta.ticket_crop.page_index + 1;
    let src_page_id = *pages
        .get(&page_number)
        .ok_or(LayoutError::PageOutOfRange {
            index: meta.ticket_crop.page_index,
            pages: pages.len(),
        })?;

    let media_box = page_media_box(&src, src_page_id)?;
    let src_width = media_box[2] - media_box[0];
    let src_height = media_box[3] - media_box[1];

    // Crop rectangle in source points; the metadata's top-down y ratio is
    // flipped into PDF's bottom-up space.
    let crop = &meta.ticket_crop;
    let crop_width = crop.width_ratio * src_width;
    let crop_height = crop.height_ratio * src_height;
    let crop_left = media_box[0] + crop.x_ratio * src_width;
    let crop_bottom = media_box[1] + src_height - crop.y_ratio * src_height - crop_height;
    let bbox = [
        crop_left,
        crop_bottom,
        crop_left + crop_width,
        crop_bottom + crop_height,
    ];

    let grid = slot_grid(
        meta.layout.repeat_per_page,
        meta.layout.slot_spacing_pt.unwrap_or(0.0),
    );

    let mut composer = PageComposer::new();
    let form = composer.import_crop_xobject(&src, src_page_id, bbox)?;

    let mut content_boxes = Vec::with_capacity(grid.len());
    for slot in &grid {
        let content = slot.content_box(crop_width, crop_height);
        composer.draw_form(
            &form,
            content.scale,
            content.left - bbox[0] * content.scale,
            content.bottom - bbox[1] * content.scale,
        );
        content_boxes.push(content);
    }

    for watermark in &meta.watermarks {
        match watermark {
            Watermark::Text(text) => {
                draw_text_watermark(&mut composer, text, watermark, &content_boxes)?
            }
            Watermark::Svg(svg) => {
                draw_svg_watermark(&mut composer, svg, watermark, &content_boxes, caches)?
            }
        }
    }

    for series in &meta.series {
        draw_series(
            &mut composer,
            series,
            page_index,
            crop_width,
            crop_height,
            &content_boxes,
        )?;
    }

    composer.finish()
}

/// Anchor positions for one watermark: replicated per slot when
/// object-relative (with the top-down ratio flipped to bottom-up points),
/// otherwise the single absolute position.
fn watermark_anchors(watermark: &Watermark, content_boxes: &[ContentBox]) -> Vec<(f64, f64)> {
    let position = watermark.position();
    if watermark.relative_to_object() {
        content_boxes
            .iter()
            .map(|content| {
                (
                    content.left + position.x * content.width,
                    content.bottom + (1.0 - position.y) * content.height,
                )
            })
            .collect()
    } else {
        vec![(position.x, position.y)]
    }
}

fn draw_text_watermark(
    composer: &mut PageComposer,
    text: &TextWatermark,
    watermark: &Watermark,
    content_boxes: &[ContentBox],
) -> Result<()> {
    let font = FontMetrics::resolve(&text.font_family)?;
    let color = text
        .color
        .as_deref()
        .and_then(Color::parse)
        .unwrap_or(BLACK);

    for (x, y) in watermark_anchors(watermark, content_boxes) {
        composer.draw_text(&TextRun {
            text: &text.value,
            x,
            y: y - font.ascent(text.font_size),
            size: text.font_size,
            font,
            color,
            opacity: text.opacity,
            rotate: text.rotate,
        });
    }
    Ok(())
}

fn draw_svg_watermark(
    composer: &mut PageComposer,
    svg: &SvgWatermark,
    watermark: &Watermark,
    content_boxes: &[ContentBox],
    caches: &RenderCaches,
) -> Result<()> {
    let key = content_key(svg.svg_path.as_bytes());
    let compiled = match caches.get_svg(&key) {
        Some(compiled) => compiled,
        None => {
            let compiled = Arc::new(compile_watermark(&svg.svg_path)?);
            caches.put_svg(key, compiled.clone());
            compiled
        }
    };

    let scale = svg.scale.unwrap_or(1.0);
    for (x, y) in watermark_anchors(watermark, content_boxes) {
        // Anchor, screen-clockwise rotation, then uniform scale with the
        // y-flip from SVG's top-down space into page points.
        let transform = Transform::translate(x, y)
            .then(Transform::rotate_deg(-svg.rotate))
            .then(Transform::scale(scale, -scale));
        composer.draw_svg(&compiled, transform, svg.opacity);
    }
    Ok(())
}

fn draw_series(
    composer: &mut PageComposer,
    series: &Series,
    page_index: u32,
    object_width: f64,
    object_height: f64,
    content_boxes: &[ContentBox],
) -> Result<()> {
    let font = FontMetrics::resolve(&series.font)?;
    let color = series
        .color
        .as_deref()
        .and_then(Color::parse)
        .unwrap_or(BLACK);
    let repeat = content_boxes.len() as u32;

    for (slot_index, content) in content_boxes.iter().enumerate() {
        let slot = if series.slots.len() == 1 {
            series.slots[0]
        } else {
            series.slots[slot_index]
        };

        let value = series.value_at(page_index, slot_index as u32, repeat);
        let text = series.format_value(value);

        // Series ratios address the object bounding box in source points;
        // the baseline drops by the font ascent from the anchored top-left.
        let baseline_in_object = slot.y_ratio * object_height + font.ascent(series.font_size);
        let object_top = content.bottom + object_height * content.scale;
        let draw_x = content.left + slot.x_ratio * object_width * content.scale;
        let draw_y = object_top - baseline_in_object * content.scale;

        match &series.letter_font_sizes {
            Some(letter_sizes) if !letter_sizes.is_empty() => {
                let mut cursor = draw_x;
                for (i, ch) in text.chars().enumerate() {
                    let letter_size = letter_sizes
                        .get(i)
                        .copied()
                        .unwrap_or(series.font_size)
                        * content.scale;
                    let offset = series
                        .letter_offsets
                        .as_ref()
                        .and_then(|offsets| offsets.get(i))
                        .copied()
                        .unwrap_or(0.0)
                        * content.scale;
                    let glyph = ch.to_string();
                    composer.draw_text(&TextRun {
                        text: &glyph,
                        x: cursor,
                        y: draw_y - offset,
                        size: letter_size,
                        font,
                        color,
                        opacity: 1.0,
                        rotate: 0.0,
                    });
                    cursor += font.width_of(ch, letter_size);
                }
            }
            _ => {
                composer.draw_text(&TextRun {
                    text: &text,
                    x: draw_x,
                    y: draw_y,
                    size: series.font_size * content.scale,
                    font,
                    color,
                    opacity: 1.0,
                    rotate: 0.0,
                });
            }
        }
    }
    Ok(())
}
