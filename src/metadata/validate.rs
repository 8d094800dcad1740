//! Metadata validation
//!
//! Shape validation shared with pre-admission, plus the stricter bounds
//! applied at enqueue time. Violations are collected into a structured list;
//! a metadata document that fails here is never enqueued.

use std::fmt;

use crate::config::RenderConfig;

use super::color;
use super::types::{Series, VectorMetadata, Watermark};

/// One field-level violation.
#[derive(Debug, Clone)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Structured list of validation violations.
#[derive(Debug, Clone, Default)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Shape validation: ratio bounds, series and watermark constraints.
pub fn validate(meta: &VectorMetadata) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if meta.source_pdf_key.trim().is_empty() {
        errors.push("sourcePdfKey", "must not be empty");
    }

    let crop = &meta.ticket_crop;
    if !(0.0..=1.0).contains(&crop.x_ratio) {
        errors.push("ticketCrop.xRatio", "must be within [0, 1]");
    }
    if !(0.0..=1.0).contains(&crop.y_ratio) {
        errors.push("ticketCrop.yRatio", "must be within [0, 1]");
    }
    if !(crop.width_ratio > 0.0 && crop.width_ratio <= 1.0) {
        errors.push("ticketCrop.widthRatio", "must be within (0, 1]");
    }
    if !(crop.height_ratio > 0.0 && crop.height_ratio <= 1.0) {
        errors.push("ticketCrop.heightRatio", "must be within (0, 1]");
    }

    let layout = &meta.layout;
    if layout.page_size != "A4" {
        errors.push("layout.pageSize", "only A4 is supported");
    }
    if !(1..=100_000).contains(&layout.total_pages) {
        errors.push("layout.totalPages", "must be within [1, 100000]");
    }
    if !(1..=16).contains(&layout.repeat_per_page) {
        errors.push("layout.repeatPerPage", "must be within [1, 16]");
    }
    if let Some(spacing) = layout.slot_spacing_pt {
        if !(spacing >= 0.0 && spacing.is_finite()) {
            errors.push("layout.slotSpacingPt", "must be a finite value >= 0");
        }
    }

    for (i, series) in meta.series.iter().enumerate() {
        validate_series(series, layout.repeat_per_page, i, &mut errors);
    }

    for (i, watermark) in meta.watermarks.iter().enumerate() {
        validate_watermark(watermark, i, &mut errors);
    }

    errors.into_result()
}

fn validate_series(series: &Series, repeat_per_page: u32, index: usize, errors: &mut ValidationErrors) {
    let field = |name: &str| format!("series[{index}].{name}");

    if series.step < 1 {
        errors.push(field("step"), "must be >= 1");
    }
    if !(6.0..=72.0).contains(&series.font_size) {
        errors.push(field("fontSize"), "must be within [6, 72]");
    }
    if let Some(color) = &series.color {
        if !color::is_valid(color) {
            errors.push(field("color"), "unrecognized color");
        }
    }
    let slots = series.slots.len() as u32;
    if slots != 1 && slots != repeat_per_page {
        errors.push(
            field("slots"),
            format!("length must be 1 or repeatPerPage ({repeat_per_page})"),
        );
    }
    for (s, slot) in series.slots.iter().enumerate() {
        if !slot.x_ratio.is_finite() || !slot.y_ratio.is_finite() {
            errors.push(field(&format!("slots[{s}]")), "ratios must be finite");
        }
    }
    if let (Some(sizes), Some(offsets)) = (&series.letter_font_sizes, &series.letter_offsets) {
        if offsets.len() > sizes.len() {
            errors.push(
                field("letterOffsets"),
                "must not be longer than letterFontSizes",
            );
        }
    }
}

fn validate_watermark(watermark: &Watermark, index: usize, errors: &mut ValidationErrors) {
    let field = |name: &str| format!("watermarks[{index}].{name}");

    let (opacity, rotate, color) = match watermark {
        Watermark::Text(w) => {
            if w.value.is_empty() {
                errors.push(field("value"), "must not be empty");
            }
            if !(w.font_size > 0.0 && w.font_size.is_finite()) {
                errors.push(field("fontSize"), "must be a positive finite value");
            }
            (w.opacity, w.rotate, w.color.as_deref())
        }
        Watermark::Svg(w) => {
            if !w.svg_path.contains("<svg") {
                errors.push(field("svgPath"), "must be inline <svg> markup");
            }
            if let Some(scale) = w.scale {
                if !(scale > 0.0 && scale.is_finite()) {
                    errors.push(field("scale"), "must be a positive finite value");
                }
            }
            (w.opacity, w.rotate, None)
        }
    };

    if !(0.0..=1.0).contains(&opacity) {
        errors.push(field("opacity"), "must be within [0, 1]");
    }
    if !rotate.is_finite() {
        errors.push(field("rotate"), "must be a finite number");
    }
    let position = watermark.position();
    if !position.x.is_finite() || !position.y.is_finite() {
        errors.push(field("position"), "coordinates must be finite");
    }
    if let Some(color) = color {
        if !color::is_valid(color) {
            errors.push(field("color"), "unrecognized color");
        }
    }
}

/// Enqueue-time bounds layered on top of [`validate`].
pub fn validate_for_enqueue(
    meta: &VectorMetadata,
    config: &RenderConfig,
) -> Result<(), ValidationErrors> {
    let mut errors = match validate(meta) {
        Ok(()) => ValidationErrors::default(),
        Err(e) => e,
    };

    if meta.layout.total_pages > config.max_pages {
        errors.push(
            "layout.totalPages",
            format!("must not exceed {}", config.max_pages),
        );
    }

    for (i, series) in meta.series.iter().enumerate() {
        let end = series.end_value(meta.layout.total_pages, meta.layout.repeat_per_page);
        if end > config.max_series_end {
            errors.push(
                format!("series[{i}]"),
                format!("progression ends at {end}, above the {} cap", config.max_series_end),
            );
        }
    }

    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::{LayoutSpec, SlotRatio, TicketCrop};

    fn minimal() -> VectorMetadata {
        VectorMetadata {
            source_pdf_key: "documents/original/x.pdf".into(),
            document_id: None,
            color_mode: None,
            ticket_crop: TicketCrop {
                page_index: 0,
                x_ratio: 0.1,
                y_ratio: 0.1,
                width_ratio: 0.8,
                height_ratio: 0.6,
            },
            layout: LayoutSpec {
                page_size: "A4".into(),
                total_pages: 2,
                repeat_per_page: 1,
                slot_spacing_pt: None,
            },
            series: vec![],
            watermarks: vec![],
        }
    }

    fn series(step: i64, slots: usize) -> Series {
        Series {
            id: "s".into(),
            prefix: "A".into(),
            pad_length: Some(3),
            start: 1,
            step,
            font: "Helvetica".into(),
            font_size: 12.0,
            color: Some("#000000".into()),
            slots: vec![
                SlotRatio {
                    x_ratio: 0.1,
                    y_ratio: 0.1
                };
                slots
            ],
            letter_font_sizes: None,
            letter_offsets: None,
        }
    }

    #[test]
    fn accepts_minimal() {
        assert!(validate(&minimal()).is_ok());
    }

    #[test]
    fn full_crop_ratio_accepted() {
        let mut meta = minimal();
        meta.ticket_crop.width_ratio = 1.0;
        meta.ticket_crop.height_ratio = 1.0;
        assert!(validate(&meta).is_ok());
    }

    #[test]
    fn rejects_zero_width_crop() {
        let mut meta = minimal();
        meta.ticket_crop.width_ratio = 0.0;
        let errors = validate(&meta).unwrap_err();
        assert!(errors.errors.iter().any(|e| e.field.contains("widthRatio")));
    }

    #[test]
    fn rejects_bad_slot_count() {
        let mut meta = minimal();
        meta.layout.repeat_per_page = 4;
        meta.series = vec![series(1, 3)];
        assert!(validate(&meta).is_err());

        meta.series = vec![series(1, 4)];
        assert!(validate(&meta).is_ok());
        meta.series = vec![series(1, 1)];
        assert!(validate(&meta).is_ok());
    }

    #[test]
    fn enqueue_bounds_pages() {
        let config = RenderConfig::default();
        let mut meta = minimal();
        meta.layout.total_pages = config.max_pages;
        assert!(validate_for_enqueue(&meta, &config).is_ok());
        meta.layout.total_pages = config.max_pages + 1;
        assert!(validate_for_enqueue(&meta, &config).is_err());
    }

    #[test]
    fn enqueue_bounds_series_end() {
        let config = RenderConfig::default();
        let mut meta = minimal();
        meta.layout.total_pages = 2;
        meta.layout.repeat_per_page = 1;

        // End lands exactly on the cap: start + (2·1 − 1)·step = cap.
        let mut s = series(1, 1);
        s.start = config.max_series_end - 1;
        meta.series = vec![s.clone()];
        assert!(validate_for_enqueue(&meta, &config).is_ok());

        s.start = config.max_series_end;
        meta.series = vec![s];
        assert!(validate_for_enqueue(&meta, &config).is_err());
    }
}
