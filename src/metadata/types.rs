//! Vector metadata wire types

use serde::{Deserialize, Serialize};

/// The full render specification submitted at admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadata {
    /// Blob key of the source artifact, or `document:{id}` resolved through
    /// the document store before rendering.
    pub source_pdf_key: String,

    /// Optional override used for render-lock scoping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_mode: Option<ColorMode>,

    pub ticket_crop: TicketCrop,

    pub layout: LayoutSpec,

    #[serde(default)]
    pub series: Vec<Series>,

    #[serde(default)]
    pub watermarks: Vec<Watermark>,
}

impl VectorMetadata {
    /// The identity the render lock is scoped to.
    pub fn lock_document_id(&self) -> &str {
        self.document_id.as_deref().unwrap_or(&self.source_pdf_key)
    }

    /// Document-store id when `sourcePdfKey` is a `document:{id}` reference.
    pub fn document_reference(&self) -> Option<&str> {
        self.source_pdf_key.strip_prefix("document:")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "CMYK")]
    Cmyk,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Rgb => "RGB",
            ColorMode::Cmyk => "CMYK",
        }
    }
}

/// Region of the source page to crop, as ratios against the source page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCrop {
    #[serde(default)]
    pub page_index: u32,
    pub x_ratio: f64,
    pub y_ratio: f64,
    pub width_ratio: f64,
    pub height_ratio: f64,
}

/// Output page grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSpec {
    /// Only "A4" is supported.
    #[serde(default = "default_page_size")]
    pub page_size: String,
    pub total_pages: u32,
    pub repeat_per_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_spacing_pt: Option<f64>,
}

fn default_page_size() -> String {
    "A4".to_string()
}

/// Arithmetic-progression serial-number overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub id: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pad_length: Option<usize>,
    pub start: i64,
    pub step: i64,
    pub font: String,
    pub font_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// One slot (applied to every slot) or exactly `repeatPerPage` entries.
    pub slots: Vec<SlotRatio>,
    /// Per-letter font sizes; enables the per-letter draw mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub letter_font_sizes: Option<Vec<f64>>,
    /// Per-letter baseline offsets, paired with `letterFontSizes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub letter_offsets: Option<Vec<f64>>,
}

impl Series {
    /// Value rendered at page `page`, slot `slot` under `repeat_per_page`.
    pub fn value_at(&self, page: u32, slot: u32, repeat_per_page: u32) -> i64 {
        self.start + (page as i64 * repeat_per_page as i64 + slot as i64) * self.step
    }

    /// Final value of the progression across the whole job.
    pub fn end_value(&self, total_pages: u32, repeat_per_page: u32) -> i64 {
        let count = total_pages as i64 * repeat_per_page as i64;
        self.start + (count - 1).max(0) * self.step
    }

    /// Zero-padded, prefixed rendering of one value.
    pub fn format_value(&self, value: i64) -> String {
        match self.pad_length {
            Some(width) => format!("{}{:0width$}", self.prefix, value, width = width),
            None => format!("{}{}", self.prefix, value),
        }
    }
}

/// Slot-relative position, as ratios inside the object bounding box.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRatio {
    pub x_ratio: f64,
    pub y_ratio: f64,
}

/// Watermark overlay; a tagged union over text and path-only SVG stamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Watermark {
    #[serde(rename = "text")]
    Text(TextWatermark),
    #[serde(rename = "svg")]
    Svg(SvgWatermark),
}

impl Watermark {
    pub fn id(&self) -> &str {
        match self {
            Watermark::Text(w) => &w.id,
            Watermark::Svg(w) => &w.id,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Watermark::Text(w) => w.position,
            Watermark::Svg(w) => w.position,
        }
    }

    pub fn relative_to_object(&self) -> bool {
        let relative_to = match self {
            Watermark::Text(w) => &w.relative_to,
            Watermark::Svg(w) => &w.relative_to,
        };
        matches!(relative_to, Some(RelativeTo::Object))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextWatermark {
    pub id: String,
    pub value: String,
    pub font_family: String,
    pub font_size: f64,
    pub opacity: f64,
    #[serde(default)]
    pub rotate: f64,
    pub position: Position,
    #[serde(default)]
    pub relative_to: Option<RelativeTo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvgWatermark {
    pub id: String,
    /// Inline `<svg>…</svg>` markup, sanitized to path-only primitives.
    pub svg_path: String,
    pub opacity: f64,
    #[serde(default)]
    pub rotate: f64,
    pub position: Position,
    #[serde(default)]
    pub relative_to: Option<RelativeTo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelativeTo {
    #[serde(rename = "object")]
    Object,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_shape() {
        let json = r##"{
            "sourcePdfKey": "documents/original/x.pdf",
            "colorMode": "CMYK",
            "ticketCrop": { "pageIndex": 0, "xRatio": 0.1, "yRatio": 0.1,
                            "widthRatio": 0.5, "heightRatio": 0.4 },
            "layout": { "pageSize": "A4", "totalPages": 10,
                        "repeatPerPage": 4, "slotSpacingPt": 0 },
            "series": [ { "id": "s1", "prefix": "A", "padLength": 5, "start": 1,
                          "step": 1, "font": "Helvetica", "fontSize": 12,
                          "color": "#000000",
                          "slots": [ { "xRatio": 0.1, "yRatio": 0.1 } ] } ],
            "watermarks": [
                { "type": "text", "id": "w1", "value": "DRAFT",
                  "fontFamily": "Helvetica", "fontSize": 24, "opacity": 0.3,
                  "rotate": -30, "position": { "x": 0.5, "y": 0.5 },
                  "relativeTo": "object", "color": "#FF0000" },
                { "type": "svg", "id": "w2", "svgPath": "<svg></svg>",
                  "opacity": 1, "rotate": 0, "position": { "x": 10, "y": 10 },
                  "relativeTo": null, "scale": 1 }
            ]
        }"##;

        let meta: VectorMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.lock_document_id(), "documents/original/x.pdf");
        assert_eq!(meta.color_mode, Some(ColorMode::Cmyk));
        assert_eq!(meta.layout.total_pages, 10);
        assert_eq!(meta.series[0].pad_length, Some(5));
        assert!(matches!(meta.watermarks[0], Watermark::Text(_)));
        assert!(meta.watermarks[0].relative_to_object());
        assert!(!meta.watermarks[1].relative_to_object());
    }

    #[test]
    fn document_reference_detection() {
        let json = r#"{
            "sourcePdfKey": "document:doc-9",
            "documentId": "lock-scope",
            "ticketCrop": { "xRatio": 0, "yRatio": 0, "widthRatio": 1, "heightRatio": 1 },
            "layout": { "totalPages": 1, "repeatPerPage": 1 }
        }"#;
        let meta: VectorMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.document_reference(), Some("doc-9"));
        assert_eq!(meta.lock_document_id(), "lock-scope");
    }

    #[test]
    fn series_progression() {
        let series = Series {
            id: "s".into(),
            prefix: "A".into(),
            pad_length: Some(3),
            start: 1,
            step: 2,
            font: "Helvetica".into(),
            font_size: 12.0,
            color: None,
            slots: vec![SlotRatio {
                x_ratio: 0.0,
                y_ratio: 0.0,
            }],
            letter_font_sizes: None,
            letter_offsets: None,
        };
        // Page 1, slot 2 of 4 repeats: index 6 → 1 + 6·2 = 13.
        assert_eq!(series.value_at(1, 2, 4), 13);
        assert_eq!(series.end_value(2, 4), 1 + 7 * 2);
        assert_eq!(series.format_value(13), "A013");
    }
}
