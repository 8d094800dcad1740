//! Standard-font metrics
//!
//! Width and ascent tables for the base-14 fonts the service embeds by
//! reference. Values are AFM units (1/1000 em) for the printable ASCII
//! range; characters outside it fall back to a fixed default advance.

use super::error::{LayoutError, Result};

/// Advance used for characters outside the table.
const DEFAULT_WIDTH: u16 = 500;

/// Metrics for one standard font.
#[derive(Debug, Clone, Copy)]
pub struct FontMetrics {
    /// PDF BaseFont name.
    pub base_font: &'static str,
    ascent: i32,
    widths: &'static [u16; 95],
}

/// Helvetica AFM widths for characters 0x20..=0x7E.
#[rustfmt::skip]
static HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333,
    278, 278, 556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278,
    584, 584, 584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, 722, 278,
    500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
    667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556,
    278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500,
    278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

/// Helvetica-Bold AFM widths for characters 0x20..=0x7E.
#[rustfmt::skip]
static HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333,
    278, 278, 556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333,
    584, 584, 584, 611, 975, 722, 722, 722, 722, 667, 611, 778, 722, 278,
    556, 722, 611, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
    667, 667, 611, 333, 278, 333, 584, 556, 333, 556, 611, 556, 611, 556,
    333, 611, 611, 278, 278, 556, 278, 889, 611, 611, 611, 611, 389, 556,
    333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

/// Courier is monospaced at 600.
static COURIER_WIDTHS: [u16; 95] = [600; 95];

static HELVETICA: FontMetrics = FontMetrics {
    base_font: "Helvetica",
    ascent: 718,
    widths: &HELVETICA_WIDTHS,
};

static HELVETICA_BOLD: FontMetrics = FontMetrics {
    base_font: "Helvetica-Bold",
    ascent: 718,
    widths: &HELVETICA_BOLD_WIDTHS,
};

static COURIER: FontMetrics = FontMetrics {
    base_font: "Courier",
    ascent: 629,
    widths: &COURIER_WIDTHS,
};

impl FontMetrics {
    /// Resolve a metadata font name to embedded metrics.
    pub fn resolve(name: &str) -> Result<&'static FontMetrics> {
        match name.trim().to_ascii_lowercase().as_str() {
            "helvetica" | "arial" | "sans-serif" => Ok(&HELVETICA),
            "helvetica-bold" | "arial-bold" => Ok(&HELVETICA_BOLD),
            "courier" | "courier-new" | "monospace" => Ok(&COURIER),
            _ => Err(LayoutError::UnknownFont(name.to_string())),
        }
    }

    /// Advance of one character at the given size, in points.
    pub fn width_of(&self, ch: char, size: f64) -> f64 {
        let code = ch as u32;
        let units = if (0x20..=0x7E).contains(&code) {
            self.widths[(code - 0x20) as usize]
        } else {
            DEFAULT_WIDTH
        };
        units as f64 / 1000.0 * size
    }

    /// Advance of a string at the given size, in points.
    pub fn text_width(&self, text: &str, size: f64) -> f64 {
        text.chars().map(|ch| self.width_of(ch, size)).sum()
    }

    /// Ascent above the baseline at the given size, in points.
    pub fn ascent(&self, size: f64) -> f64 {
        self.ascent as f64 / 1000.0 * size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_families() {
        assert_eq!(FontMetrics::resolve("Helvetica").unwrap().base_font, "Helvetica");
        assert_eq!(
            FontMetrics::resolve("helvetica-bold").unwrap().base_font,
            "Helvetica-Bold"
        );
        assert_eq!(FontMetrics::resolve("Courier").unwrap().base_font, "Courier");
        assert!(FontMetrics::resolve("Papyrus").is_err());
    }

    #[test]
    fn widths_scale_linearly() {
        let helvetica = FontMetrics::resolve("Helvetica").unwrap();
        // 'A' is 667 units.
        assert!((helvetica.width_of('A', 10.0) - 6.67).abs() < 1e-9);
        assert!((helvetica.width_of('A', 20.0) - 13.34).abs() < 1e-9);
    }

    #[test]
    fn ascent_at_size() {
        let helvetica = FontMetrics::resolve("Helvetica").unwrap();
        assert!((helvetica.ascent(12.0) - 8.616).abs() < 1e-9);
    }

    #[test]
    fn courier_is_monospaced() {
        let courier = FontMetrics::resolve("Courier").unwrap();
        assert_eq!(
            courier.text_width("iii", 10.0),
            courier.text_width("WWW", 10.0)
        );
    }
}
