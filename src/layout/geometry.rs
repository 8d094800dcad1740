//! Page geometry
//!
//! A4 constants, coordinate snapping, and the vertical slot grid. All
//! computed coordinates are snapped to 1/1000 pt so placement is stable
//! across platforms.

/// A4 width in points.
pub const A4_WIDTH: f64 = 595.28;
/// A4 height in points.
pub const A4_HEIGHT: f64 = 841.89;
/// Safe margin kept clear on all four edges.
pub const SAFE_MARGIN: f64 = 28.35;

/// Snap a coordinate to 1/1000 pt.
pub fn snap(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// One rectangular sub-area of the A4 page holding a copy of the crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The sub-rectangle of a slot occupied by the crop after aspect-preserving
/// scaling, plus the scale applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentBox {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

/// Build the vertical slot grid: `repeat` slots separated by `spacing` pt,
/// tiling the usable area bottom-up. Spacing that would leave no room
/// collapses to zero.
pub fn slot_grid(repeat: u32, spacing: f64) -> Vec<Slot> {
    let usable = A4_HEIGHT - 2.0 * SAFE_MARGIN;
    let repeat = repeat.max(1);
    let gap = if usable - (repeat - 1) as f64 * spacing <= 0.0 {
        0.0
    } else {
        spacing
    };
    let slot_height = (usable - (repeat - 1) as f64 * gap) / repeat as f64;
    let slot_width = A4_WIDTH - 2.0 * SAFE_MARGIN;

    (0..repeat)
        .map(|i| Slot {
            x: snap(SAFE_MARGIN),
            y: snap(SAFE_MARGIN + i as f64 * (slot_height + gap)),
            width: snap(slot_width),
            height: snap(slot_height),
        })
        .collect()
}

impl Slot {
    /// Fit a crop of `crop_width` × `crop_height` source points into this
    /// slot, preserving aspect ratio and aligning to the slot top.
    pub fn content_box(&self, crop_width: f64, crop_height: f64) -> ContentBox {
        let scale = (self.width / crop_width).min(self.height / crop_height);
        ContentBox {
            left: snap(self.x),
            bottom: snap(self.y + (self.height - crop_height * scale)),
            width: snap(crop_width * scale),
            height: snap(crop_height * scale),
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_slot_fills_usable_area() {
        let slots = slot_grid(1, 0.0);
        assert_eq!(slots.len(), 1);
        let slot = slots[0];
        assert_eq!(slot.x, snap(SAFE_MARGIN));
        assert_eq!(slot.y, snap(SAFE_MARGIN));
        assert_eq!(slot.width, snap(A4_WIDTH - 2.0 * SAFE_MARGIN));
        assert_eq!(slot.height, snap(A4_HEIGHT - 2.0 * SAFE_MARGIN));
    }

    #[test]
    fn four_slots_tile_with_spacing() {
        let slots = slot_grid(4, 10.0);
        assert_eq!(slots.len(), 4);
        let usable = A4_HEIGHT - 2.0 * SAFE_MARGIN;
        let expected_height = (usable - 3.0 * 10.0) / 4.0;
        for (i, slot) in slots.iter().enumerate() {
            assert!((slot.height - expected_height).abs() < 0.001);
            let expected_y = SAFE_MARGIN + i as f64 * (expected_height + 10.0);
            assert!((slot.y - expected_y).abs() < 0.001);
        }
    }

    #[test]
    fn impossible_spacing_collapses_to_zero() {
        let slots = slot_grid(16, 100.0);
        // 15 · 100 > usable height, so the gap is dropped entirely.
        let usable = A4_HEIGHT - 2.0 * SAFE_MARGIN;
        let expected_height = usable / 16.0;
        assert!((slots[0].height - expected_height).abs() < 0.001);
        assert!((slots[1].y - (SAFE_MARGIN + expected_height)).abs() < 0.001);
    }

    #[test]
    fn content_box_is_top_aligned() {
        let slot = Slot {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 100.0,
        };
        // Wide crop: scale bound by width, content sits at the slot top.
        let content = slot.content_box(200.0, 100.0);
        assert!((content.scale - 0.5).abs() < 1e-9);
        assert_eq!(content.left, 10.0);
        assert_eq!(content.bottom, 70.0); // 20 + (100 − 50)
        assert_eq!(content.width, 100.0);
        assert_eq!(content.height, 50.0);
    }

    #[test]
    fn snap_rounds_to_thousandths() {
        assert_eq!(snap(1.23456), 1.235);
        assert_eq!(snap(-1.23449), -1.234);
    }
}
