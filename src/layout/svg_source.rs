//! Source SVG normalization
//!
//! Source artifacts delivered as SVG are canonicalized before the external
//! converter sees them: forbidden constructs are fatal, the viewBox is
//! resolved, the open tag is rewritten canonically, and all children are
//! wrapped in a centering group that scales the drawing onto A4.

use super::error::{LayoutError, Result};
use super::geometry::{snap, A4_HEIGHT, A4_WIDTH};
use super::svg_path::scan_forbidden;

/// Id of the wrapper group the normalizer injects.
pub const NORMALIZED_ROOT_ID: &str = "A4_NORMALIZED_ROOT";

#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Normalize source SVG markup for conversion.
pub fn normalize_source_svg(markup: &str) -> Result<String> {
    scan_forbidden(markup)?;

    let doc = roxmltree::Document::parse(markup)
        .map_err(|e| LayoutError::UnsupportedSvg(format!("parse error: {e}")))?;
    let root = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("svg"))
        .ok_or(LayoutError::UnsupportedSource)?;

    let view_box = resolve_view_box(&root)?;
    let inner = inner_markup(markup, &root);

    // Uniform scale onto A4, centered on both axes.
    let scale = (A4_WIDTH / view_box.width).min(A4_HEIGHT / view_box.height);
    let tx = snap(-view_box.x * scale + (A4_WIDTH - view_box.width * scale) / 2.0);
    let ty = snap(-view_box.y * scale + (A4_HEIGHT - view_box.height * scale) / 2.0);
    let scale = snap(scale);

    Ok(format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}pt" height="{h}pt">"#,
            "<style>*{{vector-effect:non-scaling-stroke;}}</style>",
            r#"<g id="{root_id}" transform="translate({tx} {ty}) scale({s})">{inner}</g>"#,
            "</svg>"
        ),
        w = A4_WIDTH,
        h = A4_HEIGHT,
        root_id = NORMALIZED_ROOT_ID,
        tx = tx,
        ty = ty,
        s = scale,
        inner = inner,
    ))
}

/// Extract the viewBox, deriving it from width/height when absent. Only raw
/// numbers and `pt` units are accepted for the fallback.
fn resolve_view_box(root: &roxmltree::Node<'_, '_>) -> Result<ViewBox> {
    if let Some(raw) = root.attribute("viewBox") {
        let parts: Vec<f64> = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() == 4 && parts[2] > 0.0 && parts[3] > 0.0 {
            return Ok(ViewBox {
                x: parts[0],
                y: parts[1],
                width: parts[2],
                height: parts[3],
            });
        }
        return Err(LayoutError::SvgMissingViewBox);
    }

    let dimension = |name: &str| -> Option<f64> {
        let raw = root.attribute(name)?.trim();
        let raw = raw.strip_suffix("pt").unwrap_or(raw).trim();
        let value: f64 = raw.parse().ok()?;
        (value > 0.0).then_some(value)
    };
    match (dimension("width"), dimension("height")) {
        (Some(width), Some(height)) => Ok(ViewBox {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }),
        _ => Err(LayoutError::SvgMissingViewBox),
    }
}

/// The markup between the `<svg …>` open tag and the closing `</svg>`.
fn inner_markup<'a>(markup: &'a str, root: &roxmltree::Node<'_, '_>) -> &'a str {
    let range = root.range();
    let element = &markup[range.clone()];
    if element.ends_with("/>") && !element.contains("</svg") {
        return "";
    }
    let Some(open_end) = element.find('>') else {
        return "";
    };
    let Some(close_start) = element.rfind("</") else {
        return "";
    };
    if open_end + 1 >= close_start {
        return "";
    }
    &element[open_end + 1..close_start]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_with_viewbox() {
        let svg = r#"<svg viewBox="0 0 100 200"><rect x="1" y="2" width="3" height="4"/></svg>"#;
        let normalized = normalize_source_svg(svg).unwrap();

        assert!(normalized.starts_with(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 595.28 841.89" width="595.28pt" height="841.89pt">"#
        ));
        assert!(normalized.contains("<style>*{vector-effect:non-scaling-stroke;}</style>"));
        assert!(normalized.contains(r#"<g id="A4_NORMALIZED_ROOT" transform="translate("#));
        assert!(normalized.contains(r#"<rect x="1" y="2" width="3" height="4"/>"#));
        assert!(normalized.ends_with("</g></svg>"));

        // 100×200 → scale = min(595.28/100, 841.89/200) = 4.209(45).
        let scale = (595.28_f64 / 100.0).min(841.89 / 200.0);
        assert!(normalized.contains(&format!("scale({})", snap(scale))));
    }

    #[test]
    fn derives_viewbox_from_pt_dimensions() {
        let svg = r#"<svg width="595.28pt" height="841.89pt"><g/></svg>"#;
        let normalized = normalize_source_svg(svg).unwrap();
        // Same aspect as A4: identity scale, no offset.
        assert!(normalized.contains("translate(0 0) scale(1)"));
    }

    #[test]
    fn missing_viewbox_is_fatal() {
        let svg = r#"<svg width="100%"><g/></svg>"#;
        assert!(matches!(
            normalize_source_svg(svg),
            Err(LayoutError::SvgMissingViewBox)
        ));
        let svg = r#"<svg><g/></svg>"#;
        assert!(matches!(
            normalize_source_svg(svg),
            Err(LayoutError::SvgMissingViewBox)
        ));
    }

    #[test]
    fn forbidden_content_is_fatal() {
        let svg = r#"<svg viewBox="0 0 10 10"><script>x</script></svg>"#;
        assert!(matches!(
            normalize_source_svg(svg),
            Err(LayoutError::ForbiddenSvg(_))
        ));
        let svg = r#"<svg viewBox="0 0 10 10"><image x="0"/></svg>"#;
        assert!(matches!(
            normalize_source_svg(svg),
            Err(LayoutError::ForbiddenSvg(_))
        ));
    }

    #[test]
    fn self_closing_root_has_empty_body() {
        let svg = r#"<svg viewBox="0 0 10 10"/>"#;
        let normalized = normalize_source_svg(svg).unwrap();
        assert!(normalized.ends_with(r#"scale(59.528)"></g></svg>"#));
    }
}
