//! Watermark SVG sanitizer and compiler
//!
//! Watermark SVG is reduced to a path-only subset before drawing: every
//! retained element is a `<path>` (shape primitives are converted to
//! equivalent path data), each with a small allowlist of presentation
//! attributes. CSS `<style>` classes are inlined into matching elements.
//! Anything referencing external content is rejected outright.
//!
//! Supported path commands: M/m, L/l, H/h, V/v, C/c, Z/z.

use std::collections::HashMap;

use crate::metadata::Color;

use super::error::{LayoutError, Result};

/// Attributes a sanitized path may carry.
const ALLOWED_ATTRS: &[&str] = &[
    "d",
    "fill",
    "fill-opacity",
    "stroke",
    "stroke-opacity",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-dashoffset",
    "opacity",
];

/// Cubic-arc approximation constant for circles and ellipses.
const KAPPA: f64 = 0.552_284_749_8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSeg {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

/// Resolved presentation style for one path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStyle {
    /// SVG default is a black fill and no stroke.
    pub fill: Option<Color>,
    pub fill_opacity: f64,
    pub stroke: Option<Color>,
    pub stroke_opacity: f64,
    pub stroke_width: f64,
    /// 0 = butt, 1 = round, 2 = square.
    pub line_cap: i64,
    /// 0 = miter, 1 = round, 2 = bevel.
    pub line_join: i64,
    pub dash_array: Vec<f64>,
    pub dash_offset: f64,
    pub opacity: f64,
}

impl Default for PathStyle {
    fn default() -> Self {
        PathStyle {
            fill: Some(crate::metadata::Color { r: 0, g: 0, b: 0 }),
            fill_opacity: 1.0,
            stroke: None,
            stroke_opacity: 1.0,
            stroke_width: 1.0,
            line_cap: 0,
            line_join: 0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgPath {
    pub segments: Vec<PathSeg>,
    pub style: PathStyle,
}

/// A sanitized watermark: its paths and natural size in SVG user units.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSvg {
    pub paths: Vec<SvgPath>,
    pub width: f64,
    pub height: f64,
}

/// Raw-text scan for constructs that are fatal wherever SVG is accepted.
pub(crate) fn scan_forbidden(markup: &str) -> Result<()> {
    let lower = markup.to_ascii_lowercase();
    const FORBIDDEN: &[(&str, &str)] = &[
        ("<script", "script element"),
        ("<foreignobject", "foreignObject element"),
        ("<image", "image element"),
        ("<use", "use element"),
        ("href", "href reference"),
        ("url(", "url() reference"),
        ("javascript:", "javascript: URI"),
        ("data:", "data: URI"),
    ];
    for (token, label) in FORBIDDEN {
        if lower.contains(token) {
            return Err(LayoutError::ForbiddenSvg((*label).to_string()));
        }
    }
    // Inline event handlers: any attribute whose name starts with "on".
    if let Ok(doc) = roxmltree::Document::parse(markup) {
        for node in doc.descendants().filter(|n| n.is_element()) {
            for attr in node.attributes() {
                if attr.name().to_ascii_lowercase().starts_with("on") {
                    return Err(LayoutError::ForbiddenSvg(format!(
                        "inline {} handler",
                        attr.name()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Sanitize and compile watermark SVG markup.
pub fn compile_watermark(markup: &str) -> Result<CompiledSvg> {
    scan_forbidden(markup)?;

    let doc = roxmltree::Document::parse(markup)
        .map_err(|e| LayoutError::UnsupportedSvg(format!("parse error: {e}")))?;
    let root = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("svg"))
        .ok_or_else(|| LayoutError::UnsupportedSvg("no <svg> root".to_string()))?;

    let (width, height) = natural_size(&root);
    let stylesheet = extract_stylesheet(&doc);

    let mut paths = Vec::new();
    for child in root.children().filter(|n| n.is_element()) {
        compile_element(&child, &stylesheet, &PathStyle::default(), &mut paths)?;
    }

    Ok(CompiledSvg {
        paths,
        width,
        height,
    })
}

fn natural_size(root: &roxmltree::Node<'_, '_>) -> (f64, f64) {
    if let Some(view_box) = root.attribute("viewBox") {
        let parts: Vec<f64> = view_box
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() == 4 && parts[2] > 0.0 && parts[3] > 0.0 {
            return (parts[2], parts[3]);
        }
    }
    let dimension = |name: &str| {
        root.attribute(name)
            .and_then(|v| v.trim().trim_end_matches("pt").parse::<f64>().ok())
    };
    (
        dimension("width").unwrap_or(100.0),
        dimension("height").unwrap_or(100.0),
    )
}

// ---------------------------------------------------------------------
// CSS class inlining
// ---------------------------------------------------------------------

struct CssRule {
    /// `.class`, `#id`, or a bare tag name.
    selector: String,
    declarations: Vec<(String, String)>,
}

fn extract_stylesheet(doc: &roxmltree::Document<'_>) -> Vec<CssRule> {
    let mut rules = Vec::new();
    for node in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "style")
    {
        let css: String = node.children().filter_map(|c| c.text()).collect();
        parse_css(&css, &mut rules);
    }
    rules
}

fn parse_css(css: &str, rules: &mut Vec<CssRule>) {
    let mut rest = css;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let selectors = rest[..open].trim().to_string();
        let body = &rest[open + 1..open + close];
        let declarations: Vec<(String, String)> = body
            .split(';')
            .filter_map(|decl| {
                let (name, value) = decl.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        for selector in selectors.split(',') {
            rules.push(CssRule {
                selector: selector.trim().to_string(),
                declarations: declarations.clone(),
            });
        }
        rest = &rest[open + close + 1..];
    }
}

fn rule_matches(rule: &CssRule, node: &roxmltree::Node<'_, '_>) -> bool {
    if let Some(class) = rule.selector.strip_prefix('.') {
        return node
            .attribute("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false);
    }
    if let Some(id) = rule.selector.strip_prefix('#') {
        return node.attribute("id") == Some(id);
    }
    rule.selector == node.tag_name().name()
}

/// Gather the effective declarations for a node: CSS rules in order, then
/// presentation attributes, then the inline `style` attribute.
fn effective_declarations(
    node: &roxmltree::Node<'_, '_>,
    stylesheet: &[CssRule],
) -> HashMap<String, String> {
    let mut declarations = HashMap::new();
    for rule in stylesheet.iter().filter(|r| rule_matches(r, node)) {
        for (name, value) in &rule.declarations {
            declarations.insert(name.clone(), value.clone());
        }
    }
    for attr in node.attributes() {
        if ALLOWED_ATTRS.contains(&attr.name()) && attr.name() != "d" {
            declarations.insert(attr.name().to_string(), attr.value().to_string());
        }
    }
    if let Some(style) = node.attribute("style") {
        for decl in style.split(';') {
            if let Some((name, value)) = decl.split_once(':') {
                declarations.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    declarations
}

fn apply_declarations(style: &mut PathStyle, declarations: &HashMap<String, String>) -> Result<()> {
    for (name, value) in declarations {
        match name.as_str() {
            "fill" => style.fill = parse_paint(value)?,
            "fill-opacity" => style.fill_opacity = parse_unit_interval(value),
            "stroke" => style.stroke = parse_paint(value)?,
            "stroke-opacity" => style.stroke_opacity = parse_unit_interval(value),
            "stroke-width" => {
                style.stroke_width = value.trim().parse().unwrap_or(style.stroke_width)
            }
            "stroke-linecap" => {
                style.line_cap = match value.trim() {
                    "round" => 1,
                    "square" => 2,
                    _ => 0,
                }
            }
            "stroke-linejoin" => {
                style.line_join = match value.trim() {
                    "round" => 1,
                    "bevel" => 2,
                    _ => 0,
                }
            }
            "stroke-dasharray" => {
                style.dash_array = value
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| s.parse().ok())
                    .collect();
            }
            "stroke-dashoffset" => {
                style.dash_offset = value.trim().parse().unwrap_or(0.0)
            }
            "opacity" => style.opacity = parse_unit_interval(value),
            _ => {}
        }
    }
    Ok(())
}

fn parse_paint(value: &str) -> Result<Option<Color>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    Color::parse(value)
        .map(Some)
        .ok_or_else(|| LayoutError::UnsupportedSvg(format!("paint value {value:?}")))
}

fn parse_unit_interval(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(1.0).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------
// Element compilation
// ---------------------------------------------------------------------

fn compile_element(
    node: &roxmltree::Node<'_, '_>,
    stylesheet: &[CssRule],
    inherited: &PathStyle,
    out: &mut Vec<SvgPath>,
) -> Result<()> {
    let mut style = inherited.clone();
    apply_declarations(&mut style, &effective_declarations(node, stylesheet))?;

    let tag = node.tag_name().name();
    let segments = match tag {
        "g" => {
            for child in node.children().filter(|n| n.is_element()) {
                compile_element(&child, stylesheet, &style, out)?;
            }
            return Ok(());
        }
        "defs" | "style" | "title" | "desc" | "metadata" => return Ok(()),
        "path" => {
            let d = node
                .attribute("d")
                .ok_or_else(|| LayoutError::UnsupportedSvg("path without d".to_string()))?;
            parse_path_data(d)?
        }
        "rect" => rect_to_segments(node)?,
        "circle" => ellipse_to_segments(
            number_attr(node, "cx"),
            number_attr(node, "cy"),
            number_attr(node, "r"),
            number_attr(node, "r"),
        ),
        "ellipse" => ellipse_to_segments(
            number_attr(node, "cx"),
            number_attr(node, "cy"),
            number_attr(node, "rx"),
            number_attr(node, "ry"),
        ),
        "line" => vec![
            PathSeg::MoveTo(number_attr(node, "x1"), number_attr(node, "y1")),
            PathSeg::LineTo(number_attr(node, "x2"), number_attr(node, "y2")),
        ],
        "polyline" => points_to_segments(node.attribute("points").unwrap_or(""), false)?,
        "polygon" => points_to_segments(node.attribute("points").unwrap_or(""), true)?,
        other => {
            return Err(LayoutError::UnsupportedSvg(format!("element <{other}>")));
        }
    };

    if !segments.is_empty() {
        out.push(SvgPath { segments, style });
    }
    Ok(())
}

fn number_attr(node: &roxmltree::Node<'_, '_>, name: &str) -> f64 {
    node.attribute(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0.0)
}

fn rect_to_segments(node: &roxmltree::Node<'_, '_>) -> Result<Vec<PathSeg>> {
    let x = number_attr(node, "x");
    let y = number_attr(node, "y");
    let width = number_attr(node, "width");
    let height = number_attr(node, "height");
    Ok(vec![
        PathSeg::MoveTo(x, y),
        PathSeg::LineTo(x + width, y),
        PathSeg::LineTo(x + width, y + height),
        PathSeg::LineTo(x, y + height),
        PathSeg::Close,
    ])
}

fn ellipse_to_segments(cx: f64, cy: f64, rx: f64, ry: f64) -> Vec<PathSeg> {
    let kx = KAPPA * rx;
    let ky = KAPPA * ry;
    vec![
        PathSeg::MoveTo(cx + rx, cy),
        PathSeg::CurveTo(cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry),
        PathSeg::CurveTo(cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy),
        PathSeg::CurveTo(cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry),
        PathSeg::CurveTo(cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy),
        PathSeg::Close,
    ]
}

fn points_to_segments(points: &str, close: bool) -> Result<Vec<PathSeg>> {
    let coords: Vec<f64> = points
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| LayoutError::UnsupportedSvg(format!("bad point {s:?}")))
        })
        .collect::<Result<_>>()?;
    if coords.len() < 4 || coords.len() % 2 != 0 {
        return Err(LayoutError::UnsupportedSvg("bad points list".to_string()));
    }

    let mut segments = vec![PathSeg::MoveTo(coords[0], coords[1])];
    for pair in coords[2..].chunks(2) {
        segments.push(PathSeg::LineTo(pair[0], pair[1]));
    }
    if close {
        segments.push(PathSeg::Close);
    }
    Ok(segments)
}

// ---------------------------------------------------------------------
// Path data
// ---------------------------------------------------------------------

struct PathTokens<'a> {
    rest: &'a str,
}

impl<'a> PathTokens<'a> {
    fn new(d: &'a str) -> Self {
        Self { rest: d }
    }

    fn skip_separators(&mut self) {
        self.rest = self
            .rest
            .trim_start_matches(|c: char| c.is_whitespace() || c == ',');
    }

    fn next_command(&mut self) -> Option<char> {
        self.skip_separators();
        let ch = self.rest.chars().next()?;
        if ch.is_ascii_alphabetic() {
            self.rest = &self.rest[1..];
            Some(ch)
        } else {
            None
        }
    }

    fn next_number(&mut self) -> Result<f64> {
        self.skip_separators();
        let mut end = 0;
        let bytes = self.rest.as_bytes();
        if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
            end += 1;
        }
        let mut seen_dot = false;
        while end < bytes.len() {
            match bytes[end] {
                b'0'..=b'9' => end += 1,
                b'.' if !seen_dot => {
                    seen_dot = true;
                    end += 1;
                }
                _ => break,
            }
        }
        let (token, rest) = self.rest.split_at(end);
        let value: f64 = token
            .parse()
            .map_err(|_| LayoutError::UnsupportedSvg(format!("bad path number near {token:?}")))?;
        self.rest = rest;
        Ok(value)
    }

    fn has_number_next(&mut self) -> bool {
        self.skip_separators();
        matches!(
            self.rest.chars().next(),
            Some('0'..='9' | '-' | '+' | '.')
        )
    }
}

/// Parse SVG path data into segments. Absolute and relative M/L/H/V/C/Z.
pub fn parse_path_data(d: &str) -> Result<Vec<PathSeg>> {
    let mut tokens = PathTokens::new(d);
    let mut segments = Vec::new();
    let (mut x, mut y) = (0.0_f64, 0.0_f64);
    let (mut start_x, mut start_y) = (0.0_f64, 0.0_f64);
    let mut command = None;

    loop {
        if let Some(c) = tokens.next_command() {
            command = Some(c);
        } else if !tokens.has_number_next() {
            break;
        }
        let Some(c) = command else {
            return Err(LayoutError::UnsupportedSvg("path data without command".to_string()));
        };

        match c {
            'M' | 'm' => {
                let (dx, dy) = (tokens.next_number()?, tokens.next_number()?);
                if c == 'm' {
                    x += dx;
                    y += dy;
                } else {
                    x = dx;
                    y = dy;
                }
                start_x = x;
                start_y = y;
                segments.push(PathSeg::MoveTo(x, y));
                // Subsequent coordinate pairs are implicit LineTo.
                command = Some(if c == 'm' { 'l' } else { 'L' });
            }
            'L' | 'l' => {
                let (dx, dy) = (tokens.next_number()?, tokens.next_number()?);
                if c == 'l' {
                    x += dx;
                    y += dy;
                } else {
                    x = dx;
                    y = dy;
                }
                segments.push(PathSeg::LineTo(x, y));
            }
            'H' | 'h' => {
                let dx = tokens.next_number()?;
                x = if c == 'h' { x + dx } else { dx };
                segments.push(PathSeg::LineTo(x, y));
            }
            'V' | 'v' => {
                let dy = tokens.next_number()?;
                y = if c == 'v' { y + dy } else { dy };
                segments.push(PathSeg::LineTo(x, y));
            }
            'C' | 'c' => {
                let numbers = [
                    tokens.next_number()?,
                    tokens.next_number()?,
                    tokens.next_number()?,
                    tokens.next_number()?,
                    tokens.next_number()?,
                    tokens.next_number()?,
                ];
                let [mut x1, mut y1, mut x2, mut y2, mut ex, mut ey] = numbers;
                if c == 'c' {
                    x1 += x;
                    y1 += y;
                    x2 += x;
                    y2 += y;
                    ex += x;
                    ey += y;
                }
                segments.push(PathSeg::CurveTo(x1, y1, x2, y2, ex, ey));
                x = ex;
                y = ey;
            }
            'Z' | 'z' => {
                segments.push(PathSeg::Close);
                x = start_x;
                y = start_y;
            }
            other => {
                return Err(LayoutError::UnsupportedSvg(format!(
                    "path command {other:?}"
                )));
            }
        }
    }

    Ok(segments)
}
