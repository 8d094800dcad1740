//! PDF page composition
//!
//! Thin layer over `lopdf` that the layout engine draws through: importing
//! a source page as a clipped form XObject, emitting content-stream
//! operations for forms, text, and sanitized SVG paths, and merging
//! single-page documents into one artifact.
//!
//! Object copies across documents remap references recursively; `Parent`
//! links are dropped so a page copy never drags the source page tree along.

use std::collections::HashMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::metadata::Color;

use super::error::{LayoutError, Result};
use super::fonts::FontMetrics;
use super::geometry::{snap, A4_HEIGHT, A4_WIDTH};
use super::svg_path::{CompiledSvg, PathSeg};

/// 2D affine transform in PDF matrix order `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Transform {
    pub fn identity() -> Self {
        Transform {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Transform {
            e: tx,
            f: ty,
            ..Self::identity()
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Transform {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    /// Counterclockwise rotation in degrees.
    pub fn rotate_deg(deg: f64) -> Self {
        let rad = deg.to_radians();
        let (sin, cos) = rad.sin_cos();
        Transform {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self` applied after `other` (matrix product self · other).
    pub fn then(self, other: Transform) -> Self {
        Transform {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }
}

fn real(v: f64) -> Object {
    Object::Real(snap(v) as f32)
}

fn object_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object> {
    match object {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

/// MediaBox of a page, following Pages-tree inheritance.
pub fn page_media_box(doc: &Document, page_id: ObjectId) -> Result<[f64; 4]> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc.get_dictionary(id)?;
        if let Ok(raw) = dict.get(b"MediaBox") {
            let array = resolve(doc, raw)?.as_array()?;
            if array.len() == 4 {
                let mut media_box = [0.0; 4];
                for (i, value) in array.iter().enumerate() {
                    media_box[i] = object_number(resolve(doc, value)?)
                        .ok_or(LayoutError::MissingMediaBox)?;
                }
                return Ok(media_box);
            }
        }
        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|o| o.as_reference().ok());
    }
    Err(LayoutError::MissingMediaBox)
}

/// Resources of a page, following Pages-tree inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc.get_dictionary(id)?;
        if let Ok(raw) = dict.get(b"Resources") {
            return Ok(resolve(doc, raw)?.as_dict()?.clone());
        }
        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|o| o.as_reference().ok());
    }
    Ok(Dictionary::new())
}

fn copy_object(
    src: &Document,
    object: &Object,
    dst: &mut Document,
    map: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Object> {
    Ok(match object {
        Object::Reference(id) => Object::Reference(copy_referenced(src, *id, dst, map)?),
        Object::Array(items) => Object::Array(
            items
                .iter()
                .map(|item| copy_object(src, item, dst, map))
                .collect::<Result<_>>()?,
        ),
        Object::Dictionary(dict) => Object::Dictionary(copy_dictionary(src, dict, dst, map)?),
        Object::Stream(stream) => {
            let dict = copy_dictionary(src, &stream.dict, dst, map)?;
            Object::Stream(Stream::new(dict, stream.content.clone()))
        }
        other => other.clone(),
    })
}

fn copy_dictionary(
    src: &Document,
    dict: &Dictionary,
    dst: &mut Document,
    map: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Dictionary> {
    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        if key.as_slice() == b"Parent" {
            continue;
        }
        out.set(key.clone(), copy_object(src, value, dst, map)?);
    }
    Ok(out)
}

fn copy_referenced(
    src: &Document,
    id: ObjectId,
    dst: &mut Document,
    map: &mut HashMap<ObjectId, ObjectId>,
) -> Result<ObjectId> {
    if let Some(mapped) = map.get(&id) {
        return Ok(*mapped);
    }
    let new_id = dst.new_object_id();
    map.insert(id, new_id);
    let copied = copy_object(src, src.get_object(id)?, dst, map)?;
    dst.objects.insert(new_id, copied);
    Ok(new_id)
}

/// Builder for one A4 output page.
pub struct PageComposer {
    doc: Document,
    pages_id: ObjectId,
    ops: Vec<Operation>,
    fonts: Vec<(&'static str, ObjectId)>,
    gstates: Vec<((i64, i64), String)>,
    xobjects: Vec<(String, ObjectId)>,
}

/// One text run: baseline origin, size, styling, optional rotation about
/// the origin. `rotate` uses screen-clockwise degrees (the metadata
/// convention); the composer converts to PDF's counterclockwise space.
pub struct TextRun<'a> {
    pub text: &'a str,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub font: &'static FontMetrics,
    pub color: Color,
    pub opacity: f64,
    pub rotate: f64,
}

impl Default for PageComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageComposer {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        PageComposer {
            doc,
            pages_id,
            ops: Vec::new(),
            fonts: Vec::new(),
            gstates: Vec::new(),
            xobjects: Vec::new(),
        }
    }

    /// Import `page_id` of `src` as a form XObject clipped to `bbox`
    /// (`[left, bottom, right, top]` in source points). Returns the
    /// resource name to draw with.
    pub fn import_crop_xobject(
        &mut self,
        src: &Document,
        page_id: ObjectId,
        bbox: [f64; 4],
    ) -> Result<String> {
        let content = src.get_page_content(page_id)?;
        let resources = page_resources(src, page_id)?;
        let mut map = HashMap::new();
        let resources = copy_dictionary(src, &resources, &mut self.doc, &mut map)?;

        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "FormType" => 1,
                "BBox" => vec![real(bbox[0]), real(bbox[1]), real(bbox[2]), real(bbox[3])],
                "Resources" => resources,
            },
            content,
        );
        let id = self.doc.add_object(stream);
        let name = format!("X{}", self.xobjects.len());
        self.xobjects.push((name.clone(), id));
        Ok(name)
    }

    /// Draw a form XObject scaled uniformly and translated.
    pub fn draw_form(&mut self, name: &str, scale: f64, tx: f64, ty: f64) {
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new(
            "cm",
            vec![
                real(scale),
                real(0.0),
                real(0.0),
                real(scale),
                real(tx),
                real(ty),
            ],
        ));
        self.ops
            .push(Operation::new("Do", vec![Object::Name(name.into())]));
        self.ops.push(Operation::new("Q", vec![]));
    }

    fn font_name(&mut self, metrics: &'static FontMetrics) -> String {
        if let Some(index) = self
            .fonts
            .iter()
            .position(|(base, _)| *base == metrics.base_font)
        {
            return format!("F{index}");
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => metrics.base_font,
            "Encoding" => "WinAnsiEncoding",
        });
        self.fonts.push((metrics.base_font, id));
        format!("F{}", self.fonts.len() - 1)
    }

    /// Graphics-state name for an (fill, stroke) alpha pair.
    fn gs_name(&mut self, fill_alpha: f64, stroke_alpha: f64) -> String {
        let key = (
            (fill_alpha.clamp(0.0, 1.0) * 1000.0).round() as i64,
            (stroke_alpha.clamp(0.0, 1.0) * 1000.0).round() as i64,
        );
        if let Some((_, name)) = self.gstates.iter().find(|(k, _)| *k == key) {
            return name.clone();
        }
        let name = format!("G{}", self.gstates.len());
        self.gstates.push((key, name.clone()));
        name
    }

    /// Draw one text run.
    pub fn draw_text(&mut self, run: &TextRun<'_>) {
        let font_name = self.font_name(run.font);
        self.ops.push(Operation::new("q", vec![]));
        if run.opacity < 1.0 {
            let gs = self.gs_name(run.opacity, run.opacity);
            self.ops
                .push(Operation::new("gs", vec![Object::Name(gs.into())]));
        }
        let (r, g, b) = run.color.to_unit();
        self.ops
            .push(Operation::new("rg", vec![real(r), real(g), real(b)]));
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![Object::Name(font_name.into()), real(run.size)],
        ));
        // Screen-clockwise degrees → PDF counterclockwise.
        let matrix = Transform::translate(run.x, run.y).then(Transform::rotate_deg(-run.rotate));
        self.ops.push(Operation::new(
            "Tm",
            vec![
                real(matrix.a),
                real(matrix.b),
                real(matrix.c),
                real(matrix.d),
                real(matrix.e),
                real(matrix.f),
            ],
        ));
        self.ops
            .push(Operation::new("Tj", vec![Object::string_literal(run.text)]));
        self.ops.push(Operation::new("ET", vec![]));
        self.ops.push(Operation::new("Q", vec![]));
    }

    /// Draw sanitized SVG paths under `transform`, multiplying every path's
    /// opacity by `base_opacity`. Fill is painted before stroke.
    pub fn draw_svg(&mut self, svg: &CompiledSvg, transform: Transform, base_opacity: f64) {
        for path in &svg.paths {
            let style = &path.style;
            let fill_alpha = base_opacity * style.opacity * style.fill_opacity;
            let stroke_alpha = base_opacity * style.opacity * style.stroke_opacity;

            self.ops.push(Operation::new("q", vec![]));
            if fill_alpha < 1.0 || stroke_alpha < 1.0 {
                let gs = self.gs_name(fill_alpha, stroke_alpha);
                self.ops
                    .push(Operation::new("gs", vec![Object::Name(gs.into())]));
            }
            self.ops.push(Operation::new(
                "cm",
                vec![
                    real(transform.a),
                    real(transform.b),
                    real(transform.c),
                    real(transform.d),
                    real(transform.e),
                    real(transform.f),
                ],
            ));

            if let Some(fill) = style.fill {
                let (r, g, b) = fill.to_unit();
                self.ops
                    .push(Operation::new("rg", vec![real(r), real(g), real(b)]));
            }
            if let Some(stroke) = style.stroke {
                let (r, g, b) = stroke.to_unit();
                self.ops
                    .push(Operation::new("RG", vec![real(r), real(g), real(b)]));
                self.ops
                    .push(Operation::new("w", vec![real(style.stroke_width)]));
                self.ops
                    .push(Operation::new("J", vec![Object::Integer(style.line_cap)]));
                self.ops
                    .push(Operation::new("j", vec![Object::Integer(style.line_join)]));
                if !style.dash_array.is_empty() {
                    let pattern: Vec<Object> =
                        style.dash_array.iter().map(|v| real(*v)).collect();
                    self.ops.push(Operation::new(
                        "d",
                        vec![Object::Array(pattern), real(style.dash_offset)],
                    ));
                }
            }

            for seg in &path.segments {
                match seg {
                    PathSeg::MoveTo(x, y) => {
                        self.ops.push(Operation::new("m", vec![real(*x), real(*y)]))
                    }
                    PathSeg::LineTo(x, y) => {
                        self.ops.push(Operation::new("l", vec![real(*x), real(*y)]))
                    }
                    PathSeg::CurveTo(x1, y1, x2, y2, x, y) => self.ops.push(Operation::new(
                        "c",
                        vec![real(*x1), real(*y1), real(*x2), real(*y2), real(*x), real(*y)],
                    )),
                    PathSeg::Close => self.ops.push(Operation::new("h", vec![])),
                }
            }

            let paint = match (style.fill.is_some(), style.stroke.is_some()) {
                (true, true) => "B",
                (true, false) => "f",
                (false, true) => "S",
                (false, false) => "n",
            };
            self.ops.push(Operation::new(paint, vec![]));
            self.ops.push(Operation::new("Q", vec![]));
        }
    }

    /// Serialize the page into a standalone single-page PDF.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let mut resources = Dictionary::new();
        if !self.fonts.is_empty() {
            let mut fonts = Dictionary::new();
            for (index, (_, id)) in self.fonts.iter().enumerate() {
                fonts.set(format!("F{index}"), Object::Reference(*id));
            }
            resources.set("Font", Object::Dictionary(fonts));
        }
        if !self.xobjects.is_empty() {
            let mut xobjects = Dictionary::new();
            for (name, id) in &self.xobjects {
                xobjects.set(name.clone(), Object::Reference(*id));
            }
            resources.set("XObject", Object::Dictionary(xobjects));
        }
        if !self.gstates.is_empty() {
            let mut gstates = Dictionary::new();
            for ((fill, stroke), name) in &self.gstates {
                let gs = dictionary! {
                    "Type" => "ExtGState",
                    "ca" => Object::Real(*fill as f32 / 1000.0),
                    "CA" => Object::Real(*stroke as f32 / 1000.0),
                };
                let id = self.doc.add_object(gs);
                gstates.set(name.clone(), Object::Reference(id));
            }
            resources.set("ExtGState", Object::Dictionary(gstates));
        }

        let content = Content {
            operations: self.ops,
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![real(0.0), real(0.0), real(A4_WIDTH), real(A4_HEIGHT)],
            "Resources" => resources,
        });

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        };
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(lopdf::Error::IO)?;
        if !bytes.starts_with(b"%PDF-") {
            return Err(LayoutError::BadPdfHeader("page serialize"));
        }
        Ok(bytes)
    }
}

/// Assembles single-page PDFs into one artifact, in append order.
pub struct PdfMerger {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfMerger {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        PdfMerger {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Copy page 0 of `bytes` into the output.
    pub fn append_first_page(&mut self, bytes: &[u8]) -> Result<()> {
        let src = Document::load_mem(bytes)?;
        let pages = src.get_pages();
        let (_, page_id) = pages.iter().next().ok_or(LayoutError::EmptyPdf)?;

        let mut map = HashMap::new();
        let page_dict = src.get_dictionary(*page_id)?.clone();
        let mut copied = copy_dictionary(&src, &page_dict, &mut self.doc, &mut map)?;

        // Inherited attributes must land on the copied page since its new
        // parent carries none of them.
        if !copied.has(b"MediaBox") {
            let media_box = page_media_box(&src, *page_id)?;
            copied.set(
                "MediaBox",
                vec![
                    real(media_box[0]),
                    real(media_box[1]),
                    real(media_box[2]),
                    real(media_box[3]),
                ],
            );
        }
        if !copied.has(b"Resources") {
            let resources = page_resources(&src, *page_id)?;
            let resources = copy_dictionary(&src, &resources, &mut self.doc, &mut map)?;
            copied.set("Resources", resources);
        }
        copied.set("Parent", Object::Reference(self.pages_id));

        let new_page_id = self.doc.add_object(Object::Dictionary(copied));
        self.kids.push(new_page_id);
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Serialize the merged artifact.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let kids: Vec<Object> = self.kids.iter().map(|id| Object::Reference(*id)).collect();
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => self.kids.len() as i64,
        };
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(lopdf::Error::IO)?;
        if !bytes.starts_with(b"%PDF-") {
            return Err(LayoutError::BadPdfHeader("merge serialize"));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a minimal single-page source PDF with the given media box.
    pub fn minimal_pdf(width: f64, height: f64) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "re",
                    vec![real(10.0), real(10.0), real(width - 20.0), real(height - 20.0)],
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
        });
        // MediaBox lives on the Pages node to exercise inheritance.
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
            "MediaBox" => vec![real(0.0), real(0.0), real(width), real(height)],
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
}

#[cfg(test)]
mod tests {
    use super::test_support::minimal_pdf;
    use super::*;
    use crate::layout::fonts::FontMetrics;
    use crate::metadata::Color;

    #[test]
    fn media_box_inherits_from_pages_node() {
        let bytes = minimal_pdf(595.28, 841.89);
        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        let page_id = *pages.values().next().unwrap();

        let media_box = page_media_box(&doc, page_id).unwrap();
        assert!((media_box[2] - 595.28).abs() < 0.01);
        assert!((media_box[3] - 841.89).abs() < 0.01);
    }

    #[test]
    fn composer_produces_single_page_pdf() {
        let source = minimal_pdf(595.28, 841.89);
        let src = Document::load_mem(&source).unwrap();
        let page_id = *src.get_pages().values().next().unwrap();

        let mut composer = PageComposer::new();
        let name = composer
            .import_crop_xobject(&src, page_id, [50.0, 50.0, 300.0, 400.0])
            .unwrap();
        composer.draw_form(&name, 0.5, 28.35, 28.35);
        composer.draw_text(&TextRun {
            text: "A001",
            x: 100.0,
            y: 100.0,
            size: 12.0,
            font: FontMetrics::resolve("Helvetica").unwrap(),
            color: Color { r: 0, g: 0, b: 0 },
            opacity: 1.0,
            rotate: 0.0,
        });

        let bytes = composer.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-"));

        let out = Document::load_mem(&bytes).unwrap();
        assert_eq!(out.get_pages().len(), 1);
        let content = String::from_utf8_lossy(
            &out.get_page_content(*out.get_pages().values().next().unwrap())
                .unwrap(),
        )
        .to_string();
        assert!(content.contains("Do"));
        assert!(content.contains("A001"));
    }

    #[test]
    fn composer_output_is_deterministic() {
        let source = minimal_pdf(595.28, 841.89);
        let render = || {
            let src = Document::load_mem(&source).unwrap();
            let page_id = *src.get_pages().values().next().unwrap();
            let mut composer = PageComposer::new();
            let name = composer
                .import_crop_xobject(&src, page_id, [0.0, 0.0, 200.0, 200.0])
                .unwrap();
            composer.draw_form(&name, 1.0, 28.35, 28.35);
            composer.finish().unwrap()
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn merger_preserves_page_order() {
        let mut merger = PdfMerger::new();
        merger.append_first_page(&minimal_pdf(595.28, 841.89)).unwrap();
        merger.append_first_page(&minimal_pdf(400.0, 400.0)).unwrap();
        assert_eq!(merger.page_count(), 2);

        let bytes = merger.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-"));

        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        // Second page keeps its inherited 400×400 media box.
        let second = pages[&2];
        let media_box = page_media_box(&doc, second).unwrap();
        assert!((media_box[2] - 400.0).abs() < 0.01);
    }

    #[test]
    fn transform_composition() {
        let t = Transform::translate(10.0, 20.0).then(Transform::scale(2.0, -2.0));
        assert_eq!(t.a, 2.0);
        assert_eq!(t.d, -2.0);
        assert_eq!(t.e, 10.0);
        assert_eq!(t.f, 20.0);

        let r = Transform::rotate_deg(90.0);
        assert!((r.a - 0.0).abs() < 1e-9);
        assert!((r.b - 1.0).abs() < 1e-9);
    }
}
