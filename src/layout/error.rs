//! Layout engine error types

use thiserror::Error;

use crate::blob::BlobError;
use crate::convert::ConvertError;

/// Unified layout error type
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Source bytes are neither a PDF nor inline SVG
    #[error("Source artifact is neither PDF nor SVG")]
    UnsupportedSource,

    /// A step produced bytes without the `%PDF-` header
    #[error("Render pipeline produced non-PDF output at {0}")]
    BadPdfHeader(&'static str),

    /// Crop page index beyond the source document
    #[error("Crop page {index} out of range; source has {pages} pages")]
    PageOutOfRange { index: u32, pages: usize },

    /// Source page carries no MediaBox anywhere in its page tree
    #[error("Source page has no MediaBox")]
    MissingMediaBox,

    /// A merge input decoded to a PDF with no pages
    #[error("PDF has no pages")]
    EmptyPdf,

    /// Source SVG has no viewBox and no usable width/height
    #[error("SVG source has no viewBox")]
    SvgMissingViewBox,

    /// SVG contains a construct the sanitizer forbids
    #[error("SVG contains forbidden construct: {0}")]
    ForbiddenSvg(String),

    /// SVG markup the sanitizer cannot express as paths
    #[error("Unsupported SVG content: {0}")]
    UnsupportedSvg(String),

    /// Font family outside the embedded standard set
    #[error("Unknown font: {0}")]
    UnknownFont(String),

    /// PDF parse or serialize error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Source fetch error
    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    /// External SVG converter error
    #[error("Converter error: {0}")]
    Convert(#[from] ConvertError),
}

pub type Result<T> = std::result::Result<T, LayoutError>;

impl LayoutError {
    /// Whether retrying the same job could ever succeed. Structural problems
    /// with the source or metadata are final.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LayoutError::Blob(BlobError::Backend(_)))
    }
}
