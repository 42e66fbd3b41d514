//! Coordinate mapping between raster pixels and document points.
//!
//! Three spaces meet in this pipeline:
//!
//! ```text
//! raster pixels   origin top-left, y down, scaled by `zoom`     (services)
//! page points     origin top-left, y down, 1/72 inch            (RedactionRegion)
//! PDF user space  origin bottom-left, y up, 1/72 inch           (pdfium)
//! ```
//!
//! Services report boxes in raster pixels. Everything that touches the
//! document goes through [`CoordinateMapper`] first, so the `box / zoom`
//! relationship lives in exactly one place.

use serde::{Deserialize, Serialize};

/// Font size of an OCR text run relative to its box height.
pub const OCR_FONT_SCALE: f64 = 0.8;

/// Width and height of a page in document points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box in raster pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Smallest box containing every vertex; `None` for an empty polygon.
    pub fn enclosing(vertices: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = vertices.split_first()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Rectangle in page points, top-left origin. A `RedactionRegion` when it
/// comes from a finding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl PointRect {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Rectangle in PDF user space (bottom-left origin), as pdfium expects it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfSpaceRect {
    pub bottom: f64,
    pub left: f64,
    pub top: f64,
    pub right: f64,
}

/// An invisible text run to be placed on an output page.
///
/// `x`/`baseline` are page points with a top-left origin; the sink flips
/// them into PDF user space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f64,
    pub baseline: f64,
    pub font_size: f64,
}

/// Converts between raster pixels and page points for one zoom factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    zoom: f64,
}

impl CoordinateMapper {
    /// `zoom` is pixels per point; non-positive values are treated as 1.0.
    pub fn new(zoom: f64) -> Self {
        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        Self { zoom }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// `region = finding_box / zoom`.
    pub fn to_points(&self, b: &PixelBox) -> PointRect {
        PointRect {
            left: b.left / self.zoom,
            top: b.top / self.zoom,
            right: b.right() / self.zoom,
            bottom: b.bottom() / self.zoom,
        }
    }

    pub fn to_pixels(&self, r: &PointRect) -> PixelBox {
        PixelBox::new(
            r.left * self.zoom,
            r.top * self.zoom,
            r.width() * self.zoom,
            r.height() * self.zoom,
        )
    }

    /// Flip a top-left point rectangle into PDF user space.
    pub fn to_pdf_space(r: &PointRect, page_height: f64) -> PdfSpaceRect {
        PdfSpaceRect {
            bottom: page_height - r.bottom,
            left: r.left,
            top: page_height - r.top,
            right: r.right,
        }
    }

    /// Text run for an OCR word: anchored at the box's lower-left corner,
    /// sized to [`OCR_FONT_SCALE`] of the box height.
    pub fn text_run(&self, word_box: &PixelBox, text: impl Into<String>) -> TextRun {
        let r = self.to_points(word_box);
        TextRun {
            text: text.into(),
            x: r.left,
            baseline: r.bottom,
            font_size: r.height() * OCR_FONT_SCALE,
        }
    }
}
