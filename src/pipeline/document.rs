//! The document engine seam.
//!
//! Stages never call pdfium directly. They read pages through a
//! [`PageSource`] and build output through a [`PageSink`]; a
//! [`DocumentEngine`] opens one and creates the other. The pdfium-backed
//! engine lives in [`super::render`]; tests use in-memory fakes.

use crate::error::SanitizeError;
use crate::geometry::{PageSize, PointRect, TextRun};
use image::DynamicImage;
use std::path::Path;

/// Read side: an opened input document.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Page dimensions in points.
    fn page_size(&self, index: usize) -> Result<PageSize, SanitizeError>;

    /// Rasterise one page at `zoom` pixels per point.
    fn render(&self, index: usize, zoom: f32) -> Result<DynamicImage, SanitizeError>;

    /// Paint opaque black fills over `regions` on the source page, removing
    /// whatever lies beneath them from the next [`render`](Self::render).
    fn burn(&mut self, index: usize, regions: &[PointRect]) -> Result<(), SanitizeError>;
}

/// Write side: an output document built page by page.
pub trait PageSink {
    /// Append a page of `size` whose only content is `raster`, stretched to
    /// cover the whole page.
    fn add_image_page(&mut self, size: PageSize, raster: &DynamicImage)
        -> Result<(), SanitizeError>;

    /// Place an invisible text run on page `index` (0-based).
    fn add_invisible_text(&mut self, index: usize, run: &TextRun) -> Result<(), SanitizeError>;

    /// Drop every text run on page `index`, leaving its raster alone.
    fn clear_text(&mut self, index: usize) -> Result<(), SanitizeError>;

    fn remove_last_page(&mut self) -> Result<(), SanitizeError>;

    fn page_count(&self) -> usize;

    /// Serialise the document as it stands.
    fn to_bytes(&self) -> Result<Vec<u8>, SanitizeError>;
}

/// Opens inputs and creates empty outputs.
pub trait DocumentEngine {
    type Source<'a>: PageSource
    where
        Self: 'a;
    type Sink<'a>: PageSink
    where
        Self: 'a;

    fn open(&self, path: &Path) -> Result<Self::Source<'_>, SanitizeError>;

    /// Open an in-memory document, e.g. a freshly sanitised one for chunking.
    fn open_bytes(&self, bytes: Vec<u8>) -> Result<Self::Source<'_>, SanitizeError>;

    /// A new, empty output document with no inherited metadata.
    fn new_sink(&self) -> Result<Self::Sink<'_>, SanitizeError>;
}
