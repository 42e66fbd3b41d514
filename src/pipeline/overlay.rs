//! Searchable text layer over a flattened page.
//!
//! OCR runs on the redacted raster that was painted into the output, never
//! on the source page, so burned-out content cannot come back as text. Each
//! recognised word becomes an invisible run anchored at the lower-left of its
//! box, sized to the box height.

use super::document::PageSink;
use super::encode::encode_png;
use super::render::RenderedPage;
use crate::error::PageError;
use crate::services::OcrService;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct OverlayOutcome {
    /// Words placed on the page.
    pub words: usize,
    pub warning: Option<PageError>,
}

pub struct OcrOverlay<'a> {
    ocr: &'a dyn OcrService,
}

impl<'a> OcrOverlay<'a> {
    pub fn new(ocr: &'a dyn OcrService) -> Self {
        Self { ocr }
    }

    /// OCR `flattened` and write its words onto page `index` of `sink`.
    pub async fn apply<K: PageSink + ?Sized>(
        &self,
        sink: &mut K,
        index: usize,
        flattened: &RenderedPage,
    ) -> OverlayOutcome {
        let number = flattened.index + 1;

        let png = match encode_png(&flattened.image) {
            Ok(png) => png,
            Err(e) => return failed(number, e.to_string(), 0),
        };
        let annotation = match self.ocr.detect_document_text(&png).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                debug!("Page {number}: no text recognised");
                return OverlayOutcome::default();
            }
            Err(e) => return failed(number, e.to_string(), 0),
        };

        let mapper = flattened.mapper();
        let mut words = 0;
        for word in annotation.words() {
            let text = word.text();
            if text.trim().is_empty() {
                continue;
            }
            let Some(bounds) = word.bounding_box.bounds() else {
                continue;
            };
            if bounds.is_empty() {
                continue;
            }
            let run = mapper.text_run(&bounds, text);
            if let Err(e) = sink.add_invisible_text(index, &run) {
                if let Err(clear) = sink.clear_text(index) {
                    warn!("Page {number}: could not drop partial text layer: {clear}");
                    return failed(number, e.to_string(), words);
                }
                return failed(number, e.to_string(), 0);
            }
            words += 1;
        }
        debug!("Page {number}: {words} words overlaid");
        OverlayOutcome {
            words,
            warning: None,
        }
    }
}

fn failed(page: usize, detail: String, words: usize) -> OverlayOutcome {
    warn!("Page {page}: OCR failed, keeping raster only: {detail}");
    OverlayOutcome {
        words,
        warning: Some(PageError::OcrFailed { page, detail }),
    }
}
