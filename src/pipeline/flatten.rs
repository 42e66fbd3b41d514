//! Page flattening: an output page whose only content is a raster.
//!
//! The output document is created empty by the engine and every page is
//! added here as a single image stretched over the original page size. No
//! text, fonts, annotations or metadata from the source can reach it.

use super::document::PageSink;
use super::render::RenderedPage;
use crate::error::SanitizeError;
use crate::geometry::PageSize;
use image::DynamicImage;
use tracing::debug;

/// Append `raster` as a new page of `size` points. Returns the new page's
/// index in `sink`.
pub fn flatten<K: PageSink + ?Sized>(
    sink: &mut K,
    size: PageSize,
    raster: &DynamicImage,
) -> Result<usize, SanitizeError> {
    sink.add_image_page(size, raster)?;
    let index = sink.page_count() - 1;
    debug!(
        "Flattened {}x{} px onto {:.1}x{:.1} pt page {}",
        raster.width(),
        raster.height(),
        size.width,
        size.height,
        index + 1
    );
    Ok(index)
}

/// Builds the sanitised document, refusing pages out of source order.
pub struct Reassembler<K> {
    sink: K,
}

impl<K: PageSink> Reassembler<K> {
    pub fn new(sink: K) -> Self {
        Self { sink }
    }

    /// Flatten the next page. Pages must arrive as 0, 1, 2, …
    pub fn push(&mut self, page: &RenderedPage) -> Result<usize, SanitizeError> {
        let expected = self.sink.page_count();
        if page.index != expected {
            return Err(SanitizeError::Internal(format!(
                "page {} reassembled out of order, expected page {}",
                page.index + 1,
                expected + 1
            )));
        }
        flatten(&mut self.sink, page.size, &page.image)
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn page_count(&self) -> usize {
        self.sink.page_count()
    }

    pub fn into_sink(self) -> K {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::document::DocumentEngine;
    use crate::pipeline::fakes::{FakeEngine, FakeSource};
    use crate::pipeline::render::Rasterizer;

    #[test]
    fn page_uses_original_points_not_pixels() {
        let engine = FakeEngine::new(1);
        let source = FakeSource::uniform(1, PageSize::new(612.0, 792.0));
        let page = Rasterizer::new(3.0).render(&source, 0).unwrap();
        let mut sink = engine.new_sink().unwrap();

        assert_eq!(flatten(&mut sink, page.size, &page.image).unwrap(), 0);
        assert_eq!(sink.pages[0].size, PageSize::new(612.0, 792.0));
        assert_eq!(sink.pages[0].raster, (1836, 2376));
        assert!(sink.pages[0].texts.is_empty());
    }

    #[test]
    fn reassembler_keeps_source_order() {
        let engine = FakeEngine::new(1);
        let source = FakeSource::new(vec![
            PageSize::new(10.0, 10.0),
            PageSize::new(20.0, 10.0),
            PageSize::new(30.0, 10.0),
        ]);
        let r = Rasterizer::new(1.0);
        let mut out = Reassembler::new(engine.new_sink().unwrap());

        let p0 = r.render(&source, 0).unwrap();
        let p2 = r.render(&source, 2).unwrap();
        out.push(&p0).unwrap();
        assert!(out.push(&p2).is_err());
        out.push(&r.render(&source, 1).unwrap()).unwrap();
        out.push(&p2).unwrap();

        let widths: Vec<f64> = out.into_sink().pages.iter().map(|p| p.size.width).collect();
        assert_eq!(widths, vec![10.0, 20.0, 30.0]);
    }
}
