//! PDF rasterisation and assembly through pdfium.
//!
//! [`PdfiumEngine`] implements the [`DocumentEngine`] seam: it opens inputs
//! as [`PdfiumSource`]s and creates fresh [`PdfiumSink`]s for output. The
//! [`Rasterizer`] sits on top of any [`PageSource`] and is the one place a
//! page becomes pixels.
//!
//! ## Threading
//!
//! pdfium keeps thread-local state and its handles are not `Send`. The batch
//! runs on a dedicated worker thread with a current-thread runtime, so every
//! call here happens on that one thread and no `spawn_blocking` hop is
//! needed.

use super::document::{DocumentEngine, PageSink, PageSource};
use crate::error::SanitizeError;
use crate::geometry::{CoordinateMapper, PageSize, PointRect, TextRun};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bind to pdfium: `PDFIUM_LIB_PATH` (a library file or the directory
/// holding it) when set, otherwise the system library.
pub fn bind_pdfium() -> Result<Pdfium, SanitizeError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(raw) => {
            let path = PathBuf::from(raw);
            let lib: PathBuf = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path).into()
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| SanitizeError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn assembly(e: PdfiumError) -> SanitizeError {
    SanitizeError::Assembly(format!("{e:?}"))
}

fn page_index(index: usize) -> Result<PdfPageIndex, SanitizeError> {
    PdfPageIndex::try_from(index)
        .map_err(|_| SanitizeError::Assembly(format!("page index {index} is out of range")))
}

// ── Engine ───────────────────────────────────────────────────────────────

pub struct PdfiumEngine {
    pdfium: Pdfium,
}

impl PdfiumEngine {
    pub fn new(pdfium: Pdfium) -> Self {
        Self { pdfium }
    }

    /// Bind and wrap in one step.
    pub fn bind() -> Result<Self, SanitizeError> {
        Ok(Self::new(bind_pdfium()?))
    }

    pub fn pdfium(&self) -> &Pdfium {
        &self.pdfium
    }

    fn classify_load_error(path: &Path, e: PdfiumError) -> SanitizeError {
        let detail = format!("{e:?}");
        if detail.contains("Password") || detail.contains("password") {
            SanitizeError::Encrypted {
                path: path.to_path_buf(),
            }
        } else {
            SanitizeError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    }
}

impl DocumentEngine for PdfiumEngine {
    type Source<'a> = PdfiumSource<'a>;
    type Sink<'a> = PdfiumSink<'a>;

    fn open(&self, path: &Path) -> Result<PdfiumSource<'_>, SanitizeError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| Self::classify_load_error(path, e))?;
        info!(
            "Opened {} ({} pages)",
            path.display(),
            document.pages().len()
        );
        Ok(PdfiumSource { document })
    }

    fn open_bytes(&self, bytes: Vec<u8>) -> Result<PdfiumSource<'_>, SanitizeError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|e| Self::classify_load_error(Path::new("<memory>"), e))?;
        Ok(PdfiumSource { document })
    }

    fn new_sink(&self) -> Result<PdfiumSink<'_>, SanitizeError> {
        let mut document = self.pdfium.create_new_pdf().map_err(assembly)?;
        let font = document.fonts_mut().helvetica();
        Ok(PdfiumSink { document, font })
    }
}

// ── Source ───────────────────────────────────────────────────────────────

pub struct PdfiumSource<'a> {
    document: PdfDocument<'a>,
}

impl PdfiumSource<'_> {
    fn page(&self, index: usize) -> Result<PdfPage<'_>, SanitizeError> {
        self.document
            .pages()
            .get(page_index(index)?)
            .map_err(|e| SanitizeError::Assembly(format!("page {}: {e:?}", index + 1)))
    }
}

impl PageSource for PdfiumSource<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, index: usize) -> Result<PageSize, SanitizeError> {
        let page = self.page(index)?;
        Ok(PageSize::new(
            page.width().value as f64,
            page.height().value as f64,
        ))
    }

    fn render(&self, index: usize, zoom: f32) -> Result<DynamicImage, SanitizeError> {
        let page = self.page(index)?;
        let config = PdfRenderConfig::new()
            .scale_page_by_factor(zoom)
            .render_form_data(true);
        let bitmap = page.render_with_config(&config).map_err(assembly)?;
        Ok(bitmap.as_image())
    }

    fn burn(&mut self, index: usize, regions: &[PointRect]) -> Result<(), SanitizeError> {
        let mut page = self.page(index)?;
        let height = page.height().value as f64;
        for region in regions {
            let r = CoordinateMapper::to_pdf_space(region, height);
            page.objects_mut()
                .create_path_object_rect(
                    PdfRect::new_from_values(
                        r.bottom as f32,
                        r.left as f32,
                        r.top as f32,
                        r.right as f32,
                    ),
                    None,
                    None,
                    Some(PdfColor::BLACK),
                )
                .map_err(assembly)?;
        }
        debug!("Burned {} regions into page {}", regions.len(), index + 1);
        Ok(())
    }
}

// ── Sink ─────────────────────────────────────────────────────────────────

pub struct PdfiumSink<'a> {
    document: PdfDocument<'a>,
    font: PdfFontToken,
}

impl PageSink for PdfiumSink<'_> {
    fn add_image_page(
        &mut self,
        size: PageSize,
        raster: &DynamicImage,
    ) -> Result<(), SanitizeError> {
        let width = PdfPoints::new(size.width as f32);
        let height = PdfPoints::new(size.height as f32);
        let mut page = self
            .document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(width, height))
            .map_err(assembly)?;
        page.objects_mut()
            .create_image_object(
                PdfPoints::ZERO,
                PdfPoints::ZERO,
                raster,
                Some(width),
                Some(height),
            )
            .map_err(assembly)?;
        Ok(())
    }

    fn add_invisible_text(&mut self, index: usize, run: &TextRun) -> Result<(), SanitizeError> {
        let mut page = self
            .document
            .pages()
            .get(page_index(index)?)
            .map_err(assembly)?;
        let y = page.height().value as f64 - run.baseline;
        let mut object = page
            .objects_mut()
            .create_text_object(
                PdfPoints::new(run.x as f32),
                PdfPoints::new(y as f32),
                &run.text,
                self.font,
                PdfPoints::new(run.font_size as f32),
            )
            .map_err(assembly)?;
        if let Some(text) = object.as_text_object_mut() {
            text.set_render_mode(PdfPageTextRenderMode::Invisible)
                .map_err(assembly)?;
        }
        Ok(())
    }

    fn clear_text(&mut self, index: usize) -> Result<(), SanitizeError> {
        let mut page = self
            .document
            .pages()
            .get(page_index(index)?)
            .map_err(assembly)?;
        let objects = page.objects_mut();
        for i in (0..objects.len()).rev() {
            if objects.get(i).map_err(assembly)?.object_type() == PdfPageObjectType::Text {
                objects.remove_object_at_index(i).map_err(assembly)?;
            }
        }
        Ok(())
    }

    fn remove_last_page(&mut self) -> Result<(), SanitizeError> {
        let count = self.page_count();
        if count == 0 {
            return Ok(());
        }
        self.document
            .pages()
            .get(page_index(count - 1)?)
            .and_then(|page| page.delete())
            .map_err(assembly)
    }

    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn to_bytes(&self) -> Result<Vec<u8>, SanitizeError> {
        self.document.save_to_bytes().map_err(assembly)
    }
}

// ── Rasterizer ───────────────────────────────────────────────────────────

/// One page at a known scale.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub index: usize,
    /// Original page dimensions in points.
    pub size: PageSize,
    pub zoom: f32,
    pub image: DynamicImage,
}

impl RenderedPage {
    pub fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper::new(self.zoom as f64)
    }
}

/// Renders pages at a fixed scale.
#[derive(Debug, Clone, Copy)]
pub struct Rasterizer {
    zoom: f32,
}

impl Rasterizer {
    pub fn new(zoom: f32) -> Self {
        Self { zoom }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn render<S: PageSource + ?Sized>(
        &self,
        source: &S,
        index: usize,
    ) -> Result<RenderedPage, SanitizeError> {
        let size = source.page_size(index)?;
        let image = source.render(index, self.zoom)?;
        debug!(
            "Rendered page {} → {}x{} px at {}x",
            index + 1,
            image.width(),
            image.height(),
            self.zoom
        );
        Ok(RenderedPage {
            index,
            size,
            zoom: self.zoom,
            image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::FakeSource;

    #[test]
    fn rasterizer_keeps_point_size_and_zoom() {
        let source = FakeSource::uniform(2, PageSize::new(100.0, 200.0));
        let page = Rasterizer::new(3.0).render(&source, 1).unwrap();
        assert_eq!(page.index, 1);
        assert_eq!(page.size, PageSize::new(100.0, 200.0));
        assert_eq!((page.image.width(), page.image.height()), (300, 600));
        assert_eq!(page.mapper().zoom(), 3.0);
    }

    #[test]
    fn page_index_rejects_overflow() {
        assert_eq!(page_index(7).unwrap(), 7);
        let err = page_index(usize::from(u16::MAX) + 1).unwrap_err();
        assert!(matches!(err, SanitizeError::Assembly(_)));
    }

    #[test]
    fn rasterizer_reports_missing_page() {
        let source = FakeSource::uniform(1, PageSize::new(10.0, 10.0));
        assert!(Rasterizer::new(1.0).render(&source, 4).is_err());
    }
}
