//! In-memory document engine and scripted services for unit tests.

use super::document::{DocumentEngine, PageSink, PageSource};
use crate::error::{SanitizeError, ServiceError};
use crate::geometry::{PageSize, PointRect, TextRun};
use crate::services::{
    Finding, ImageMime, InspectionPolicy, InspectionService, OcrService, Services,
    TextAnnotation, TranslationService,
};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Engine ───────────────────────────────────────────────────────────────

pub struct FakeSource {
    pub sizes: Vec<PageSize>,
    pub burned: Vec<Vec<PointRect>>,
    pub fail_burn: bool,
    pub renders: Cell<usize>,
}

impl FakeSource {
    pub fn new(sizes: Vec<PageSize>) -> Self {
        let burned = vec![Vec::new(); sizes.len()];
        Self {
            sizes,
            burned,
            fail_burn: false,
            renders: Cell::new(0),
        }
    }

    pub fn uniform(pages: usize, size: PageSize) -> Self {
        Self::new(vec![size; pages])
    }
}

impl PageSource for FakeSource {
    fn page_count(&self) -> usize {
        self.sizes.len()
    }

    fn page_size(&self, index: usize) -> Result<PageSize, SanitizeError> {
        self.sizes
            .get(index)
            .copied()
            .ok_or_else(|| SanitizeError::Assembly(format!("no page {index}")))
    }

    fn render(&self, index: usize, zoom: f32) -> Result<DynamicImage, SanitizeError> {
        let size = self.page_size(index)?;
        self.renders.set(self.renders.get() + 1);
        let z = zoom as f64;
        let w = ((size.width * z).round() as u32).max(1);
        let h = ((size.height * z).round() as u32).max(1);
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        for r in &self.burned[index] {
            let x0 = (r.left * z).floor().max(0.0) as u32;
            let y0 = (r.top * z).floor().max(0.0) as u32;
            let x1 = ((r.right * z).ceil() as u32).min(w);
            let y1 = ((r.bottom * z).ceil() as u32).min(h);
            for y in y0..y1 {
                for x in x0..x1 {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
        Ok(DynamicImage::ImageRgba8(img))
    }

    fn burn(&mut self, index: usize, regions: &[PointRect]) -> Result<(), SanitizeError> {
        if self.fail_burn {
            return Err(SanitizeError::Assembly("burn refused".into()));
        }
        self.burned
            .get_mut(index)
            .ok_or_else(|| SanitizeError::Assembly(format!("no page {index}")))?
            .extend_from_slice(regions);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakePage {
    pub size: PageSize,
    pub raster: (u32, u32),
    pub texts: Vec<String>,
}

/// Serialised size is `unit` bytes per raster pixel column, so tests can
/// dial page weights through page widths.
pub struct FakeSink {
    pub pages: Vec<FakePage>,
    unit: usize,
    /// Text runs a page accepts before `add_invisible_text` starts failing.
    pub text_limit: Option<usize>,
}

impl PageSink for FakeSink {
    fn add_image_page(
        &mut self,
        size: PageSize,
        raster: &DynamicImage,
    ) -> Result<(), SanitizeError> {
        self.pages.push(FakePage {
            size,
            raster: (raster.width(), raster.height()),
            texts: Vec::new(),
        });
        Ok(())
    }

    fn add_invisible_text(&mut self, index: usize, run: &TextRun) -> Result<(), SanitizeError> {
        let limit = self.text_limit;
        let page = self
            .pages
            .get_mut(index)
            .ok_or_else(|| SanitizeError::Assembly(format!("no page {index}")))?;
        if limit.is_some_and(|l| page.texts.len() >= l) {
            return Err(SanitizeError::Assembly("text object rejected".into()));
        }
        page.texts.push(run.text.clone());
        Ok(())
    }

    fn clear_text(&mut self, index: usize) -> Result<(), SanitizeError> {
        self.pages
            .get_mut(index)
            .ok_or_else(|| SanitizeError::Assembly(format!("no page {index}")))?
            .texts
            .clear();
        Ok(())
    }

    fn remove_last_page(&mut self) -> Result<(), SanitizeError> {
        self.pages.pop();
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn to_bytes(&self) -> Result<Vec<u8>, SanitizeError> {
        let mut bytes =
            serde_json::to_vec(&self.pages).map_err(|e| SanitizeError::Internal(e.to_string()))?;
        bytes.push(b'\n');
        let weight: usize = self.pages.iter().map(|p| p.raster.0 as usize * self.unit).sum();
        if weight > bytes.len() {
            bytes.resize(weight, 0);
        }
        Ok(bytes)
    }
}

pub struct FakeEngine {
    pub unit: usize,
    pub files: HashMap<PathBuf, Vec<PageSize>>,
    /// When set, `new_sink` fails as if the pdfium library went away.
    pub sink_unbound: bool,
}

impl FakeEngine {
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            files: HashMap::new(),
            sink_unbound: false,
        }
    }

    pub fn with_unbound_sink(mut self) -> Self {
        self.sink_unbound = true;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, sizes: Vec<PageSize>) -> Self {
        self.files.insert(path.into(), sizes);
        self
    }
}

/// Pages of a document serialised by [`FakeSink::to_bytes`].
pub fn decode_pages(bytes: &[u8]) -> Vec<FakePage> {
    let end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
    serde_json::from_slice(&bytes[..end]).unwrap()
}

impl DocumentEngine for FakeEngine {
    type Source<'a> = FakeSource;
    type Sink<'a> = FakeSink;

    fn open(&self, path: &Path) -> Result<FakeSource, SanitizeError> {
        self.files
            .get(path)
            .map(|sizes| FakeSource::new(sizes.clone()))
            .ok_or_else(|| SanitizeError::CorruptPdf {
                path: path.to_path_buf(),
                detail: "unknown to fake engine".into(),
            })
    }

    fn open_bytes(&self, bytes: Vec<u8>) -> Result<FakeSource, SanitizeError> {
        Ok(FakeSource::new(
            decode_pages(&bytes).into_iter().map(|p| p.size).collect(),
        ))
    }

    fn new_sink(&self) -> Result<FakeSink, SanitizeError> {
        if self.sink_unbound {
            return Err(SanitizeError::PdfiumBindingFailed("library unloaded".into()));
        }
        Ok(FakeSink {
            pages: Vec::new(),
            unit: self.unit,
            text_limit: None,
        })
    }
}

// ── Services ─────────────────────────────────────────────────────────────

/// Replies in script order; an exhausted script answers with no findings.
#[derive(Default)]
pub struct ScriptedInspection {
    pub replies: Mutex<VecDeque<Result<Vec<Finding>, String>>>,
}

impl ScriptedInspection {
    pub fn new(replies: Vec<Result<Vec<Finding>, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl InspectionService for ScriptedInspection {
    async fn inspect(
        &self,
        _image_png: &[u8],
        _policy: &InspectionPolicy,
    ) -> Result<Vec<Finding>, ServiceError> {
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(findings)) => Ok(findings),
            Some(Err(msg)) => Err(ServiceError::Decode {
                service: "dlp",
                detail: msg,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn redact_image(
        &self,
        image: &[u8],
        _mime: ImageMime,
        _policy: &InspectionPolicy,
    ) -> Result<Vec<u8>, ServiceError> {
        Ok(image.to_vec())
    }

    async fn ping(&self) -> Result<Duration, ServiceError> {
        Ok(Duration::from_millis(10))
    }
}

#[derive(Default)]
pub struct ScriptedOcr {
    pub replies: Mutex<VecDeque<Result<Option<TextAnnotation>, String>>>,
    /// Width and height of every raster submitted.
    pub seen: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedOcr {
    pub fn new(replies: Vec<Result<Option<TextAnnotation>, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OcrService for ScriptedOcr {
    async fn detect_document_text(
        &self,
        image_png: &[u8],
    ) -> Result<Option<TextAnnotation>, ServiceError> {
        if let Ok(img) = image::load_from_memory(image_png) {
            self.seen.lock().unwrap().push((img.width(), img.height()));
        }
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(ann)) => Ok(ann),
            Some(Err(msg)) => Err(ServiceError::Decode {
                service: "vision",
                detail: msg,
            }),
            None => Ok(None),
        }
    }
}

/// Echoes documents back; fails the calls whose 1-based number is listed.
#[derive(Default)]
pub struct EchoTranslation {
    pub fail_calls: Vec<usize>,
    pub calls: Mutex<Vec<usize>>,
}

#[async_trait]
impl TranslationService for EchoTranslation {
    async fn translate_document(
        &self,
        pdf: &[u8],
        _target_language: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(pdf.len());
            calls.len()
        };
        if self.fail_calls.contains(&n) {
            return Err(ServiceError::Status {
                service: "translate",
                status: 500,
                body: "backend error".into(),
            });
        }
        Ok(pdf.to_vec())
    }
}

pub fn services(
    inspection: ScriptedInspection,
    ocr: ScriptedOcr,
    translation: EchoTranslation,
) -> (Services, Arc<ScriptedOcr>, Arc<EchoTranslation>) {
    let ocr = Arc::new(ocr);
    let translation = Arc::new(translation);
    let services = Services {
        inspection: Arc::new(inspection),
        ocr: ocr.clone(),
        translation: translation.clone(),
    };
    (services, ocr, translation)
}
