//! Contracts for the external collaborators: inspection, OCR, translation.
//!
//! The pipeline only sees these traits. [`google`] talks to the Cloud DLP,
//! Vision and Translation REST endpoints; [`simulated`] backs the config's
//! simulation toggle. Every call is awaited in sequence by the single batch
//! worker, so implementations need no internal queuing; timeouts belong to
//! the HTTP client they wrap.

pub mod google;
pub mod simulated;

use crate::config::{Likelihood, SanitizeConfig};
use crate::error::{SanitizeError, ServiceError};
use crate::geometry::PixelBox;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ── Inspection ───────────────────────────────────────────────────────────

/// Info-type name of the caller-supplied exact-match dictionary.
pub const CUSTOM_INFO_TYPE: &str = "CUSTOM_REDACTION_LIST";

/// What to look for and how sure the service must be.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectionPolicy {
    /// Built-in info-type names.
    pub info_types: Vec<String>,
    /// Findings weaker than this are dropped by the service.
    pub min_likelihood: Likelihood,
    /// Exact-match dictionary, reported at [`Likelihood::VeryLikely`].
    pub custom_terms: Vec<String>,
}

/// One detected sensitive span on a page raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub info_type: String,
    pub likelihood: Likelihood,
    /// Bounding boxes in raster pixel coordinates.
    pub boxes: Vec<PixelBox>,
}

/// Encoding of a raster handed to [`InspectionService::redact_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
}

impl ImageMime {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageMime::Png),
            "jpg" | "jpeg" => Some(ImageMime::Jpeg),
            _ => None,
        }
    }
}

#[async_trait]
pub trait InspectionService: Send + Sync {
    /// Findings for a PNG page raster, ordered as the service returns them.
    async fn inspect(
        &self,
        image_png: &[u8],
        policy: &InspectionPolicy,
    ) -> Result<Vec<Finding>, ServiceError>;

    /// Redact a standalone image and return the redacted pixels in the same encoding.
    async fn redact_image(
        &self,
        image: &[u8],
        mime: ImageMime,
        policy: &InspectionPolicy,
    ) -> Result<Vec<u8>, ServiceError>;

    /// Round-trip latency to the service.
    async fn ping(&self) -> Result<Duration, ServiceError>;
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// Integer pixel vertex. Vision omits zero coordinates, hence the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BoundingPoly {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

impl BoundingPoly {
    pub fn bounds(&self) -> Option<PixelBox> {
        let pts: Vec<(f64, f64)> = self.vertices.iter().map(|v| (v.x, v.y)).collect();
        PixelBox::enclosing(&pts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrSymbol {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrWord {
    #[serde(default)]
    pub bounding_box: BoundingPoly,
    #[serde(default)]
    pub symbols: Vec<OcrSymbol>,
}

impl OcrWord {
    pub fn text(&self) -> String {
        self.symbols.iter().map(|s| s.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrParagraph {
    #[serde(default)]
    pub words: Vec<OcrWord>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrBlock {
    #[serde(default)]
    pub paragraphs: Vec<OcrParagraph>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrPage {
    #[serde(default)]
    pub blocks: Vec<OcrBlock>,
}

/// pages → blocks → paragraphs → words → symbols, as returned by dense OCR.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TextAnnotation {
    #[serde(default)]
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub text: String,
}

impl TextAnnotation {
    /// Every word in reading order.
    pub fn words(&self) -> impl Iterator<Item = &OcrWord> {
        self.pages
            .iter()
            .flat_map(|p| &p.blocks)
            .flat_map(|b| &b.paragraphs)
            .flat_map(|p| &p.words)
    }
}

#[async_trait]
pub trait OcrService: Send + Sync {
    /// `Ok(None)` when the image contains no text.
    async fn detect_document_text(
        &self,
        image_png: &[u8],
    ) -> Result<Option<TextAnnotation>, ServiceError>;
}

// ── Translation ──────────────────────────────────────────────────────────

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translate a PDF and return the translated PDF bytes.
    async fn translate_document(
        &self,
        pdf: &[u8],
        target_language: &str,
    ) -> Result<Vec<u8>, ServiceError>;
}

// ── Bundle ───────────────────────────────────────────────────────────────

/// The three collaborators the pipeline needs.
#[derive(Clone)]
pub struct Services {
    pub inspection: Arc<dyn InspectionService>,
    pub ocr: Arc<dyn OcrService>,
    pub translation: Arc<dyn TranslationService>,
}

impl Services {
    /// Google-backed services, or simulated ones when the config says so.
    pub fn from_config(config: &SanitizeConfig) -> Result<Self, SanitizeError> {
        if config.simulation {
            return Ok(simulated::services());
        }
        let project_id = config.project_id.clone().ok_or_else(|| {
            SanitizeError::InvalidConfig("A project id is required for live services".into())
        })?;
        let client = google::GoogleClient::new(
            project_id,
            config.credentials_path.clone(),
            Duration::from_secs(config.api_timeout_secs),
        )
        .map_err(|e| SanitizeError::ServiceUnavailable {
            service: "http".into(),
            detail: e.to_string(),
        })?;
        Ok(google::services(Arc::new(client)))
    }
}
