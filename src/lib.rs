//! # docsanitizer
//!
//! Remove personal data from PDFs and scanned images, then optionally
//! translate the result.
//!
//! ## Why flatten?
//!
//! Drawing a black box over a name in a PDF leaves the name in the content
//! stream, where any text extractor finds it again. This crate instead
//! rasterises each page, has an inspection service locate sensitive spans,
//! burns opaque fills over them and rebuilds the page as a single image.
//! Nothing machine-readable from the source survives. An OCR pass then adds
//! an invisible text layer so the result stays searchable.
//!
//! ## Pipeline Overview
//!
//! ```text
//! folder
//!  │
//!  ├─ 1. Scan      pending vs. already processed (resume)
//!  ├─ 2. Render    rasterise each page via pdfium
//!  ├─ 3. Redact    inspect raster → burn black fills → re-render
//!  ├─ 4. Flatten   redacted raster becomes the only page content
//!  ├─ 5. Overlay   OCR the raster, add invisible text
//!  ├─ 6. Save      processed/anonymized_<name>
//!  └─ 7. Translate byte-bounded chunks → translated_<lang>_<name>
//! ```
//!
//! Every stage boundary emits a typed [`PipelineEvent`]. The [`Estimator`]
//! subscribes to them and publishes a remaining-time [`Prediction`] fitted
//! on the timings of earlier runs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsanitizer::{BatchWorker, EventBus, SanitizeConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SanitizeConfig::builder()
//!         .simulation(true)
//!         .translate_to("en")
//!         .build()?;
//!     let worker = BatchWorker::spawn("./inbox".into(), config, EventBus::new())?;
//!     let report = worker.join()?;
//!     eprintln!("{} documents, {} findings", report.succeeded(), report.total_findings());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsanitize` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! ## Services
//!
//! Live mode talks to Cloud DLP, Vision and Translation with a bearer token
//! (see [`services::google`]). Simulation mode swaps in
//! [`services::simulated`] so the whole pipeline runs offline.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod estimate;
pub mod geometry;
pub mod pipeline;
pub mod progress;
pub mod sanitize;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run_batch, BatchReport, BatchWorker, CancelToken, FailedDocument};
pub use config::{
    Likelihood, MetricsSeed, SanitizeConfig, SanitizeConfigBuilder, TranslationConfig,
};
pub use error::{PageError, SanitizeError, ServiceError};
pub use estimate::{Estimator, Prediction};
pub use geometry::{CoordinateMapper, PageSize, PixelBox, PointRect};
pub use pipeline::document::{DocumentEngine, PageSink, PageSource};
pub use pipeline::render::PdfiumEngine;
pub use progress::{
    ChannelObserver, DocumentMetrics, EventBus, NoopObserver, PipelineEvent, PipelineObserver,
};
pub use sanitize::{DocumentReport, PageReport, Sanitizer};
pub use services::{InspectionService, OcrService, Services, TranslationService};
