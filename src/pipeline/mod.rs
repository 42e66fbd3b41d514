//! Pipeline stages for document sanitisation.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ redact ──▶ flatten ──▶ overlay         (per page)
//!                                    │
//!                                    └──▶ chunk ──▶ translate  (per document)
//! ```
//!
//! 1. [`input`]   : list the batch folder, validate magic bytes, name outputs
//! 2. [`render`]  : pdfium engine and the [`render::Rasterizer`]
//! 3. [`redact`]  : inspect a raster, burn findings into the page, re-render
//! 4. [`flatten`] : add the redacted raster as the only content of a new page
//! 5. [`overlay`] : OCR the flattened raster, add an invisible text layer
//! 6. [`chunk`]   : greedy byte-bounded split for the translation ceiling
//! 7. [`translate`]: submit chunks in order
//!
//! [`document`] holds the engine traits every stage is written against;
//! [`encode`] the PNG/base64 helpers for service payloads.

pub mod chunk;
pub mod document;
pub mod encode;
pub mod flatten;
pub mod input;
pub mod overlay;
pub mod redact;
pub mod render;
pub mod translate;

#[cfg(test)]
pub(crate) mod fakes;
