//! Error types for the docsanitizer library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`SanitizeError`]: **Fatal** for a document or for the whole batch
//!   (unreadable input, output cannot be written, no service reachable).
//!   A document-level error marks that file failed; the batch carries on.
//!   Only [`SanitizeError::is_batch_fatal`] errors stop the batch.
//!
//! * [`PageError`]: **Non-fatal**: a single page could not be inspected or
//!   OCR'd. Stored inside [`crate::sanitize::PageReport`] and logged; the page
//!   is still written to the output.
//!
//! * [`ServiceError`]: raised by the inspection, OCR and translation
//!   collaborators. Callers turn it into a `PageError` or a skipped translation.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docsanitizer library.
#[derive(Debug, Error)]
pub enum SanitizeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Extension is neither PDF nor a supported raster format.
    #[error("Unsupported input format: '{path}'")]
    UnsupportedFormat { path: PathBuf },

    /// File has a `.pdf` extension but not the PDF magic bytes.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Input folder could not be listed.
    #[error("Cannot read input folder '{path}': {source}")]
    FolderUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Document engine errors ────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; encrypted inputs are not supported.
    #[error("PDF '{path}' is encrypted")]
    Encrypted { path: PathBuf },

    /// pdfium failed while building or serialising an output document.
    #[error("Document assembly failed: {0}")]
    Assembly(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Service errors ────────────────────────────────────────────────────
    /// No collaborator service answered the start-up probe.
    #[error("Service '{service}' is unreachable: {detail}")]
    ServiceUnavailable { service: String, detail: String },

    /// The image-redaction call failed for a single-image input.
    #[error("Redaction failed for '{path}': {source}")]
    ImageRedactionFailed {
        path: PathBuf,
        #[source]
        source: ServiceError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Performance history could not be read or appended.
    #[error("History log '{path}': {detail}")]
    History { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SanitizeError {
    /// Whether this error must abort the whole batch rather than one file.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            SanitizeError::ServiceUnavailable { .. }
                | SanitizeError::PdfiumBindingFailed(_)
                | SanitizeError::InvalidConfig(_)
        )
    }
}

/// A non-fatal error for a single page.
///
/// The page is still written: unredacted when inspection failed, without a
/// text layer when OCR failed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Inspection call failed; page passed through with zero findings.
    #[error("Page {page}: inspection failed: {detail}")]
    InspectionFailed { page: usize, detail: String },

    /// Findings were returned but could not be burned into the page.
    #[error("Page {page}: applying redactions failed: {detail}")]
    RedactionFailed { page: usize, detail: String },

    /// OCR call failed; page keeps its raster only.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },
}

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("{service} response could not be decoded: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },

    /// No access token could be resolved.
    #[error("No credentials available: {0}")]
    Credentials(String),

    /// The request would exceed the service's payload ceiling.
    #[error("Payload of {size} bytes exceeds the {limit}-byte ceiling")]
    PayloadTooLarge { size: usize, limit: usize },
}
