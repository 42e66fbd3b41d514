//! Input discovery and output naming.
//!
//! A batch is one folder. Supported files directly inside it are pending
//! unless `processed/anonymized_<name>` already exists, which makes a batch
//! resumable after a cancel or crash. Magic bytes are checked before a file
//! reaches pdfium so a mislabelled input fails with a clear error.

use crate::error::SanitizeError;
use crate::services::ImageMime;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Subfolder of the input folder that receives every output.
pub const PROCESSED_DIR: &str = "processed";

/// Prefix of a sanitised output file.
pub const SANITIZED_PREFIX: &str = "anonymized_";

/// What kind of pipeline a file goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Paginated document: redact, flatten, OCR, optionally translate.
    Pdf,
    /// Single raster: whole-image redaction only.
    Image(ImageMime),
}

impl InputKind {
    /// Classify by extension; `None` for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("pdf") {
            Some(InputKind::Pdf)
        } else {
            ImageMime::from_extension(ext).map(InputKind::Image)
        }
    }

    fn matches_magic(&self, magic: &[u8; 4]) -> bool {
        match self {
            InputKind::Pdf => magic == b"%PDF",
            InputKind::Image(ImageMime::Png) => magic == b"\x89PNG",
            InputKind::Image(ImageMime::Jpeg) => magic[..3] == [0xFF, 0xD8, 0xFF],
        }
    }
}

/// One pending file.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchInput {
    pub path: PathBuf,
    pub kind: InputKind,
    pub size_bytes: u64,
}

impl BatchInput {
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Result of listing a batch folder.
#[derive(Debug, Default)]
pub struct FolderScan {
    pub output_dir: PathBuf,
    /// Files still to process, sorted by name.
    pub pending: Vec<BatchInput>,
    /// Files whose sanitised output already exists.
    pub completed: Vec<PathBuf>,
}

/// List `folder` (non-recursive) and split its supported files into pending
/// and completed.
pub fn scan_folder(folder: &Path) -> Result<FolderScan, SanitizeError> {
    let entries = std::fs::read_dir(folder).map_err(|source| SanitizeError::FolderUnreadable {
        path: folder.to_path_buf(),
        source,
    })?;
    let output_dir = folder.join(PROCESSED_DIR);

    let mut scan = FolderScan {
        output_dir,
        ..Default::default()
    };
    for entry in entries {
        let entry = entry.map_err(|source| SanitizeError::FolderUnreadable {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            warn!("Skipping unreadable entry {}", path.display());
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let Some(kind) = InputKind::from_path(&path) else {
            debug!("Ignoring unsupported file {}", path.display());
            continue;
        };
        if sanitized_path(&scan.output_dir, &path).exists() {
            scan.completed.push(path);
        } else {
            scan.pending.push(BatchInput {
                path,
                kind,
                size_bytes: meta.len(),
            });
        }
    }

    scan.pending.sort_by(|a, b| a.path.cmp(&b.path));
    scan.completed.sort();
    info!(
        "Scanned {}: {} pending, {} already processed",
        folder.display(),
        scan.pending.len(),
        scan.completed.len()
    );
    Ok(scan)
}

/// Check that `path` is readable and its magic bytes match its extension.
pub fn validate(path: &Path) -> Result<InputKind, SanitizeError> {
    let kind = InputKind::from_path(path).ok_or_else(|| SanitizeError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(SanitizeError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(SanitizeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || !kind.matches_magic(&magic) {
        return Err(match kind {
            InputKind::Pdf => SanitizeError::NotAPdf {
                path: path.to_path_buf(),
                magic,
            },
            InputKind::Image(_) => SanitizeError::UnsupportedFormat {
                path: path.to_path_buf(),
            },
        });
    }
    Ok(kind)
}

// ── Output naming ────────────────────────────────────────────────────────

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<output_dir>/anonymized_<original>`.
pub fn sanitized_path(output_dir: &Path, original: &Path) -> PathBuf {
    output_dir.join(format!("{SANITIZED_PREFIX}{}", file_name(original)))
}

/// Where a translated chunk goes.
///
/// * empty label: `<output_dir>/translated_<lang>_<original>`
/// * otherwise: `<output_dir>/<lang>_anonymized_<original>/<label>_translated_<lang>_<original>`
pub fn translated_path(output_dir: &Path, original: &Path, lang: &str, label: &str) -> PathBuf {
    let name = file_name(original);
    if label.is_empty() {
        output_dir.join(format!("translated_{lang}_{name}"))
    } else {
        chunk_dir(output_dir, original, lang).join(format!("{label}_translated_{lang}_{name}"))
    }
}

/// Subfolder holding the chunks of a split translation.
pub fn chunk_dir(output_dir: &Path, original: &Path, lang: &str) -> PathBuf {
    output_dir.join(format!("{lang}_{SANITIZED_PREFIX}{}", file_name(original)))
}
