//! Persisted performance measurements.
//!
//! The history log is append-only JSON lines, one [`HistorySample`] per
//! completed document, written as soon as the document finishes. Loading
//! reads the whole file but keeps only the most recent [`HISTORY_WINDOW`]
//! samples recorded under the current environment tag.
//!
//! The [`PerformanceSnapshot`] beside it (`<history>.metrics.json`) carries
//! the smoothed metrics that seed the next run.

use crate::error::SanitizeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Samples considered when fitting the cost model.
pub const HISTORY_WINDOW: usize = 50;

/// Measurements for one fully processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub recorded_at: DateTime<Utc>,
    pub environment: String,
    pub pages: usize,
    pub size_mb: f64,
    pub redact_secs_per_page: f64,
    pub save_secs_per_page: f64,
    pub load_secs_per_mb: f64,
    #[serde(default)]
    pub translation_mb: f64,
    #[serde(default)]
    pub translation_flatten_secs: f64,
    #[serde(default)]
    pub translation_api_secs: f64,
    pub ping_ms: f64,
}

impl HistorySample {
    pub fn translation_secs(&self) -> f64 {
        self.translation_flatten_secs + self.translation_api_secs
    }
}

/// Append-only JSON-lines log of [`HistorySample`]s.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, detail: impl ToString) -> SanitizeError {
        SanitizeError::History {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }

    pub fn append(&self, sample: &HistorySample) -> Result<(), SanitizeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        let line = serde_json::to_string(sample).map_err(|e| self.error(e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        writeln!(file, "{line}").map_err(|e| self.error(e))?;
        debug!("Appended history sample to {}", self.path.display());
        Ok(())
    }

    /// The most recent `limit` samples tagged `environment`, oldest first.
    /// A missing log is an empty history; malformed lines are skipped.
    pub fn load_recent(
        &self,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<HistorySample>, SanitizeError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.error(e)),
        };

        let mut samples = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.error(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistorySample>(&line) {
                Ok(s) if s.environment == environment => samples.push(s),
                Ok(_) => {}
                Err(e) => warn!("{}:{}: skipping malformed sample: {e}", self.path.display(), n + 1),
            }
        }

        let skip = samples.len().saturating_sub(limit);
        Ok(samples.split_off(skip))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".metrics.json");
        PathBuf::from(name)
    }
}

/// Smoothed metrics carried from one batch to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub updated_at: DateTime<Utc>,
    pub load_secs_per_mb: f64,
    pub ping_ms: f64,
}

impl PerformanceSnapshot {
    pub fn read(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Ignoring unreadable metrics snapshot {}: {e}", path.display());
                None
            }
        }
    }

    /// Replace the snapshot atomically.
    pub fn write(&self, path: &Path) -> Result<(), SanitizeError> {
        let err = |detail: String| SanitizeError::History {
            path: path.to_path_buf(),
            detail,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| err(e.to_string()))?;
        let json = serde_json::to_vec_pretty(self).map_err(|e| err(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| err(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| err(e.to_string()))?;
        tmp.persist(path).map_err(|e| err(e.to_string()))?;
        Ok(())
    }
}
