//! Live estimation state and the remaining-time formula.

use super::history::HistorySample;
use super::regression::{calculate_regression, LinearModel};
use crate::config::MetricsSeed;
use crate::progress::{DocumentMetrics, PipelineEvent};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

/// Samples needed before a numeric estimate is shown.
pub const MIN_CALIBRATION_SAMPLES: usize = 2;

/// Weight of the newest observation in live smoothing.
pub const SMOOTHING_ALPHA: f64 = 0.3;

/// Assumed rendered size of one page when projecting translation volume.
/// A heuristic, not a measurement.
pub const TRANSLATION_MB_PER_PAGE: f64 = 2.0;

/// What the UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Prediction {
    /// Not enough history to trust the model.
    Calibrating { samples: usize },
    Estimate { remaining: Duration },
}

impl Prediction {
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Prediction::Estimate { remaining } => Some(*remaining),
            Prediction::Calibrating { .. } => None,
        }
    }
}

/// Per-category fits plus the smoothed metrics that are not regressed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostModel {
    /// Pages → seconds spent per document on page work.
    pub redaction: LinearModel,
    /// Pages → seconds spent saving.
    pub save: LinearModel,
    /// Translation MB → seconds spent translating.
    pub translation: LinearModel,
    pub samples: usize,
    pub historical_ping_ms: f64,
    pub load_secs_per_mb: f64,
}

impl CostModel {
    /// Fit all categories from `samples`.
    pub fn fit(samples: &[HistorySample], seed: MetricsSeed) -> Self {
        let redaction: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| (s.pages as f64, s.redact_secs_per_page * s.pages as f64))
            .collect();
        let save: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| (s.pages as f64, s.save_secs_per_page * s.pages as f64))
            .collect();
        let translation: Vec<(f64, f64)> = samples
            .iter()
            .filter(|s| s.translation_mb > 0.0)
            .map(|s| (s.translation_mb, s.translation_secs()))
            .collect();

        let historical_ping_ms = mean(samples.iter().map(|s| s.ping_ms).filter(|p| *p > 0.0))
            .unwrap_or(seed.ping_ms);
        let load_secs_per_mb = mean(
            samples
                .iter()
                .map(|s| s.load_secs_per_mb)
                .filter(|v| v.is_finite() && *v >= 0.0),
        )
        .unwrap_or(seed.load_secs_per_mb);

        Self {
            redaction: calculate_regression(&redaction),
            save: calculate_regression(&save),
            translation: calculate_regression(&translation),
            samples: samples.len(),
            historical_ping_ms,
            load_secs_per_mb,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.samples >= MIN_CALIBRATION_SAMPLES
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn smooth(prev: Option<f64>, x: f64) -> f64 {
    match prev {
        Some(p) => SMOOTHING_ALPHA * x + (1.0 - SMOOTHING_ALPHA) * p,
        None => x,
    }
}

/// Redaction slope scaled by live latency: `slope · (0.6·ratio + 0.4)` with
/// `ratio = clamp(current / historical, 0.5, 2.0)`.
pub fn ping_corrected_slope(slope: f64, current_ping_ms: f64, historical_ping_ms: f64) -> f64 {
    let ratio = if current_ping_ms > 0.0 && historical_ping_ms > 0.0 {
        (current_ping_ms / historical_ping_ms).clamp(0.5, 2.0)
    } else {
        1.0
    };
    slope * (0.6 * ratio + 0.4)
}

#[derive(Debug, Clone, Default)]
struct CurrentDocument {
    file: String,
    pages: usize,
    size_mb: f64,
    pages_done: usize,
    page_secs: f64,
    save_secs: f64,
    load_secs: f64,
    loaded: bool,
}

/// Counters and smoothed measurements for one batch.
#[derive(Debug, Clone)]
pub struct EstimationState {
    pub model: CostModel,
    environment: String,
    translation: bool,
    files_total: usize,
    files_done: usize,
    pages_total: usize,
    pages_done: usize,
    pages_translated: usize,
    mb_total: f64,
    mb_done: f64,
    current_ping_ms: f64,
    live_page_secs: Option<f64>,
    live_save_secs_per_page: Option<f64>,
    live_load_secs_per_mb: Option<f64>,
    current: Option<CurrentDocument>,
}

impl EstimationState {
    pub fn new(model: CostModel, environment: impl Into<String>) -> Self {
        let current_ping_ms = model.historical_ping_ms;
        Self {
            model,
            environment: environment.into(),
            translation: false,
            files_total: 0,
            files_done: 0,
            pages_total: 0,
            pages_done: 0,
            pages_translated: 0,
            mb_total: 0.0,
            mb_done: 0.0,
            current_ping_ms,
            live_page_secs: None,
            live_save_secs_per_page: None,
            live_load_secs_per_mb: None,
            current: None,
        }
    }

    pub fn pages_done(&self) -> usize {
        self.pages_done
    }

    pub fn pages_total(&self) -> usize {
        self.pages_total
    }

    pub fn current_ping_ms(&self) -> f64 {
        self.current_ping_ms
    }

    /// Smoothed load time per MB: live when measured, else the model's.
    pub fn load_secs_per_mb(&self) -> f64 {
        self.live_load_secs_per_mb
            .unwrap_or(self.model.load_secs_per_mb)
    }

    /// Fold one event in. Returns the sample to persist when a document
    /// completes.
    pub fn apply(&mut self, event: &PipelineEvent) -> Option<HistorySample> {
        match event {
            PipelineEvent::BatchStarted {
                files,
                total_pages,
                total_mb,
                translation,
            } => {
                self.translation = *translation;
                self.files_total = *files;
                self.pages_total = *total_pages;
                self.mb_total = *total_mb;
                self.files_done = 0;
                self.pages_done = 0;
                self.pages_translated = 0;
                self.mb_done = 0.0;
                self.live_page_secs = None;
                self.live_save_secs_per_page = None;
                self.live_load_secs_per_mb = None;
                self.current = None;
            }
            PipelineEvent::LatencyMeasured { ping } => {
                self.current_ping_ms = ping.as_secs_f64() * 1000.0;
            }
            PipelineEvent::DocumentStarted {
                file,
                pages,
                size_mb,
                ..
            } => {
                self.current = Some(CurrentDocument {
                    file: file.clone(),
                    pages: *pages,
                    size_mb: *size_mb,
                    ..Default::default()
                });
            }
            PipelineEvent::DocumentLoaded { elapsed, .. } => {
                if let Some(doc) = self.current.as_mut() {
                    doc.loaded = true;
                    doc.load_secs = elapsed.as_secs_f64();
                    self.mb_done += doc.size_mb;
                    if doc.size_mb > 0.0 {
                        self.live_load_secs_per_mb =
                            Some(smooth(self.live_load_secs_per_mb, doc.load_secs / doc.size_mb));
                    }
                }
            }
            PipelineEvent::PageDone { elapsed, .. } => {
                self.pages_done += 1;
                let secs = elapsed.as_secs_f64();
                self.live_page_secs = Some(smooth(self.live_page_secs, secs));
                if let Some(doc) = self.current.as_mut() {
                    doc.pages_done += 1;
                    doc.page_secs += secs;
                }
            }
            PipelineEvent::SaveDone { elapsed, .. } => {
                if let Some(doc) = self.current.as_mut() {
                    doc.save_secs = elapsed.as_secs_f64();
                    if doc.pages > 0 {
                        let per_page = doc.save_secs / doc.pages as f64;
                        self.live_save_secs_per_page =
                            Some(smooth(self.live_save_secs_per_page, per_page));
                    }
                }
            }
            PipelineEvent::DocumentDone { file, metrics } => {
                let doc = self.finish_document();
                self.files_done += 1;
                return doc
                    .filter(|d| &d.file == file)
                    .map(|d| self.sample(&d, metrics));
            }
            PipelineEvent::DocumentFailed { .. } => {
                self.finish_document();
                self.files_done += 1;
            }
            _ => {}
        }
        None
    }

    /// Close out the current document, writing off whatever it left undone.
    fn finish_document(&mut self) -> Option<CurrentDocument> {
        let doc = self.current.take()?;
        self.pages_done += doc.pages.saturating_sub(doc.pages_done);
        self.pages_translated += doc.pages;
        if !doc.loaded {
            self.mb_done += doc.size_mb;
        }
        Some(doc)
    }

    fn sample(&self, doc: &CurrentDocument, metrics: &DocumentMetrics) -> HistorySample {
        let pages = doc.pages.max(1) as f64;
        HistorySample {
            recorded_at: Utc::now(),
            environment: self.environment.clone(),
            pages: doc.pages,
            size_mb: doc.size_mb,
            redact_secs_per_page: doc.page_secs / pages,
            save_secs_per_page: doc.save_secs / pages,
            load_secs_per_mb: if doc.size_mb > 0.0 {
                doc.load_secs / doc.size_mb
            } else {
                0.0
            },
            translation_mb: metrics.translation_mb,
            translation_flatten_secs: metrics.translation_flatten_secs,
            translation_api_secs: metrics.translation_api_secs,
            ping_ms: self.current_ping_ms,
        }
    }

    /// Remaining time, or the calibrating status when history is too thin.
    pub fn predict(&self) -> Prediction {
        if !self.model.is_calibrated() {
            return Prediction::Calibrating {
                samples: self.model.samples,
            };
        }
        Prediction::Estimate {
            remaining: Duration::from_secs_f64(self.remaining_secs().max(0.0)),
        }
    }

    fn remaining_secs(&self) -> f64 {
        let m = &self.model;
        let remaining_files = self.files_total.saturating_sub(self.files_done) as f64;
        let remaining_pages = self.pages_total.saturating_sub(self.pages_done) as f64;
        let remaining_mb = (self.mb_total - self.mb_done).max(0.0);

        let corrected = ping_corrected_slope(
            m.redaction.slope,
            self.current_ping_ms,
            m.historical_ping_ms,
        );
        let redact_per_page = match self.live_page_secs {
            Some(live) => 0.5 * corrected + 0.5 * live,
            None => corrected,
        };
        let save_per_page = match self.live_save_secs_per_page {
            Some(live) => 0.5 * m.save.slope + 0.5 * live,
            None => m.save.slope,
        };

        let mut total = remaining_mb * self.load_secs_per_mb()
            + remaining_files * (m.redaction.intercept + m.save.intercept)
            + remaining_pages * (redact_per_page + save_per_page);

        if self.translation {
            let untranslated = self.pages_total.saturating_sub(self.pages_translated) as f64;
            total += untranslated * TRANSLATION_MB_PER_PAGE * m.translation.slope
                + remaining_files * m.translation.intercept;
        }
        total
    }
}
