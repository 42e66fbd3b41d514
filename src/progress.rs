//! Structured pipeline events and the observers that consume them.
//!
//! The pipeline never formats progress into strings for someone else to
//! parse. Every stage boundary emits a typed [`PipelineEvent`] through an
//! [`EventBus`]; the UI and the [`crate::estimate::Estimator`] subscribe
//! independently and neither knows about the other.
//!
//! # Example
//!
//! ```rust
//! use docsanitizer::{EventBus, PipelineEvent, PipelineObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl PipelineObserver for PageCounter {
//!     fn on_event(&self, event: &PipelineEvent) {
//!         if let PipelineEvent::PageDone { .. } = event {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter(AtomicUsize::new(0)));
//! let mut bus = EventBus::new();
//! bus.subscribe(counter.clone());
//! ```

use crate::error::PageError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Per-document measurements reported when a document completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentMetrics {
    pub pages: usize,
    pub size_mb: f64,
    /// Time to open the input and read its page geometry.
    pub load_secs: f64,
    /// Bytes submitted for translation, in MB. Zero when not translated.
    pub translation_mb: f64,
    /// Time spent re-flattening pages into chunks.
    pub translation_flatten_secs: f64,
    /// Time spent waiting on the translation service.
    pub translation_api_secs: f64,
}

/// Everything the pipeline reports, one variant per stage boundary.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The input folder was scanned; totals cover the pending files only.
    BatchStarted {
        files: usize,
        total_pages: usize,
        total_mb: f64,
        translation: bool,
    },
    /// Round-trip latency measured by the start-up probe.
    LatencyMeasured { ping: Duration },
    /// A pending file was found to already have an output.
    DocumentSkipped { file: String },
    DocumentStarted {
        file: String,
        /// 0-based position among pending files.
        index: usize,
        pages: usize,
        size_mb: f64,
    },
    DocumentLoaded { file: String, elapsed: Duration },
    /// `page` is 1-based.
    PageStarted { page: usize, total: usize },
    PageDone {
        page: usize,
        total: usize,
        findings: usize,
        ocr_words: usize,
        elapsed: Duration,
        /// Recovered failures on this page.
        warnings: Vec<PageError>,
    },
    SaveStarted,
    SaveDone { bytes: usize, elapsed: Duration },
    TranslationFlattenStarted { page: usize },
    TranslationFlattenDone { page: usize, elapsed: Duration },
    TranslationChunkStarted { label: String, bytes: usize },
    TranslationChunkDone {
        label: String,
        elapsed: Duration,
        ok: bool,
    },
    DocumentDone { file: String, metrics: DocumentMetrics },
    DocumentFailed { file: String, error: String },
    BatchDone {
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Receives every [`PipelineEvent`] in emission order.
///
/// Events are delivered synchronously on the worker thread, so
/// implementations must be cheap and must not block; forward to a channel
/// (see [`ChannelObserver`]) when the consumer lives on another thread.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, _event: &PipelineEvent) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Publisher the pipeline depends on; fans each event out to all subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn PipelineObserver>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn PipelineObserver>) {
        self.subscribers.push(observer);
    }

    pub fn emit(&self, event: PipelineEvent) {
        trace!(?event, "pipeline event");
        for s in &self.subscribers {
            s.on_event(&event);
        }
    }
}

/// Forwards events to another thread over an unbounded channel.
///
/// This is how UI state is marshalled off the worker thread: the UI owns
/// the receiver and applies events on its own schedule.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PipelineObserver for ChannelObserver {
    fn on_event(&self, event: &PipelineEvent) {
        // A dropped receiver means nobody is watching any more.
        let _ = self.tx.send(event.clone());
    }
}
