//! Folder-level batch processing.
//!
//! [`run_batch`] is the single sequential loop over a folder: it scans for
//! pending files, probes the inspection service once, then sanitises one
//! document at a time. A [`CancelToken`] is checked between documents only,
//! so a requested stop always lets the current document finish.
//!
//! [`BatchWorker`] runs that loop on its own OS thread with a
//! current-thread tokio runtime. pdfium handles are not `Send`, so the
//! engine is bound inside the thread and never leaves it.

use crate::config::SanitizeConfig;
use crate::error::SanitizeError;
use crate::pipeline::document::DocumentEngine;
use crate::pipeline::input::scan_folder;
use crate::pipeline::render::PdfiumEngine;
use crate::progress::{EventBus, PipelineEvent};
use crate::sanitize::{DocumentReport, Sanitizer};
use crate::services::Services;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Shared stop flag, checked by the batch loop between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file that could not be sanitised.
#[derive(Debug, Clone)]
pub struct FailedDocument {
    pub path: PathBuf,
    pub error: String,
}

/// Everything a finished (or stopped) batch produced.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub output_dir: PathBuf,
    pub documents: Vec<DocumentReport>,
    pub failed: Vec<FailedDocument>,
    /// Inputs whose sanitised output already existed.
    pub skipped: Vec<PathBuf>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.documents.len()
    }

    pub fn total_pages(&self) -> usize {
        self.documents.iter().map(|d| d.pages.len()).sum()
    }

    pub fn total_findings(&self) -> usize {
        self.documents.iter().map(|d| d.total_findings()).sum()
    }
}

/// Sanitise every pending file in `folder`.
///
/// Per-document failures are reported through [`PipelineEvent::DocumentFailed`]
/// and [`BatchReport::failed`]; the batch carries on. An unreachable
/// inspection service at start-up, or any document error for which
/// [`SanitizeError::is_batch_fatal`] holds, is returned as an error.
/// Files whose pages cannot be counted fail up front and stay out of the
/// [`PipelineEvent::BatchStarted`] totals.
pub async fn run_batch<E: DocumentEngine>(
    engine: &E,
    services: &Services,
    config: &SanitizeConfig,
    folder: &Path,
    events: &EventBus,
    cancel: &CancelToken,
) -> Result<BatchReport, SanitizeError> {
    // ── Step 1: Scan ─────────────────────────────────────────────────────
    let scan = scan_folder(folder)?;
    for path in &scan.completed {
        info!("Already processed, skipping {}", path.display());
        events.emit(PipelineEvent::DocumentSkipped {
            file: display_name(path),
        });
    }

    let mut report = BatchReport {
        output_dir: scan.output_dir.clone(),
        skipped: scan.completed.clone(),
        ..Default::default()
    };
    if scan.pending.is_empty() {
        info!("Nothing to do in {}", folder.display());
        events.emit(PipelineEvent::BatchDone {
            succeeded: 0,
            failed: 0,
            cancelled: false,
        });
        return Ok(report);
    }

    // ── Step 2: Count pages ──────────────────────────────────────────────
    let sanitizer = Sanitizer::new(engine, services, config, events);
    let mut pending = Vec::with_capacity(scan.pending.len());
    let mut unreadable = Vec::new();
    for input in &scan.pending {
        match sanitizer.count_pages(input) {
            Ok(pages) => pending.push((input, pages)),
            Err(e) if e.is_batch_fatal() => return Err(e),
            Err(e) => unreadable.push((input, e)),
        }
    }

    // ── Step 3: Probe ────────────────────────────────────────────────────
    match services.inspection.ping().await {
        Ok(ping) => {
            info!("Inspection service reachable ({} ms)", ping.as_millis());
            events.emit(PipelineEvent::LatencyMeasured { ping });
        }
        Err(e) => {
            error!("Inspection service unreachable, aborting batch: {e}");
            return Err(SanitizeError::ServiceUnavailable {
                service: "inspection".into(),
                detail: e.to_string(),
            });
        }
    }

    for (input, e) in unreadable {
        fail_document(&mut report, events, input.file_name(), &input.path, &e);
    }

    let total_mb: f64 = pending.iter().map(|(i, _)| i.size_mb()).sum();
    events.emit(PipelineEvent::BatchStarted {
        files: pending.len(),
        total_pages: pending.iter().map(|(_, pages)| pages).sum(),
        total_mb,
        translation: config.translation.is_some(),
    });
    info!(
        "Processing {} files ({:.1} MB) into {}",
        pending.len(),
        total_mb,
        scan.output_dir.display()
    );

    // ── Step 4: Documents ────────────────────────────────────────────────
    for (index, &(input, pages)) in pending.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Stop requested; {} files left", pending.len() - index);
            report.cancelled = true;
            break;
        }

        let file = input.file_name();
        events.emit(PipelineEvent::DocumentStarted {
            file: file.clone(),
            index,
            pages,
            size_mb: input.size_mb(),
        });

        match sanitizer.sanitize(input, &scan.output_dir).await {
            Ok(doc) => {
                events.emit(PipelineEvent::DocumentDone {
                    file,
                    metrics: doc.metrics.clone(),
                });
                report.documents.push(doc);
            }
            Err(e) if e.is_batch_fatal() => {
                error!("{} failed, aborting batch: {e}", input.path.display());
                fail_document(&mut report, events, file, &input.path, &e);
                emit_done(&report, events);
                return Err(e);
            }
            Err(e) => fail_document(&mut report, events, file, &input.path, &e),
        }
    }

    // ── Step 5: Done ─────────────────────────────────────────────────────
    emit_done(&report, events);
    info!(
        "Batch finished: {} ok, {} failed, {} skipped{}",
        report.succeeded(),
        report.failed.len(),
        report.skipped.len(),
        if report.cancelled { " (stopped)" } else { "" }
    );
    Ok(report)
}

fn fail_document(
    report: &mut BatchReport,
    events: &EventBus,
    file: String,
    path: &Path,
    e: &SanitizeError,
) {
    warn!("{} failed: {e}", path.display());
    events.emit(PipelineEvent::DocumentFailed {
        file,
        error: e.to_string(),
    });
    report.failed.push(FailedDocument {
        path: path.to_path_buf(),
        error: e.to_string(),
    });
}

fn emit_done(report: &BatchReport, events: &EventBus) {
    events.emit(PipelineEvent::BatchDone {
        succeeded: report.succeeded(),
        failed: report.failed.len(),
        cancelled: report.cancelled,
    });
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A batch running on a background thread.
pub struct BatchWorker {
    handle: JoinHandle<Result<BatchReport, SanitizeError>>,
    cancel: CancelToken,
}

impl BatchWorker {
    /// Start a batch with the pdfium engine and the services `config` selects.
    pub fn spawn(
        folder: PathBuf,
        config: SanitizeConfig,
        events: EventBus,
    ) -> Result<Self, SanitizeError> {
        let services = Services::from_config(&config)?;
        Self::spawn_with(folder, config, services, events, PdfiumEngine::bind)
    }

    /// Start a batch with an engine built inside the worker thread.
    pub fn spawn_with<E, F>(
        folder: PathBuf,
        config: SanitizeConfig,
        services: Services,
        events: EventBus,
        make_engine: F,
    ) -> Result<Self, SanitizeError>
    where
        E: DocumentEngine,
        F: FnOnce() -> Result<E, SanitizeError> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("docsanitize-batch".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| SanitizeError::Internal(format!("runtime: {e}")))?;
                let engine = make_engine()?;
                rt.block_on(run_batch(&engine, &services, &config, &folder, &events, &token))
            })
            .map_err(|e| SanitizeError::Internal(format!("worker thread: {e}")))?;
        Ok(Self { handle, cancel })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the batch ends.
    pub fn join(self) -> Result<BatchReport, SanitizeError> {
        self.handle
            .join()
            .map_err(|_| SanitizeError::Internal("batch worker panicked".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PageSize;
    use crate::pipeline::fakes::{self, EchoTranslation, FakeEngine, ScriptedInspection, ScriptedOcr};
    use crate::progress::ChannelObserver;

    fn write_pdf(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF-1.4\n").unwrap();
        path
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn cancel_token_is_shared() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn unreadable_file_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_pdf(dir.path(), "a.pdf");
        write_pdf(dir.path(), "b.pdf");
        let engine = FakeEngine::new(1).with_file(&good, vec![PageSize::new(20.0, 20.0)]);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(observer));

        let report = run_batch(&engine, &services, &config, dir.path(), &bus, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].path.ends_with("b.pdf"));
        assert!(dir.path().join("processed/anonymized_a.pdf").exists());

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(PipelineEvent::LatencyMeasured { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::DocumentFailed { file, .. } if file == "b.pdf")));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::BatchDone {
                succeeded: 1,
                failed: 1,
                cancelled: false
            })
        ));
    }

    #[tokio::test]
    async fn uncountable_file_stays_out_of_the_totals() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_pdf(dir.path(), "a.pdf");
        write_pdf(dir.path(), "b.pdf");
        let engine = FakeEngine::new(1).with_file(&good, vec![PageSize::new(20.0, 20.0); 3]);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(observer));

        let report = run_batch(&engine, &services, &config, dir.path(), &bus, &CancelToken::new())
            .await
            .unwrap();

        assert!(report.failed[0].path.ends_with("b.pdf"));
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::BatchStarted {
                files: 1,
                total_pages: 3,
                ..
            }
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::DocumentStarted { file, .. } if file == "b.pdf")));
    }

    #[tokio::test]
    async fn fatal_document_error_aborts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_pdf(dir.path(), "a.pdf");
        let b = write_pdf(dir.path(), "b.pdf");
        let engine = FakeEngine::new(1)
            .with_file(&a, vec![PageSize::new(10.0, 10.0)])
            .with_file(&b, vec![PageSize::new(10.0, 10.0)])
            .with_unbound_sink();
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(observer));

        let err = run_batch(&engine, &services, &config, dir.path(), &bus, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SanitizeError::PdfiumBindingFailed(_)));
        let events = drain(&mut rx);
        let started = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::DocumentStarted { .. }))
            .count();
        assert_eq!(started, 1);
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::BatchDone {
                succeeded: 0,
                failed: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn completed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let done = write_pdf(dir.path(), "done.pdf");
        let todo = write_pdf(dir.path(), "todo.pdf");
        std::fs::create_dir(dir.path().join("processed")).unwrap();
        std::fs::write(dir.path().join("processed/anonymized_done.pdf"), b"x").unwrap();
        let engine = FakeEngine::new(1)
            .with_file(&done, vec![PageSize::new(10.0, 10.0)])
            .with_file(&todo, vec![PageSize::new(10.0, 10.0); 2]);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(observer));

        let report = run_batch(&engine, &services, &config, dir.path(), &bus, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.skipped, vec![done]);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.total_pages(), 2);

        let events = drain(&mut rx);
        assert!(matches!(&events[0], PipelineEvent::DocumentSkipped { file } if file == "done.pdf"));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::BatchStarted {
                files: 1,
                total_pages: 2,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_next_document() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_pdf(dir.path(), "a.pdf");
        let engine = FakeEngine::new(1).with_file(&a, vec![PageSize::new(10.0, 10.0)]);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = run_batch(&engine, &services, &config, dir.path(), &EventBus::new(), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.documents.is_empty());
        assert!(!dir.path().join("processed/anonymized_a.pdf").exists());
    }

    #[tokio::test]
    async fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(1);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let err = run_batch(
            &engine,
            &services,
            &config,
            &dir.path().join("nope"),
            &EventBus::new(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SanitizeError::FolderUnreadable { .. }));
    }

    #[test]
    fn worker_runs_on_its_own_thread() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_pdf(dir.path(), "a.pdf");
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let worker = BatchWorker::spawn_with(
            dir.path().to_path_buf(),
            config,
            services,
            EventBus::new(),
            move || Ok(FakeEngine::new(1).with_file(a, vec![PageSize::new(10.0, 10.0)])),
        )
        .unwrap();

        let report = worker.join().unwrap();
        assert_eq!(report.succeeded(), 1);
    }
}
