//! Per-document orchestration.
//!
//! [`Sanitizer::sanitize`] takes one pending input through the whole
//! pipeline and writes its outputs. PDFs go page by page through
//! render → redact → flatten → OCR overlay, are saved, and are then split
//! and translated when the config asks for it. Single images get one
//! whole-image redaction call.
//!
//! Page-level failures are recorded in [`PageReport::warnings`] and never
//! stop the document. A failed translation is recorded in
//! [`DocumentReport::translation_error`]; the sanitised file is kept.

use crate::config::SanitizeConfig;
use crate::error::{PageError, SanitizeError, ServiceError};
use crate::pipeline::chunk::ChunkSplitter;
use crate::pipeline::document::{DocumentEngine, PageSink, PageSource};
use crate::pipeline::flatten::Reassembler;
use crate::pipeline::input::{self, BatchInput, InputKind};
use crate::pipeline::overlay::OcrOverlay;
use crate::pipeline::redact::{inspection_policy, Redactor};
use crate::pipeline::render::Rasterizer;
use crate::pipeline::translate::Translator;
use crate::progress::{DocumentMetrics, EventBus, PipelineEvent};
use crate::services::{ImageMime, InspectionPolicy, Services};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    /// 1-based.
    pub page: usize,
    pub findings: usize,
    pub ocr_words: usize,
    pub warnings: Vec<PageError>,
    pub elapsed: Duration,
}

/// Outcome of one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub pages: Vec<PageReport>,
    /// Translated artifacts written, in chunk order.
    pub translations: Vec<PathBuf>,
    pub translation_error: Option<String>,
    pub metrics: DocumentMetrics,
}

impl DocumentReport {
    pub fn total_findings(&self) -> usize {
        self.pages.iter().map(|p| p.findings).sum()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().flat_map(|p| p.warnings.iter())
    }
}

pub struct Sanitizer<'a, E: DocumentEngine> {
    engine: &'a E,
    services: &'a Services,
    config: &'a SanitizeConfig,
    policy: InspectionPolicy,
    events: &'a EventBus,
}

impl<'a, E: DocumentEngine> Sanitizer<'a, E> {
    pub fn new(
        engine: &'a E,
        services: &'a Services,
        config: &'a SanitizeConfig,
        events: &'a EventBus,
    ) -> Self {
        Self {
            engine,
            services,
            config,
            policy: inspection_policy(config),
            events,
        }
    }

    /// Page count without processing; single images count as one page.
    pub fn count_pages(&self, input: &BatchInput) -> Result<usize, SanitizeError> {
        match input.kind {
            InputKind::Pdf => Ok(self.engine.open(&input.path)?.page_count()),
            InputKind::Image(_) => Ok(1),
        }
    }

    /// Sanitise `input` into `output_dir`.
    pub async fn sanitize(
        &self,
        input: &BatchInput,
        output_dir: &Path,
    ) -> Result<DocumentReport, SanitizeError> {
        let kind = input::validate(&input.path)?;
        let output = input::sanitized_path(output_dir, &input.path);
        info!("Sanitising {} → {}", input.path.display(), output.display());

        let mut report = match kind {
            InputKind::Pdf => self.sanitize_pdf(input, output_dir, &output).await?,
            InputKind::Image(mime) => self.sanitize_image(input, mime, &output).await?,
        };
        report.metrics.size_mb = input.size_mb();
        report.metrics.pages = report.pages.len();
        Ok(report)
    }

    async fn sanitize_pdf(
        &self,
        input: &BatchInput,
        output_dir: &Path,
        output: &Path,
    ) -> Result<DocumentReport, SanitizeError> {
        let file = input.file_name();

        // ── Step 1: Open ─────────────────────────────────────────────────
        let started = Instant::now();
        let mut source = self.engine.open(&input.path)?;
        let total = source.page_count();
        let load_time = started.elapsed();
        self.events.emit(PipelineEvent::DocumentLoaded {
            file: file.clone(),
            elapsed: load_time,
        });

        // ── Step 2: Redact, flatten, overlay page by page ────────────────
        let rasterizer = Rasterizer::new(self.config.redaction_zoom);
        let redactor = Redactor::new(self.services.inspection.as_ref(), &self.policy);
        let overlay = OcrOverlay::new(self.services.ocr.as_ref());
        let mut out = Reassembler::new(self.engine.new_sink()?);
        let mut pages = Vec::with_capacity(total);

        for i in 0..total {
            self.events.emit(PipelineEvent::PageStarted {
                page: i + 1,
                total,
            });
            let page_started = Instant::now();

            let rendered = rasterizer.render(&source, i)?;
            let redacted = redactor.redact(&mut source, rendered).await;
            let index = out.push(&redacted.page)?;
            let overlaid = overlay.apply(out.sink_mut(), index, &redacted.page).await;

            let warnings: Vec<PageError> =
                redacted.warning.into_iter().chain(overlaid.warning).collect();
            let elapsed = page_started.elapsed();
            self.events.emit(PipelineEvent::PageDone {
                page: i + 1,
                total,
                findings: redacted.findings,
                ocr_words: overlaid.words,
                elapsed,
                warnings: warnings.clone(),
            });
            pages.push(PageReport {
                page: i + 1,
                findings: redacted.findings,
                ocr_words: overlaid.words,
                warnings,
                elapsed,
            });
        }
        drop(source);

        if out.page_count() != total {
            return Err(SanitizeError::Internal(format!(
                "output has {} pages, input has {}",
                out.page_count(),
                total
            )));
        }

        // ── Step 3: Save ─────────────────────────────────────────────────
        self.events.emit(PipelineEvent::SaveStarted);
        let save_started = Instant::now();
        let bytes = out.into_sink().to_bytes()?;
        write_atomic(output, &bytes).await?;
        self.events.emit(PipelineEvent::SaveDone {
            bytes: bytes.len(),
            elapsed: save_started.elapsed(),
        });

        let mut report = DocumentReport {
            input: input.path.clone(),
            output: output.to_path_buf(),
            pages,
            translations: Vec::new(),
            translation_error: None,
            metrics: DocumentMetrics {
                load_secs: load_time.as_secs_f64(),
                ..Default::default()
            },
        };

        // ── Step 4: Translate ────────────────────────────────────────────
        if self.config.translation.is_some() {
            if let Err(e) = self.translate(bytes, input, output_dir, &mut report).await {
                warn!("Translation of {} skipped: {e}", file);
                report.translation_error = Some(e.to_string());
            }
        }

        info!(
            "{}: {} pages, {} findings, {} warnings",
            file,
            total,
            report.total_findings(),
            report.warnings().count()
        );
        Ok(report)
    }

    async fn translate(
        &self,
        sanitized: Vec<u8>,
        input: &BatchInput,
        output_dir: &Path,
        report: &mut DocumentReport,
    ) -> Result<(), TranslationFailure> {
        let Some(ref tc) = self.config.translation else {
            return Ok(());
        };

        let flatten_started = Instant::now();
        let source = self.engine.open_bytes(sanitized)?;
        let chunks = ChunkSplitter::new(self.engine, tc.render_zoom, tc.max_payload_bytes, self.events)
            .split(&source)?;
        drop(source);
        report.metrics.translation_flatten_secs = flatten_started.elapsed().as_secs_f64();

        let run = Translator::new(
            self.services.translation.as_ref(),
            &tc.target_language,
            self.events,
        )
        .translate(chunks)
        .await?;
        report.metrics.translation_mb = run.submitted_bytes as f64 / (1024.0 * 1024.0);
        report.metrics.translation_api_secs = run.api_time.as_secs_f64();

        for chunk in run.chunks {
            let path =
                input::translated_path(output_dir, &input.path, &tc.target_language, &chunk.label);
            write_atomic(&path, &chunk.bytes).await?;
            debug!("Wrote {}", path.display());
            report.translations.push(path);
        }
        Ok(())
    }

    async fn sanitize_image(
        &self,
        input: &BatchInput,
        mime: ImageMime,
        output: &Path,
    ) -> Result<DocumentReport, SanitizeError> {
        let file = input.file_name();
        let started = Instant::now();
        let data = tokio::fs::read(&input.path)
            .await
            .map_err(|_| SanitizeError::FileNotFound {
                path: input.path.clone(),
            })?;
        let load_time = started.elapsed();
        self.events.emit(PipelineEvent::DocumentLoaded {
            file,
            elapsed: load_time,
        });

        self.events.emit(PipelineEvent::PageStarted { page: 1, total: 1 });
        let page_started = Instant::now();
        let redacted = self
            .services
            .inspection
            .redact_image(&data, mime, &self.policy)
            .await
            .map_err(|source| SanitizeError::ImageRedactionFailed {
                path: input.path.clone(),
                source,
            })?;
        let elapsed = page_started.elapsed();
        self.events.emit(PipelineEvent::PageDone {
            page: 1,
            total: 1,
            findings: 0,
            ocr_words: 0,
            elapsed,
            warnings: Vec::new(),
        });

        self.events.emit(PipelineEvent::SaveStarted);
        let save_started = Instant::now();
        write_atomic(output, &redacted).await?;
        self.events.emit(PipelineEvent::SaveDone {
            bytes: redacted.len(),
            elapsed: save_started.elapsed(),
        });

        Ok(DocumentReport {
            input: input.path.clone(),
            output: output.to_path_buf(),
            pages: vec![PageReport {
                page: 1,
                findings: 0,
                ocr_words: 0,
                warnings: Vec::new(),
                elapsed,
            }],
            translations: Vec::new(),
            translation_error: None,
            metrics: DocumentMetrics {
                load_secs: load_time.as_secs_f64(),
                ..Default::default()
            },
        })
    }
}

/// Either side of a translation attempt can fail; both only skip the artifact.
#[derive(Debug, thiserror::Error)]
enum TranslationFailure {
    #[error(transparent)]
    Document(#[from] SanitizeError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Write via a hidden temp sibling and rename into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SanitizeError> {
    let write_err = |source| SanitizeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{name}.tmp"));
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslationConfig;
    use crate::geometry::{PageSize, PixelBox};
    use crate::pipeline::fakes::{
        self, decode_pages, EchoTranslation, FakeEngine, ScriptedInspection, ScriptedOcr,
    };
    use crate::progress::ChannelObserver;
    use crate::services::{Finding, TextAnnotation};
    use std::sync::Arc;

    fn pdf_input(dir: &Path, name: &str) -> BatchInput {
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        BatchInput {
            path,
            kind: InputKind::Pdf,
            size_bytes: 9,
        }
    }

    fn one_word() -> TextAnnotation {
        serde_json::from_str(
            r#"{"pages": [{"blocks": [{"paragraphs": [{"words": [
                {"boundingBox": {"vertices": [{"x": 3, "y": 3}, {"x": 9, "y": 3}, {"x": 9, "y": 6}, {"x": 3, "y": 6}]},
                 "symbols": [{"text": "ok"}]}]}]}]}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn failed_inspection_on_page_two_keeps_all_pages() {
        let dir = tempfile::tempdir().unwrap();
        let input = pdf_input(dir.path(), "three.pdf");
        let engine = FakeEngine::new(1).with_file(
            &input.path,
            vec![PageSize::new(10.0, 10.0), PageSize::new(20.0, 10.0), PageSize::new(30.0, 10.0)],
        );
        let hit = Finding {
            info_type: "EMAIL_ADDRESS".into(),
            likelihood: crate::config::Likelihood::Likely,
            boxes: vec![PixelBox::new(0.0, 0.0, 6.0, 3.0)],
        };
        let (services, _, _) = fakes::services(
            ScriptedInspection::new(vec![Ok(vec![hit.clone()]), Err("timeout".into()), Ok(vec![hit])]),
            ScriptedOcr::new(vec![Ok(Some(one_word())), Ok(None), Ok(Some(one_word()))]),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder().simulation(true).build().unwrap();
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(observer));
        let out_dir = dir.path().join("processed");

        let report = Sanitizer::new(&engine, &services, &config, &bus)
            .sanitize(&input, &out_dir)
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 3);
        assert_eq!(report.pages[1].findings, 0);
        assert!(matches!(
            report.pages[1].warnings.as_slice(),
            [PageError::InspectionFailed { page: 2, .. }]
        ));
        assert_eq!(report.total_findings(), 2);

        let written = std::fs::read(&report.output).unwrap();
        let pages = decode_pages(&written);
        let widths: Vec<f64> = pages.iter().map(|p| p.size.width).collect();
        assert_eq!(widths, vec![10.0, 20.0, 30.0]);
        assert_eq!(pages[0].texts, vec!["ok".to_string()]);
        assert!(pages[1].texts.is_empty());
        assert_eq!(report.output, out_dir.join("anonymized_three.pdf"));

        let mut done = 0;
        while let Ok(ev) = rx.try_recv() {
            if let PipelineEvent::PageDone { .. } = ev {
                done += 1;
            }
        }
        assert_eq!(done, 3);
    }

    #[tokio::test]
    async fn split_translation_goes_to_chunk_folder() {
        let dir = tempfile::tempdir().unwrap();
        let input = pdf_input(dir.path(), "long.pdf");
        let engine = FakeEngine::new(1).with_file(&input.path, vec![PageSize::new(400.0, 10.0); 3]);
        let (services, _, translation) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder()
            .simulation(true)
            .translation(Some(TranslationConfig {
                target_language: "en".into(),
                max_payload_bytes: 1000,
                render_zoom: 1.0,
            }))
            .build()
            .unwrap();
        let bus = EventBus::new();
        let out_dir = dir.path().join("processed");

        let report = Sanitizer::new(&engine, &services, &config, &bus)
            .sanitize(&input, &out_dir)
            .await
            .unwrap();

        assert!(report.translation_error.is_none());
        let folder = out_dir.join("en_anonymized_long.pdf");
        assert_eq!(
            report.translations,
            vec![
                folder.join("01-02_translated_en_long.pdf"),
                folder.join("03-03_translated_en_long.pdf"),
            ]
        );
        assert!(report.translations.iter().all(|p| p.exists()));
        assert_eq!(translation.calls.lock().unwrap().len(), 2);
        assert!(report.metrics.translation_mb > 0.0);
    }

    #[tokio::test]
    async fn translation_failure_keeps_sanitized_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = pdf_input(dir.path(), "memo.pdf");
        let engine = FakeEngine::new(1).with_file(&input.path, vec![PageSize::new(50.0, 50.0)]);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation {
                fail_calls: vec![1],
                ..Default::default()
            },
        );
        let config = SanitizeConfig::builder()
            .simulation(true)
            .translate_to("fr")
            .build()
            .unwrap();
        let bus = EventBus::new();
        let out_dir = dir.path().join("processed");

        let report = Sanitizer::new(&engine, &services, &config, &bus)
            .sanitize(&input, &out_dir)
            .await
            .unwrap();

        assert!(report.output.exists());
        assert!(report.translation_error.is_some());
        assert!(report.translations.is_empty());
        assert!(!out_dir.join("translated_fr_memo.pdf").exists());
    }

    #[tokio::test]
    async fn single_chunk_translation_uses_flat_name() {
        let dir = tempfile::tempdir().unwrap();
        let input = pdf_input(dir.path(), "memo.pdf");
        let engine = FakeEngine::new(1).with_file(&input.path, vec![PageSize::new(50.0, 50.0); 2]);
        let (services, _, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder()
            .simulation(true)
            .translate_to("de")
            .build()
            .unwrap();
        let bus = EventBus::new();
        let out_dir = dir.path().join("processed");

        let report = Sanitizer::new(&engine, &services, &config, &bus)
            .sanitize(&input, &out_dir)
            .await
            .unwrap();

        assert_eq!(report.translations, vec![out_dir.join("translated_de_memo.pdf")]);
    }

    #[tokio::test]
    async fn image_is_redacted_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, b"\x89PNG-pixels").unwrap();
        let input = BatchInput {
            path,
            kind: InputKind::Image(ImageMime::Png),
            size_bytes: 11,
        };
        let engine = FakeEngine::new(1);
        let (services, ocr, _) = fakes::services(
            ScriptedInspection::default(),
            ScriptedOcr::default(),
            EchoTranslation::default(),
        );
        let config = SanitizeConfig::builder()
            .simulation(true)
            .translate_to("en")
            .build()
            .unwrap();
        let bus = EventBus::new();
        let out_dir = dir.path().join("processed");

        let report = Sanitizer::new(&engine, &services, &config, &bus)
            .sanitize(&input, &out_dir)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&report.output).unwrap(), b"\x89PNG-pixels");
        assert_eq!(report.pages.len(), 1);
        assert!(report.translations.is_empty());
        assert!(ocr.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/anonymized_a.pdf");
        write_atomic(&path, b"data").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        assert!(!dir.path().join("out/.anonymized_a.pdf.tmp").exists());
    }
}
