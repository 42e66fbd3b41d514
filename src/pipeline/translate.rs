//! Per-chunk document translation.
//!
//! Chunks are submitted one at a time in page order. Any failed chunk fails
//! the document's translation as a whole; the caller keeps the sanitised
//! output and skips the translated artifacts.

use super::chunk::Chunk;
use crate::config::TRANSLATION_API_LIMIT_BYTES;
use crate::error::ServiceError;
use crate::progress::{EventBus, PipelineEvent};
use crate::services::TranslationService;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Translated bytes for one chunk, keyed by the chunk's label.
#[derive(Debug, Clone)]
pub struct TranslatedChunk {
    pub label: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct TranslationRun {
    pub chunks: Vec<TranslatedChunk>,
    /// Bytes submitted across all chunks.
    pub submitted_bytes: usize,
    /// Time spent waiting on the service.
    pub api_time: Duration,
}

pub struct Translator<'a> {
    service: &'a dyn TranslationService,
    target_language: &'a str,
    events: &'a EventBus,
}

impl<'a> Translator<'a> {
    pub fn new(
        service: &'a dyn TranslationService,
        target_language: &'a str,
        events: &'a EventBus,
    ) -> Self {
        Self {
            service,
            target_language,
            events,
        }
    }

    pub async fn translate(&self, chunks: Vec<Chunk>) -> Result<TranslationRun, ServiceError> {
        let mut run = TranslationRun::default();
        let count = chunks.len();

        for (n, chunk) in chunks.into_iter().enumerate() {
            let size = chunk.bytes.len();
            if size > TRANSLATION_API_LIMIT_BYTES {
                warn!(
                    "Chunk {} is {} bytes, above the service limit; not submitted",
                    chunk.label, size
                );
                return Err(ServiceError::PayloadTooLarge {
                    size,
                    limit: TRANSLATION_API_LIMIT_BYTES,
                });
            }

            info!(
                "Translating chunk {}/{} (pages {}-{}, {:.1} MB) to {}",
                n + 1,
                count,
                chunk.start + 1,
                chunk.end + 1,
                size as f64 / (1024.0 * 1024.0),
                self.target_language
            );
            self.events.emit(PipelineEvent::TranslationChunkStarted {
                label: chunk.label.clone(),
                bytes: size,
            });

            let started = Instant::now();
            let result = self
                .service
                .translate_document(&chunk.bytes, self.target_language)
                .await;
            let elapsed = started.elapsed();
            run.api_time += elapsed;
            run.submitted_bytes += size;

            self.events.emit(PipelineEvent::TranslationChunkDone {
                label: chunk.label.clone(),
                elapsed,
                ok: result.is_ok(),
            });

            let bytes = result?;
            run.chunks.push(TranslatedChunk {
                label: chunk.label,
                bytes,
            });
        }
        Ok(run)
    }
}
