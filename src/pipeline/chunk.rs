//! Greedy byte-bounded splitting of a document for translation.
//!
//! Pages are re-flattened one at a time into an accumulating sub-document.
//! After each page the accumulator is serialised and measured. When it
//! overflows the ceiling and holds more than the page that just went in,
//! that page is evicted, the accumulator is emitted as a chunk and a new one
//! starts with the evicted page.
//!
//! ```text
//! pages   1 2 3 … 20 │ 21 22 … 40 │ 41 … 45
//! chunks  "01-20"    │ "21-40"    │ "41-45"
//! ```
//!
//! A page that overflows on its own is emitted alone. A document that fits
//! in one chunk gets the empty label, which tells the writer to use flat
//! naming instead of a folder per chunk.

use super::document::{DocumentEngine, PageSink, PageSource};
use super::flatten::flatten;
use super::render::Rasterizer;
use crate::error::SanitizeError;
use crate::progress::{EventBus, PipelineEvent};
use std::ops::RangeInclusive;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A contiguous run of pages serialised as its own document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `"01-20"`, or empty when the document was not split.
    pub label: String,
    /// First page, 0-based.
    pub start: usize,
    /// Last page, 0-based, inclusive.
    pub end: usize,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn pages(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    pub fn page_count(&self) -> usize {
        self.end - self.start + 1
    }
}

/// 1-based inclusive label for 0-based `start..=end`, zero-padded to two digits.
pub fn chunk_label(start: usize, end: usize) -> String {
    format!("{:02}-{:02}", start + 1, end + 1)
}

pub struct ChunkSplitter<'a, E: DocumentEngine> {
    engine: &'a E,
    rasterizer: Rasterizer,
    max_bytes: usize,
    events: &'a EventBus,
}

impl<'a, E: DocumentEngine> ChunkSplitter<'a, E> {
    pub fn new(engine: &'a E, zoom: f32, max_bytes: usize, events: &'a EventBus) -> Self {
        Self {
            engine,
            rasterizer: Rasterizer::new(zoom),
            max_bytes,
            events,
        }
    }

    pub fn split<S: PageSource + ?Sized>(&self, source: &S) -> Result<Vec<Chunk>, SanitizeError> {
        let total = source.page_count();
        info!(
            "Splitting {} pages under a {:.1} MB ceiling",
            total,
            self.max_bytes as f64 / (1024.0 * 1024.0)
        );

        let mut chunks = Vec::new();
        let mut acc = self.engine.new_sink()?;
        let mut start = 0;

        for i in 0..total {
            let started = Instant::now();
            self.events
                .emit(PipelineEvent::TranslationFlattenStarted { page: i + 1 });
            let page = self.rasterizer.render(source, i)?;
            flatten(&mut acc, page.size, &page.image)?;
            self.events.emit(PipelineEvent::TranslationFlattenDone {
                page: i + 1,
                elapsed: started.elapsed(),
            });

            let size = acc.to_bytes()?.len();
            debug!("Accumulator holds pages {}-{}: {} bytes", start + 1, i + 1, size);
            if size <= self.max_bytes || i == start {
                continue;
            }

            acc.remove_last_page()?;
            chunks.push(self.finish(&acc, start, i - 1)?);

            let started = Instant::now();
            self.events
                .emit(PipelineEvent::TranslationFlattenStarted { page: i + 1 });
            acc = self.engine.new_sink()?;
            start = i;
            flatten(&mut acc, page.size, &page.image)?;
            self.events.emit(PipelineEvent::TranslationFlattenDone {
                page: i + 1,
                elapsed: started.elapsed(),
            });
        }

        if acc.page_count() > 0 {
            chunks.push(self.finish(&acc, start, total - 1)?);
        }
        if let [only] = chunks.as_mut_slice() {
            only.label.clear();
        }
        info!("Document split into {} chunk(s)", chunks.len());
        Ok(chunks)
    }

    fn finish(&self, acc: &E::Sink<'_>, start: usize, end: usize) -> Result<Chunk, SanitizeError> {
        let bytes = acc.to_bytes()?;
        if bytes.len() > self.max_bytes {
            warn!(
                "Page {} alone is {} bytes, over the {}-byte ceiling; sending as is",
                start + 1,
                bytes.len(),
                self.max_bytes
            );
        }
        Ok(Chunk {
            label: chunk_label(start, end),
            start,
            end,
            bytes,
        })
    }
}
