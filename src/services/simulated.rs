//! Offline stand-ins used when simulation mode is on.
//!
//! Inspection finds nothing, image redaction returns its input, OCR sees no
//! text and translation echoes the document. The pipeline still renders,
//! flattens, chunks and writes everything, so a simulated batch exercises
//! the whole document path and produces timing samples.

use super::{
    Finding, ImageMime, InspectionPolicy, InspectionService, OcrService, Services,
    TextAnnotation, TranslationService,
};
use crate::error::ServiceError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Latency reported by the simulated probe.
pub const SIMULATED_PING: Duration = Duration::from_millis(40);

pub fn services() -> Services {
    Services {
        inspection: Arc::new(SimulatedInspection),
        ocr: Arc::new(SimulatedOcr),
        translation: Arc::new(SimulatedTranslation),
    }
}

pub struct SimulatedInspection;

#[async_trait]
impl InspectionService for SimulatedInspection {
    async fn inspect(
        &self,
        _image_png: &[u8],
        _policy: &InspectionPolicy,
    ) -> Result<Vec<Finding>, ServiceError> {
        Ok(Vec::new())
    }

    async fn redact_image(
        &self,
        image: &[u8],
        _mime: ImageMime,
        _policy: &InspectionPolicy,
    ) -> Result<Vec<u8>, ServiceError> {
        Ok(image.to_vec())
    }

    async fn ping(&self) -> Result<Duration, ServiceError> {
        Ok(SIMULATED_PING)
    }
}

pub struct SimulatedOcr;

#[async_trait]
impl OcrService for SimulatedOcr {
    async fn detect_document_text(
        &self,
        _image_png: &[u8],
    ) -> Result<Option<TextAnnotation>, ServiceError> {
        Ok(None)
    }
}

pub struct SimulatedTranslation;

#[async_trait]
impl TranslationService for SimulatedTranslation {
    async fn translate_document(
        &self,
        pdf: &[u8],
        _target_language: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        Ok(pdf.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Likelihood;

    #[test]
    fn simulated_services_are_inert() {
        let s = services();
        let policy = InspectionPolicy {
            info_types: vec!["PERSON_NAME".into()],
            min_likelihood: Likelihood::Possible,
            custom_terms: vec![],
        };
        tokio_test::block_on(async {
            assert!(s.inspection.inspect(b"png", &policy).await.unwrap().is_empty());
            assert_eq!(
                s.inspection
                    .redact_image(b"jpeg-bytes", ImageMime::Jpeg, &policy)
                    .await
                    .unwrap(),
                b"jpeg-bytes"
            );
            assert_eq!(s.inspection.ping().await.unwrap(), SIMULATED_PING);
            assert!(s.ocr.detect_document_text(b"png").await.unwrap().is_none());
            assert_eq!(
                s.translation.translate_document(b"%PDF-", "de").await.unwrap(),
                b"%PDF-"
            );
        });
    }
}
