//! PII redaction: inspect a page raster, burn the findings into the source
//! page, re-render.
//!
//! ```text
//! raster ──▶ inspect ──▶ boxes / zoom ──▶ burn into page ──▶ re-render
//!   (px)      (service)    (points)         (black fills)       (px)
//! ```
//!
//! The second render is what carries the redaction forward: the flatten
//! stage keeps pixels and nothing else, so a fill that only exists as a page
//! object would be lost. When burning or re-rendering fails the boxes are
//! painted straight into the first raster instead.
//!
//! Failures never abort the document. An inspection failure passes the page
//! through with zero findings and a [`PageError::InspectionFailed`] warning.

use super::encode::encode_png;
use super::render::RenderedPage;
use super::document::PageSource;
use crate::config::SanitizeConfig;
use crate::error::PageError;
use crate::geometry::{PixelBox, PointRect};
use crate::services::{InspectionPolicy, InspectionService};
use image::{DynamicImage, Rgba};
use tracing::{debug, warn};

/// Built-in categories submitted with every inspection request.
pub const BUILTIN_INFO_TYPES: [&str; 17] = [
    "PERSON_NAME",
    "PHONE_NUMBER",
    "EMAIL_ADDRESS",
    "CREDIT_CARD_NUMBER",
    "STREET_ADDRESS",
    "PASSPORT",
    "GERMANY_PASSPORT",
    "GERMANY_IDENTITY_CARD_NUMBER",
    "GERMANY_DRIVERS_LICENSE_NUMBER",
    "GERMANY_TAXPAYER_IDENTIFICATION_NUMBER",
    "GERMANY_SCHUFA_ID",
    "SWITZERLAND_SOCIAL_SECURITY_NUMBER",
    "AUSTRIA_SOCIAL_SECURITY_NUMBER",
    "IBAN_CODE",
    "SWIFT_CODE",
    "IMEI_HARDWARE_ID",
    "IP_ADDRESS",
];

/// The inspection policy for a batch, derived from its config.
pub fn inspection_policy(config: &SanitizeConfig) -> InspectionPolicy {
    InspectionPolicy {
        info_types: BUILTIN_INFO_TYPES.iter().map(|s| s.to_string()).collect(),
        min_likelihood: config.min_likelihood,
        custom_terms: config.custom_terms.clone(),
    }
}

/// Result of redacting one page. Always carries a usable raster.
#[derive(Debug)]
pub struct RedactionOutcome {
    /// Redacted raster, or the original one when inspection failed.
    pub page: RenderedPage,
    pub findings: usize,
    /// Regions burned, in page points.
    pub regions: Vec<PointRect>,
    pub warning: Option<PageError>,
}

pub struct Redactor<'a> {
    inspection: &'a dyn InspectionService,
    policy: &'a InspectionPolicy,
}

impl<'a> Redactor<'a> {
    pub fn new(inspection: &'a dyn InspectionService, policy: &'a InspectionPolicy) -> Self {
        Self { inspection, policy }
    }

    /// Redact `page`, which must have been rendered from `source`.
    pub async fn redact<S: PageSource + ?Sized>(
        &self,
        source: &mut S,
        mut page: RenderedPage,
    ) -> RedactionOutcome {
        let number = page.index + 1;

        let png = match encode_png(&page.image) {
            Ok(png) => png,
            Err(e) => return passthrough(page, inspection_failed(number, e.to_string())),
        };

        let findings = match self.inspection.inspect(&png, self.policy).await {
            Ok(f) => f,
            Err(e) => return passthrough(page, inspection_failed(number, e.to_string())),
        };

        let boxes: Vec<PixelBox> = findings
            .iter()
            .flat_map(|f| f.boxes.iter().copied())
            .filter(|b| !b.is_empty())
            .collect();
        let mapper = page.mapper();
        let regions: Vec<PointRect> = boxes.iter().map(|b| mapper.to_points(b)).collect();
        debug!(
            "Page {}: {} findings, {} regions",
            number,
            findings.len(),
            regions.len()
        );

        if regions.is_empty() {
            return RedactionOutcome {
                page,
                findings: findings.len(),
                regions,
                warning: None,
            };
        }

        let mut warning = None;
        match source.burn(page.index, &regions) {
            Ok(()) => match source.render(page.index, page.zoom) {
                Ok(image) => page.image = image,
                Err(e) => {
                    warn!("Page {number}: re-render after redaction failed: {e}");
                    paint_boxes(&mut page.image, &boxes);
                    warning = Some(PageError::RenderFailed {
                        page: number,
                        detail: e.to_string(),
                    });
                }
            },
            Err(e) => {
                warn!("Page {number}: burning redactions failed, painting raster: {e}");
                paint_boxes(&mut page.image, &boxes);
                warning = Some(PageError::RedactionFailed {
                    page: number,
                    detail: e.to_string(),
                });
            }
        }

        RedactionOutcome {
            page,
            findings: findings.len(),
            regions,
            warning,
        }
    }
}

fn inspection_failed(page: usize, detail: String) -> PageError {
    warn!("Page {page}: inspection failed, passing through unredacted: {detail}");
    PageError::InspectionFailed { page, detail }
}

fn passthrough(page: RenderedPage, warning: PageError) -> RedactionOutcome {
    RedactionOutcome {
        page,
        findings: 0,
        regions: Vec::new(),
        warning: Some(warning),
    }
}

/// Paint opaque black over `boxes` directly in raster pixels.
pub fn paint_boxes(image: &mut DynamicImage, boxes: &[PixelBox]) {
    let mut rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    for b in boxes {
        let x0 = b.left.floor().max(0.0) as u32;
        let y0 = b.top.floor().max(0.0) as u32;
        let x1 = (b.right().ceil().max(0.0) as u32).min(w);
        let y1 = (b.bottom().ceil().max(0.0) as u32).min(h);
        for y in y0..y1 {
            for x in x0..x1 {
                rgba.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
    }
    *image = DynamicImage::ImageRgba8(rgba);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Likelihood;
    use crate::geometry::PageSize;
    use crate::pipeline::fakes::{FakeSource, ScriptedInspection};
    use crate::pipeline::render::Rasterizer;
    use crate::services::Finding;

    fn finding(b: PixelBox) -> Finding {
        Finding {
            info_type: "PERSON_NAME".into(),
            likelihood: Likelihood::Likely,
            boxes: vec![b],
        }
    }

    fn policy() -> InspectionPolicy {
        inspection_policy(&SanitizeConfig::default())
    }

    fn is_black(img: &DynamicImage, x: u32, y: u32) -> bool {
        img.to_rgba8().get_pixel(x, y).0[..3] == [0, 0, 0]
    }

    #[tokio::test]
    async fn findings_become_regions_and_burned_pixels() {
        let mut source = FakeSource::uniform(1, PageSize::new(100.0, 100.0));
        let page = Rasterizer::new(3.0).render(&source, 0).unwrap();
        let inspection = ScriptedInspection::new(vec![Ok(vec![finding(PixelBox::new(
            30.0, 60.0, 90.0, 15.0,
        ))])]);
        let policy = policy();

        let out = Redactor::new(&inspection, &policy).redact(&mut source, page).await;

        assert_eq!(out.findings, 1);
        assert!(out.warning.is_none());
        let r = out.regions[0];
        assert_eq!((r.left, r.top, r.right, r.bottom), (10.0, 20.0, 40.0, 25.0));
        assert_eq!(source.renders.get(), 2, "redaction must re-render");
        assert!(is_black(&out.page.image, 45, 65));
        assert!(!is_black(&out.page.image, 5, 5));
    }

    #[tokio::test]
    async fn inspection_failure_passes_page_through() {
        let mut source = FakeSource::uniform(2, PageSize::new(50.0, 50.0));
        let page = Rasterizer::new(2.0).render(&source, 1).unwrap();
        let inspection = ScriptedInspection::new(vec![Err("deadline exceeded".into())]);
        let policy = policy();

        let out = Redactor::new(&inspection, &policy).redact(&mut source, page).await;

        assert_eq!(out.findings, 0);
        assert!(out.regions.is_empty());
        assert!(matches!(
            out.warning,
            Some(PageError::InspectionFailed { page: 2, .. })
        ));
        assert_eq!(source.renders.get(), 1);
    }

    #[tokio::test]
    async fn burn_failure_falls_back_to_raster_paint() {
        let mut source = FakeSource::uniform(1, PageSize::new(100.0, 100.0));
        source.fail_burn = true;
        let page = Rasterizer::new(1.0).render(&source, 0).unwrap();
        let inspection =
            ScriptedInspection::new(vec![Ok(vec![finding(PixelBox::new(10.0, 10.0, 20.0, 20.0))])]);
        let policy = policy();

        let out = Redactor::new(&inspection, &policy).redact(&mut source, page).await;

        assert!(matches!(out.warning, Some(PageError::RedactionFailed { .. })));
        assert!(is_black(&out.page.image, 15, 15));
        assert!(!is_black(&out.page.image, 50, 50));
    }

    #[tokio::test]
    async fn no_findings_skips_rerender() {
        let mut source = FakeSource::uniform(1, PageSize::new(20.0, 20.0));
        let page = Rasterizer::new(1.0).render(&source, 0).unwrap();
        let inspection = ScriptedInspection::default();
        let policy = policy();

        let out = Redactor::new(&inspection, &policy).redact(&mut source, page).await;

        assert_eq!(out.findings, 0);
        assert!(out.warning.is_none());
        assert_eq!(source.renders.get(), 1);
    }

    #[test]
    fn policy_carries_catalogue_terms_and_threshold() {
        let config = SanitizeConfig::builder()
            .simulation(true)
            .min_likelihood(Likelihood::Likely)
            .custom_terms(["Project Falcon"])
            .build()
            .unwrap();
        let p = inspection_policy(&config);
        assert_eq!(p.info_types.len(), 17);
        assert!(p.info_types.iter().any(|t| t == "IBAN_CODE"));
        assert_eq!(p.min_likelihood, Likelihood::Likely);
        assert_eq!(p.custom_terms, vec!["Project Falcon".to_string()]);
    }
}
