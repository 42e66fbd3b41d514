//! Google Cloud REST implementations of the service traits.
//!
//! | Trait | Endpoint |
//! |-------|----------|
//! | [`InspectionService::inspect`] | DLP v2 `content:inspect` |
//! | [`InspectionService::redact_image`] | DLP v2 `image:redact` |
//! | [`OcrService`] | Vision v1 `images:annotate` (`DOCUMENT_TEXT_DETECTION`) |
//! | [`TranslationService`] | Translation v3 `translateDocument` (us-central1) |
//!
//! Authentication is a bearer access token. Resolution order:
//! `GOOGLE_OAUTH_ACCESS_TOKEN`, then the configured credentials path (a raw
//! token file, or a service-account JSON handed to `gcloud` via
//! `GOOGLE_APPLICATION_CREDENTIALS`), then the ambient `gcloud` login.

use super::{
    Finding, ImageMime, InspectionPolicy, InspectionService, OcrService, Services,
    TextAnnotation, TranslationService, CUSTOM_INFO_TYPE,
};
use crate::config::{Likelihood, TRANSLATION_API_LIMIT_BYTES};
use crate::error::ServiceError;
use crate::geometry::PixelBox;
use crate::pipeline::encode::{from_base64, to_base64};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

const DLP_BASE: &str = "https://dlp.googleapis.com/v2";
const VISION_URL: &str = "https://vision.googleapis.com/v1/images:annotate";
const TRANSLATE_BASE: &str = "https://translation.googleapis.com/v3";
/// Document translation is only served from this location.
const TRANSLATE_LOCATION: &str = "us-central1";

/// Shared HTTP client, project and token cache for all three services.
pub struct GoogleClient {
    http: reqwest::Client,
    project_id: String,
    credentials_path: Option<PathBuf>,
    token: Mutex<Option<String>>,
}

impl GoogleClient {
    pub fn new(
        project_id: String,
        credentials_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            project_id,
            credentials_path,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        if let Some(t) = self.cached_token() {
            return Ok(t);
        }
        let token = self.resolve_token().await?;
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.clone());
        }
        Ok(token)
    }

    fn cached_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn invalidate_token(&self) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = None;
        }
    }

    async fn resolve_token(&self) -> Result<String, ServiceError> {
        if let Ok(t) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !t.trim().is_empty() {
                return Ok(t.trim().to_string());
            }
        }

        let mut cmd = Command::new("gcloud");
        match self.credentials_path {
            Some(ref path) if path.extension().is_some_and(|e| e == "json") => {
                cmd.env("GOOGLE_APPLICATION_CREDENTIALS", path)
                    .args(["auth", "application-default", "print-access-token"]);
            }
            Some(ref path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ServiceError::Credentials(format!("{}: {e}", path.display()))
                })?;
                return Ok(token.trim().to_string());
            }
            None => {
                cmd.args(["auth", "print-access-token"]);
            }
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ServiceError::Credentials(format!("cannot run gcloud: {e}")))?;
        if !output.status.success() {
            return Err(ServiceError::Credentials(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(ServiceError::Credentials("gcloud printed no token".into()));
        }
        Ok(token)
    }

    /// POST a JSON body and decode the JSON answer.
    async fn post_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        url: &str,
        body: &Value,
    ) -> Result<T, ServiceError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("x-goog-user-project", &self.project_id)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 401 {
                self.invalidate_token();
            }
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service,
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode {
            service,
            detail: e.to_string(),
        })
    }

    fn dlp_parent(&self) -> String {
        format!("{DLP_BASE}/projects/{}/locations/global", self.project_id)
    }
}

/// Build the three services on one shared client.
pub fn services(client: Arc<GoogleClient>) -> Services {
    Services {
        inspection: Arc::new(DlpInspection {
            client: Arc::clone(&client),
        }),
        ocr: Arc::new(VisionOcr {
            client: Arc::clone(&client),
        }),
        translation: Arc::new(DocumentTranslator { client }),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

// ── DLP ──────────────────────────────────────────────────────────────────

fn inspect_config(policy: &InspectionPolicy) -> Value {
    let info_types: Vec<Value> = policy
        .info_types
        .iter()
        .map(|name| json!({ "name": name }))
        .collect();

    let mut config = json!({
        "infoTypes": info_types,
        "minLikelihood": policy.min_likelihood.as_str(),
        "includeQuote": false,
    });

    if !policy.custom_terms.is_empty() {
        config["customInfoTypes"] = json!([{
            "infoType": { "name": CUSTOM_INFO_TYPE },
            "likelihood": Likelihood::VeryLikely.as_str(),
            "dictionary": { "wordList": { "words": policy.custom_terms } }
        }]);
    }
    config
}

fn byte_item(data: &[u8], mime: ImageMime) -> Value {
    let kind = match mime {
        ImageMime::Png => "IMAGE_PNG",
        ImageMime::Jpeg => "IMAGE_JPEG",
    };
    json!({ "type": kind, "data": to_base64(data) })
}

#[derive(Debug, Default, Deserialize)]
struct InspectContentResponse {
    #[serde(default)]
    result: InspectResult,
}

#[derive(Debug, Default, Deserialize)]
struct InspectResult {
    #[serde(default)]
    findings: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFinding {
    info_type: Option<InfoTypeName>,
    /// Kept as text so an unknown tier never rejects the whole response.
    likelihood: Option<String>,
    location: Option<RawLocation>,
}

#[derive(Debug, Deserialize)]
struct InfoTypeName {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLocation {
    #[serde(default)]
    content_locations: Vec<ContentLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentLocation {
    image_location: Option<ImageLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLocation {
    #[serde(default)]
    bounding_boxes: Vec<RawBox>,
}

#[derive(Debug, Deserialize)]
struct RawBox {
    #[serde(default)]
    top: f64,
    #[serde(default)]
    left: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

impl From<RawFinding> for Finding {
    fn from(raw: RawFinding) -> Self {
        let boxes = raw
            .location
            .map(|loc| {
                loc.content_locations
                    .into_iter()
                    .filter_map(|c| c.image_location)
                    .flat_map(|il| il.bounding_boxes)
                    .map(|b| PixelBox::new(b.left, b.top, b.width, b.height))
                    .collect()
            })
            .unwrap_or_default();
        Finding {
            info_type: raw.info_type.map(|t| t.name).unwrap_or_default(),
            likelihood: raw
                .likelihood
                .and_then(|l| l.parse().ok())
                .unwrap_or_default(),
            boxes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedactImageResponse {
    #[serde(default)]
    redacted_image: String,
}

/// Cloud DLP inspection and image redaction.
pub struct DlpInspection {
    client: Arc<GoogleClient>,
}

#[async_trait]
impl InspectionService for DlpInspection {
    async fn inspect(
        &self,
        image_png: &[u8],
        policy: &InspectionPolicy,
    ) -> Result<Vec<Finding>, ServiceError> {
        let url = format!("{}/content:inspect", self.client.dlp_parent());
        let body = json!({
            "inspectConfig": inspect_config(policy),
            "item": { "byteItem": byte_item(image_png, ImageMime::Png) },
        });
        let response: InspectContentResponse = self.client.post_json("dlp", &url, &body).await?;
        let findings: Vec<Finding> = response.result.findings.into_iter().map(Finding::from).collect();
        debug!("DLP returned {} findings", findings.len());
        Ok(findings)
    }

    async fn redact_image(
        &self,
        image: &[u8],
        mime: ImageMime,
        policy: &InspectionPolicy,
    ) -> Result<Vec<u8>, ServiceError> {
        let url = format!("{}/image:redact", self.client.dlp_parent());
        let black = json!({ "red": 0.0, "green": 0.0, "blue": 0.0 });
        let mut redactions: Vec<Value> = policy
            .info_types
            .iter()
            .map(|name| json!({ "infoType": { "name": name }, "redactionColor": black }))
            .collect();
        if !policy.custom_terms.is_empty() {
            redactions.push(json!({
                "infoType": { "name": CUSTOM_INFO_TYPE },
                "redactionColor": black,
            }));
        }
        let body = json!({
            "inspectConfig": inspect_config(policy),
            "imageRedactionConfigs": redactions,
            "byteItem": byte_item(image, mime),
        });
        let response: RedactImageResponse = self.client.post_json("dlp", &url, &body).await?;
        from_base64(&response.redacted_image).map_err(|e| ServiceError::Decode {
            service: "dlp",
            detail: e.to_string(),
        })
    }

    async fn ping(&self) -> Result<Duration, ServiceError> {
        let start = Instant::now();
        // Any HTTP answer proves reachability; only transport errors count.
        self.client.http.head(DLP_BASE).send().await?;
        Ok(start.elapsed())
    }
}

// ── Vision ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnnotateBatchResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Cloud Vision dense document OCR.
pub struct VisionOcr {
    client: Arc<GoogleClient>,
}

#[async_trait]
impl OcrService for VisionOcr {
    async fn detect_document_text(
        &self,
        image_png: &[u8],
    ) -> Result<Option<TextAnnotation>, ServiceError> {
        let body = json!({
            "requests": [{
                "image": { "content": to_base64(image_png) },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
            }]
        });
        let batch: AnnotateBatchResponse =
            self.client.post_json("vision", VISION_URL, &body).await?;
        let Some(response) = batch.responses.into_iter().next() else {
            return Ok(None);
        };
        if let Some(err) = response.error {
            return Err(ServiceError::Status {
                service: "vision",
                status: err.code,
                body: err.message,
            });
        }
        Ok(response.full_text_annotation)
    }
}

// ── Translation ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateDocumentResponse {
    document_translation: Option<DocumentTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentTranslation {
    #[serde(default)]
    byte_stream_outputs: Vec<String>,
}

/// Cloud Translation v3 synchronous document translation.
pub struct DocumentTranslator {
    client: Arc<GoogleClient>,
}

#[async_trait]
impl TranslationService for DocumentTranslator {
    async fn translate_document(
        &self,
        pdf: &[u8],
        target_language: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        if pdf.len() > TRANSLATION_API_LIMIT_BYTES {
            return Err(ServiceError::PayloadTooLarge {
                size: pdf.len(),
                limit: TRANSLATION_API_LIMIT_BYTES,
            });
        }
        let url = format!(
            "{TRANSLATE_BASE}/projects/{}/locations/{TRANSLATE_LOCATION}:translateDocument",
            self.client.project_id
        );
        let body = json!({
            "targetLanguageCode": target_language,
            "documentInputConfig": {
                "content": to_base64(pdf),
                "mimeType": "application/pdf",
            },
        });
        let response: TranslateDocumentResponse =
            self.client.post_json("translate", &url, &body).await?;

        let outputs = response
            .document_translation
            .map(|d| d.byte_stream_outputs)
            .unwrap_or_default();
        if outputs.is_empty() {
            warn!("Translation response carried no document bytes");
            return Err(ServiceError::Decode {
                service: "translate",
                detail: "no byteStreamOutputs in documentTranslation".into(),
            });
        }

        let mut translated = Vec::new();
        for chunk in outputs {
            let bytes = from_base64(&chunk).map_err(|e| ServiceError::Decode {
                service: "translate",
                detail: e.to_string(),
            })?;
            translated.extend_from_slice(&bytes);
        }
        Ok(translated)
    }
}
