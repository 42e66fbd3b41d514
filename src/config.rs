//! Configuration types for document sanitisation.
//!
//! All pipeline behaviour is controlled through [`SanitizeConfig`], built via
//! its [`SanitizeConfigBuilder`]. The confidence policy, zoom factors and the
//! translation payload ceiling live here and nowhere else; stages read them
//! from the config instead of repeating constants.

use crate::error::SanitizeError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Hard ceiling of the synchronous document-translation endpoint (40 MiB).
pub const TRANSLATION_API_LIMIT_BYTES: usize = 40 * 1024 * 1024;

/// Default chunk ceiling, kept well below [`TRANSLATION_API_LIMIT_BYTES`].
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 30 * 1024 * 1024;

/// Configuration for a sanitisation batch.
///
/// Built via [`SanitizeConfig::builder()`] or using
/// [`SanitizeConfig::default()`].
///
/// # Example
/// ```rust
/// use docsanitizer::{Likelihood, SanitizeConfig};
///
/// let config = SanitizeConfig::builder()
///     .simulation(true)
///     .min_likelihood(Likelihood::Likely)
///     .translate_to("en")
///     .build()
///     .unwrap();
/// assert!(config.translation.is_some());
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct SanitizeConfig {
    /// Run against simulated services (no network, no findings). Default: false.
    pub simulation: bool,

    /// Cloud project that owns the inspection, OCR and translation quotas.
    pub project_id: Option<String>,

    /// File holding an OAuth access token. Falls back to
    /// `GOOGLE_OAUTH_ACCESS_TOKEN`, then to `gcloud auth print-access-token`.
    pub credentials_path: Option<PathBuf>,

    /// Weakest likelihood tier the inspection service may report. Default: `Possible`.
    pub min_likelihood: Likelihood,

    /// Exact-match terms redacted at maximum confidence, in addition to the
    /// built-in catalogue.
    pub custom_terms: Vec<String>,

    /// Render scale used for inspection, burning and OCR. Range: 1.0–6.0. Default: 3.0.
    ///
    /// At 3× a 10 pt glyph is about 40 px tall, comfortably above what the
    /// inspection and OCR services need to read small print.
    pub redaction_zoom: f32,

    /// Translate each sanitised PDF when set.
    pub translation: Option<TranslationConfig>,

    /// Append-only JSON-lines file of per-document performance samples.
    /// `None` keeps measurements in memory only.
    pub history_path: Option<PathBuf>,

    /// Starting values for metrics the regression does not model.
    pub metrics_seed: MetricsSeed,

    /// Per-request timeout for service calls in seconds. Default: 120.
    pub api_timeout_secs: u64,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            simulation: false,
            project_id: None,
            credentials_path: None,
            min_likelihood: Likelihood::Possible,
            custom_terms: Vec::new(),
            redaction_zoom: 3.0,
            translation: None,
            history_path: None,
            metrics_seed: MetricsSeed::default(),
            api_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for SanitizeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizeConfig")
            .field("simulation", &self.simulation)
            .field("project_id", &self.project_id)
            .field("credentials_path", &self.credentials_path)
            .field("min_likelihood", &self.min_likelihood)
            .field("custom_terms", &format_args!("<{} terms>", self.custom_terms.len()))
            .field("redaction_zoom", &self.redaction_zoom)
            .field("translation", &self.translation)
            .field("history_path", &self.history_path)
            .field("metrics_seed", &self.metrics_seed)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl SanitizeConfig {
    /// Create a new builder for `SanitizeConfig`.
    pub fn builder() -> SanitizeConfigBuilder {
        SanitizeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Tag stored with every history sample; samples from other tags are
    /// ignored when the estimator loads.
    pub fn environment_tag(&self) -> String {
        let mode = if self.simulation { "simulation" } else { "live" };
        format!("{}-{}/{}", std::env::consts::OS, std::env::consts::ARCH, mode)
    }
}

/// Builder for [`SanitizeConfig`].
#[derive(Debug)]
pub struct SanitizeConfigBuilder {
    config: SanitizeConfig,
}

impl SanitizeConfigBuilder {
    pub fn simulation(mut self, v: bool) -> Self {
        self.config.simulation = v;
        self
    }

    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = Some(id.into());
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = Some(path.into());
        self
    }

    pub fn min_likelihood(mut self, tier: Likelihood) -> Self {
        self.config.min_likelihood = tier;
        self
    }

    pub fn custom_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.custom_terms = terms
            .into_iter()
            .map(Into::into)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn redaction_zoom(mut self, zoom: f32) -> Self {
        self.config.redaction_zoom = zoom;
        self
    }

    /// Enable translation with default chunking parameters.
    pub fn translate_to(mut self, language: impl Into<String>) -> Self {
        self.config.translation = Some(TranslationConfig::new(language));
        self
    }

    pub fn translation(mut self, translation: Option<TranslationConfig>) -> Self {
        self.config.translation = translation;
        self
    }

    pub fn history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.history_path = Some(path.into());
        self
    }

    pub fn metrics_seed(mut self, seed: MetricsSeed) -> Self {
        self.config.metrics_seed = seed;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SanitizeConfig, SanitizeError> {
        let c = &self.config;
        if !(1.0..=6.0).contains(&c.redaction_zoom) {
            return Err(SanitizeError::InvalidConfig(format!(
                "Redaction zoom must be 1.0–6.0, got {}",
                c.redaction_zoom
            )));
        }
        if !c.simulation && c.project_id.as_deref().map_or(true, str::is_empty) {
            return Err(SanitizeError::InvalidConfig(
                "A project id is required unless simulation mode is enabled".into(),
            ));
        }
        if let Some(ref t) = c.translation {
            t.validate()?;
        }
        Ok(self.config)
    }
}

// ── Translation ──────────────────────────────────────────────────────────

static RE_LANGUAGE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").unwrap());

/// Translation settings for the sanitised output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// BCP-47 target language code, e.g. `en`, `de`, `zh-CN`.
    pub target_language: String,

    /// Largest chunk submitted in one request. Default: 30 MiB.
    pub max_payload_bytes: usize,

    /// Render scale used when re-flattening pages into chunks. Default: 2.0.
    pub render_zoom: f32,
}

impl TranslationConfig {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            render_zoom: 2.0,
        }
    }

    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    fn validate(&self) -> Result<(), SanitizeError> {
        if !RE_LANGUAGE_CODE.is_match(&self.target_language) {
            return Err(SanitizeError::InvalidConfig(format!(
                "'{}' is not a language code",
                self.target_language
            )));
        }
        if self.max_payload_bytes == 0 || self.max_payload_bytes > TRANSLATION_API_LIMIT_BYTES {
            return Err(SanitizeError::InvalidConfig(format!(
                "Translation payload ceiling must be 1–{} bytes, got {}",
                TRANSLATION_API_LIMIT_BYTES, self.max_payload_bytes
            )));
        }
        if !(0.5..=4.0).contains(&self.render_zoom) {
            return Err(SanitizeError::InvalidConfig(format!(
                "Translation render zoom must be 0.5–4.0, got {}",
                self.render_zoom
            )));
        }
        Ok(())
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Likelihood tiers understood by the inspection service, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    VeryUnlikely,
    Unlikely,
    /// Default reporting floor.
    #[default]
    Possible,
    Likely,
    VeryLikely,
}

impl Likelihood {
    /// Wire name used by the inspection API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Likelihood::VeryUnlikely => "VERY_UNLIKELY",
            Likelihood::Unlikely => "UNLIKELY",
            Likelihood::Possible => "POSSIBLE",
            Likelihood::Likely => "LIKELY",
            Likelihood::VeryLikely => "VERY_LIKELY",
        }
    }
}

impl std::str::FromStr for Likelihood {
    type Err = SanitizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "VERY_UNLIKELY" => Ok(Likelihood::VeryUnlikely),
            "UNLIKELY" => Ok(Likelihood::Unlikely),
            "POSSIBLE" => Ok(Likelihood::Possible),
            "LIKELY" => Ok(Likelihood::Likely),
            "VERY_LIKELY" => Ok(Likelihood::VeryLikely),
            other => Err(SanitizeError::InvalidConfig(format!(
                "Unknown likelihood '{other}'"
            ))),
        }
    }
}

/// Seed values for the cost metrics that are smoothed rather than regressed.
///
/// Overwritten at batch end by the performance snapshot, so a fresh install
/// only relies on these until its first batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSeed {
    /// Seconds to open and rasterise-prepare one MB of input. Default: 0.5.
    pub load_secs_per_mb: f64,
    /// Round-trip latency to the inspection endpoint in milliseconds. Default: 80.
    pub ping_ms: f64,
}

impl Default for MetricsSeed {
    fn default() -> Self {
        Self {
            load_secs_per_mb: 0.5,
            ping_ms: 80.0,
        }
    }
}

// ── Custom terms ─────────────────────────────────────────────────────────

static RE_TERM_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;\r\n]+").unwrap());

/// Split a user-supplied term list (commas, semicolons or one per line) into
/// trimmed, de-duplicated terms, preserving first-seen order.
pub fn parse_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in RE_TERM_SEPARATOR.split(text) {
        let term = raw.trim();
        if !term.is_empty() && !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_policy() {
        let c = SanitizeConfig::default();
        assert_eq!(c.min_likelihood, Likelihood::Possible);
        assert_eq!(c.redaction_zoom, 3.0);
        assert!(c.translation.is_none());
    }

    #[test]
    fn live_mode_requires_project() {
        let err = SanitizeConfig::builder().build().unwrap_err();
        assert!(matches!(err, SanitizeError::InvalidConfig(_)));
        assert!(SanitizeConfig::builder().project_id("acme").build().is_ok());
    }

    #[test]
    fn rejects_bad_zoom_and_language() {
        assert!(SanitizeConfig::builder()
            .simulation(true)
            .redaction_zoom(0.2)
            .build()
            .is_err());
        assert!(SanitizeConfig::builder()
            .simulation(true)
            .translate_to("English!")
            .build()
            .is_err());
        assert!(SanitizeConfig::builder()
            .simulation(true)
            .translate_to("zh-CN")
            .build()
            .is_ok());
    }

    #[test]
    fn payload_ceiling_cannot_exceed_api_limit() {
        let t = TranslationConfig::new("en").with_max_payload_bytes(TRANSLATION_API_LIMIT_BYTES + 1);
        assert!(SanitizeConfig::builder()
            .simulation(true)
            .translation(Some(t))
            .build()
            .is_err());
    }

    #[test]
    fn likelihood_ordering_and_parsing() {
        assert!(Likelihood::Possible < Likelihood::VeryLikely);
        assert_eq!("very-likely".parse::<Likelihood>().unwrap(), Likelihood::VeryLikely);
        assert_eq!(Likelihood::Possible.as_str(), "POSSIBLE");
        assert!("certain".parse::<Likelihood>().is_err());
    }

    #[test]
    fn parse_terms_splits_and_dedups() {
        let terms = parse_terms("Alice Smith, ACME GmbH\nAlice Smith;  \n Project X ");
        assert_eq!(terms, vec!["Alice Smith", "ACME GmbH", "Project X"]);
    }

    #[test]
    fn builder_drops_blank_terms() {
        let c = SanitizeConfig::builder()
            .simulation(true)
            .custom_terms(["  ", "Bob"])
            .build()
            .unwrap();
        assert_eq!(c.custom_terms, vec!["Bob".to_string()]);
    }

    #[test]
    fn environment_tag_marks_simulation() {
        let c = SanitizeConfig::builder().simulation(true).build().unwrap();
        assert!(c.environment_tag().ends_with("/simulation"));
    }
}
