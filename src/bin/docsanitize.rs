//! CLI binary for docsanitizer.
//!
//! A thin shim over the library crate: maps CLI flags to `SanitizeConfig`,
//! runs the batch on its worker thread and renders pipeline events.

use anyhow::{Context, Result};
use clap::Parser;
use docsanitizer::config::parse_terms;
use docsanitizer::{
    BatchWorker, ChannelObserver, Estimator, EventBus, Likelihood, PipelineEvent, Prediction,
    SanitizeConfig, TranslationConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress display ─────────────────────────────────────────────────────────

/// Renders pipeline events as a progress bar with per-document log lines.
/// Lives on the main thread; events arrive over a channel.
struct CliProgress {
    bar: ProgressBar,
    eta: watch::Receiver<Prediction>,
    files: usize,
    current: String,
}

impl CliProgress {
    fn new(eta: watch::Receiver<Prediction>) -> Self {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning folder…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            eta,
            files: 0,
            current: String::new(),
        }
    }

    fn activate_bar(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
    }

    fn refresh_message(&self) {
        let eta = match *self.eta.borrow() {
            Prediction::Calibrating { .. } => dim("ETA calibrating"),
            Prediction::Estimate { remaining } => format!("ETA {}", format_duration(remaining)),
        };
        self.bar.set_message(format!("{eta}  {}", dim(&self.current)));
    }

    fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::DocumentSkipped { file } => {
                self.bar
                    .println(format!("  {} {}", dim("↷"), dim(&format!("{file} (already processed)"))));
            }
            PipelineEvent::BatchStarted {
                files,
                total_pages,
                total_mb,
                translation,
            } => {
                self.files = *files;
                self.activate_bar(*total_pages);
                self.bar.println(format!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!(
                        "Sanitising {files} files, {total_pages} pages, {total_mb:.1} MB{}",
                        if *translation { " (+ translation)" } else { "" }
                    ))
                ));
            }
            PipelineEvent::DocumentStarted { file, index, .. } => {
                self.bar.set_prefix(format!("{}/{}", index + 1, self.files));
                self.current = file.clone();
            }
            PipelineEvent::PageDone {
                page,
                total,
                warnings,
                ..
            } => {
                for w in warnings {
                    self.bar.println(format!(
                        "  {} {} page {page}/{total}: {}",
                        yellow("⚠"),
                        self.current,
                        dim(&w.to_string())
                    ));
                }
                self.bar.inc(1);
            }
            PipelineEvent::TranslationChunkStarted { label, .. } => {
                self.current = if label.is_empty() {
                    "translating".to_string()
                } else {
                    format!("translating pages {label}")
                };
            }
            PipelineEvent::TranslationChunkDone { label, ok: false, .. } => {
                self.bar
                    .println(format!("  {} translation chunk '{label}' failed", yellow("⚠")));
            }
            PipelineEvent::DocumentDone { file, metrics } => {
                self.bar.println(format!(
                    "  {} {}  {}",
                    green("✓"),
                    file,
                    dim(&format!("{} pages", metrics.pages))
                ));
            }
            PipelineEvent::DocumentFailed { file, error } => {
                self.bar
                    .println(format!("  {} {}  {}", red("✗"), file, red(&truncate(error, 100))));
            }
            PipelineEvent::BatchDone { .. } => {
                self.bar.finish_and_clear();
                return;
            }
            _ => {}
        }
        self.refresh_message();
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Try the pipeline offline
  docsanitize --simulation ./inbox

  # Live redaction, then translate to English
  docsanitize --project acme-legal --translate en ./inbox

  # Extra names to black out, one per line
  docsanitize --project acme-legal --terms-file names.txt ./inbox

OUTPUT:
  <FOLDER>/processed/anonymized_<file>
  <FOLDER>/processed/translated_<lang>_<file>
  <FOLDER>/processed/<lang>_anonymized_<file>/<pages>_translated_<lang>_<file>

  Files that already have processed/anonymized_<file> are skipped, so an
  interrupted batch resumes where it stopped.

ENVIRONMENT VARIABLES:
  GOOGLE_CLOUD_PROJECT        Project for DLP, Vision and Translation quotas
  GOOGLE_OAUTH_ACCESS_TOKEN   Bearer token (otherwise gcloud is asked)
  PDFIUM_LIB_PATH             Path to libpdfium (file or directory)
  RUST_LOG                    Log filter, overrides --verbose/--quiet
"#;

/// Redact personal data from PDFs and images, optionally translating them.
#[derive(Parser, Debug)]
#[command(
    name = "docsanitize",
    version,
    about = "Redact personal data from PDFs and images in a folder",
    long_about = "Redact personal data from every PDF and image in a folder. Pages are \
rasterised, sensitive spans are blacked out, and each page is rebuilt as a flat image with an \
invisible OCR text layer. Sanitised documents can then be translated.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder of PDFs and PNG/JPEG images.
    folder: PathBuf,

    /// Use simulated services (no network, no findings).
    #[arg(long, env = "DOCSANITIZE_SIMULATION")]
    simulation: bool,

    /// Cloud project id.
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// Token file or service-account key.
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Weakest likelihood reported as a finding.
    #[arg(long, env = "DOCSANITIZE_MIN_LIKELIHOOD", value_enum, default_value = "possible")]
    min_likelihood: LikelihoodArg,

    /// Extra terms to redact, separated by commas or semicolons.
    #[arg(long, env = "DOCSANITIZE_TERMS")]
    terms: Option<String>,

    /// File with extra terms to redact.
    #[arg(long, env = "DOCSANITIZE_TERMS_FILE")]
    terms_file: Option<PathBuf>,

    /// Render zoom for redaction and OCR (1.0–6.0).
    #[arg(long, env = "DOCSANITIZE_ZOOM", default_value_t = 3.0)]
    zoom: f32,

    /// Translate sanitised PDFs to this language (e.g. en, de, zh-CN).
    #[arg(long, env = "DOCSANITIZE_TRANSLATE")]
    translate: Option<String>,

    /// Largest translation request in MiB (max 40).
    #[arg(long, env = "DOCSANITIZE_MAX_CHUNK_MB", default_value_t = 30,
          value_parser = clap::value_parser!(u32).range(1..=40))]
    max_chunk_mb: u32,

    /// Performance history for time estimates.
    #[arg(long, env = "DOCSANITIZE_HISTORY")]
    history: Option<PathBuf>,

    /// Per-request service timeout in seconds.
    #[arg(long, env = "DOCSANITIZE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "DOCSANITIZE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSANITIZE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSANITIZE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LikelihoodArg {
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

impl From<LikelihoodArg> for Likelihood {
    fn from(v: LikelihoodArg) -> Self {
        match v {
            LikelihoodArg::VeryUnlikely => Likelihood::VeryUnlikely,
            LikelihoodArg::Unlikely => Likelihood::Unlikely,
            LikelihoodArg::Possible => Likelihood::Possible,
            LikelihoodArg::Likely => Likelihood::Likely,
            LikelihoodArg::VeryLikely => Likelihood::VeryLikely,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli).await?;

    // ── Wire observers ───────────────────────────────────────────────────
    // The estimator subscribes first so the ETA is fresh when the UI sees
    // the same event.
    let (estimator, eta) = Estimator::new(&config);
    let (observer, mut events) = ChannelObserver::new();
    let mut bus = EventBus::new();
    bus.subscribe(Arc::new(estimator));
    bus.subscribe(Arc::new(observer));

    // ── Run batch ────────────────────────────────────────────────────────
    let worker = BatchWorker::spawn(cli.folder.clone(), config, bus)
        .context("Failed to start batch")?;

    let cancel = worker.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", yellow("Stopping after the current document…"));
            cancel.cancel();
        }
    });

    let mut progress = show_progress.then(|| CliProgress::new(eta));
    while let Some(event) = events.recv().await {
        if let Some(ref mut p) = progress {
            p.apply(&event);
        }
    }
    if let Some(p) = progress {
        p.bar.finish_and_clear();
    }

    let report = tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("Batch worker did not finish")?
        .context("Batch aborted")?;

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        for doc in &report.documents {
            if let Some(ref err) = doc.translation_error {
                eprintln!(
                    "{} translation skipped for {}: {}",
                    yellow("⚠"),
                    doc.input.display(),
                    truncate(err, 120)
                );
            }
        }
        let mark = if report.failed.is_empty() {
            green("✔")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{}  {} sanitised  {} failed  {} skipped  {} findings  →  {}",
            mark,
            bold(&report.succeeded().to_string()),
            report.failed.len(),
            report.skipped.len(),
            report.total_findings(),
            bold(&report.output_dir.display().to_string()),
        );
        if report.cancelled {
            eprintln!("   {}", dim("stopped early; run again to resume"));
        }
    }

    if !report.failed.is_empty() {
        anyhow::bail!("{} document(s) could not be sanitised", report.failed.len());
    }
    Ok(())
}

/// Map CLI args to `SanitizeConfig`.
async fn build_config(cli: &Cli) -> Result<SanitizeConfig> {
    let mut terms = cli.terms.as_deref().map(parse_terms).unwrap_or_default();
    if let Some(ref path) = cli.terms_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read terms from {:?}", path))?;
        terms.extend(parse_terms(&text));
    }

    let translation = cli.translate.as_ref().map(|lang| {
        TranslationConfig::new(lang.clone())
            .with_max_payload_bytes(cli.max_chunk_mb as usize * 1024 * 1024)
    });

    let history = cli.history.clone().or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".cache/docsanitize/history.jsonl"))
    });

    let mut builder = SanitizeConfig::builder()
        .simulation(cli.simulation)
        .min_likelihood(cli.min_likelihood.into())
        .custom_terms(terms)
        .redaction_zoom(cli.zoom)
        .translation(translation)
        .api_timeout_secs(cli.api_timeout);
    if let Some(ref project) = cli.project {
        builder = builder.project_id(project.clone());
    }
    if let Some(ref path) = cli.credentials {
        builder = builder.credentials_path(path.clone());
    }
    if let Some(path) = history {
        builder = builder.history_path(path);
    }

    builder.build().context("Invalid configuration")
}
