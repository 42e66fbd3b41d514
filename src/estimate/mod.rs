//! Remaining-time estimation.
//!
//! The [`Estimator`] is a [`PipelineObserver`]: it folds every event into an
//! [`EstimationState`], appends a [`HistorySample`] the moment a document
//! completes, and publishes each fresh [`Prediction`] on a `watch` channel.
//! UI code only ever reads the latest prediction from its receiver.
//!
//! The cost model is fitted once per batch from the last
//! [`HISTORY_WINDOW`] samples of the history log and is not refitted while
//! the batch runs.

pub mod history;
pub mod regression;
pub mod state;

pub use history::{HistoryLog, HistorySample, PerformanceSnapshot, HISTORY_WINDOW};
pub use regression::{calculate_regression, LinearModel};
pub use state::{CostModel, EstimationState, Prediction};

use crate::config::{MetricsSeed, SanitizeConfig};
use crate::progress::{PipelineEvent, PipelineObserver};
use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct Estimator {
    state: Mutex<EstimationState>,
    log: Option<HistoryLog>,
    tx: watch::Sender<Prediction>,
}

impl Estimator {
    /// Load history for this config's environment and fit the model.
    ///
    /// History problems never stop a batch: an unreadable log is logged and
    /// treated as empty.
    pub fn new(config: &SanitizeConfig) -> (Self, watch::Receiver<Prediction>) {
        let environment = config.environment_tag();
        let log = config.history_path.clone().map(HistoryLog::new);

        let mut seed = config.metrics_seed;
        let samples = match log {
            Some(ref log) => {
                if let Some(snap) = PerformanceSnapshot::read(&log.snapshot_path()) {
                    debug!("Seeding metrics from snapshot of {}", snap.updated_at);
                    seed = MetricsSeed {
                        load_secs_per_mb: snap.load_secs_per_mb,
                        ping_ms: snap.ping_ms,
                    };
                }
                log.load_recent(&environment, HISTORY_WINDOW)
                    .unwrap_or_else(|e| {
                        warn!("Ignoring performance history: {e}");
                        Vec::new()
                    })
            }
            None => Vec::new(),
        };

        let model = CostModel::fit(&samples, seed);
        info!(
            "Cost model from {} samples: {:.2}s/page redaction, {:.2}s/page save",
            model.samples, model.redaction.slope, model.save.slope
        );
        Self::from_state(EstimationState::new(model, environment), log)
    }

    /// Wrap an explicit state, persisting to `log` when given.
    pub fn from_state(
        state: EstimationState,
        log: Option<HistoryLog>,
    ) -> (Self, watch::Receiver<Prediction>) {
        let (tx, rx) = watch::channel(state.predict());
        let estimator = Self {
            state: Mutex::new(state),
            log,
            tx,
        };
        (estimator, rx)
    }

    /// Another receiver for the prediction stream.
    pub fn subscribe(&self) -> watch::Receiver<Prediction> {
        self.tx.subscribe()
    }

    pub fn prediction(&self) -> Prediction {
        *self.tx.borrow()
    }

    fn persist_sample(&self, sample: &HistorySample) {
        if let Some(ref log) = self.log {
            if let Err(e) = log.append(sample) {
                warn!("Could not record performance sample: {e}");
            }
        }
    }

    fn persist_snapshot(&self, state: &EstimationState) {
        let Some(ref log) = self.log else {
            return;
        };
        let snapshot = PerformanceSnapshot {
            updated_at: Utc::now(),
            load_secs_per_mb: state.load_secs_per_mb(),
            ping_ms: state.current_ping_ms(),
        };
        if let Err(e) = snapshot.write(&log.snapshot_path()) {
            warn!("Could not write metrics snapshot: {e}");
        }
    }
}

impl PipelineObserver for Estimator {
    fn on_event(&self, event: &PipelineEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(sample) = state.apply(event) {
            self.persist_sample(&sample);
        }
        if let PipelineEvent::BatchDone { .. } = event {
            self.persist_snapshot(&state);
        }
        self.tx.send_replace(state.predict());
    }
}
