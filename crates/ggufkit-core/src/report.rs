//! Per-stage outcomes of a pipeline run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

/// A pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    InferPrecision,
    Convert,
    Calibrate,
    /// Quantization to one output type.
    Quantize(String),
    Upload,
}

impl Stage {
    /// A failed critical stage ends the run: nothing after it is attempted.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Stage::Fetch | Stage::InferPrecision | Stage::Convert | Stage::Calibrate
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => f.pad("fetch"),
            Stage::InferPrecision => f.pad("infer-precision"),
            Stage::Convert => f.pad("convert"),
            Stage::Calibrate => f.pad("imatrix"),
            Stage::Quantize(tag) => f.pad(&format!("quantize[{tag}]")),
            Stage::Upload => f.pad("upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran; the artifact it produced, if any.
    Completed(Option<PathBuf>),
    /// The stage did not need to run.
    Skipped(String),
    Failed(String),
}

impl StageOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

/// Ordered record of every stage a run reached.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    records: Vec<StageRecord>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, outcome: StageOutcome, elapsed: Duration) {
        self.records.push(StageRecord {
            stage,
            outcome,
            elapsed,
        });
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Outcome of the first record for `stage`.
    pub fn outcome(&self, stage: &Stage) -> Option<&StageOutcome> {
        self.records
            .iter()
            .find(|r| &r.stage == stage)
            .map(|r| &r.outcome)
    }

    /// True iff no stage failed.
    pub fn succeeded(&self) -> bool {
        !self.records.iter().any(|r| r.outcome.is_failure())
    }

    pub fn failures(&self) -> Vec<&StageRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome.is_failure())
            .collect()
    }

    /// Whether a critical stage failed and the run stopped early.
    pub fn aborted(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.stage.is_critical() && r.outcome.is_failure())
    }

    /// Log one line per stage.
    pub fn log_summary(&self) {
        for record in &self.records {
            let secs = record.elapsed.as_secs_f64();
            match &record.outcome {
                StageOutcome::Completed(Some(path)) => {
                    info!("{:<16} done    {:>8.1}s  {}", record.stage, secs, path.display())
                }
                StageOutcome::Completed(None) => {
                    info!("{:<16} done    {:>8.1}s", record.stage, secs)
                }
                StageOutcome::Skipped(reason) => {
                    info!("{:<16} skipped {:>8.1}s  {}", record.stage, secs, reason)
                }
                StageOutcome::Failed(message) => {
                    error!("{:<16} FAILED  {:>8.1}s  {}", record.stage, secs, message)
                }
            }
        }
        if self.succeeded() {
            info!("Run finished: all {} stages succeeded", self.records.len());
        } else {
            error!(
                "Run finished with {} failed stage(s){}",
                self.failures().len(),
                if self.aborted() { "; pipeline aborted" } else { "" }
            );
        }
    }
}
