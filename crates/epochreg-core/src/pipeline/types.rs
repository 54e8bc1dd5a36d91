use std::path::PathBuf;

use tracing::warn;

use crate::error::Result;
use crate::reference::ReferenceFrame;

/// Pipeline stage, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    Reference,
    Native,
    Register,
    Registered,
    Difference,
    Stack,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Self::Setup,
        Self::Reference,
        Self::Native,
        Self::Register,
        Self::Registered,
        Self::Difference,
        Self::Stack,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "Setup"),
            Self::Reference => write!(f, "Build-Reference"),
            Self::Native => write!(f, "Combine-1"),
            Self::Register => write!(f, "Register"),
            Self::Registered => write!(f, "Combine-2"),
            Self::Difference => write!(f, "Difference"),
            Self::Stack => write!(f, "Stack"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars or logging. All
/// methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A stage has started. `total_units` is its fan-out, if known.
    fn begin_stage(&self, _stage: Stage, _total_units: Option<usize>) {}

    /// One unit of the current stage has completed.
    fn advance(&self, _units_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_pipeline` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// What happened to one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Executed,
    /// Its artifact was already up to date.
    Skipped,
}

/// A unit that failed without stopping the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub reason: String,
}

/// Per-stage record of units, by outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<UnitFailure>,
}

impl StageReport {
    /// File the result of one unit. Unit-local errors are recorded and
    /// swallowed; anything else is returned.
    pub(crate) fn record(&mut self, unit: String, result: Result<UnitOutcome>) -> Result<()> {
        match result {
            Ok(UnitOutcome::Executed) => self.executed.push(unit),
            Ok(UnitOutcome::Skipped) => self.skipped.push(unit),
            Err(e) if e.is_unit_local() => {
                warn!(unit = %unit, error = %e, "Unit failed");
                self.failed.push(UnitFailure {
                    unit,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.executed.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Outcome of a whole run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// Reports of the stages that ran, in order.
    pub stages: Vec<(Stage, StageReport)>,
    pub reference: Option<ReferenceFrame>,
    /// Cross-filter composite difference images written.
    pub composites: Vec<PathBuf>,
    /// Exposures in the working set.
    pub exposures: usize,
    pub epochs: Vec<i32>,
}

impl RunSummary {
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, report)| report)
    }

    pub fn failed_units(&self) -> usize {
        self.stages.iter().map(|(_, r)| r.failed.len()).sum()
    }
}
