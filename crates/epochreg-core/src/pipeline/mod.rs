pub mod config;
mod combination;
mod context;
mod difference;
mod helpers;
mod native;
mod orchestrator;
mod refim;
mod register;
mod registered;
mod setup;
mod stack;
mod template;
mod types;

pub use combination::{CombinationAccumulator, DifferenceProducts};
pub use helpers::{registered_combine_type, stack_combine_type};
pub use orchestrator::{run_pipeline, run_pipeline_reported};
pub use register::solution_name;
pub use types::{ProgressReporter, RunSummary, Stage, StageReport, UnitFailure, UnitOutcome};
