use std::fs;

use tracing::debug;

use crate::error::{EpochRegError, Result};
use crate::exposure::Exposure;

use super::context::RunContext;
use super::helpers::run_units;
use super::types::{Stage, StageReport, UnitOutcome};

/// Copy each working exposure from the input directory into its epoch
/// directory. An existing copy is kept unless clobbering.
pub(super) fn run_setup(ctx: &RunContext<'_>) -> Result<StageReport> {
    let units: Vec<(String, &Exposure)> = ctx
        .working
        .iter()
        .map(|e| (e.filename.clone(), e))
        .collect();

    run_units(Stage::Setup, &units, &ctx.reporter, |exposure| {
        let dest = ctx.staged(exposure);
        if dest.is_file() && !ctx.clobber() {
            return Ok(UnitOutcome::Skipped);
        }
        if !exposure.path.is_file() {
            return Err(EpochRegError::MissingInput(format!(
                "exposure {} not found",
                exposure.path.display()
            )));
        }
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::copy(&exposure.path, &dest)?;
        debug!(
            file = %exposure.filename,
            epoch = exposure.epoch,
            "Copied exposure into epoch directory"
        );
        Ok(UnitOutcome::Executed)
    })
}
