use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::artifact::{Artifact, ArtifactStore};
use crate::collab::{CombineType, DetectionParams, MatchingParams};
use crate::consts::{FLUX_PRESERVING_MIN_EXPOSURES, STACK_MEDIAN_ABOVE_EXPOSURES};
use crate::error::{EpochRegError, Result};
use crate::exposure::Camera;

use super::config::RegistrationConfig;
use super::types::{ProgressReporter, Stage, StageReport, UnitOutcome};

/// Run one closure per unit, in order, filing each outcome in the stage
/// report and reporting progress per unit.
pub(super) fn run_units<U>(
    stage: Stage,
    units: &[(String, U)],
    reporter: &Arc<dyn ProgressReporter>,
    mut run: impl FnMut(&U) -> Result<UnitOutcome>,
) -> Result<StageReport> {
    reporter.begin_stage(stage, Some(units.len()));
    let mut report = StageReport::default();
    for (i, (name, unit)) in units.iter().enumerate() {
        report.record(name.clone(), run(unit))?;
        reporter.advance(i + 1);
    }
    reporter.finish_stage();
    info!(
        stage = %stage,
        executed = report.executed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Stage complete"
    );
    Ok(report)
}

/// Whether `artifact` can be kept as is. With clobber on, an existing
/// artifact is removed and the unit must run.
pub(super) fn up_to_date(store: &dyn ArtifactStore, artifact: &Artifact, clobber: bool) -> Result<bool> {
    if !store.exists(artifact) {
        return Ok(false);
    }
    if clobber {
        store.invalidate(artifact)?;
        return Ok(false);
    }
    let path = store.path_for(artifact, artifact.canonical_kind());
    info!(path = %path.display(), "Exists, not clobbering");
    Ok(true)
}

/// Fail with `MissingArtifact` for the first path that does not exist.
pub(super) fn require_files(paths: &[PathBuf]) -> Result<()> {
    match paths.iter().find(|p| !p.is_file()) {
        Some(missing) => Err(EpochRegError::MissingArtifact(missing.clone())),
        None => Ok(()),
    }
}

pub(super) fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EpochRegError::MissingArtifact(path.to_path_buf()))
    }
}

/// Combine type of a Combine-2 group: the flux-preserving median for
/// large optical groups, the conservative minmed otherwise.
pub fn registered_combine_type(camera: &Camera, single_star: bool, exposures: usize) -> CombineType {
    if !camera.is_infrared() && !single_star && exposures >= FLUX_PRESERVING_MIN_EXPOSURES {
        CombineType::Median
    } else {
        CombineType::MinMed
    }
}

/// Combine type of a multi-epoch stack.
pub fn stack_combine_type(single_star: bool, exposures: usize) -> CombineType {
    if single_star || exposures > STACK_MEDIAN_ABOVE_EXPOSURES {
        CombineType::Median
    } else {
        CombineType::MinMed
    }
}

/// Whether a group is the two-frame infrared case that needs hot-pixel
/// cleanup after cosmic-ray rejection.
pub(super) fn needs_hot_pixel_cleanup(camera: &Camera, exposures: usize, cr_rejection: bool) -> bool {
    cr_rejection && exposures == 2 && camera.is_infrared()
}

pub(super) fn detection_params(reg: &RegistrationConfig) -> DetectionParams {
    DetectionParams {
        threshold: reg.threshold,
        peak_min: reg.peak_min,
        peak_max: reg.peak_max,
        nbright: reg.nbright,
    }
}

pub(super) fn matching_params(reg: &RegistrationConfig) -> MatchingParams {
    MatchingParams {
        search_radius_arcsec: reg.search_radius_arcsec,
        min_objects: reg.min_objects,
        nclip: reg.nclip,
        sigma_clip: reg.sigma_clip,
        ref_nbright: reg.ref_nbright,
        ref_flux_min: reg.ref_flux_min,
        ref_flux_max: reg.ref_flux_max,
    }
}
