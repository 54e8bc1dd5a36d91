use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactStore, ProductKind};
use crate::collab::{AlignAnchor, AlignRequest, PropagationOutcome, PropagationRequest};
use crate::error::{EpochRegError, Result};
use crate::exposure::{Exposure, FevGroup};

use super::context::{file_name, RunContext};
use super::helpers::{detection_params, matching_params, require_file, require_files, run_units};
use super::types::{Stage, StageReport, UnitOutcome};

/// Register: align each visit's Combine-1 image to the reference and
/// push the solution back into its exposures.
pub(super) fn run_register(ctx: &RunContext<'_>) -> Result<StageReport> {
    let anchor = match ctx.config.target {
        Some(target) if ctx.config.single_star => AlignAnchor::SingleStar { target },
        _ => {
            let image = ctx.reference_image();
            if !image.is_file() {
                return Err(EpochRegError::MissingReference(image));
            }
            let catalog = ctx.reference.as_ref().and_then(|r| r.catalog.clone());
            AlignAnchor::Reference { image, catalog }
        }
    };
    let wcs_name = solution_name(&anchor);
    info!(wcs_name = %wcs_name, "Registering visits");

    let units: Vec<(String, (FevGroup, Vec<Exposure>))> = ctx
        .fev_groups()
        .into_iter()
        .map(|(group, exposures)| (group.to_string(), (group, exposures)))
        .collect();

    run_units(Stage::Register, &units, &ctx.reporter, |(group, exposures)| {
        register_visit(ctx, group, exposures, &anchor, &wcs_name)
    })
}

/// WCS solution name for an alignment anchor.
pub fn solution_name(anchor: &AlignAnchor) -> String {
    match anchor {
        AlignAnchor::SingleStar { target } => format!("SINGLESTAR:{target}"),
        AlignAnchor::Reference { image, .. } => format!("REFIM:{}", file_name(image)),
        AlignAnchor::Catalog { catalog } => format!("REFCAT:{}", file_name(catalog)),
        AlignAnchor::Internal { .. } => crate::consts::INTRAVISIT_WCS_NAME.to_string(),
    }
}

fn register_visit(
    ctx: &RunContext<'_>,
    group: &FevGroup,
    exposures: &[Exposure],
    anchor: &AlignAnchor,
    wcs_name: &str,
) -> Result<UnitOutcome> {
    let Some(first) = exposures.first() else {
        return Ok(UnitOutcome::Skipped);
    };
    let native = ctx.store.path_for(
        &Artifact::Native {
            group: group.clone(),
            drz: first.drizzle_suffix(),
        },
        ProductKind::Science,
    );
    require_file(&native)?;

    let current = ctx
        .toolkit
        .headers
        .read_header(&native)?
        .get_str("WCSNAME");
    if current.as_deref() == Some(wcs_name) && !ctx.clobber() {
        info!(group = %group, wcs_name, "Already registered, not clobbering");
        return Ok(UnitOutcome::Skipped);
    }

    let targets: Vec<_> = exposures.iter().map(|e| ctx.staged(e)).collect();
    require_files(&targets)?;
    let workdir = ctx.layout().epoch_dir(group.epoch);
    let reg = &ctx.config.registration;

    let solved = ctx.toolkit.registrar.align(&AlignRequest {
        workdir: workdir.clone(),
        images: vec![native.clone()],
        anchor: anchor.clone(),
        wcs_name: wcs_name.to_string(),
        geometry: reg.geometry(),
        detection: detection_params(reg),
        matching: matching_params(reg),
        interactive: reg.interactive,
        clobber: ctx.clobber(),
    })?;

    propagate(ctx, &workdir, &native, &targets, current, &solved)?;
    info!(group = %group, wcs_name = %solved, "Registered visit");
    Ok(UnitOutcome::Executed)
}

/// Back-propagate `wcs_name`; a key collision is retried once under
/// `{wcs_name}_1`.
fn propagate(
    ctx: &RunContext<'_>,
    workdir: &Path,
    source: &Path,
    targets: &[PathBuf],
    old_wcs_name: Option<String>,
    wcs_name: &str,
) -> Result<()> {
    let mut request = PropagationRequest {
        workdir: workdir.to_path_buf(),
        source: source.to_path_buf(),
        targets: targets.to_vec(),
        old_wcs_name,
        wcs_name: wcs_name.to_string(),
        force: ctx.clobber(),
    };
    match ctx.toolkit.propagator.propagate(&request)? {
        PropagationOutcome::Applied => return Ok(()),
        PropagationOutcome::KeyCollision { existing } => {
            warn!(
                wcs_name,
                existing = %existing,
                "WCS key collision, retrying under a new name"
            );
        }
    }

    request.wcs_name = format!("{wcs_name}_1");
    match ctx.toolkit.propagator.propagate(&request)? {
        PropagationOutcome::Applied => Ok(()),
        PropagationOutcome::KeyCollision { existing } => Err(EpochRegError::WcsPropagation {
            image: source.to_path_buf(),
            wcs_name: request.wcs_name,
            reason: format!("key collides with existing solution {existing}"),
        }),
    }
}
