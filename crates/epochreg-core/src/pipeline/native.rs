use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::collab::{AlignAnchor, AlignRequest, CombineRequest, OutputGrid};
use crate::consts::INTRAVISIT_WCS_NAME;
use crate::error::Result;
use crate::exposure::{Exposure, FevGroup};

use super::context::RunContext;
use super::helpers::{
    detection_params, matching_params, needs_hot_pixel_cleanup, require_files, run_units,
    up_to_date,
};
use super::types::{Stage, StageReport, UnitOutcome};

/// Combine-1: one native-grid combination per visit.
pub(super) fn run_native(ctx: &RunContext<'_>) -> Result<StageReport> {
    let units: Vec<(String, (FevGroup, Vec<Exposure>))> = ctx
        .fev_groups()
        .into_iter()
        .map(|(group, exposures)| (group.to_string(), (group, exposures)))
        .collect();

    run_units(Stage::Native, &units, &ctx.reporter, |(group, exposures)| {
        combine_visit(ctx, group, exposures)
    })
}

fn combine_visit(ctx: &RunContext<'_>, group: &FevGroup, exposures: &[Exposure]) -> Result<UnitOutcome> {
    let Some(first) = exposures.first() else {
        return Ok(UnitOutcome::Skipped);
    };
    let artifact = Artifact::Native {
        group: group.clone(),
        drz: first.drizzle_suffix(),
    };
    if up_to_date(&ctx.store, &artifact, ctx.clobber())? {
        return Ok(UnitOutcome::Skipped);
    }

    let inputs: Vec<_> = exposures.iter().map(|e| ctx.staged(e)).collect();
    require_files(&inputs)?;
    let workdir = ctx.layout().epoch_dir(group.epoch);
    let config = ctx.config;

    let mut options = ctx.combine_options(OutputGrid::Native);
    options.cr_rejection = config.combine.cr_mode.at_native();

    if config.combine.intravisit_registration {
        let reg = &config.registration;
        let wcs_name = ctx.toolkit.registrar.align(&AlignRequest {
            workdir: workdir.clone(),
            images: inputs.clone(),
            anchor: AlignAnchor::Internal {
                catalog: config.reference.catalog.clone(),
            },
            wcs_name: INTRAVISIT_WCS_NAME.to_string(),
            geometry: reg.geometry(),
            detection: detection_params(reg),
            matching: matching_params(reg),
            interactive: reg.interactive,
            clobber: ctx.clobber(),
        })?;
        debug!(group = %group, wcs_name = %wcs_name, "Intra-visit registration");
        options.wcs_key = Some(wcs_name);
    }

    let cr_rejection = options.cr_rejection;
    ctx.toolkit.combiner.combine(&CombineRequest {
        workdir: workdir.clone(),
        inputs: inputs.clone(),
        output_root: artifact.output_root(&config.root),
        options,
    })?;

    if needs_hot_pixel_cleanup(&first.camera, inputs.len(), cr_rejection) {
        ctx.toolkit
            .combiner
            .clean_hot_pixels(&workdir, &inputs[0], &inputs[1])?;
    }

    info!(group = %group, exposures = inputs.len(), "Combined visit");
    Ok(UnitOutcome::Executed)
}
