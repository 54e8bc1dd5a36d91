use tracing::info;

use crate::artifact::Artifact;
use crate::collab::CombineRequest;
use crate::error::Result;
use crate::exposure::{Exposure, FeGroup, SkyCoord};

use super::context::RunContext;
use super::helpers::{
    needs_hot_pixel_cleanup, registered_combine_type, require_files, run_units, up_to_date,
};
use super::types::{Stage, StageReport, UnitOutcome};

/// Combine-2: one registered-grid combination per filter and epoch, over
/// every visit of the group.
pub(super) fn run_registered(ctx: &RunContext<'_>) -> Result<StageReport> {
    let center = ctx.output_center()?;
    if let Some(center) = center {
        info!(center = %center, "Output grid centre");
    }

    let units: Vec<(String, (FeGroup, Vec<Exposure>))> = ctx
        .fe_groups()
        .into_iter()
        .map(|(group, exposures)| (group.to_string(), (group, exposures)))
        .collect();

    run_units(Stage::Registered, &units, &ctx.reporter, |(group, exposures)| {
        combine_epoch(ctx, group, exposures, center)
    })
}

fn combine_epoch(
    ctx: &RunContext<'_>,
    group: &FeGroup,
    exposures: &[Exposure],
    center: Option<SkyCoord>,
) -> Result<UnitOutcome> {
    let Some(first) = exposures.first() else {
        return Ok(UnitOutcome::Skipped);
    };
    let artifact = Artifact::Registered {
        group: group.clone(),
        drz: first.drizzle_suffix(),
    };
    if up_to_date(&ctx.store, &artifact, ctx.clobber())? {
        return Ok(UnitOutcome::Skipped);
    }

    let inputs: Vec<_> = exposures.iter().map(|e| ctx.staged(e)).collect();
    require_files(&inputs)?;
    let config = ctx.config;
    let combine_type = registered_combine_type(&first.camera, config.single_star, inputs.len());

    let mut options = ctx.combine_options(ctx.registered_grid(center));
    options.combine_type = Some(combine_type);
    options.cr_rejection = config.combine.cr_mode.at_registered();
    options.single_products = config.combine.single_products;

    let mut request = CombineRequest {
        workdir: ctx.layout().epoch_dir(group.epoch),
        inputs,
        output_root: artifact.output_root(&config.root),
        options,
    };
    ctx.toolkit.combiner.combine(&request)?;

    if needs_hot_pixel_cleanup(&first.camera, request.inputs.len(), request.options.cr_rejection) {
        ctx.toolkit.combiner.clean_hot_pixels(
            &request.workdir,
            &request.inputs[0],
            &request.inputs[1],
        )?;
        request.options.cr_rejection = false;
        request.options.clobber = true;
        ctx.toolkit.combiner.combine(&request)?;
    }

    info!(
        group = %group,
        exposures = request.inputs.len(),
        combine_type = %combine_type,
        "Combined epoch"
    );
    Ok(UnitOutcome::Executed)
}
