use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::artifact::{Artifact, ArtifactStore, ProductKind};
use crate::error::{EpochRegError, Result};
use crate::exposure::{Camera, DrizzleSuffix, FeGroup};

use super::combination::{combine_filters, CombinationAccumulator, DifferenceProducts};
use super::config::CombinationPolicy;
use super::context::RunContext;
use super::helpers::{run_units, up_to_date};
use super::template::TemplateResolver;
use super::types::{Stage, StageReport, UnitOutcome};

/// One subtraction: a Combine-2 product (or one of its single-exposure
/// products) minus the template of its filter.
struct Subtraction {
    group: FeGroup,
    camera: Camera,
    drz: DrizzleSuffix,
    source: Artifact,
    output: Artifact,
    /// Feeds the cross-filter average.
    averaged: bool,
}

/// Difference stage: per-filter subtractions against the template epoch,
/// then the optional cross-filter composites. Returns the stage report and
/// the composites.
pub(super) fn run_difference(ctx: &RunContext<'_>) -> Result<(StageReport, Vec<PathBuf>)> {
    let template_epoch = ctx.config.difference.template_epoch;
    let policy = &ctx.config.combination;
    info!(template_epoch, "Subtracting templates");

    let units: Vec<(String, Subtraction)> = subtractions(ctx, template_epoch)
        .into_iter()
        .map(|s| (s.output.output_root(&ctx.config.root), s))
        .collect();

    let mut resolver = TemplateResolver::new(template_epoch);
    let mut accumulator = match policy {
        CombinationPolicy::Avg { .. } => Some(CombinationAccumulator::for_epochs(
            ctx.epochs().into_iter().filter(|e| *e != template_epoch),
        )),
        _ => None,
    };

    let mut report = run_units(Stage::Difference, &units, &ctx.reporter, |unit| {
        let (outcome, products) = subtract(ctx, unit, &mut resolver)?;
        if let Some(accumulator) = accumulator.as_mut().filter(|_| unit.averaged) {
            accumulator.add(unit.group.epoch, &unit.group.filter, products);
        }
        Ok(outcome)
    })?;

    let composites = match (accumulator, policy.name()) {
        (Some(accumulator), Some(name)) => combine_filters(ctx, name, accumulator, &mut report)?,
        _ => Vec::new(),
    };
    Ok((report, composites))
}

fn subtractions(ctx: &RunContext<'_>, template_epoch: i32) -> Vec<Subtraction> {
    let single = ctx.config.difference.single_subtractions;
    let policy = &ctx.config.combination;
    let mut units = Vec::new();

    for (group, exposures) in ctx.fe_groups() {
        if group.epoch == template_epoch {
            continue;
        }
        let Some(first) = exposures.first() else {
            continue;
        };
        let (camera, drz) = (first.camera.clone(), first.drizzle_suffix());
        let averaged = policy.is_averaged(&group.filter);

        units.push(Subtraction {
            group: group.clone(),
            camera: camera.clone(),
            drz,
            source: Artifact::Registered {
                group: group.clone(),
                drz,
            },
            output: Artifact::Difference {
                group: group.clone(),
                template_epoch,
            },
            averaged,
        });
        if !single {
            continue;
        }
        for exposure in &exposures {
            units.push(Subtraction {
                group: group.clone(),
                camera: camera.clone(),
                drz,
                source: Artifact::Single {
                    group: group.clone(),
                    rootname: exposure.rootname.clone(),
                },
                output: Artifact::SingleDifference {
                    group: group.clone(),
                    template_epoch,
                    rootname: exposure.rootname.clone(),
                },
                averaged: false,
            });
        }
    }
    units
}

/// Run one subtraction. Returns the masked difference and its weight,
/// whether written now or kept from an earlier run.
fn subtract(
    ctx: &RunContext<'_>,
    unit: &Subtraction,
    resolver: &mut TemplateResolver,
) -> Result<(UnitOutcome, DifferenceProducts)> {
    let template = resolver.resolve(ctx, &unit.group.filter, &unit.camera, unit.drz)?;
    let science = ctx.store.path_for(&unit.source, ProductKind::Science);

    let missing: Vec<String> = [&science, &template.science]
        .into_iter()
        .filter(|p| !p.is_file())
        .map(|p| p.display().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EpochRegError::MissingInput(format!(
            "cannot subtract, missing {}",
            missing.join(", ")
        )));
    }

    let masked = ctx.store.path_for(&unit.output, ProductKind::Masked);
    let weight = ctx.store.path_for(&unit.output, ProductKind::Weight);
    let products = DifferenceProducts {
        image: masked.clone(),
        weight: weight.clone(),
    };
    if up_to_date(&ctx.store, &unit.output, ctx.clobber())? {
        return Ok((UnitOutcome::Skipped, products));
    }

    let clobber = ctx.clobber();
    let pixels = &ctx.toolkit.pixels;
    let unmasked = ctx.store.path_for(&unit.output, ProductKind::Science);
    let mask = ctx.store.path_for(&unit.output, ProductKind::BadPixelMask);

    pixels.subtract(&science, &template.science, &unmasked, clobber)?;
    pixels.combine_weights(
        &ctx.store.path_for(&unit.source, ProductKind::Weight),
        &template.weight,
        &weight,
        clobber,
    )?;
    pixels.union_mask(
        &template.mask,
        &ctx.store.path_for(&unit.source, ProductKind::BadPixelMask),
        &mask,
        clobber,
    )?;
    pixels.apply_mask(&unmasked, &mask, &masked, clobber)?;

    if ctx.config.clean > 0 && unmasked.is_file() {
        fs::remove_file(&unmasked)?;
        debug!(path = %unmasked.display(), "Removed unmasked difference");
    }
    info!(output = %masked.display(), "Created difference image");
    Ok((UnitOutcome::Executed, products))
}
