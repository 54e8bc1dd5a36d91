use std::collections::BTreeMap;
use std::fs;

use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactStore, ProductKind};
use crate::catalog::working_set;
use crate::collab::CombineRequest;
use crate::error::Result;
use crate::exposure::{Exposure, SkyCoord};

use super::context::RunContext;
use super::helpers::{require_files, run_units, stack_combine_type, up_to_date};
use super::template::TemplateResolver;
use super::types::{Stage, StageReport, UnitOutcome};

/// Epochs a stack combines: the configured ones (within the epoch
/// restriction, when set), else the epoch restriction, else every working
/// epoch. The template epoch only takes part when asked for.
pub(super) fn stack_epochs(ctx: &RunContext<'_>) -> Vec<i32> {
    let config = ctx.config;
    let template_epoch = config.difference.template_epoch;
    let explicit = &config.stack.epochs;
    let mut epochs = if !explicit.is_empty() {
        let mut epochs = explicit.clone();
        if !config.only_epochs.is_empty() {
            epochs.retain(|e| config.only_epochs.contains(e));
        }
        epochs
    } else if !config.only_epochs.is_empty() {
        config.only_epochs.clone()
    } else {
        ctx.epochs()
    };
    let keep_template = config.stack.include_template || explicit.contains(&template_epoch);
    epochs.retain(|e| keep_template || *e != template_epoch);
    epochs.sort_unstable();
    epochs.dedup();
    epochs
}

/// Stack: one multi-epoch combination per filter on the registered grid,
/// then its difference against the template when one exists.
pub(super) fn run_stack(ctx: &RunContext<'_>) -> Result<StageReport> {
    let epochs = stack_epochs(ctx);
    info!(epochs = ?epochs, "Stacking epochs");
    let center = ctx.output_center()?;

    let mut groups: BTreeMap<String, Vec<Exposure>> = BTreeMap::new();
    for exposure in working_set(&ctx.all, &ctx.config.only_filters, &epochs) {
        groups
            .entry(ctx.group_filter(&exposure))
            .or_default()
            .push(exposure);
    }
    for filter in ctx.group_filters() {
        if !groups.contains_key(&filter) {
            warn!(filter = %filter, epochs = ?epochs, "No exposures to stack");
        }
    }

    let units: Vec<(String, (String, Vec<Exposure>))> = groups
        .into_iter()
        .map(|(filter, exposures)| {
            let name = Artifact::Stack {
                filter: filter.clone(),
            }
            .output_root(&ctx.config.root);
            (name, (filter, exposures))
        })
        .collect();

    let mut resolver = TemplateResolver::new(ctx.config.difference.template_epoch);
    run_units(Stage::Stack, &units, &ctx.reporter, |(filter, exposures)| {
        let outcome = stack_filter(ctx, filter, exposures, center)?;
        subtract_template(ctx, filter, exposures, &mut resolver)?;
        Ok(outcome)
    })
}

fn stack_filter(
    ctx: &RunContext<'_>,
    filter: &str,
    exposures: &[Exposure],
    center: Option<SkyCoord>,
) -> Result<UnitOutcome> {
    let artifact = Artifact::Stack {
        filter: filter.to_string(),
    };
    if up_to_date(&ctx.store, &artifact, ctx.clobber())? {
        return Ok(UnitOutcome::Skipped);
    }

    let registered: Vec<_> = exposures.iter().map(|e| ctx.staged(e)).collect();
    require_files(&registered)?;

    let dir = ctx.layout().stack_dir();
    fs::create_dir_all(&dir)?;
    let mut inputs = Vec::with_capacity(registered.len());
    for (source, exposure) in registered.iter().zip(exposures) {
        let dest = dir.join(&exposure.filename);
        if ctx.clobber() || !dest.is_file() {
            fs::copy(source, &dest)?;
        }
        inputs.push(dest);
    }

    let config = ctx.config;
    let combine_type = stack_combine_type(config.single_star, inputs.len());
    let mut options = ctx.combine_options(ctx.registered_grid(center));
    options.combine_type = Some(combine_type);
    options.cr_rejection = config.combine.cr_mode.at_native();
    options.pixel_scale = config.stack.pixel_scale.or(config.combine.pixel_scale);
    options.pixel_fraction = config.stack.pixel_fraction.or(config.combine.pixel_fraction);

    let exposure_count = inputs.len();
    ctx.toolkit.combiner.combine(&CombineRequest {
        workdir: dir,
        inputs,
        output_root: artifact.output_root(&config.root),
        options,
    })?;
    info!(
        filter,
        exposures = exposure_count,
        combine_type = %combine_type,
        "Stacked filter"
    );
    Ok(UnitOutcome::Executed)
}

/// Subtract the template from a finished stack. Nothing happens when the
/// stack or the template is absent.
fn subtract_template(
    ctx: &RunContext<'_>,
    filter: &str,
    exposures: &[Exposure],
    resolver: &mut TemplateResolver,
) -> Result<()> {
    let Some(first) = exposures.first() else {
        return Ok(());
    };
    let stack = ctx.store.path_for(
        &Artifact::Stack {
            filter: filter.to_string(),
        },
        ProductKind::Science,
    );
    let template = resolver.resolve(ctx, filter, &first.camera, first.drizzle_suffix())?;
    if !stack.is_file() || !template.science.is_file() {
        info!(filter, template = %template.science.display(), "No template for stack difference");
        return Ok(());
    }

    let artifact = Artifact::StackDifference {
        filter: filter.to_string(),
        template_epoch: ctx.config.difference.template_epoch,
    };
    if up_to_date(&ctx.store, &artifact, ctx.clobber())? {
        return Ok(());
    }
    let output = ctx.store.path_for(&artifact, ProductKind::Science);
    ctx.toolkit
        .pixels
        .subtract(&stack, &template.science, &output, ctx.clobber())?;
    info!(output = %output.display(), "Created stack difference");
    Ok(())
}
