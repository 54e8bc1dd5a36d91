use std::sync::Arc;

use tracing::{info, warn};

use crate::artifact::{FsArtifactStore, WorkspaceLayout};
use crate::catalog::{load_or_build, working_set};
use crate::collab::Toolkit;
use crate::error::{EpochRegError, Result};

use super::config::PipelineConfig;
use super::context::RunContext;
use super::difference::run_difference;
use super::native::run_native;
use super::refim::{attach_source_catalog, existing_reference, run_reference};
use super::register::run_register;
use super::registered::run_registered;
use super::setup::run_setup;
use super::stack::run_stack;
use super::types::{NoOpReporter, ProgressReporter, RunSummary, Stage};

/// Collaborators are handed absolute paths only; relative paths in the
/// configuration are resolved against the current directory once.
fn absolutize(config: &mut PipelineConfig) -> Result<()> {
    let cwd = std::env::current_dir()?;
    config.top_dir = cwd.join(&config.top_dir);
    config.difference.bandpass_dir = cwd.join(&config.difference.bandpass_dir);
    for path in [
        &mut config.reference.image,
        &mut config.reference.catalog,
        &mut config.epochs.epoch_list,
    ]
    .into_iter()
    .flatten()
    {
        *path = cwd.join(&*path);
    }
    Ok(())
}

/// Run the enabled stages in order with a thread-safe progress reporter.
///
/// Configuration problems and a missing user reference image are reported
/// before any stage starts. Unit-local failures are collected in the
/// returned summary; anything else stops the run.
pub fn run_pipeline_reported(
    config: &PipelineConfig,
    toolkit: &Toolkit,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<RunSummary> {
    let mut config = config.clone();
    config.prepare()?;
    absolutize(&mut config)?;

    if let Some(image) = &config.reference.image {
        if !image.is_file() {
            return Err(EpochRegError::MissingReference(image.clone()));
        }
    }
    if let Some(catalog) = &config.reference.catalog {
        if !catalog.is_file() {
            return Err(EpochRegError::MissingInput(format!(
                "reference catalog {} not found",
                catalog.display()
            )));
        }
    }
    if !config.stages.any() {
        warn!("No stages selected");
    }

    let layout = WorkspaceLayout::new(&config.top_dir, &config.root);
    let epoch_list = config
        .epochs
        .epoch_list
        .clone()
        .unwrap_or_else(|| layout.epoch_list());
    let target = config.epochs.target_filter(config.target);
    let all = load_or_build(
        &layout.input_dir(),
        &epoch_list,
        &config.epochs.window(),
        target.as_ref(),
        config.clobber,
        toolkit.headers.as_ref(),
    )?;
    let working = working_set(&all, &config.only_filters, &config.only_epochs);
    info!(
        root = %config.root,
        catalogued = all.len(),
        working = working.len(),
        "Exposure catalog ready"
    );

    let mut ctx = RunContext {
        config: &config,
        toolkit,
        store: FsArtifactStore::new(layout),
        all,
        working,
        reference: None,
        reporter,
    };
    let mut summary = RunSummary {
        exposures: ctx.working.len(),
        epochs: ctx.epochs(),
        ..RunSummary::default()
    };
    let stages = config.stages;

    if stages.enabled(Stage::Setup) {
        summary.stages.push((Stage::Setup, run_setup(&ctx)?));
    }

    let mut frame = if stages.enabled(Stage::Reference) && !config.single_star {
        let (report, frame) = run_reference(&ctx)?;
        summary.stages.push((Stage::Reference, report));
        frame
    } else {
        existing_reference(&ctx)
    };
    if !config.single_star && (frame.image.is_file() || stages.enabled(Stage::Register)) {
        attach_source_catalog(&ctx, &mut frame)?;
    }
    ctx.reference = Some(frame);

    if stages.enabled(Stage::Native) {
        summary.stages.push((Stage::Native, run_native(&ctx)?));
    }
    if stages.enabled(Stage::Register) {
        summary.stages.push((Stage::Register, run_register(&ctx)?));
    }
    if stages.enabled(Stage::Registered) {
        summary.stages.push((Stage::Registered, run_registered(&ctx)?));
    }
    if stages.enabled(Stage::Difference) {
        let (report, composites) = run_difference(&ctx)?;
        summary.stages.push((Stage::Difference, report));
        summary.composites = composites;
    }
    if stages.enabled(Stage::Stack) {
        summary.stages.push((Stage::Stack, run_stack(&ctx)?));
    }

    summary.reference = ctx.reference.take();
    info!(
        stages = summary.stages.len(),
        failed = summary.failed_units(),
        "Run complete"
    );
    Ok(summary)
}

/// Run the enabled stages without progress reporting.
pub fn run_pipeline(config: &PipelineConfig, toolkit: &Toolkit) -> Result<RunSummary> {
    let reporter = Arc::new(NoOpReporter);
    run_pipeline_reported(config, toolkit, reporter)
}
