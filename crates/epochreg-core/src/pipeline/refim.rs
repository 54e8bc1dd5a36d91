use std::fs;

use tracing::info;

use crate::artifact::{Artifact, ArtifactStore};
use crate::collab::{AlignAnchor, AlignRequest, CombineRequest, OutputGrid};
use crate::error::{EpochRegError, Result};
use crate::exposure::DrizzleSuffix;
use crate::reference::{select_reference, ReferenceFrame, ReferenceSource};

use super::context::{file_name, RunContext};
use super::helpers::{detection_params, matching_params};
use super::register::solution_name;
use super::types::{Stage, StageReport};

/// Build the WCS reference image, or adopt the one that already exists.
pub(super) fn run_reference(ctx: &RunContext<'_>) -> Result<(StageReport, ReferenceFrame)> {
    ctx.reporter.begin_stage(Stage::Reference, Some(1));
    let mut report = StageReport::default();
    let frame = build_or_adopt(ctx, &mut report)?;
    ctx.reporter.advance(1);
    ctx.reporter.finish_stage();
    info!(image = %frame.image.display(), source = %frame.source, "Reference frame ready");
    Ok((report, frame))
}

/// The reference frame later stages use when this stage does not run.
pub(super) fn existing_reference(ctx: &RunContext<'_>) -> ReferenceFrame {
    let source = if ctx.config.reference.image.is_some() {
        ReferenceSource::UserSupplied
    } else {
        ReferenceSource::Existing
    };
    ReferenceFrame {
        image: ctx.reference_image(),
        source,
        catalog: ctx.config.reference.catalog.clone(),
    }
}

fn build_or_adopt(ctx: &RunContext<'_>, report: &mut StageReport) -> Result<ReferenceFrame> {
    let catalog = ctx.config.reference.catalog.clone();
    if let Some(image) = &ctx.config.reference.image {
        report.skipped.push(file_name(image));
        return Ok(existing_reference(ctx));
    }

    let overrides = ctx.config.reference.overrides();
    let current = ctx.layout().default_reference_image();
    if current.is_file() {
        if ctx.clobber() && overrides.any() {
            for drz in [DrizzleSuffix::Drz, DrizzleSuffix::Drc] {
                ctx.store.invalidate(&Artifact::Reference { drz })?;
            }
        } else {
            if ctx.clobber() {
                info!("Give a reference epoch, filter or visit to rebuild the reference image");
            }
            info!(path = %current.display(), "Reference image exists, not clobbering");
            report.skipped.push(file_name(&current));
            return Ok(ReferenceFrame {
                image: current,
                source: ReferenceSource::Existing,
                catalog,
            });
        }
    }

    let choice = select_reference(&ctx.working, &ctx.all, &overrides)?;
    info!(
        epoch = choice.epoch,
        filter = %choice.filter,
        visit = %choice.visit,
        exposures = choice.exposures.len(),
        "Building reference image"
    );

    let dir = ctx.layout().reference_dir();
    fs::create_dir_all(&dir)?;
    let mut inputs = Vec::with_capacity(choice.exposures.len());
    for exposure in &choice.exposures {
        if !exposure.path.is_file() {
            return Err(EpochRegError::MissingInput(format!(
                "exposure {} not found",
                exposure.path.display()
            )));
        }
        let dest = dir.join(&exposure.filename);
        fs::copy(&exposure.path, &dest)?;
        inputs.push(dest);
    }

    let artifact = Artifact::Reference {
        drz: choice.exposures[0].drizzle_suffix(),
    };
    let mut options = ctx.combine_options(OutputGrid::Native);
    options.cr_rejection = ctx.config.combine.cr_mode.at_native();
    let output = ctx.toolkit.combiner.combine(&CombineRequest {
        workdir: dir.clone(),
        inputs,
        output_root: artifact.output_root(&ctx.config.root),
        options,
    })?;
    let image = dir.join(&output.science);

    if let Some(catalog) = &catalog {
        let reg = &ctx.config.registration;
        let anchor = AlignAnchor::Catalog {
            catalog: catalog.clone(),
        };
        let wcs_name = ctx.toolkit.registrar.align(&AlignRequest {
            workdir: dir.clone(),
            images: vec![image.clone()],
            wcs_name: solution_name(&anchor),
            anchor,
            geometry: reg.geometry(),
            detection: detection_params(reg),
            matching: matching_params(reg),
            interactive: reg.interactive,
            clobber: ctx.clobber(),
        })?;
        info!(wcs_name = %wcs_name, "Registered reference image to catalog");
    }

    report.executed.push(file_name(&image));
    Ok(ReferenceFrame {
        image,
        source: ReferenceSource::Built {
            epoch: choice.epoch,
            filter: choice.filter,
            visit: choice.visit,
        },
        catalog,
    })
}

/// Build a source catalog from the reference image when only a bright
/// source count was given.
pub(super) fn attach_source_catalog(ctx: &RunContext<'_>, frame: &mut ReferenceFrame) -> Result<()> {
    if frame.catalog.is_some()
        || ctx.config.single_star
        || ctx.config.registration.ref_nbright.is_none()
    {
        return Ok(());
    }
    if !frame.image.is_file() {
        return Err(EpochRegError::MissingReference(frame.image.clone()));
    }
    let workdir = frame
        .image
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| ctx.layout().reference_dir());
    let catalog = ctx.toolkit.registrar.source_catalog(
        &workdir,
        &frame.image,
        &detection_params(&ctx.config.registration),
    )?;
    info!(catalog = %catalog.display(), "Built reference source catalog");
    frame.catalog = Some(catalog);
    Ok(())
}
