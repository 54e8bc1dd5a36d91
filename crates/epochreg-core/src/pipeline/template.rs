use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::artifact::{Artifact, ArtifactStore, ProductKind};
use crate::collab::TemplateRequest;
use crate::error::Result;
use crate::exposure::{Camera, DrizzleSuffix, FeGroup};

use super::context::RunContext;
use super::helpers::require_file;

/// Science, weight and mask of a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct TemplateProducts {
    pub science: PathBuf,
    pub weight: PathBuf,
    pub mask: PathBuf,
}

impl TemplateProducts {
    fn of(ctx: &RunContext<'_>, artifact: &Artifact) -> Self {
        Self {
            science: ctx.store.path_for(artifact, ProductKind::Science),
            weight: ctx.store.path_for(artifact, ProductKind::Weight),
            mask: ctx.store.path_for(artifact, ProductKind::BadPixelMask),
        }
    }
}

/// Finds the template of each filter, synthesizing flux-scaled pseudo
/// templates at most once per run.
pub(super) struct TemplateResolver {
    template_epoch: i32,
    synthesized: BTreeMap<String, TemplateProducts>,
}

impl TemplateResolver {
    pub fn new(template_epoch: i32) -> Self {
        Self {
            template_epoch,
            synthesized: BTreeMap::new(),
        }
    }

    /// Template products for `filter`. Paths are returned whether or not
    /// they exist; only a pseudo template whose sources are missing fails,
    /// with `MissingArtifact`.
    pub fn resolve(
        &mut self,
        ctx: &RunContext<'_>,
        filter: &str,
        camera: &Camera,
        drz: DrizzleSuffix,
    ) -> Result<TemplateProducts> {
        let group = FeGroup::new(filter, self.template_epoch);
        let template_filters = &ctx.config.difference.template_filters;
        if template_filters.is_empty() {
            return Ok(TemplateProducts::of(ctx, &Artifact::Registered { group, drz }));
        }
        if let Some(products) = self.synthesized.get(filter) {
            return Ok(products.clone());
        }

        let pseudo = Artifact::Registered {
            group: group.pseudo(),
            drz,
        };
        let existing = TemplateProducts::of(ctx, &pseudo);
        if existing.science.is_file() && !ctx.clobber() {
            info!(path = %existing.science.display(), "Pseudo template exists, not clobbering");
            self.synthesized.insert(filter.to_string(), existing.clone());
            return Ok(existing);
        }

        let mut sources = Vec::with_capacity(template_filters.len());
        for source_filter in template_filters {
            let artifact = Artifact::Registered {
                group: FeGroup::new(source_filter.as_str(), self.template_epoch),
                drz,
            };
            let path = ctx.store.path_for(&artifact, ProductKind::Science);
            require_file(&path)?;
            sources.push(path);
        }
        let mut sources = sources.into_iter();
        let Some(first) = sources.next() else {
            return Ok(existing);
        };

        let target_bandpass = format!("{}-{}", camera.tag(), filter.to_uppercase());
        let workdir = ctx.layout().epoch_dir(self.template_epoch);
        let made = ctx.toolkit.templates.scaled_template(&TemplateRequest {
            workdir: workdir.clone(),
            target_bandpass: target_bandpass.clone(),
            first,
            second: sources.next(),
            output: existing.science.clone(),
            bandpass_dir: ctx.config.difference.bandpass_dir.clone(),
            clobber: ctx.clobber(),
        })?;
        info!(
            bandpass = %target_bandpass,
            sources = %template_filters.join(","),
            "Synthesized pseudo template"
        );

        let products = TemplateProducts {
            science: workdir.join(made.science),
            weight: workdir.join(made.weight),
            mask: workdir.join(made.mask),
        };
        self.synthesized.insert(filter.to_string(), products.clone());
        Ok(products)
    }
}
