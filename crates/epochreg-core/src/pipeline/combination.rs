use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::artifact::{Artifact, ArtifactStore, ProductKind};
use crate::error::Result;
use crate::exposure::FeGroup;

use super::context::RunContext;
use super::types::{StageReport, UnitOutcome};

/// Masked difference and weight map of one filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DifferenceProducts {
    pub image: PathBuf,
    pub weight: PathBuf,
}

/// Per-epoch collection of difference images awaiting a cross-filter
/// weighted average. Owned by one run of the difference stage.
#[derive(Clone, Debug, Default)]
pub struct CombinationAccumulator {
    epochs: BTreeMap<i32, BTreeMap<String, DifferenceProducts>>,
}

impl CombinationAccumulator {
    /// An accumulator with an empty slot for each of `epochs`.
    pub fn for_epochs(epochs: impl IntoIterator<Item = i32>) -> Self {
        Self {
            epochs: epochs.into_iter().map(|e| (e, BTreeMap::new())).collect(),
        }
    }

    pub fn add(&mut self, epoch: i32, filter: &str, products: DifferenceProducts) {
        self.epochs
            .entry(epoch)
            .or_default()
            .insert(filter.to_string(), products);
    }

    pub fn epochs(&self) -> impl Iterator<Item = (i32, &BTreeMap<String, DifferenceProducts>)> {
        self.epochs.iter().map(|(e, f)| (*e, f))
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.values().all(BTreeMap::is_empty)
    }
}

/// Average the accumulated difference images of each epoch into
/// `{root}_{name}_e{EE}-e{TT}_sub_{masked,wht}.fits`. Consumes the
/// accumulator; returns the composites written or kept.
pub(super) fn combine_filters(
    ctx: &RunContext<'_>,
    name: &str,
    accumulator: CombinationAccumulator,
    report: &mut StageReport,
) -> Result<Vec<PathBuf>> {
    let template_epoch = ctx.config.difference.template_epoch;
    let mut composites = Vec::new();

    for (epoch, filters) in accumulator.epochs() {
        if epoch == template_epoch {
            continue;
        }
        if filters.is_empty() {
            info!(epoch, "No difference images to combine");
            continue;
        }

        let artifact = Artifact::Difference {
            group: FeGroup::new(name, epoch),
            template_epoch,
        };
        let output = ctx.store.path_for(&artifact, ProductKind::Masked);
        let output_weight = ctx.store.path_for(&artifact, ProductKind::Weight);
        let unit = artifact.output_root(&ctx.config.root);

        if output.is_file() && output_weight.is_file() && !ctx.clobber() {
            report.record(unit, Ok(UnitOutcome::Skipped))?;
            composites.push(output);
            continue;
        }

        let images: Vec<PathBuf> = filters.values().map(|p| p.image.clone()).collect();
        let weights: Vec<PathBuf> = filters.values().map(|p| p.weight.clone()).collect();
        let result = ctx
            .toolkit
            .pixels
            .weighted_average(&images, &weights, &output, &output_weight, ctx.clobber())
            .map(|_| UnitOutcome::Executed);
        let written = result.is_ok();
        report.record(unit, result)?;
        if written {
            info!(
                epoch,
                filters = %filters.keys().cloned().collect::<Vec<_>>().join(","),
                output = %output.display(),
                "Created composite difference image"
            );
            composites.push(output);
        }
    }
    Ok(composites)
}
