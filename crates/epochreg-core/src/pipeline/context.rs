use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::{ArtifactStore, FsArtifactStore, WorkspaceLayout};
use crate::collab::{CombineOptions, OutputGrid, Toolkit};
use crate::error::Result;
use crate::exposure::{Exposure, FeGroup, FevGroup, SkyCoord};
use crate::reference::ReferenceFrame;

use super::config::PipelineConfig;
use super::types::ProgressReporter;

/// State shared by the stages of one run.
pub(super) struct RunContext<'a> {
    pub config: &'a PipelineConfig,
    pub toolkit: &'a Toolkit,
    pub store: FsArtifactStore,
    /// Every catalogued exposure.
    pub all: Vec<Exposure>,
    /// Active exposures left after the filter/epoch restrictions.
    pub working: Vec<Exposure>,
    pub reference: Option<ReferenceFrame>,
    pub reporter: Arc<dyn ProgressReporter>,
}

impl RunContext<'_> {
    pub fn layout(&self) -> &WorkspaceLayout {
        self.store.layout()
    }

    pub fn clobber(&self) -> bool {
        self.config.clobbering()
    }

    /// Copy of `exposure` inside its epoch directory.
    pub fn staged(&self, exposure: &Exposure) -> PathBuf {
        self.layout()
            .epoch_dir(exposure.epoch)
            .join(&exposure.filename)
    }

    /// Working exposures by (filter, epoch, visit), native filters.
    pub fn fev_groups(&self) -> BTreeMap<FevGroup, Vec<Exposure>> {
        let mut groups: BTreeMap<FevGroup, Vec<Exposure>> = BTreeMap::new();
        for e in &self.working {
            groups.entry(e.fev_group()).or_default().push(e.clone());
        }
        groups
    }

    /// Group filter of `exposure` under the combination policy.
    pub fn group_filter(&self, exposure: &Exposure) -> String {
        self.config
            .combination
            .group_filter(&exposure.filter)
            .to_string()
    }

    /// Working exposures by (group filter, epoch).
    pub fn fe_groups(&self) -> BTreeMap<FeGroup, Vec<Exposure>> {
        let mut groups: BTreeMap<FeGroup, Vec<Exposure>> = BTreeMap::new();
        for e in &self.working {
            let key = FeGroup::new(self.group_filter(e), e.epoch);
            groups.entry(key).or_default().push(e.clone());
        }
        groups
    }

    /// Sorted distinct epochs of the working set.
    pub fn epochs(&self) -> Vec<i32> {
        crate::catalog::epochs_present(&self.working)
    }

    /// Sorted distinct group filters of the working set.
    pub fn group_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.working.iter().map(|e| self.group_filter(e)).collect();
        filters.sort();
        filters.dedup();
        filters
    }

    /// Combination settings shared by every stage; callers set the
    /// combine type, rejection and extra products.
    pub fn combine_options(&self, grid: OutputGrid) -> CombineOptions {
        let combine = &self.config.combine;
        CombineOptions {
            grid,
            pixel_scale: combine.pixel_scale,
            pixel_fraction: combine.pixel_fraction,
            weight_type: combine.weight_type,
            combine_type: None,
            cr_rejection: false,
            clear_cr_flags: combine.cr_mode.clears_flags(),
            cr_snr: combine.cr_snr,
            single_products: false,
            wcs_key: None,
            clean: self.config.clean > 0,
            clobber: self.clobber(),
        }
    }

    /// The common north-up grid of Combine-2 and Stack.
    pub fn registered_grid(&self, center: Option<SkyCoord>) -> OutputGrid {
        let combine = &self.config.combine;
        OutputGrid::Registered {
            center,
            rotation_deg: combine.rotation_deg,
            size_arcsec: combine.image_size_arcsec,
            naxis: combine.naxis,
        }
    }

    /// Reference image path: the user's, else the default location.
    pub fn reference_image(&self) -> PathBuf {
        match &self.reference {
            Some(frame) => frame.image.clone(),
            None => self
                .config
                .reference
                .image
                .clone()
                .unwrap_or_else(|| self.layout().default_reference_image()),
        }
    }

    /// Centre of the registered output grid: the user's target, else the
    /// reference pixel of the reference image when it exists.
    pub fn output_center(&self) -> Result<Option<SkyCoord>> {
        if let Some(target) = self.config.target {
            return Ok(Some(target));
        }
        let image = self.reference_image();
        if !image.is_file() {
            return Ok(None);
        }
        let header = self.toolkit.headers.read_header(&image)?;
        Ok(match (header.get_f64("CRVAL1"), header.get_f64("CRVAL2")) {
            (Some(ra), Some(dec)) => Some(SkyCoord::new(ra, dec)),
            _ => None,
        })
    }
}

pub(super) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
