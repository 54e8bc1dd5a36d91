use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::EpochConfig;
use crate::collab::{FitGeometry, ToolsConfig, WeightType};
use crate::consts::{
    DEFAULT_BANDPASS_DIR, DEFAULT_CR_SNR, DEFAULT_SEARCH_RADIUS_ARCSEC, ROTSCALE_MIN_OBJECTS,
    SINGLE_STAR_MAX_THRESHOLD, SINGLE_STAR_SEARCH_RADIUS_ARCSEC,
};
use crate::error::{EpochRegError, Result};
use crate::exposure::{normalize_filter, SkyCoord};
use crate::reference::ReferenceOverrides;

use super::types::Stage;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root name: inputs live in `{root}.flt/`, products are `{root}_*`.
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_top_dir")]
    pub top_dir: PathBuf,
    #[serde(default)]
    pub stages: StageSelection,
    /// 0 = never overwrite, 1 = regenerate the units that run, >1 also
    /// rewrites the epoch list.
    #[serde(default)]
    pub clobber: u8,
    /// 0 keeps intermediate products; >0 removes the unmasked difference.
    #[serde(default = "default_clean")]
    pub clean: u8,
    #[serde(default)]
    pub only_filters: Vec<String>,
    #[serde(default)]
    pub only_epochs: Vec<i32>,
    /// Register on one bright star at `target` instead of a reference image.
    #[serde(default)]
    pub single_star: bool,
    #[serde(default)]
    pub target: Option<SkyCoord>,
    #[serde(default)]
    pub epochs: EpochConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub combine: CombineConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub difference: DifferenceConfig,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub combination: CombinationPolicy,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_top_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_clean() -> u8 {
    1
}

/// Which stages run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSelection {
    pub setup: bool,
    pub reference: bool,
    pub native: bool,
    pub register: bool,
    pub registered: bool,
    pub difference: bool,
    pub stack: bool,
}

impl StageSelection {
    /// Every stage except the multi-epoch stack.
    pub fn all() -> Self {
        Self {
            setup: true,
            reference: true,
            native: true,
            register: true,
            registered: true,
            difference: true,
            stack: false,
        }
    }

    pub fn enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::Setup => self.setup,
            Stage::Reference => self.reference,
            Stage::Native => self.native,
            Stage::Register => self.register,
            Stage::Registered => self.registered,
            Stage::Difference => self.difference,
            Stage::Stack => self.stack,
        }
    }

    pub fn any(&self) -> bool {
        Stage::ALL.iter().any(|&stage| self.enabled(stage))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Use this image instead of building one.
    pub image: Option<PathBuf>,
    pub epoch: Option<i32>,
    pub filter: Option<String>,
    pub visit: Option<String>,
    /// Astrometric catalog to register the reference image to.
    pub catalog: Option<PathBuf>,
}

impl ReferenceConfig {
    pub fn overrides(&self) -> ReferenceOverrides {
        ReferenceOverrides {
            epoch: self.epoch,
            filter: self.filter.clone(),
            visit: self.visit.clone(),
        }
    }
}

/// Where cosmic-ray rejection runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum CrMode {
    /// Clear existing flags and do not reject.
    ClearFlags,
    /// Keep existing flags, no new rejection.
    KeepExisting,
    /// Reject within each visit (Combine-1) and in stacks.
    #[default]
    WithinVisit,
    /// Also reject across visits at Combine-2.
    MultiVisit,
}

impl CrMode {
    pub fn at_native(&self) -> bool {
        matches!(self, Self::WithinVisit | Self::MultiVisit)
    }

    pub fn at_registered(&self) -> bool {
        matches!(self, Self::MultiVisit)
    }

    pub fn clears_flags(&self) -> bool {
        matches!(self, Self::ClearFlags)
    }
}

impl TryFrom<i8> for CrMode {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::ClearFlags),
            0 => Ok(Self::KeepExisting),
            1 => Ok(Self::WithinVisit),
            2 => Ok(Self::MultiVisit),
            other => Err(format!("cosmic-ray mode must be -1, 0, 1 or 2, got {other}")),
        }
    }
}

impl From<CrMode> for i8 {
    fn from(mode: CrMode) -> Self {
        match mode {
            CrMode::ClearFlags => -1,
            CrMode::KeepExisting => 0,
            CrMode::WithinVisit => 1,
            CrMode::MultiVisit => 2,
        }
    }
}

impl fmt::Display for CrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i8::from(*self))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    pub cr_mode: CrMode,
    pub cr_snr: [f64; 2],
    /// Output pixel scale in arcsec; combiner default if unset.
    pub pixel_scale: Option<f64>,
    pub pixel_fraction: Option<f64>,
    pub weight_type: WeightType,
    /// Output rotation, degrees east of north.
    pub rotation_deg: f64,
    pub image_size_arcsec: Option<f64>,
    pub naxis: Option<[u32; 2]>,
    /// Write single-exposure products at Combine-2.
    pub single_products: bool,
    /// Align the exposures of each visit among themselves before Combine-1.
    pub intravisit_registration: bool,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            cr_mode: CrMode::default(),
            cr_snr: DEFAULT_CR_SNR,
            pixel_scale: None,
            pixel_fraction: None,
            weight_type: WeightType::default(),
            rotation_deg: 0.0,
            image_size_arcsec: None,
            naxis: None,
            single_products: false,
            intravisit_registration: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Source detection threshold in sigma.
    pub threshold: f64,
    pub peak_min: Option<f64>,
    pub peak_max: Option<f64>,
    pub search_radius_arcsec: f64,
    /// Minimum number of matched objects for a fit.
    pub min_objects: u32,
    /// Use only the N brightest detected sources.
    pub nbright: Option<u32>,
    /// Use only the N brightest reference sources; builds a source catalog
    /// from the reference image when no catalog is given.
    pub ref_nbright: Option<u32>,
    pub ref_flux_min: Option<f64>,
    pub ref_flux_max: Option<f64>,
    pub nclip: u32,
    pub sigma_clip: f64,
    /// Fit shifts only instead of rotation and scale.
    pub shift_only: bool,
    pub interactive: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            peak_min: None,
            peak_max: None,
            search_radius_arcsec: DEFAULT_SEARCH_RADIUS_ARCSEC,
            min_objects: 10,
            nbright: None,
            ref_nbright: None,
            ref_flux_min: None,
            ref_flux_max: None,
            nclip: 3,
            sigma_clip: 3.0,
            shift_only: false,
            interactive: false,
        }
    }
}

impl RegistrationConfig {
    pub fn geometry(&self) -> FitGeometry {
        if self.shift_only {
            FitGeometry::Shift
        } else {
            FitGeometry::RotScale
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferenceConfig {
    /// Epoch whose Combine-2 products serve as templates.
    pub template_epoch: i32,
    /// Up to two filters of the template epoch to synthesize a
    /// flux-scaled pseudo template from.
    pub template_filters: Vec<String>,
    /// Also subtract every single-exposure product.
    pub single_subtractions: bool,
    /// Bandpass curves for template scaling.
    pub bandpass_dir: PathBuf,
}

impl Default for DifferenceConfig {
    fn default() -> Self {
        Self {
            template_epoch: 0,
            template_filters: Vec::new(),
            single_subtractions: false,
            bandpass_dir: PathBuf::from(DEFAULT_BANDPASS_DIR),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Epochs to stack; the working epochs if empty.
    pub epochs: Vec<i32>,
    /// Include the template epoch.
    pub include_template: bool,
    pub pixel_scale: Option<f64>,
    pub pixel_fraction: Option<f64>,
}

/// How difference images of several filters are combined.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CombinationPolicy {
    #[default]
    None,
    /// Weighted average of the per-filter difference images.
    Avg { name: String, filters: Vec<String> },
    /// Combine the member filters' exposures under one synthetic filter.
    Driz { name: String, filters: Vec<String> },
}

/// Method named on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinationMethod {
    Avg,
    Driz,
}

impl CombinationPolicy {
    /// Build from separately supplied parts. A filter list needs both a
    /// name and a method.
    pub fn from_parts(
        filters: &[String],
        name: Option<&str>,
        method: Option<CombinationMethod>,
    ) -> Result<Self> {
        if filters.is_empty() {
            return Ok(Self::None);
        }
        let (Some(name), Some(method)) = (name, method) else {
            return Err(EpochRegError::Configuration(
                "combining filters needs both a combination name and a method (avg or driz)"
                    .into(),
            ));
        };
        let name = name.to_string();
        let filters = filters.iter().map(|f| normalize_filter(f)).collect();
        Ok(match method {
            CombinationMethod::Avg => Self::Avg { name, filters },
            CombinationMethod::Driz => Self::Driz { name, filters },
        })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Avg { name, .. } | Self::Driz { name, .. } => Some(name),
        }
    }

    pub fn filters(&self) -> &[String] {
        match self {
            Self::None => &[],
            Self::Avg { filters, .. } | Self::Driz { filters, .. } => filters,
        }
    }

    /// Filter a Combine-2, difference or stack group is keyed by.
    pub fn group_filter<'a>(&'a self, filter: &'a str) -> &'a str {
        match self {
            Self::Driz { name, filters } if filters.iter().any(|f| f == filter) => name,
            _ => filter,
        }
    }

    pub fn is_averaged(&self, filter: &str) -> bool {
        matches!(self, Self::Avg { filters, .. } if filters.iter().any(|f| f == filter))
    }

    fn validate(&self) -> Result<()> {
        if let Self::Avg { name, filters } | Self::Driz { name, filters } = self {
            if name.trim().is_empty() || filters.is_empty() {
                return Err(EpochRegError::Configuration(
                    "a filter combination needs a name and at least one filter".into(),
                ));
            }
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            top_dir: default_top_dir(),
            stages: StageSelection::default(),
            clobber: 0,
            clean: default_clean(),
            only_filters: Vec::new(),
            only_epochs: Vec::new(),
            single_star: false,
            target: None,
            epochs: EpochConfig::default(),
            reference: ReferenceConfig::default(),
            combine: CombineConfig::default(),
            registration: RegistrationConfig::default(),
            difference: DifferenceConfig::default(),
            stack: StackConfig::default(),
            combination: CombinationPolicy::default(),
            tools: ToolsConfig::default(),
        }
    }

    pub fn clobbering(&self) -> bool {
        self.clobber > 0
    }

    /// Normalize names, apply single-star defaults, then reject
    /// incompatible settings. Runs before any stage.
    pub fn prepare(&mut self) -> Result<()> {
        self.normalize();
        self.validate()
    }

    fn normalize(&mut self) {
        for filter in &mut self.only_filters {
            *filter = normalize_filter(filter);
        }
        if let CombinationPolicy::Driz { name, .. } = &self.combination {
            if !self.only_filters.is_empty() && !self.only_filters.contains(name) {
                self.only_filters.push(name.clone());
            }
        }
        for filter in &mut self.difference.template_filters {
            *filter = normalize_filter(filter);
        }
        if self.difference.single_subtractions {
            self.combine.single_products = true;
        }

        if self.single_star {
            let reg = &mut self.registration;
            if reg.search_radius_arcsec <= 0.0 {
                warn!(
                    search_radius_arcsec = SINGLE_STAR_SEARCH_RADIUS_ARCSEC,
                    "Single-star mode: widening the search radius"
                );
                reg.search_radius_arcsec = SINGLE_STAR_SEARCH_RADIUS_ARCSEC;
            }
            if reg.threshold > SINGLE_STAR_MAX_THRESHOLD {
                warn!(
                    threshold = SINGLE_STAR_MAX_THRESHOLD,
                    "Single-star mode: lowering the detection threshold"
                );
                reg.threshold = SINGLE_STAR_MAX_THRESHOLD;
            }
            if self.combine.weight_type == WeightType::Err {
                warn!("Single-star mode: using EXP weights instead of ERR");
                self.combine.weight_type = WeightType::Exp;
            }
            if self.combine.cr_mode == CrMode::WithinVisit {
                warn!("Single-star mode: forcing multi-visit cosmic-ray rejection");
                self.combine.cr_mode = CrMode::MultiVisit;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let reg = &self.registration;
        if let Some(nbright) = reg.nbright {
            if i64::from(nbright) < i64::from(reg.min_objects) - 1 {
                return Err(EpochRegError::Configuration(format!(
                    "nbright={nbright} is smaller than min_objects={} allows",
                    reg.min_objects
                )));
            }
        }
        if reg.geometry() == FitGeometry::RotScale
            && (reg.min_objects < ROTSCALE_MIN_OBJECTS
                || reg.nbright.is_some_and(|n| n < ROTSCALE_MIN_OBJECTS))
        {
            return Err(EpochRegError::Configuration(format!(
                "a rotation+scale fit needs at least {ROTSCALE_MIN_OBJECTS} objects; \
                 raise min_objects/nbright or fit shifts only"
            )));
        }
        if !self.difference.template_filters.is_empty() && self.only_filters.len() != 1 {
            return Err(EpochRegError::Configuration(
                "template filters require processing to be restricted to exactly one filter"
                    .into(),
            ));
        }
        if self.difference.template_filters.len() > 2 {
            return Err(EpochRegError::Configuration(
                "at most two template filters can be combined".into(),
            ));
        }
        if self.single_star && self.target.is_none() {
            return Err(EpochRegError::Configuration(
                "single-star mode needs a target RA and Dec".into(),
            ));
        }
        if self.root.trim().is_empty() {
            return Err(EpochRegError::Configuration("root name is empty".into()));
        }
        self.combination.validate()
    }
}
