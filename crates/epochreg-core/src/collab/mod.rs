//! Contracts of the external operations the pipeline drives.
//!
//! The orchestrator never aligns, drizzles or back-propagates by itself; it
//! builds a request, hands it to one of these traits and records the outcome.
//! [`command::CommandBackend`] runs external tools, [`native`] ships the
//! FITS header reader and pixel arithmetic.

pub mod command;
pub mod native;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exposure::SkyCoord;
use crate::io::FitsHeader;

pub use command::{CommandBackend, ToolCommand, ToolsConfig};
pub use native::{FitsHeaderReader, NativePixelArithmetic};

/// Pixel combination rule used by the combiner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineType {
    /// Conservative min/median hybrid, robust for small groups.
    MinMed,
    /// Flux-preserving median.
    Median,
}

impl fmt::Display for CombineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinMed => write!(f, "minmed"),
            Self::Median => write!(f, "median"),
        }
    }
}

/// Weighting scheme of the combined images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WeightType {
    /// Inverse variance map.
    #[default]
    Ivm,
    /// Exposure time.
    Exp,
    /// Error array.
    Err,
}

impl fmt::Display for WeightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ivm => write!(f, "IVM"),
            Self::Exp => write!(f, "EXP"),
            Self::Err => write!(f, "ERR"),
        }
    }
}

/// Output pixel grid of a combination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "grid", rename_all = "snake_case")]
pub enum OutputGrid {
    /// The instrument's own grid.
    Native,
    /// A common north-up grid shared by every epoch.
    Registered {
        center: Option<SkyCoord>,
        rotation_deg: f64,
        size_arcsec: Option<f64>,
        naxis: Option<[u32; 2]>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombineOptions {
    pub grid: OutputGrid,
    pub pixel_scale: Option<f64>,
    pub pixel_fraction: Option<f64>,
    pub weight_type: WeightType,
    /// `None` leaves the choice to the combiner.
    pub combine_type: Option<CombineType>,
    pub cr_rejection: bool,
    /// Reset cosmic-ray flags in the inputs before combining.
    pub clear_cr_flags: bool,
    pub cr_snr: [f64; 2],
    /// Also write one product per input exposure.
    pub single_products: bool,
    /// WCS solution to combine with, when not the primary one.
    pub wcs_key: Option<String>,
    pub clean: bool,
    pub clobber: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombineRequest {
    pub workdir: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub output_root: String,
    pub options: CombineOptions,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombineOutput {
    pub science: PathBuf,
    pub weight: PathBuf,
    #[serde(default)]
    pub context: Option<PathBuf>,
    #[serde(default)]
    pub mask: Option<PathBuf>,
}

/// Image-combination engine.
pub trait Combiner: Send + Sync {
    fn combine(&self, request: &CombineRequest) -> Result<CombineOutput>;

    /// Clean hot pixels in a two-exposure group that cosmic-ray rejection
    /// cannot handle.
    fn clean_hot_pixels(&self, workdir: &Path, first: &Path, second: &Path) -> Result<()>;
}

/// What the images are aligned against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "anchor", rename_all = "snake_case")]
pub enum AlignAnchor {
    /// The images among themselves, optionally tied to a catalog.
    Internal { catalog: Option<PathBuf> },
    Reference {
        image: PathBuf,
        catalog: Option<PathBuf>,
    },
    Catalog {
        catalog: PathBuf,
    },
    SingleStar {
        target: SkyCoord,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitGeometry {
    #[default]
    Shift,
    #[serde(rename = "rscale")]
    RotScale,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    pub threshold: f64,
    pub peak_min: Option<f64>,
    pub peak_max: Option<f64>,
    /// Use only the N brightest sources.
    pub nbright: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingParams {
    pub search_radius_arcsec: f64,
    pub min_objects: u32,
    pub nclip: u32,
    pub sigma_clip: f64,
    pub ref_nbright: Option<u32>,
    pub ref_flux_min: Option<f64>,
    pub ref_flux_max: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignRequest {
    pub workdir: PathBuf,
    pub images: Vec<PathBuf>,
    pub anchor: AlignAnchor,
    pub wcs_name: String,
    pub geometry: FitGeometry,
    pub detection: DetectionParams,
    pub matching: MatchingParams,
    pub interactive: bool,
    pub clobber: bool,
}

/// Alignment solver.
pub trait Registrar: Send + Sync {
    /// Fit and write a new WCS solution into `images`. Returns the name of
    /// the solution written. Fails when too few objects match.
    fn align(&self, request: &AlignRequest) -> Result<String>;

    /// Build a source catalog from `image`.
    fn source_catalog(
        &self,
        workdir: &Path,
        image: &Path,
        detection: &DetectionParams,
    ) -> Result<PathBuf>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropagationRequest {
    pub workdir: PathBuf,
    /// Combined image carrying the new solution.
    pub source: PathBuf,
    /// Raw exposures that receive it.
    pub targets: Vec<PathBuf>,
    /// `WCSNAME` of the combined image before alignment.
    pub old_wcs_name: Option<String>,
    pub wcs_name: String,
    /// Overwrite a solution already stored under `wcs_name`.
    pub force: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PropagationOutcome {
    Applied,
    /// A solution with this key already exists in a target header.
    KeyCollision { existing: String },
}

/// Copies a WCS solution from a combined image back to its exposures.
pub trait BackPropagator: Send + Sync {
    fn propagate(&self, request: &PropagationRequest) -> Result<PropagationOutcome>;
}

/// Pixel arithmetic on whole images. Every operation writes `output` and
/// returns its path; an existing output is kept unless `clobber`.
pub trait PixelArithmetic: Send + Sync {
    /// `science - template`.
    fn subtract(&self, science: &Path, template: &Path, output: &Path, clobber: bool)
        -> Result<PathBuf>;

    /// Inverse-variance combination of two weight maps.
    fn combine_weights(&self, first: &Path, second: &Path, output: &Path, clobber: bool)
        -> Result<PathBuf>;

    fn union_mask(&self, first: &Path, second: &Path, output: &Path, clobber: bool)
        -> Result<PathBuf>;

    fn apply_mask(&self, image: &Path, mask: &Path, output: &Path, clobber: bool)
        -> Result<PathBuf>;

    /// Weighted mean of `images`. Returns the image and its summed weight.
    fn weighted_average(
        &self,
        images: &[PathBuf],
        weights: &[PathBuf],
        output: &Path,
        output_weight: &Path,
        clobber: bool,
    ) -> Result<(PathBuf, PathBuf)>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateRequest {
    pub workdir: PathBuf,
    /// Camera-filter bandpass to synthesize, e.g. `WFC3-IR-F140W`.
    pub target_bandpass: String,
    pub first: PathBuf,
    pub second: Option<PathBuf>,
    pub output: PathBuf,
    pub bandpass_dir: PathBuf,
    pub clobber: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateArtifacts {
    pub science: PathBuf,
    pub weight: PathBuf,
    pub mask: PathBuf,
}

/// Flux-scaled template synthesis from other filters.
pub trait TemplateScaler: Send + Sync {
    fn scaled_template(&self, request: &TemplateRequest) -> Result<TemplateArtifacts>;
}

pub trait HeaderSource: Send + Sync {
    fn read_header(&self, path: &Path) -> Result<FitsHeader>;
}

/// The set of collaborators a run uses.
#[derive(Clone)]
pub struct Toolkit {
    pub combiner: Arc<dyn Combiner>,
    pub registrar: Arc<dyn Registrar>,
    pub propagator: Arc<dyn BackPropagator>,
    pub pixels: Arc<dyn PixelArithmetic>,
    pub templates: Arc<dyn TemplateScaler>,
    pub headers: Arc<dyn HeaderSource>,
}

impl Toolkit {
    /// External tools for combination, alignment, back-propagation and
    /// template scaling; native FITS headers and pixel arithmetic.
    pub fn from_tools(tools: &ToolsConfig) -> Self {
        Self {
            combiner: Arc::new(CommandBackend::new(tools.combiner.clone())),
            registrar: Arc::new(CommandBackend::new(tools.registrar.clone())),
            propagator: Arc::new(CommandBackend::new(tools.propagator.clone())),
            pixels: Arc::new(NativePixelArithmetic),
            templates: Arc::new(CommandBackend::new(tools.template_scaler.clone())),
            headers: Arc::new(FitsHeaderReader),
        }
    }
}
