use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use epochreg_core::collab::{Toolkit, WeightType};
use epochreg_core::exposure::SkyCoord;
use epochreg_core::pipeline::config::{
    CombinationMethod, CombinationPolicy, CrMode, PipelineConfig, StageSelection,
};
use epochreg_core::pipeline::run_pipeline_reported;

use crate::progress::StageBars;

#[derive(Clone, Copy, ValueEnum)]
pub enum WeightTypeArg {
    Ivm,
    Exp,
    Err,
}

impl From<WeightTypeArg> for WeightType {
    fn from(arg: WeightTypeArg) -> Self {
        match arg {
            WeightTypeArg::Ivm => WeightType::Ivm,
            WeightTypeArg::Exp => WeightType::Exp,
            WeightTypeArg::Err => WeightType::Err,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CombinationMethodArg {
    /// Weighted average of the per-filter difference images
    Avg,
    /// Combine the filters' exposures as one filter
    Driz,
}

impl From<CombinationMethodArg> for CombinationMethod {
    fn from(arg: CombinationMethodArg) -> Self {
        match arg {
            CombinationMethodArg::Avg => CombinationMethod::Avg,
            CombinationMethodArg::Driz => CombinationMethod::Driz,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Root name; exposures are read from `<root>.flt/`
    pub root: String,

    /// Pipeline config file (TOML); flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the root's inputs and products
    #[arg(long)]
    pub top_dir: Option<PathBuf>,

    /// Copy exposures into epoch directories
    #[arg(long, help_heading = "Stages")]
    pub dosetup: bool,
    /// Build the WCS reference image
    #[arg(long, help_heading = "Stages")]
    pub dorefim: bool,
    /// Combine each visit on its native grid
    #[arg(long, help_heading = "Stages")]
    pub dodriz1: bool,
    /// Register visits to the reference
    #[arg(long, help_heading = "Stages")]
    pub doreg: bool,
    /// Combine each filter and epoch on the registered grid
    #[arg(long, help_heading = "Stages")]
    pub dodriz2: bool,
    /// Subtract the template epoch
    #[arg(long, help_heading = "Stages")]
    pub dodiff: bool,
    /// Stack epochs per filter
    #[arg(long, help_heading = "Stages")]
    pub dostack: bool,
    /// Every stage except stacking
    #[arg(long, help_heading = "Stages")]
    pub doall: bool,

    /// Overwrite existing products
    #[arg(long, conflicts_with = "clobber_level")]
    pub clobber: bool,
    /// Overwrite level; 2 also rewrites the epoch list
    #[arg(long)]
    pub clobber_level: Option<u8>,
    /// Cleanup level; 0 keeps intermediate products
    #[arg(long)]
    pub clean: Option<u8>,

    /// Comma-separated filters to process
    #[arg(long, value_delimiter = ',', help_heading = "Selection")]
    pub filters: Vec<String>,
    /// Comma-separated epochs to process
    #[arg(long, value_delimiter = ',', help_heading = "Selection")]
    pub epochs: Vec<i32>,
    /// Target right ascension, degrees
    #[arg(long, requires = "dec", allow_negative_numbers = true, help_heading = "Selection")]
    pub ra: Option<f64>,
    /// Target declination, degrees
    #[arg(long, requires = "ra", allow_negative_numbers = true, help_heading = "Selection")]
    pub dec: Option<f64>,
    /// Maximum span of an epoch, days
    #[arg(long, help_heading = "Selection")]
    pub span_days: Option<f64>,
    #[arg(long, help_heading = "Selection")]
    pub mjd_min: Option<f64>,
    #[arg(long, help_heading = "Selection")]
    pub mjd_max: Option<f64>,
    /// Epoch list to read or write
    #[arg(long, help_heading = "Selection")]
    pub epoch_list: Option<PathBuf>,
    /// On-target radius around RA/Dec, arcmin
    #[arg(long, help_heading = "Selection")]
    pub target_radius: Option<f64>,

    /// Use this reference image instead of building one
    #[arg(long, help_heading = "Reference")]
    pub refim: Option<PathBuf>,
    #[arg(long, help_heading = "Reference")]
    pub ref_epoch: Option<i32>,
    #[arg(long, help_heading = "Reference")]
    pub ref_filter: Option<String>,
    #[arg(long, help_heading = "Reference")]
    pub ref_visit: Option<String>,
    /// Astrometric catalog for the reference image
    #[arg(long, help_heading = "Reference")]
    pub ref_catalog: Option<PathBuf>,

    /// Cosmic-ray mode: -1 clear flags, 0 keep, 1 within visit, 2 multi-visit
    #[arg(long, allow_negative_numbers = true, help_heading = "Combination")]
    pub cr_mode: Option<i8>,
    /// Two comma-separated cosmic-ray S/N thresholds
    #[arg(long, value_delimiter = ',', help_heading = "Combination")]
    pub cr_snr: Option<Vec<f64>>,
    /// Output pixel scale, arcsec
    #[arg(long, help_heading = "Combination")]
    pub pixel_scale: Option<f64>,
    #[arg(long, help_heading = "Combination")]
    pub pixel_fraction: Option<f64>,
    #[arg(long, value_enum, help_heading = "Combination")]
    pub weight_type: Option<WeightTypeArg>,
    /// Output rotation, degrees east of north
    #[arg(long, allow_negative_numbers = true, help_heading = "Combination")]
    pub rotation: Option<f64>,
    /// Output image size, arcsec
    #[arg(long, help_heading = "Combination")]
    pub image_size: Option<f64>,
    /// Output image size as NAXIS1,NAXIS2
    #[arg(long, value_delimiter = ',', help_heading = "Combination")]
    pub naxis: Option<Vec<u32>>,
    /// Write single-exposure products at the registered combination
    #[arg(long, help_heading = "Combination")]
    pub single_products: bool,
    /// Align the exposures of each visit among themselves first
    #[arg(long, help_heading = "Combination")]
    pub intravisit: bool,
    /// Comma-separated filters to combine under one name
    #[arg(long, value_delimiter = ',', help_heading = "Combination")]
    pub combine_filters: Vec<String>,
    #[arg(long, help_heading = "Combination")]
    pub combine_name: Option<String>,
    #[arg(long, value_enum, help_heading = "Combination")]
    pub combine_method: Option<CombinationMethodArg>,

    /// Register on one bright star at RA/Dec
    #[arg(long, help_heading = "Registration")]
    pub single_star: bool,
    /// Detection threshold, sigma
    #[arg(long, help_heading = "Registration")]
    pub threshold: Option<f64>,
    #[arg(long, allow_negative_numbers = true, help_heading = "Registration")]
    pub peak_min: Option<f64>,
    #[arg(long, help_heading = "Registration")]
    pub peak_max: Option<f64>,
    /// Matching search radius, arcsec
    #[arg(long, help_heading = "Registration")]
    pub search_radius: Option<f64>,
    #[arg(long, help_heading = "Registration")]
    pub min_objects: Option<u32>,
    #[arg(long, help_heading = "Registration")]
    pub nbright: Option<u32>,
    #[arg(long, help_heading = "Registration")]
    pub ref_nbright: Option<u32>,
    #[arg(long, help_heading = "Registration")]
    pub ref_flux_min: Option<f64>,
    #[arg(long, help_heading = "Registration")]
    pub ref_flux_max: Option<f64>,
    #[arg(long, help_heading = "Registration")]
    pub nclip: Option<u32>,
    #[arg(long, help_heading = "Registration")]
    pub sigma_clip: Option<f64>,
    /// Fit shifts only
    #[arg(long, help_heading = "Registration")]
    pub shift_only: bool,
    #[arg(long, help_heading = "Registration")]
    pub interactive: bool,

    /// Epoch used as the subtraction template
    #[arg(long, help_heading = "Difference")]
    pub template_epoch: Option<i32>,
    /// One or two filters to synthesize a scaled template from
    #[arg(long, value_delimiter = ',', help_heading = "Difference")]
    pub template_filters: Vec<String>,
    /// Also subtract single-exposure products
    #[arg(long, help_heading = "Difference")]
    pub single_subtractions: bool,
    #[arg(long, help_heading = "Difference")]
    pub bandpass_dir: Option<PathBuf>,

    /// Comma-separated epochs to stack
    #[arg(long, value_delimiter = ',', help_heading = "Stack")]
    pub stack_epochs: Vec<i32>,
    /// Stack the template epoch too
    #[arg(long, help_heading = "Stack")]
    pub stack_template: bool,
    #[arg(long, help_heading = "Stack")]
    pub stack_pixel_scale: Option<f64>,
    #[arg(long, help_heading = "Stack")]
    pub stack_pixel_fraction: Option<f64>,

    /// External program serving every collaborator operation
    #[arg(long)]
    pub tool: Option<String>,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid pipeline config")?
    } else {
        PipelineConfig::new(args.root.clone())
    };
    apply_args(args, &mut config)?;

    crate::summary::print_run_header(&config);

    let toolkit = Toolkit::from_tools(&config.tools);
    let summary = run_pipeline_reported(&config, &toolkit, Arc::new(StageBars::new()))
        .with_context(|| format!("Pipeline failed for {}", config.root))?;

    crate::summary::print_run_summary(&summary);
    Ok(())
}

fn apply_stages(args: &RunArgs, stages: &mut StageSelection) {
    if args.doall {
        let stack = stages.stack;
        *stages = StageSelection::all();
        stages.stack = stack;
    }
    stages.setup |= args.dosetup;
    stages.reference |= args.dorefim;
    stages.native |= args.dodriz1;
    stages.register |= args.doreg;
    stages.registered |= args.dodriz2;
    stages.difference |= args.dodiff;
    stages.stack |= args.dostack;
}

/// Layer command-line values over `config`.
fn apply_args(args: &RunArgs, config: &mut PipelineConfig) -> Result<()> {
    config.root = args.root.clone();
    if let Some(dir) = &args.top_dir {
        config.top_dir = dir.clone();
    }
    apply_stages(args, &mut config.stages);
    if args.clobber {
        config.clobber = config.clobber.max(1);
    }
    if let Some(level) = args.clobber_level {
        config.clobber = level;
    }
    if let Some(clean) = args.clean {
        config.clean = clean;
    }

    if !args.filters.is_empty() {
        config.only_filters = args.filters.clone();
    }
    if !args.epochs.is_empty() {
        config.only_epochs = args.epochs.clone();
    }
    if let (Some(ra), Some(dec)) = (args.ra, args.dec) {
        config.target = Some(SkyCoord::new(ra, dec));
    }
    config.single_star |= args.single_star;

    let epochs = &mut config.epochs;
    set(&mut epochs.span_days, args.span_days);
    set(&mut epochs.mjd_min, args.mjd_min);
    set(&mut epochs.mjd_max, args.mjd_max);
    set(&mut epochs.target_radius_arcmin, args.target_radius);
    set_some(&mut epochs.epoch_list, &args.epoch_list);

    let reference = &mut config.reference;
    set_some(&mut reference.image, &args.refim);
    set_some(&mut reference.catalog, &args.ref_catalog);
    set_some(&mut reference.epoch, &args.ref_epoch);
    set_some(&mut reference.filter, &args.ref_filter);
    set_some(&mut reference.visit, &args.ref_visit);

    let combine = &mut config.combine;
    if let Some(mode) = args.cr_mode {
        combine.cr_mode = CrMode::try_from(mode).map_err(anyhow::Error::msg)?;
    }
    if let Some(snr) = &args.cr_snr {
        let [first, second] = snr.as_slice() else {
            bail!("--cr-snr takes exactly two values");
        };
        combine.cr_snr = [*first, *second];
    }
    set_some(&mut combine.pixel_scale, &args.pixel_scale);
    set_some(&mut combine.pixel_fraction, &args.pixel_fraction);
    if let Some(weight_type) = args.weight_type {
        combine.weight_type = weight_type.into();
    }
    set(&mut combine.rotation_deg, args.rotation);
    set_some(&mut combine.image_size_arcsec, &args.image_size);
    if let Some(naxis) = &args.naxis {
        let [n1, n2] = naxis.as_slice() else {
            bail!("--naxis takes exactly two values");
        };
        combine.naxis = Some([*n1, *n2]);
    }
    combine.single_products |= args.single_products;
    combine.intravisit_registration |= args.intravisit;

    if !args.combine_filters.is_empty() {
        config.combination = CombinationPolicy::from_parts(
            &args.combine_filters,
            args.combine_name.as_deref(),
            args.combine_method.map(Into::into),
        )?;
    }

    let reg = &mut config.registration;
    set(&mut reg.threshold, args.threshold);
    set_some(&mut reg.peak_min, &args.peak_min);
    set_some(&mut reg.peak_max, &args.peak_max);
    set(&mut reg.search_radius_arcsec, args.search_radius);
    set(&mut reg.min_objects, args.min_objects);
    set_some(&mut reg.nbright, &args.nbright);
    set_some(&mut reg.ref_nbright, &args.ref_nbright);
    set_some(&mut reg.ref_flux_min, &args.ref_flux_min);
    set_some(&mut reg.ref_flux_max, &args.ref_flux_max);
    set(&mut reg.nclip, args.nclip);
    set(&mut reg.sigma_clip, args.sigma_clip);
    reg.shift_only |= args.shift_only;
    reg.interactive |= args.interactive;

    let difference = &mut config.difference;
    set(&mut difference.template_epoch, args.template_epoch);
    if !args.template_filters.is_empty() {
        difference.template_filters = args.template_filters.clone();
    }
    difference.single_subtractions |= args.single_subtractions;
    if let Some(dir) = &args.bandpass_dir {
        difference.bandpass_dir = dir.clone();
    }

    let stack = &mut config.stack;
    if !args.stack_epochs.is_empty() {
        stack.epochs = args.stack_epochs.clone();
    }
    stack.include_template |= args.stack_template;
    set_some(&mut stack.pixel_scale, &args.stack_pixel_scale);
    set_some(&mut stack.pixel_fraction, &args.stack_pixel_fraction);

    if let Some(program) = &args.tool {
        let tools = &mut config.tools;
        for command in [
            &mut tools.combiner,
            &mut tools.registrar,
            &mut tools.propagator,
            &mut tools.template_scaler,
        ] {
            command.program = program.clone();
        }
    }
    Ok(())
}

fn set<T: Copy>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn set_some<T: Clone>(field: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *field = value.clone();
    }
}
