use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use epochreg_core::artifact::WorkspaceLayout;
use epochreg_core::catalog::{epochs_present, load_or_build, EpochConfig};
use epochreg_core::collab::FitsHeaderReader;
use epochreg_core::exposure::SkyCoord;

#[derive(Args)]
pub struct EpochsArgs {
    /// Root name; exposures are read from `<root>.flt/`
    pub root: String,

    /// Directory holding the root's inputs and products
    #[arg(long, default_value = ".")]
    pub top_dir: PathBuf,

    /// Epoch list to read or write
    #[arg(long)]
    pub epoch_list: Option<PathBuf>,

    /// Maximum span of an epoch, days
    #[arg(long)]
    pub span_days: Option<f64>,
    #[arg(long)]
    pub mjd_min: Option<f64>,
    #[arg(long)]
    pub mjd_max: Option<f64>,

    /// Target right ascension, degrees
    #[arg(long, requires = "dec", allow_negative_numbers = true)]
    pub ra: Option<f64>,
    /// Target declination, degrees
    #[arg(long, requires = "ra", allow_negative_numbers = true)]
    pub dec: Option<f64>,
    /// On-target radius around RA/Dec, arcmin
    #[arg(long)]
    pub target_radius: Option<f64>,

    /// Rebuild the list from the exposure headers
    #[arg(long)]
    pub regenerate: bool,
}

pub fn run(args: &EpochsArgs) -> Result<()> {
    let layout = WorkspaceLayout::new(&args.top_dir, args.root.as_str());
    let epoch_list = args
        .epoch_list
        .clone()
        .unwrap_or_else(|| layout.epoch_list());

    let mut epochs = EpochConfig::default();
    if let Some(span) = args.span_days {
        epochs.span_days = span;
    }
    if let Some(mjd_min) = args.mjd_min {
        epochs.mjd_min = mjd_min;
    }
    if let Some(mjd_max) = args.mjd_max {
        epochs.mjd_max = mjd_max;
    }
    if let Some(radius) = args.target_radius {
        epochs.target_radius_arcmin = radius;
    }
    let target = match (args.ra, args.dec) {
        (Some(ra), Some(dec)) => Some(SkyCoord::new(ra, dec)),
        _ => None,
    };

    if args.regenerate && epoch_list.exists() {
        std::fs::remove_file(&epoch_list)
            .with_context(|| format!("Failed to remove {}", epoch_list.display()))?;
    }

    let exposures = load_or_build(
        &layout.input_dir(),
        &epoch_list,
        &epochs.window(),
        epochs.target_filter(target).as_ref(),
        0,
        &FitsHeaderReader,
    )
    .with_context(|| format!("Failed to catalog {}", layout.input_dir().display()))?;

    println!("Epoch list:  {}", epoch_list.display());
    println!("Exposures:   {}", exposures.len());
    println!(
        "Epochs:      {}",
        epochs_present(&exposures)
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    crate::summary::print_epoch_table(&exposures);

    Ok(())
}
