pub mod epoch_list;
pub mod epochs;
pub mod header;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collab::HeaderSource;
use crate::consts::{DEFAULT_EPOCH_SPAN_DAYS, DEFAULT_TARGET_RADIUS_ARCMIN};
use crate::error::{EpochRegError, Result};
use crate::exposure::{Exposure, SkyCoord};

pub use epoch_list::{load, persist};
pub use epochs::{assign_epochs, epochs_present, merge_new_exposures, EpochWindow};
pub use header::ExposureHeader;

/// Cone used to flag exposures as on target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetFilter {
    pub coord: SkyCoord,
    pub radius_arcmin: f64,
}

/// Epoch grouping settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochConfig {
    /// Maximum span of one epoch in days.
    pub span_days: f64,
    pub mjd_min: f64,
    pub mjd_max: f64,
    /// Epoch list location; `{root}_epochs.txt` in the top directory if unset.
    pub epoch_list: Option<PathBuf>,
    pub target_radius_arcmin: f64,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            span_days: DEFAULT_EPOCH_SPAN_DAYS,
            mjd_min: 0.0,
            mjd_max: 0.0,
            epoch_list: None,
            target_radius_arcmin: DEFAULT_TARGET_RADIUS_ARCMIN,
        }
    }
}

impl EpochConfig {
    pub fn window(&self) -> EpochWindow {
        EpochWindow {
            span_days: self.span_days,
            mjd_min: self.mjd_min,
            mjd_max: self.mjd_max,
        }
    }

    pub fn target_filter(&self, target: Option<SkyCoord>) -> Option<TargetFilter> {
        target.map(|coord| TargetFilter {
            coord,
            radius_arcmin: self.target_radius_arcmin,
        })
    }
}

fn is_exposure_file(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".fits") else {
        return false;
    };
    let n = stem.len();
    n >= 3 && stem.is_char_boundary(n - 3) && stem[n - 3..].starts_with("fl")
}

/// Raw exposures (`*fl?.fits`) in `dir`, sorted by name.
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(EpochRegError::MissingInput(format!(
            "input directory {} does not exist",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_exposure_file);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read one exposure record per file. Files whose headers cannot be read
/// are left out with a warning.
pub fn build_catalog(
    files: &[PathBuf],
    target: Option<&TargetFilter>,
    headers: &dyn HeaderSource,
) -> Vec<Exposure> {
    let mut exposures = Vec::with_capacity(files.len());
    for path in files {
        let parsed = headers
            .read_header(path)
            .and_then(|header| ExposureHeader::from_fits(&header, path));
        match parsed {
            Ok(meta) => {
                let exposure = meta.into_exposure(path, target);
                if !exposure.on_target {
                    debug!(file = %exposure.filename, "Exposure is off target");
                }
                exposures.push(exposure);
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping exposure"),
        }
    }
    exposures
}

/// Adopt the persisted epoch list, or generate and persist it.
///
/// Files in `input_dir` that the list does not know are merged in when
/// `clobber` is set; with `clobber > 1` the list is always rewritten.
/// Unreadable files never count as new exposures.
pub fn load_or_build(
    input_dir: &Path,
    epoch_list: &Path,
    window: &EpochWindow,
    target: Option<&TargetFilter>,
    clobber: u8,
    headers: &dyn HeaderSource,
) -> Result<Vec<Exposure>> {
    let files = discover_inputs(input_dir)?;
    if files.is_empty() {
        return Err(EpochRegError::MissingInput(format!(
            "no *fl?.fits exposures in {}",
            input_dir.display()
        )));
    }

    if !epoch_list.exists() {
        let mut exposures = build_catalog(&files, target, headers);
        assign_epochs(&mut exposures, window);
        persist(&exposures, epoch_list)?;
        info!(
            exposures = exposures.len(),
            epochs = epochs_present(&exposures).len(),
            path = %epoch_list.display(),
            "Generated epoch list"
        );
        return Ok(exposures);
    }

    let existing = load(epoch_list, input_dir)?;
    let known: HashSet<&str> = existing.iter().map(|e| e.filename.as_str()).collect();
    let new_files: Vec<PathBuf> = files
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !known.contains(n))
        })
        .cloned()
        .collect();
    info!(
        exposures = existing.len(),
        path = %epoch_list.display(),
        "Loaded epoch list"
    );

    if clobber == 0 {
        if !new_files.is_empty() {
            warn!(
                new = new_files.len(),
                "New exposures are not in the epoch list; rerun with clobber to add them"
            );
        }
        return Ok(existing);
    }
    if new_files.is_empty() && clobber <= 1 {
        return Ok(existing);
    }

    let new = build_catalog(&new_files, target, headers);
    if new.is_empty() && clobber <= 1 {
        info!(
            unreadable = new_files.len(),
            "No readable new exposures, epoch list unchanged"
        );
        return Ok(existing);
    }
    let added = new.len();
    let merged = merge_new_exposures(existing, new, window);
    persist(&merged, epoch_list)?;
    info!(added, total = merged.len(), "Updated epoch list");
    Ok(merged)
}

/// Active exposures, restricted to the given filters and epochs (empty
/// restriction = all).
pub fn working_set(exposures: &[Exposure], only_filters: &[String], only_epochs: &[i32]) -> Vec<Exposure> {
    exposures
        .iter()
        .filter(|e| e.is_active())
        .filter(|e| only_filters.is_empty() || only_filters.contains(&e.filter))
        .filter(|e| only_epochs.is_empty() || only_epochs.contains(&e.epoch))
        .cloned()
        .collect()
}
