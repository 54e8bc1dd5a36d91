use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{EpochRegError, Result};
use crate::exposure::{normalize_filter, normalize_visit, Exposure};

/// User choices for the reference frame; unset fields are derived.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceOverrides {
    pub epoch: Option<i32>,
    pub filter: Option<String>,
    pub visit: Option<String>,
}

impl ReferenceOverrides {
    pub fn any(&self) -> bool {
        self.epoch.is_some() || self.filter.is_some() || self.visit.is_some()
    }
}

/// The visit selected to build the reference image from.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceChoice {
    pub epoch: i32,
    pub filter: String,
    pub visit: String,
    /// Exposures of that visit, sorted by file name.
    pub exposures: Vec<Exposure>,
}

/// Pick the epoch, filter and visit of the reference image.
///
/// `working` is the restricted working set the defaults are drawn from;
/// visits and exposures are looked up in `all`. The default visit is the
/// one with the most exposures, ties going to the first in sort order.
pub fn select_reference(
    working: &[Exposure],
    all: &[Exposure],
    overrides: &ReferenceOverrides,
) -> Result<ReferenceChoice> {
    let epoch = match overrides.epoch {
        Some(epoch) => epoch,
        None => working
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.epoch)
            .min()
            .ok_or_else(|| {
                EpochRegError::MissingInput("no exposures to build a reference image from".into())
            })?,
    };

    let filter = match &overrides.filter {
        Some(filter) => normalize_filter(filter),
        None => working
            .iter()
            .filter(|e| e.is_active() && e.epoch == epoch)
            .map(|e| e.filter.clone())
            .min()
            .ok_or_else(|| EpochRegError::NoCandidateExposures {
                epoch,
                filter: String::new(),
            })?,
    };

    let candidates: Vec<&Exposure> = all
        .iter()
        .filter(|e| e.is_active() && e.epoch == epoch && e.filter == filter)
        .collect();

    let visit = match &overrides.visit {
        Some(visit) => normalize_visit(visit),
        None => {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for e in &candidates {
                *counts.entry(e.pidvisit.as_str()).or_default() += 1;
            }
            // BTreeMap iterates in sorted order, so the first maximum wins ties.
            let mut deepest: Option<(&str, usize)> = None;
            for (visit, count) in counts {
                if deepest.map_or(true, |(_, best)| count > best) {
                    deepest = Some((visit, count));
                }
            }
            deepest
                .map(|(visit, _)| visit.to_string())
                .ok_or_else(|| EpochRegError::NoCandidateExposures {
                    epoch,
                    filter: filter.clone(),
                })?
        }
    };

    let mut exposures: Vec<Exposure> = candidates
        .into_iter()
        .filter(|e| e.pidvisit == visit)
        .cloned()
        .collect();
    if exposures.is_empty() {
        return Err(EpochRegError::InsufficientExposures {
            epoch,
            filter,
            visit,
        });
    }
    exposures.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(ReferenceChoice {
        epoch,
        filter,
        visit,
        exposures,
    })
}

/// Where the reference image came from.
#[derive(Clone, Debug, PartialEq)]
pub enum ReferenceSource {
    UserSupplied,
    /// Left over from an earlier run.
    Existing,
    Built {
        epoch: i32,
        filter: String,
        visit: String,
    },
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserSupplied => write!(f, "user supplied"),
            Self::Existing => write!(f, "existing"),
            Self::Built {
                epoch,
                filter,
                visit,
            } => write!(f, "built from {filter} epoch {epoch} visit {visit}"),
        }
    }
}

/// The WCS anchor of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceFrame {
    pub image: PathBuf,
    pub source: ReferenceSource,
    /// Source or astrometric catalog later stages register against.
    pub catalog: Option<PathBuf>,
}
