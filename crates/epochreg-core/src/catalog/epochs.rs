use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_EPOCH_SPAN_DAYS, EXCLUDED_EPOCH};
use crate::exposure::Exposure;

/// Epoch windowing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochWindow {
    /// Maximum span of one epoch, from its first exposure.
    pub span_days: f64,
    /// Exposures before this MJD are treated as taken at it (0 = off).
    pub mjd_min: f64,
    /// Exposures after this MJD are treated as taken at it (0 = off).
    pub mjd_max: f64,
}

impl Default for EpochWindow {
    fn default() -> Self {
        Self {
            span_days: DEFAULT_EPOCH_SPAN_DAYS,
            mjd_min: 0.0,
            mjd_max: 0.0,
        }
    }
}

impl EpochWindow {
    pub fn new(span_days: f64) -> Self {
        Self {
            span_days,
            ..Self::default()
        }
    }

    /// MJD clamped to the `mjd_min`/`mjd_max` overrides.
    pub fn effective_mjd(&self, mjd: f64) -> f64 {
        let mut mjd = mjd;
        if self.mjd_min > 0.0 && mjd < self.mjd_min {
            mjd = self.mjd_min;
        }
        if self.mjd_max > 0.0 && mjd > self.mjd_max {
            mjd = self.mjd_max;
        }
        mjd
    }

    fn compare(&self, a: &Exposure, b: &Exposure) -> Ordering {
        self.effective_mjd(a.mjd)
            .total_cmp(&self.effective_mjd(b.mjd))
            .then_with(|| a.filename.cmp(&b.filename))
    }
}

/// Walk `indices` (already in chronological order) and number epochs from
/// `first_epoch`, opening a new one whenever an exposure falls more than
/// the span after the current epoch's start.
fn walk(exposures: &mut [Exposure], indices: &[usize], window: &EpochWindow, first_epoch: i32) {
    let mut epoch = first_epoch - 1;
    let mut start = f64::NEG_INFINITY;
    for &i in indices {
        let mjd = window.effective_mjd(exposures[i].mjd);
        if epoch < first_epoch || mjd - start > window.span_days {
            epoch += 1;
            start = mjd;
        }
        exposures[i].epoch = epoch;
    }
}

fn chronological(exposures: &[Exposure], window: &EpochWindow) -> Vec<usize> {
    let mut order: Vec<usize> = (0..exposures.len())
        .filter(|&i| exposures[i].on_target)
        .collect();
    order.sort_by(|&a, &b| window.compare(&exposures[a], &exposures[b]));
    order
}

/// Assign dense epoch numbers from 0. Off-target exposures get
/// `EXCLUDED_EPOCH`.
pub fn assign_epochs(exposures: &mut [Exposure], window: &EpochWindow) {
    for exposure in exposures.iter_mut().filter(|e| !e.on_target) {
        exposure.epoch = EXCLUDED_EPOCH;
    }
    let order = chronological(exposures, window);
    walk(exposures, &order, window, 0);
}

/// Fold newly discovered exposures into an existing assignment.
///
/// Existing epochs are never renumbered. A new exposure joins the earliest
/// existing epoch whose `[start, start + span]` window contains it; the rest
/// are walked among themselves and numbered after the current maximum.
pub fn merge_new_exposures(
    existing: Vec<Exposure>,
    new: Vec<Exposure>,
    window: &EpochWindow,
) -> Vec<Exposure> {
    let mut starts: BTreeMap<i32, f64> = BTreeMap::new();
    for exposure in existing.iter().filter(|e| e.epoch > EXCLUDED_EPOCH) {
        let mjd = window.effective_mjd(exposure.mjd);
        starts
            .entry(exposure.epoch)
            .and_modify(|s| *s = s.min(mjd))
            .or_insert(mjd);
    }
    let next_epoch = starts.keys().next_back().map_or(0, |max| max + 1);

    let mut new = new;
    let mut leftover = Vec::new();
    for (i, exposure) in new.iter_mut().enumerate() {
        if !exposure.on_target {
            exposure.epoch = EXCLUDED_EPOCH;
            continue;
        }
        let mjd = window.effective_mjd(exposure.mjd);
        let home = starts
            .iter()
            .filter(|&(_, &start)| mjd >= start && mjd - start <= window.span_days)
            .min_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(&epoch, _)| epoch);
        match home {
            Some(epoch) => exposure.epoch = epoch,
            None => leftover.push(i),
        }
    }
    leftover.sort_by(|&a, &b| window.compare(&new[a], &new[b]));
    walk(&mut new, &leftover, window, next_epoch);

    let mut merged = existing;
    merged.extend(new);
    merged
}

/// Sorted distinct epochs among active exposures.
pub fn epochs_present(exposures: &[Exposure]) -> Vec<i32> {
    let mut epochs: Vec<i32> = exposures
        .iter()
        .filter(|e| e.is_active())
        .map(|e| e.epoch)
        .collect();
    epochs.sort_unstable();
    epochs.dedup();
    epochs
}
