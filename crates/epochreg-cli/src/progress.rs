use std::sync::Mutex;

use epochreg_core::pipeline::{ProgressReporter, Stage};
use indicatif::{ProgressBar, ProgressStyle};

/// One progress bar per pipeline stage.
#[derive(Default)]
pub struct StageBars {
    current: Mutex<Option<ProgressBar>>,
}

impl StageBars {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg:16} [{bar:40}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl ProgressReporter for StageBars {
    fn begin_stage(&self, stage: Stage, total_units: Option<usize>) {
        let bar = match total_units {
            Some(total) => {
                let bar = ProgressBar::new(total as u64);
                bar.set_style(bar_style());
                bar
            }
            None => ProgressBar::new_spinner(),
        };
        bar.set_message(stage.to_string());
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(bar) {
                previous.finish();
            }
        }
    }

    fn advance(&self, units_done: usize) {
        if let Ok(current) = self.current.lock() {
            if let Some(bar) = current.as_ref() {
                bar.set_position(units_done as u64);
            }
        }
    }

    fn finish_stage(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(bar) = current.take() {
                bar.finish();
            }
        }
    }
}
