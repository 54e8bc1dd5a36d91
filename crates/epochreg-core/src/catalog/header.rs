use std::path::Path;

use crate::consts::EXCLUDED_EPOCH;
use crate::error::{EpochRegError, Result};
use crate::exposure::{normalize_filter, normalize_visit, Camera, Exposure, SkyCoord};
use crate::io::FitsHeader;

use super::TargetFilter;

/// Exposure metadata extracted from a primary header.
#[derive(Clone, Debug, PartialEq)]
pub struct ExposureHeader {
    pub rootname: String,
    pub filter: String,
    pub camera: Camera,
    pub mjd: f64,
    pub pidvisit: String,
    /// Commanded target position, when recorded.
    pub pointing: Option<SkyCoord>,
}

fn missing(path: &Path, keyword: &str) -> EpochRegError {
    EpochRegError::HeaderRead {
        path: path.to_path_buf(),
        keyword: keyword.to_string(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl ExposureHeader {
    pub fn from_fits(header: &FitsHeader, path: &Path) -> Result<Self> {
        let filename = file_name(path);

        let filter = match header.get_str("FILTER") {
            Some(filter) => filter,
            None => ["FILTER1", "FILTER2"]
                .iter()
                .filter_map(|key| header.get_str(key))
                .find(|f| !f.to_uppercase().starts_with("CLEAR"))
                .ok_or_else(|| missing(path, "FILTER"))?,
        };
        let filter = normalize_filter(&filter);

        let mjd = header
            .get_f64("EXPSTART")
            .ok_or_else(|| missing(path, "EXPSTART"))?;

        let proposal = header
            .get_str("PROPOSID")
            .ok_or_else(|| missing(path, "PROPOSID"))?;
        let line = header
            .get_str("LINENUM")
            .ok_or_else(|| missing(path, "LINENUM"))?;
        let visit = line.split('.').next().unwrap_or_default();
        let pidvisit = normalize_visit(&format!("{proposal}_{visit}"));

        let rootname = header
            .get_str("ROOTNAME")
            .map(|r| r.to_lowercase())
            .unwrap_or_else(|| {
                filename
                    .split('_')
                    .next()
                    .unwrap_or_default()
                    .to_lowercase()
            });

        let camera = header
            .get_str("INSTRUME")
            .and_then(|inst| {
                Camera::from_instrument(&inst, header.get_str("DETECTOR").as_deref())
            })
            .unwrap_or_else(|| Camera::infer_from_names(&rootname, &filename, &filter));

        let pointing = match (header.get_f64("RA_TARG"), header.get_f64("DEC_TARG")) {
            (Some(ra), Some(dec)) => Some(SkyCoord::new(ra, dec)),
            _ => None,
        };

        Ok(Self {
            rootname,
            filter,
            camera,
            mjd,
            pidvisit,
            pointing,
        })
    }

    /// Whether the pointing lies within the target radius. Exposures
    /// without pointing keywords are taken as on target.
    pub fn is_on_target(&self, target: Option<&TargetFilter>) -> bool {
        match (target, self.pointing) {
            (Some(target), Some(pointing)) => {
                target.coord.separation_deg(&pointing) * 60.0 <= target.radius_arcmin
            }
            _ => true,
        }
    }

    /// Unassigned exposure record for `path`.
    pub fn into_exposure(self, path: &Path, target: Option<&TargetFilter>) -> Exposure {
        let on_target = self.is_on_target(target);
        Exposure {
            filename: file_name(path),
            path: path.to_path_buf(),
            rootname: self.rootname,
            filter: self.filter,
            camera: self.camera,
            mjd: self.mjd,
            pidvisit: self.pidvisit,
            on_target,
            epoch: EXCLUDED_EPOCH,
        }
    }
}
