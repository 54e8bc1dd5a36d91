use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{EXCLUDED_EPOCH, FILTER_NAME_MAX_LEN};

/// A single observed exposure file.
#[derive(Clone, Debug, PartialEq)]
pub struct Exposure {
    /// Base file name, e.g. `ib6w01axq_flt.fits`.
    pub filename: String,
    /// Absolute path of the pristine input file.
    pub path: PathBuf,
    pub rootname: String,
    /// Normalized filter name (lowercase, at most 5 characters).
    pub filter: String,
    pub camera: Camera,
    /// Exposure start, modified Julian date.
    pub mjd: f64,
    /// Program id and visit code, e.g. `12099_A1`.
    pub pidvisit: String,
    pub on_target: bool,
    /// Assigned epoch, `EXCLUDED_EPOCH` when excluded.
    pub epoch: i32,
}

impl Exposure {
    pub fn fev_group(&self) -> FevGroup {
        FevGroup {
            filter: self.filter.clone(),
            epoch: self.epoch,
            visit: self.pidvisit.clone(),
        }
    }

    pub fn fe_group(&self) -> FeGroup {
        FeGroup {
            filter: self.filter.clone(),
            epoch: self.epoch,
        }
    }

    /// Whether the exposure takes part in processing at all.
    pub fn is_active(&self) -> bool {
        self.on_target && self.epoch > EXCLUDED_EPOCH
    }

    pub fn drizzle_suffix(&self) -> DrizzleSuffix {
        DrizzleSuffix::for_input(&self.filename)
    }
}

/// Lowercase and truncate a filter name.
pub fn normalize_filter(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .take(FILTER_NAME_MAX_LEN)
        .collect()
}

/// Upper-case a program/visit id and replace `.` separators with `_`.
pub fn normalize_visit(visit: &str) -> String {
    visit.trim().to_uppercase().replace(['.', ' '], "_")
}

/// Detector of the exposure. Decides combine-type and hot-pixel policies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Camera {
    Wfc3Ir,
    Wfc3Uvis,
    AcsWfc,
    Other(String),
}

impl Camera {
    /// Capability lookup from the `INSTRUME` / `DETECTOR` header values.
    pub fn from_instrument(instrument: &str, detector: Option<&str>) -> Option<Self> {
        let instrument = instrument.trim().to_uppercase();
        let detector = detector.map(|d| d.trim().to_uppercase());
        match (instrument.as_str(), detector.as_deref()) {
            ("WFC3", Some("IR")) => Some(Self::Wfc3Ir),
            ("WFC3", Some("UVIS")) => Some(Self::Wfc3Uvis),
            ("ACS", Some("WFC")) => Some(Self::AcsWfc),
            ("", _) => None,
            (inst, Some(det)) if !det.is_empty() => Some(Self::Other(format!("{inst}-{det}"))),
            (inst, _) => Some(Self::Other(inst.to_string())),
        }
    }

    /// Legacy fallback for inputs without instrument keywords: guess the
    /// camera from the rootname prefix, the file kind and the filter.
    pub fn infer_from_names(rootname: &str, filename: &str, filter: &str) -> Self {
        let rootname = rootname.to_lowercase();
        if rootname.starts_with('i') {
            if filename.ends_with("flc.fits") {
                Self::Wfc3Uvis
            } else if filter.to_lowercase().starts_with("f1") {
                Self::Wfc3Ir
            } else {
                Self::Wfc3Uvis
            }
        } else if rootname.starts_with('j') {
            Self::AcsWfc
        } else {
            Self::Other("UNKNOWN".into())
        }
    }

    pub fn is_infrared(&self) -> bool {
        matches!(self, Self::Wfc3Ir)
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Wfc3Ir => "WFC3-IR",
            Self::Wfc3Uvis => "WFC3-UVIS",
            Self::AcsWfc => "ACS-WFC",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Camera {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "WFC3-IR" => Self::Wfc3Ir,
            "WFC3-UVIS" => Self::Wfc3Uvis,
            "ACS-WFC" => Self::AcsWfc,
            other => Self::Other(other.to_string()),
        })
    }
}

/// Suffix of drizzled products: `drc` for CTE-corrected `flc` inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrizzleSuffix {
    Drz,
    Drc,
}

impl DrizzleSuffix {
    pub fn for_input(filename: &str) -> Self {
        if filename.ends_with("_flc.fits") {
            Self::Drc
        } else {
            Self::Drz
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drz => "drz",
            Self::Drc => "drc",
        }
    }
}

impl fmt::Display for DrizzleSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (filter, epoch) grouping key, rendered `{filter}_e{EE}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeGroup {
    pub filter: String,
    pub epoch: i32,
}

impl FeGroup {
    pub fn new(filter: impl Into<String>, epoch: i32) -> Self {
        Self {
            filter: filter.into(),
            epoch,
        }
    }

    /// Key of the flux-scaled pseudo template built for this filter.
    pub fn pseudo(&self) -> Self {
        Self::new(format!("~{}", self.filter), self.epoch)
    }
}

impl fmt::Display for FeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_e{:02}", self.filter, self.epoch)
    }
}

impl FromStr for FeGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (filter, epoch) = s
            .split_once("_e")
            .ok_or_else(|| format!("not a filter/epoch group: {s}"))?;
        let epoch = epoch
            .parse()
            .map_err(|_| format!("bad epoch in group {s}"))?;
        if filter.is_empty() {
            return Err(format!("empty filter in group {s}"));
        }
        Ok(Self::new(filter, epoch))
    }
}

/// (filter, epoch, visit) grouping key, rendered `{filter}_e{EE}_{visit}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FevGroup {
    pub filter: String,
    pub epoch: i32,
    pub visit: String,
}

impl FevGroup {
    pub fn fe(&self) -> FeGroup {
        FeGroup::new(self.filter.clone(), self.epoch)
    }
}

impl fmt::Display for FevGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_e{:02}_{}", self.filter, self.epoch, self.visit)
    }
}

impl FromStr for FevGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (filter, rest) = s
            .split_once("_e")
            .ok_or_else(|| format!("not a filter/epoch/visit group: {s}"))?;
        let (epoch, visit) = rest
            .split_once('_')
            .ok_or_else(|| format!("missing visit in group {s}"))?;
        let epoch = epoch
            .parse()
            .map_err(|_| format!("bad epoch in group {s}"))?;
        Ok(Self {
            filter: filter.to_string(),
            epoch,
            visit: visit.to_string(),
        })
    }
}

/// Equatorial sky position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoord {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Great-circle separation in degrees (haversine).
    pub fn separation_deg(&self, other: &SkyCoord) -> f64 {
        let (ra1, dec1) = (self.ra.to_radians(), self.dec.to_radians());
        let (ra2, dec2) = (other.ra.to_radians(), other.dec.to_radians());
        let sin_ddec = ((dec2 - dec1) / 2.0).sin();
        let sin_dra = ((ra2 - ra1) / 2.0).sin();
        let a = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;
        (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
    }
}

impl fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.ra, self.dec)
    }
}
