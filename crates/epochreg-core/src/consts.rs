/// Default maximum span of one epoch in days, measured from its first exposure.
pub const DEFAULT_EPOCH_SPAN_DAYS: f64 = 5.0;

/// Epoch number given to off-target or otherwise excluded exposures.
pub const EXCLUDED_EPOCH: i32 = -1;

/// Filter names are normalized to at most this many lowercase characters.
pub const FILTER_NAME_MAX_LEN: usize = 5;

/// Default on-target radius around the requested target position.
pub const DEFAULT_TARGET_RADIUS_ARCMIN: f64 = 2.5;

/// Group size from which the registered combine switches to the
/// flux-preserving median.
pub const FLUX_PRESERVING_MIN_EXPOSURES: usize = 7;

/// The multi-epoch stack uses the median combine above this many exposures.
pub const STACK_MEDIAN_ABOVE_EXPOSURES: usize = 7;

/// Number of matched objects a rotation+scale fit needs at minimum.
pub const ROTSCALE_MIN_OBJECTS: u32 = 3;

/// Default catalog matching radius for registration.
pub const DEFAULT_SEARCH_RADIUS_ARCSEC: f64 = 1.5;

/// Matching radius used in single-star mode when none was given.
pub const SINGLE_STAR_SEARCH_RADIUS_ARCSEC: f64 = 10.0;

/// Upper bound on the detection threshold in single-star mode.
pub const SINGLE_STAR_MAX_THRESHOLD: f64 = 0.5;

/// Default cosmic-ray rejection SNR thresholds.
pub const DEFAULT_CR_SNR: [f64; 2] = [5.0, 4.5];

/// WCS solution name used for intra-visit registration.
pub const INTRAVISIT_WCS_NAME: &str = "INTRAVIS";

/// Default directory of bandpass curves for template scaling.
pub const DEFAULT_BANDPASS_DIR: &str = "HSTFILTERS";

/// FITS logical record size in bytes.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// FITS header card size in bytes.
pub const FITS_CARD_SIZE: usize = 80;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;
