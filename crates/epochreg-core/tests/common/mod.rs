#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use epochreg_core::collab::{
    AlignRequest, BackPropagator, CombineOutput, CombineRequest, Combiner, DetectionParams,
    FitsHeaderReader, NativePixelArithmetic, PropagationOutcome, PropagationRequest, Registrar,
    TemplateArtifacts, TemplateRequest, TemplateScaler, Toolkit,
};
use epochreg_core::error::{EpochRegError, Result};
use epochreg_core::io::{FitsHeader, FitsImage};
use epochreg_core::pipeline::config::{PipelineConfig, StageSelection};
use ndarray::Array2;

pub const ROOT: &str = "sn";
pub const IMAGE_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Synthetic FITS files
// ---------------------------------------------------------------------------

/// Write a constant `IMAGE_SIZE` x `IMAGE_SIZE` image.
pub fn write_image(path: &Path, value: f32, header: FitsHeader) {
    let data = Array2::from_elem((IMAGE_SIZE, IMAGE_SIZE), value);
    FitsImage::new(data, header)
        .write(path)
        .expect("write test image");
}

/// Header values of one synthetic exposure.
#[derive(Clone, Debug)]
pub struct ExposureSpec {
    pub rootname: &'static str,
    pub filter: &'static str,
    pub mjd: f64,
    /// `LINENUM` value, e.g. `A1.001`.
    pub linenum: &'static str,
    pub detector: &'static str,
}

impl ExposureSpec {
    pub fn ir(rootname: &'static str, filter: &'static str, mjd: f64, linenum: &'static str) -> Self {
        Self {
            rootname,
            filter,
            mjd,
            linenum,
            detector: "IR",
        }
    }

    pub fn uvis(rootname: &'static str, filter: &'static str, mjd: f64, linenum: &'static str) -> Self {
        Self {
            detector: "UVIS",
            ..Self::ir(rootname, filter, mjd, linenum)
        }
    }

    pub fn header(&self) -> FitsHeader {
        FitsHeader::new()
            .with("ROOTNAME", self.rootname.to_uppercase())
            .with("INSTRUME", "WFC3")
            .with("DETECTOR", self.detector)
            .with("FILTER", self.filter.to_uppercase())
            .with("EXPSTART", self.mjd)
            .with("PROPOSID", 12099i64)
            .with("LINENUM", self.linenum)
    }

    pub fn file_name(&self) -> String {
        format!("{}_flt.fits", self.rootname)
    }
}

/// A scratch workspace with `{ROOT}.flt/` holding the given exposures.
pub fn workspace(exposures: &[ExposureSpec]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let top = dir.path().to_path_buf();
    let input = top.join(format!("{ROOT}.flt"));
    fs::create_dir_all(&input).expect("create input dir");
    for spec in exposures {
        write_image(&input.join(spec.file_name()), 1.0, spec.header());
    }
    (dir, top)
}

/// Two IR visits of F125W, one per epoch, two exposures each.
pub fn two_epoch_exposures() -> Vec<ExposureSpec> {
    vec![
        ExposureSpec::ir("ib1a01aaq", "F125W", 55000.0, "A1.001"),
        ExposureSpec::ir("ib1a01abq", "F125W", 55000.1, "A1.002"),
        ExposureSpec::ir("ib1a02aaq", "F125W", 55020.0, "B1.001"),
        ExposureSpec::ir("ib1a02abq", "F125W", 55020.1, "B1.002"),
    ]
}

pub fn config(top: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(ROOT);
    config.top_dir = top.to_path_buf();
    config.stages = StageSelection::all();
    config
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Call {
    Combine(CombineRequest),
    CleanHotPixels(PathBuf),
    Align(AlignRequest),
    SourceCatalog(PathBuf),
    Propagate(PropagationRequest),
    Template(TemplateRequest),
}

/// Collaborators that record each call and write plausible products.
#[derive(Default)]
pub struct FakeTools {
    calls: Mutex<Vec<Call>>,
    colliding: Mutex<Vec<String>>,
}

impl FakeTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the back-propagator report `wcs_name` as already taken.
    pub fn collide_on(&self, wcs_name: &str) {
        self.colliding.lock().unwrap().push(wcs_name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn combines(&self) -> Vec<CombineRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Combine(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn aligns(&self) -> Vec<AlignRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Align(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn propagations(&self) -> Vec<PropagationRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Propagate(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn hot_pixel_cleanups(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::CleanHotPixels(_)))
            .count()
    }

    pub fn templates(&self) -> Vec<TemplateRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Template(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Fake collaborators with the native header reader and pixel
    /// arithmetic.
    pub fn toolkit(self: &Arc<Self>) -> Toolkit {
        Toolkit {
            combiner: self.clone(),
            registrar: self.clone(),
            propagator: self.clone(),
            pixels: Arc::new(NativePixelArithmetic),
            templates: self.clone(),
            headers: Arc::new(FitsHeaderReader),
        }
    }
}

fn rootname_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('_').next())
        .unwrap_or_default()
        .to_string()
}

fn set_wcs_name(path: &Path, wcs_name: &str) -> Result<()> {
    let mut image = FitsImage::open(path)?;
    image.header.set("WCSNAME", wcs_name);
    image.write(path)
}

impl Combiner for FakeTools {
    fn combine(&self, request: &CombineRequest) -> Result<CombineOutput> {
        self.record(Call::Combine(request.clone()));
        let drz = match request.inputs.first() {
            Some(first)
                if !request.output_root.ends_with("_stack")
                    && first.to_string_lossy().ends_with("_flc.fits") =>
            {
                "drc"
            }
            _ => "drz",
        };
        let root = &request.output_root;
        let name = |kind: &str| format!("{root}_{drz}_{kind}.fits");
        let value = request.inputs.len() as f32;
        fs::create_dir_all(&request.workdir)?;
        for (kind, v) in [("sci", value), ("wht", 1.0), ("ctx", 1.0), ("bpx", 0.0)] {
            write_image(&request.workdir.join(name(kind)), v, FitsHeader::new());
        }
        if let Some(key) = &request.options.wcs_key {
            set_wcs_name(&request.workdir.join(name("sci")), key)?;
        }
        if request.options.single_products {
            for input in &request.inputs {
                let rootname = rootname_of(input);
                for (kind, v) in [("sci", 1.0), ("wht", 1.0), ("bpx", 0.0)] {
                    let file = format!("{root}_{rootname}_single_{kind}.fits");
                    write_image(&request.workdir.join(file), v, FitsHeader::new());
                }
            }
        }
        Ok(CombineOutput {
            science: PathBuf::from(name("sci")),
            weight: PathBuf::from(name("wht")),
            context: Some(PathBuf::from(name("ctx"))),
            mask: Some(PathBuf::from(name("bpx"))),
        })
    }

    fn clean_hot_pixels(&self, workdir: &Path, _first: &Path, _second: &Path) -> Result<()> {
        self.record(Call::CleanHotPixels(workdir.to_path_buf()));
        Ok(())
    }
}

impl Registrar for FakeTools {
    fn align(&self, request: &AlignRequest) -> Result<String> {
        self.record(Call::Align(request.clone()));
        for image in &request.images {
            set_wcs_name(image, &request.wcs_name)?;
        }
        Ok(request.wcs_name.clone())
    }

    fn source_catalog(
        &self,
        workdir: &Path,
        image: &Path,
        _detection: &DetectionParams,
    ) -> Result<PathBuf> {
        self.record(Call::SourceCatalog(image.to_path_buf()));
        let catalog = workdir.join("refim_sources.cat");
        fs::write(&catalog, "# ra dec flux\n")?;
        Ok(catalog)
    }
}

impl BackPropagator for FakeTools {
    fn propagate(&self, request: &PropagationRequest) -> Result<PropagationOutcome> {
        self.record(Call::Propagate(request.clone()));
        if self.colliding.lock().unwrap().contains(&request.wcs_name) {
            return Ok(PropagationOutcome::KeyCollision {
                existing: request.wcs_name.clone(),
            });
        }
        for target in &request.targets {
            set_wcs_name(target, &request.wcs_name)?;
        }
        Ok(PropagationOutcome::Applied)
    }
}

impl TemplateScaler for FakeTools {
    fn scaled_template(&self, request: &TemplateRequest) -> Result<TemplateArtifacts> {
        self.record(Call::Template(request.clone()));
        let science = request.output.clone();
        let sibling = |kind: &str| -> Result<PathBuf> {
            let name = science
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix("_sci.fits"))
                .ok_or_else(|| EpochRegError::MissingInput("template name".into()))?;
            Ok(science.with_file_name(format!("{name}_{kind}.fits")))
        };
        let weight = sibling("wht")?;
        let mask = sibling("bpx")?;
        write_image(&science, 1.0, FitsHeader::new());
        write_image(&weight, 1.0, FitsHeader::new());
        write_image(&mask, 0.0, FitsHeader::new());
        Ok(TemplateArtifacts {
            science,
            weight,
            mask,
        })
    }
}
