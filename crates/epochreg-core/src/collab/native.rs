use std::path::{Path, PathBuf};

use ndarray::{Array2, Zip};
use tracing::debug;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{EpochRegError, Result};
use crate::io::fits::{read_header, FitsHeader, FitsImage};

use super::{HeaderSource, PixelArithmetic};

/// Reads primary headers straight from disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct FitsHeaderReader;

impl HeaderSource for FitsHeaderReader {
    fn read_header(&self, path: &Path) -> Result<FitsHeader> {
        read_header(path)
    }
}

/// In-process pixel arithmetic over FITS primary images.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativePixelArithmetic;

fn open(path: &Path) -> Result<FitsImage> {
    if !path.is_file() {
        return Err(EpochRegError::MissingArtifact(path.to_path_buf()));
    }
    FitsImage::open(path)
}

fn same_shape(a: &Array2<f32>, b: &Array2<f32>, first: &Path, second: &Path) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(EpochRegError::DimensionMismatch(format!(
            "{} is {:?} but {} is {:?}",
            first.display(),
            a.dim(),
            second.display(),
            b.dim()
        )));
    }
    Ok(())
}

/// Element-wise `op`, row-parallel on large images.
fn zip_pixels<F>(a: &Array2<f32>, b: &Array2<f32>, op: F) -> Array2<f32>
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    let (h, w) = a.dim();
    let zip = Zip::from(a).and(b);
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_map_collect(|&x, &y| op(x, y))
    } else {
        zip.map_collect(|&x, &y| op(x, y))
    }
}

fn keep_existing(output: &Path, clobber: bool) -> bool {
    if output.is_file() && !clobber {
        debug!(path = %output.display(), "Output exists, not clobbering");
        return true;
    }
    false
}

impl NativePixelArithmetic {
    fn binary<F>(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        clobber: bool,
        op: F,
    ) -> Result<PathBuf>
    where
        F: Fn(f32, f32) -> f32 + Send + Sync,
    {
        if keep_existing(output, clobber) {
            return Ok(output.to_path_buf());
        }
        let a = open(first)?;
        let b = open(second)?;
        same_shape(&a.data, &b.data, first, second)?;
        let data = zip_pixels(&a.data, &b.data, op);
        FitsImage::new(data, a.header).write(output)?;
        Ok(output.to_path_buf())
    }
}

/// Inverse-variance sum: `1 / (1/a + 1/b)`, zero where either weight is.
pub fn combine_weight_pixels(a: f32, b: f32) -> f32 {
    if a > 0.0 && b > 0.0 {
        1.0 / (1.0 / a + 1.0 / b)
    } else {
        0.0
    }
}

impl PixelArithmetic for NativePixelArithmetic {
    fn subtract(
        &self,
        science: &Path,
        template: &Path,
        output: &Path,
        clobber: bool,
    ) -> Result<PathBuf> {
        self.binary(science, template, output, clobber, |s, t| s - t)
    }

    fn combine_weights(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        clobber: bool,
    ) -> Result<PathBuf> {
        self.binary(first, second, output, clobber, combine_weight_pixels)
    }

    fn union_mask(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        clobber: bool,
    ) -> Result<PathBuf> {
        self.binary(first, second, output, clobber, |a, b| {
            if a != 0.0 || b != 0.0 {
                1.0
            } else {
                0.0
            }
        })
    }

    fn apply_mask(
        &self,
        image: &Path,
        mask: &Path,
        output: &Path,
        clobber: bool,
    ) -> Result<PathBuf> {
        self.binary(image, mask, output, clobber, |v, m| if m != 0.0 { 0.0 } else { v })
    }

    fn weighted_average(
        &self,
        images: &[PathBuf],
        weights: &[PathBuf],
        output: &Path,
        output_weight: &Path,
        clobber: bool,
    ) -> Result<(PathBuf, PathBuf)> {
        if images.len() != weights.len() {
            return Err(EpochRegError::DimensionMismatch(format!(
                "{} images but {} weight maps",
                images.len(),
                weights.len()
            )));
        }
        if images.is_empty() {
            return Err(EpochRegError::MissingInput(
                "no images to average".to_string(),
            ));
        }
        if keep_existing(output, clobber) && output_weight.is_file() {
            return Ok((output.to_path_buf(), output_weight.to_path_buf()));
        }

        let first = open(&images[0])?;
        let dim = first.data.dim();
        let mut numerator = Array2::<f64>::zeros(dim);
        let mut total = Array2::<f64>::zeros(dim);

        for (image_path, weight_path) in images.iter().zip(weights) {
            let image = open(image_path)?;
            let weight = open(weight_path)?;
            same_shape(&first.data, &image.data, &images[0], image_path)?;
            same_shape(&image.data, &weight.data, image_path, weight_path)?;
            Zip::from(&mut numerator)
                .and(&mut total)
                .and(&image.data)
                .and(&weight.data)
                .for_each(|n, t, &d, &w| {
                    if w > 0.0 && d.is_finite() {
                        *n += w as f64 * d as f64;
                        *t += w as f64;
                    }
                });
        }

        let average = Zip::from(&numerator)
            .and(&total)
            .map_collect(|&n, &t| if t > 0.0 { (n / t) as f32 } else { 0.0 });
        let summed = total.mapv(|t| t as f32);

        FitsImage::new(summed, first.header.clone()).write(output_weight)?;
        FitsImage::new(average, first.header).write(output)?;
        debug!(
            inputs = images.len(),
            output = %output.display(),
            "Wrote weighted average"
        );
        Ok((output.to_path_buf(), output_weight.to_path_buf()))
    }
}
