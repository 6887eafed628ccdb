//! Flat-field normalization.
//!
//! The master flat is high-pass filtered (original minus Gaussian-smoothed
//! copy) so that only pixel-to-pixel response remains, then rescaled to
//! span `[0, 1]`.

use log::{info, warn};
use ndarray::{Array2, ArrayView2, Zip};

use crate::data::model::{Frame, MasterFrame, MetadataValue};
use crate::error::{ReductionError, Result};

/// Default Gaussian sigma in pixels.
pub const DEFAULT_FLAT_SIGMA: f64 = 5.0;

/// Kernel half-width in units of sigma.
const TRUNCATE: f64 = 4.0;

/// Residual range below this fraction of the flat's magnitude counts as
/// constant. Smoothing a constant image leaves round-off of this order.
const DEGENERATE_RANGE_TOLERANCE: f64 = 1e-9;

/// Normalized 1-D Gaussian kernel of radius `round(TRUNCATE * sigma)`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Mirror an out-of-range index back into `0..len` (`d c b a | a b c d | d c b a`).
fn reflect_index(i: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let m = i.rem_euclid(period);
    if m < len {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Convolve every row of `input` with `kernel`.
fn convolve_rows(input: ArrayView2<f64>, kernel: &[f64]) -> Array2<f64> {
    let radius = (kernel.len() / 2) as isize;
    let len = input.ncols();
    let mut output = Array2::<f64>::zeros(input.dim());

    Zip::from(output.rows_mut())
        .and(input.rows())
        .par_for_each(|mut out, line| {
            for (i, o) in out.iter_mut().enumerate() {
                *o = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * line[reflect_index(i as isize + k as isize - radius, len)])
                    .sum();
            }
        });

    output
}

/// Separable Gaussian low-pass filter with reflect boundaries.
pub fn gaussian_filter(data: &Array2<f64>, sigma: f64) -> Array2<f64> {
    if data.is_empty() {
        return data.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let horizontal = convolve_rows(data.view(), &kernel);
    convolve_rows(horizontal.t(), &kernel).reversed_axes()
}

/// Small-scale structure of a flat: the flat minus its smoothed copy.
pub fn illumination_residual(data: &Array2<f64>, sigma: f64) -> Array2<f64> {
    data - &gaussian_filter(data, sigma)
}

fn check_sigma(sigma: f64) -> Result<()> {
    if sigma.is_finite() && sigma > 0.0 {
        Ok(())
    } else {
        Err(ReductionError::InvalidConfig(format!(
            "flat sigma must be a positive number, got {sigma}"
        )))
    }
}

/// Normalize the master flat to `[0, 1]`.
///
/// Returns `Ok(None)` when there is no flat master. A residual without
/// dynamic range is a [`ReductionError::DegenerateNormalization`]. A NaN or
/// infinite flat pixel is a [`ReductionError::NonFiniteFlat`].
pub fn normalize_flat(flat: Option<&MasterFrame>, sigma: f64) -> Result<Option<Frame>> {
    check_sigma(sigma)?;
    let Some(flat) = flat else {
        warn!("No flat field frames provided to create a normalized flat");
        return Ok(None);
    };

    if let Some(((row, col), &value)) = flat.data().indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(ReductionError::NonFiniteFlat { row, col, value });
    }

    let residual = illumination_residual(flat.data(), sigma);
    let min = residual.iter().copied().fold(f64::INFINITY, f64::min);
    let shifted = residual.mapv(|v| v - min);
    let max = shifted.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let magnitude = flat
        .data()
        .iter()
        .fold(1.0_f64, |m, v| m.max(v.abs()));
    if !(max > DEGENERATE_RANGE_TOLERANCE * magnitude) {
        return Err(ReductionError::DegenerateNormalization { range: max });
    }

    let normalized = shifted.mapv(|v| v / max);
    info!("Normalized flat created (sigma = {sigma})");
    Ok(Some(
        flat.frame()
            .with_data(normalized)
            .with_header_value("FLATSIG", MetadataValue::Float(sigma)),
    ))
}
