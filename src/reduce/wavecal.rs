//! Pixel to wavelength mapping.
//!
//! Only the application of a dispersion solution lives here. Fitting one
//! (line identification against the lamp spectrum) is done elsewhere and
//! handed in as coefficients.

use log::info;
use serde::{Deserialize, Serialize};

use crate::data::model::{Spectrum, WavelengthScale};
use crate::error::{ReductionError, Result};

/// Maps a (fractional) pixel position to a wavelength.
pub trait DispersionSolution {
    fn wavelength(&self, pixel: f64) -> f64;

    /// Unit of the returned wavelengths.
    fn unit(&self) -> &str;
}

fn default_unit() -> String {
    "Angstrom".to_string()
}

/// `λ(p) = c0 + c1·p + c2·p² + …`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialDispersion {
    /// Lowest degree first.
    pub coefficients: Vec<f64>,
    #[serde(default = "default_unit")]
    pub unit: String,
}

impl PolynomialDispersion {
    pub fn new(coefficients: Vec<f64>, unit: impl Into<String>) -> Self {
        Self {
            coefficients,
            unit: unit.into(),
        }
    }

    pub fn linear(offset: f64, dispersion: f64, unit: impl Into<String>) -> Self {
        Self::new(vec![offset, dispersion], unit)
    }
}

impl DispersionSolution for PolynomialDispersion {
    fn wavelength(&self, pixel: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * pixel + c)
    }

    fn unit(&self) -> &str {
        &self.unit
    }
}

/// Map every pixel through `solution`.
///
/// The result must be finite and strictly monotonic, in either direction.
/// Otherwise [`ReductionError::Monotonicity`] names the first bad sample.
pub fn map_pixels(pixels: &[f64], solution: &dyn DispersionSolution) -> Result<Vec<f64>> {
    let wavelengths: Vec<f64> = pixels.iter().map(|&p| solution.wavelength(p)).collect();

    if let Some(index) = wavelengths.iter().position(|w| !w.is_finite()) {
        return Err(ReductionError::Monotonicity { index });
    }

    if wavelengths.len() >= 2 {
        let increasing = wavelengths[1] > wavelengths[0];
        let bad = wavelengths.windows(2).position(|pair| {
            if increasing {
                pair[1] <= pair[0]
            } else {
                pair[1] >= pair[0]
            }
        });
        if let Some(i) = bad {
            return Err(ReductionError::Monotonicity { index: i + 1 });
        }
    }

    Ok(wavelengths)
}

/// Replace a pixel-indexed axis with calibrated wavelengths.
pub fn calibrate(spectrum: &Spectrum, solution: &dyn DispersionSolution) -> Result<Spectrum> {
    if spectrum.scale().is_calibrated() {
        return Err(ReductionError::InvalidConfig(format!(
            "spectrum is already calibrated ({})",
            spectrum.scale()
        )));
    }
    let wavelengths = map_pixels(spectrum.wavelength(), solution)?;
    info!(
        "Wavelength calibrated {} samples in {}",
        wavelengths.len(),
        solution.unit()
    );
    spectrum.with_wavelength(
        wavelengths,
        WavelengthScale::Calibrated {
            unit: solution.unit().to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel_spectrum(n: usize) -> Spectrum {
        let pixels: Vec<f64> = (0..n).map(|i| i as f64).collect();
        Spectrum::new(pixels, vec![1.0; n], None, WavelengthScale::Pixel)
            .unwrap()
            .with_label("science")
    }

    #[test]
    fn horner_evaluation() {
        let poly = PolynomialDispersion::new(vec![4000.0, 2.0, 0.5], "Angstrom");
        assert_eq!(poly.wavelength(0.0), 4000.0);
        assert_eq!(poly.wavelength(2.0), 4000.0 + 4.0 + 2.0);
        assert_eq!(PolynomialDispersion::new(vec![], "nm").wavelength(3.0), 0.0);
    }

    #[test]
    fn calibrate_maps_pixels_and_tags_the_unit() {
        let spectrum = pixel_spectrum(5);
        let out = calibrate(&spectrum, &PolynomialDispersion::linear(6000.0, -1.5, "nm")).unwrap();
        assert_eq!(out.wavelength(), &[6000.0, 5998.5, 5997.0, 5995.5, 5994.0]);
        assert_eq!(out.flux(), spectrum.flux());
        assert_eq!(out.label(), Some("science"));
        assert_eq!(out.scale(), &WavelengthScale::Calibrated { unit: "nm".into() });
    }

    #[test]
    fn non_monotonic_mapping_fails() {
        // Vertex of p² - 4p at p = 2.
        let poly = PolynomialDispersion::new(vec![0.0, -4.0, 1.0], "Angstrom");
        let err = map_pixels(&[0.0, 1.0, 2.0, 3.0, 4.0], &poly).unwrap_err();
        assert!(matches!(err, ReductionError::Monotonicity { index: 3 }));

        let flat = PolynomialDispersion::new(vec![5000.0], "Angstrom");
        assert!(map_pixels(&[0.0, 1.0], &flat).is_err());
    }

    #[test]
    fn non_finite_mapping_fails() {
        let poly = PolynomialDispersion::new(vec![0.0, f64::NAN], "Angstrom");
        assert!(matches!(
            map_pixels(&[0.0, 1.0], &poly),
            Err(ReductionError::Monotonicity { .. })
        ));
    }

    #[test]
    fn calibrated_spectrum_cannot_be_calibrated_again() {
        let poly = PolynomialDispersion::linear(4000.0, 1.0, "Angstrom");
        let once = calibrate(&pixel_spectrum(3), &poly).unwrap();
        assert!(matches!(
            calibrate(&once, &poly),
            Err(ReductionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unit_defaults_to_angstrom() {
        let poly: PolynomialDispersion =
            serde_json::from_str(r#"{"coefficients": [4000.0, 1.2]}"#).unwrap();
        assert_eq!(poly.unit(), "Angstrom");
    }
}
