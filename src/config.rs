use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::classify::DEFAULT_TAG_KEY;
use crate::error::ReductionError;
use crate::reduce::correct::ZeroFlatPolicy;
use crate::reduce::extract::{TraceEndpoints, DEFAULT_APERTURE_RADIUS};
use crate::reduce::flat::DEFAULT_FLAT_SIGMA;
use crate::reduce::wavecal::PolynomialDispersion;

/// Settings for one reduction run, usually read from `reduction.json`.
///
/// ```json
/// {
///   "tag_key": "IMAGETYP",
///   "flat_sigma": 5.0,
///   "aperture_radius": 5,
///   "trace": { "start": [12.0, 40.5], "end": [240.0, 52.0] },
///   "dispersion": { "coefficients": [4000.0, 2.1], "unit": "Angstrom" },
///   "zero_flat_policy": "fail",
///   "input_dir": "raw",
///   "output_dir": "reduced"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Header card holding the frame type.
    pub tag_key: String,
    pub flat_sigma: f64,
    pub aperture_radius: usize,
    /// Trace for non-interactive runs.
    pub trace: Option<TraceEndpoints>,
    pub dispersion: Option<PolynomialDispersion>,
    pub zero_flat_policy: ZeroFlatPolicy,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Write PNG quick-looks of the master frames.
    pub write_previews: bool,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            tag_key: DEFAULT_TAG_KEY.to_string(),
            flat_sigma: DEFAULT_FLAT_SIGMA,
            aperture_radius: DEFAULT_APERTURE_RADIUS,
            trace: None,
            dispersion: None,
            zero_flat_policy: ZeroFlatPolicy::default(),
            input_dir: PathBuf::from("raw"),
            output_dir: PathBuf::from("reduced"),
            write_previews: false,
        }
    }
}

impl ReductionConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ReductionConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("serializing config")?;
        std::fs::write(path, text).with_context(|| format!("writing config {}", path.display()))
    }

    pub fn validate(&self) -> std::result::Result<(), ReductionError> {
        let invalid = |msg: String| -> std::result::Result<(), ReductionError> {
            Err(ReductionError::InvalidConfig(msg))
        };

        if self.tag_key.trim().is_empty() {
            return invalid("tag_key must not be empty".into());
        }
        if !(self.flat_sigma.is_finite() && self.flat_sigma > 0.0) {
            return invalid(format!(
                "flat_sigma must be a positive number, got {}",
                self.flat_sigma
            ));
        }
        if let Some(trace) = &self.trace {
            let points = [trace.start.x, trace.start.y, trace.end.x, trace.end.y];
            if !points.iter().all(|v| v.is_finite()) {
                return invalid(format!("trace points must be finite, got {points:?}"));
            }
        }
        if let Some(dispersion) = &self.dispersion {
            if dispersion.coefficients.is_empty() {
                return invalid("dispersion needs at least one coefficient".into());
            }
            if !dispersion.coefficients.iter().all(|c| c.is_finite()) {
                return invalid("dispersion coefficients must be finite".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::extract::TracePoint;

    #[test]
    fn empty_object_gives_defaults() {
        let config: ReductionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReductionConfig::default());
        assert_eq!(config.tag_key, "IMAGETYP");
        assert_eq!(config.flat_sigma, 5.0);
        assert_eq!(config.aperture_radius, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        let json = r#"{
            "tag_key": "FRAMETYP",
            "trace": { "start": [12.0, 40.5], "end": [240.0, 52.0] },
            "dispersion": { "coefficients": [4000.0, 2.1], "unit": "nm" },
            "zero_flat_policy": "leave_uncorrected",
            "write_previews": true
        }"#;
        let config: ReductionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tag_key, "FRAMETYP");
        assert_eq!(config.trace.unwrap().end, TracePoint::new(240.0, 52.0));
        assert_eq!(config.dispersion.as_ref().unwrap().unit, "nm");
        assert_eq!(config.zero_flat_policy, ZeroFlatPolicy::LeaveUncorrected);
        assert!(config.write_previews);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ReductionConfig {
            flat_sigma: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.flat_sigma = 5.0;
        config.dispersion = Some(PolynomialDispersion::new(vec![], "Angstrom"));
        assert!(config.validate().is_err());

        config.dispersion = None;
        config.trace = Some(TraceEndpoints::new(
            TracePoint::new(f64::NAN, 1.0),
            TracePoint::new(10.0, 1.0),
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reduction.json");
        let config = ReductionConfig {
            trace: Some(TraceEndpoints::new(
                TracePoint::new(1.0, 2.0),
                TracePoint::new(30.0, 4.0),
            )),
            dispersion: Some(PolynomialDispersion::linear(4000.0, 1.5, "Angstrom")),
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(ReductionConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn from_file_reports_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"flat_sigma": -2}"#).unwrap();
        let err = ReductionConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("flat_sigma"), "{err}");
    }
}
