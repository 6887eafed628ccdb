use std::fmt;

use log::{info, warn};

use crate::config::ReductionConfig;
use crate::data::classify::group_frames;
use crate::data::model::{CalibrationSet, Frame, FrameCategory, MetadataValue, Spectrum};
use crate::error::{ReductionError, Result};

use super::correct::{CorrectionChain, CorrectionReport};
use super::extract::{extract_spectrum, TraceEndpoints, TracePointSource};
use super::flat::normalize_flat;
use super::stack::stack_group;
use super::wavecal::calibrate;

/// Summary of a reduction run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReductionReport {
    pub dropped_frames: usize,
    /// Categories that had no frames.
    pub missing_masters: Vec<FrameCategory>,
    pub corrections: CorrectionReport,
    pub trace: Option<TraceEndpoints>,
    pub wavelength_calibrated: bool,
}

impl fmt::Display for ReductionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dropped frames: {}", self.dropped_frames)?;
        let missing: Vec<&str> = self.missing_masters.iter().map(|c| c.as_str()).collect();
        writeln!(f, "missing masters: [{}]", missing.join(", "))?;
        let applied: Vec<String> = self
            .corrections
            .applied
            .iter()
            .map(ToString::to_string)
            .collect();
        writeln!(f, "applied: [{}]", applied.join(", "))?;
        for skipped in &self.corrections.skipped {
            writeln!(f, "  {skipped}")?;
        }
        if self.corrections.masked_pixels > 0 {
            writeln!(f, "masked zero-flat pixels: {}", self.corrections.masked_pixels)?;
        }
        write!(
            f,
            "wavelength axis: {}",
            if self.wavelength_calibrated {
                "calibrated"
            } else {
                "pixel"
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct ReductionOutput {
    /// Masters as stacked, with the normalized flat.
    pub masters: CalibrationSet,
    /// Masters after the correction chain.
    pub calibration: CalibrationSet,
    pub science: Spectrum,
    pub lamp: Option<Spectrum>,
    pub report: ReductionReport,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ReductionConfig,
}

impl Pipeline {
    pub fn new(config: ReductionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    /// Classify, stack, correct, extract and (when a dispersion solution is
    /// configured) wavelength-calibrate `frames`.
    pub fn run(
        &self,
        frames: impl IntoIterator<Item = Frame>,
        trace_source: &mut dyn TracePointSource,
    ) -> Result<ReductionOutput> {
        let mut report = ReductionReport::default();

        let classified = group_frames(frames, &self.config.tag_key)?;
        report.dropped_frames = classified.dropped;
        if classified.dropped > 0 {
            warn!("Dropped {} unclassifiable frames", classified.dropped);
        }
        info!("Classified {} frames", classified.group.len());

        let stacked = stack_group(&classified.group)?;
        report.missing_masters = stacked.missing;
        let mut masters = CalibrationSet::from_masters(stacked.masters);
        if !masters.contains(FrameCategory::Science) {
            return Err(ReductionError::MissingScience);
        }

        if let Some(flat) =
            normalize_flat(masters.get(FrameCategory::Flat), self.config.flat_sigma)?
        {
            masters = masters.with_normalized_flat(flat);
        }

        let (calibration, corrections) =
            CorrectionChain::new(self.config.zero_flat_policy).apply(&masters)?;
        report.corrections = corrections;

        let science_frame = calibration
            .get(FrameCategory::Science)
            .ok_or(ReductionError::MissingScience)?
            .frame();
        let trace = trace_source.trace_endpoints(science_frame)?;
        report.trace = Some(trace);

        let radius = self.config.aperture_radius;
        let mut science = tag(
            extract_spectrum(science_frame, &trace, radius)?,
            FrameCategory::Science,
        );
        let mut lamp = match calibration.get(FrameCategory::Lamp) {
            Some(master) => Some(tag(
                extract_spectrum(master.frame(), &trace, radius)?,
                FrameCategory::Lamp,
            )),
            None => None,
        };

        match &self.config.dispersion {
            Some(solution) => {
                science = calibrate(&science, solution)?;
                lamp = lamp.map(|l| calibrate(&l, solution)).transpose()?;
                report.wavelength_calibrated = true;
            }
            None => warn!("No dispersion solution configured; spectrum stays pixel-indexed"),
        }

        info!("Reduction finished");
        Ok(ReductionOutput {
            masters,
            calibration,
            science,
            lamp,
            report,
        })
    }
}

fn tag(spectrum: Spectrum, category: FrameCategory) -> Spectrum {
    let mut spectrum = spectrum.with_label(category.as_str());
    spectrum.metadata.insert(
        "category".into(),
        MetadataValue::String(category.as_str().into()),
    );
    spectrum
}
