//! Ordered calibration corrections: bias, dark, lamp-dark, flat.

use std::fmt;

use log::{info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::model::{CalibrationSet, Frame, FrameCategory, MasterFrame};
use crate::error::{ReductionError, Result, Stage};

/// Stages in the order the chain runs them.
pub const CORRECTION_ORDER: [Stage; 4] = [
    Stage::BiasSubtraction,
    Stage::DarkSubtraction,
    Stage::LampDarkSubtraction,
    Stage::FlatFielding,
];

const BIAS_TARGETS: [FrameCategory; 5] = [
    FrameCategory::Dark,
    FrameCategory::LampDark,
    FrameCategory::Flat,
    FrameCategory::Lamp,
    FrameCategory::Science,
];

const FLAT_TARGETS: [FrameCategory; 2] = [FrameCategory::Science, FrameCategory::Lamp];

/// What to do with pixels where the normalized flat is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroFlatPolicy {
    /// Abort with [`ReductionError::DivisionSingularity`].
    #[default]
    Fail,
    /// Keep the pixel's value undivided and count it.
    LeaveUncorrected,
}

/// A correction that was skipped because a frame it needs is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingInput {
    pub stage: Stage,
    pub category: FrameCategory,
}

impl fmt::Display for MissingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped: no {} master", self.stage, self.category)
    }
}

/// What the chain did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionReport {
    /// Stages that modified at least one frame.
    pub applied: Vec<Stage>,
    pub skipped: Vec<MissingInput>,
    /// Pixels left undivided under [`ZeroFlatPolicy::LeaveUncorrected`].
    pub masked_pixels: usize,
}

impl CorrectionReport {
    fn skip(&mut self, stage: Stage, category: FrameCategory) {
        let missing = MissingInput { stage, category };
        warn!("{missing}");
        self.skipped.push(missing);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectionChain {
    policy: ZeroFlatPolicy,
}

impl CorrectionChain {
    pub fn new(policy: ZeroFlatPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ZeroFlatPolicy {
        self.policy
    }

    /// Run every stage in [`CORRECTION_ORDER`]. `set` itself is left untouched.
    pub fn apply(&self, set: &CalibrationSet) -> Result<(CalibrationSet, CorrectionReport)> {
        self.apply_stages(set, &CORRECTION_ORDER)
    }

    fn apply_stages(
        &self,
        set: &CalibrationSet,
        stages: &[Stage],
    ) -> Result<(CalibrationSet, CorrectionReport)> {
        let mut report = CorrectionReport::default();
        let mut current = set.clone();
        for &stage in stages {
            current = match stage {
                Stage::BiasSubtraction => subtract_bias(&current, &mut report)?,
                Stage::DarkSubtraction => subtract_from(
                    &current,
                    stage,
                    FrameCategory::Dark,
                    FrameCategory::Science,
                    &mut report,
                )?,
                Stage::LampDarkSubtraction => subtract_from(
                    &current,
                    stage,
                    FrameCategory::LampDark,
                    FrameCategory::Lamp,
                    &mut report,
                )?,
                Stage::FlatFielding => self.flat_field(&current, &mut report)?,
                other => {
                    return Err(ReductionError::InvalidConfig(format!(
                        "{other} is not a correction stage"
                    )))
                }
            };
        }
        Ok((current, report))
    }

    fn flat_field(
        &self,
        set: &CalibrationSet,
        report: &mut CorrectionReport,
    ) -> Result<CalibrationSet> {
        let stage = Stage::FlatFielding;
        let Some(flat) = set.normalized_flat() else {
            report.skip(stage, FrameCategory::Flat);
            return Ok(set.clone());
        };

        let mut next = set.clone();
        let mut touched = false;
        for category in FLAT_TARGETS {
            let Some(target) = set.get(category) else {
                report.skip(stage, category);
                continue;
            };
            let (corrected, masked) = self.divide(target, flat)?;
            if masked > 0 {
                warn!("{masked} {category} pixels left uncorrected where the flat is zero");
            }
            report.masked_pixels += masked;
            next = next.with_master(corrected);
            touched = true;
        }
        if touched {
            info!("Applied {stage}");
            report.applied.push(stage);
        }
        Ok(next)
    }

    fn divide(&self, target: &MasterFrame, flat: &Frame) -> Result<(MasterFrame, usize)> {
        check_shape(Stage::FlatFielding, target, flat.shape())?;
        let flat = flat.data();

        if self.policy == ZeroFlatPolicy::Fail {
            if let Some(((row, col), _)) = flat.indexed_iter().find(|(_, v)| **v == 0.0) {
                return Err(ReductionError::DivisionSingularity {
                    category: target.category(),
                    row,
                    col,
                });
            }
        }

        let masked = flat.iter().filter(|v| **v == 0.0).count();
        let mut data = target.data().clone();
        data.zip_mut_with(flat, |t, &f| {
            if f != 0.0 {
                *t /= f;
            }
        });
        Ok((target.with_data(data), masked))
    }
}

fn check_shape(stage: Stage, target: &MasterFrame, expected: (usize, usize)) -> Result<()> {
    if target.shape() != expected {
        return Err(ReductionError::ShapeMismatch {
            stage,
            category: target.category(),
            expected,
            actual: target.shape(),
        });
    }
    Ok(())
}

fn difference(stage: Stage, target: &MasterFrame, corrector: &MasterFrame) -> Result<MasterFrame> {
    check_shape(stage, target, corrector.shape())?;
    let data: Array2<f64> = target.data() - corrector.data();
    Ok(target.with_data(data))
}

fn subtract_bias(set: &CalibrationSet, report: &mut CorrectionReport) -> Result<CalibrationSet> {
    let stage = Stage::BiasSubtraction;
    let Some(bias) = set.get(FrameCategory::Bias) else {
        report.skip(stage, FrameCategory::Bias);
        return Ok(set.clone());
    };

    let mut next = set.clone();
    for category in BIAS_TARGETS {
        if let Some(target) = set.get(category) {
            next = next.with_master(difference(stage, target, bias)?);
        }
    }
    info!("Applied {stage}");
    report.applied.push(stage);
    Ok(next)
}

/// Subtract the `corrector` master from the `target` master, when both exist.
fn subtract_from(
    set: &CalibrationSet,
    stage: Stage,
    corrector: FrameCategory,
    target: FrameCategory,
    report: &mut CorrectionReport,
) -> Result<CalibrationSet> {
    let Some(correction) = set.get(corrector) else {
        report.skip(stage, corrector);
        return Ok(set.clone());
    };
    let Some(frame) = set.get(target) else {
        report.skip(stage, target);
        return Ok(set.clone());
    };

    let next = set.with_master(difference(stage, frame, correction)?);
    info!("Applied {stage}");
    report.applied.push(stage);
    Ok(next)
}
