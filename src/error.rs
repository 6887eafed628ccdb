use std::fmt;

use thiserror::Error;

use crate::data::model::FrameCategory;

// ---------------------------------------------------------------------------
// Stage – where in the reduction an error or skip happened
// ---------------------------------------------------------------------------

/// Processing stage, used to label errors and skipped corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Classify,
    Stack,
    NormalizeFlat,
    BiasSubtraction,
    DarkSubtraction,
    LampDarkSubtraction,
    FlatFielding,
    Extraction,
    WavelengthCalibration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classify => write!(f, "classification"),
            Self::Stack => write!(f, "stacking"),
            Self::NormalizeFlat => write!(f, "flat normalization"),
            Self::BiasSubtraction => write!(f, "bias subtraction"),
            Self::DarkSubtraction => write!(f, "dark subtraction"),
            Self::LampDarkSubtraction => write!(f, "lamp-dark subtraction"),
            Self::FlatFielding => write!(f, "flat fielding"),
            Self::Extraction => write!(f, "extraction"),
            Self::WavelengthCalibration => write!(f, "wavelength calibration"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trace geometry faults
// ---------------------------------------------------------------------------

/// Why a trace or its aperture cannot be laid over the frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceFault {
    #[error("trace endpoints share column {x}, slope is undefined")]
    ZeroLength { x: f64 },

    #[error("trace endpoints must be finite, got ({x1}, {y1}) and ({x2}, {y2})")]
    NonFinite { x1: f64, y1: f64, x2: f64, y2: f64 },

    #[error("trace column {column} is outside the frame (0..{cols})")]
    ColumnOutOfBounds { column: i64, cols: usize },

    #[error("aperture rows {first_row}..={last_row} at column {column} exceed the frame (0..{rows})")]
    ApertureOutOfBounds {
        column: i64,
        first_row: i64,
        last_row: i64,
        rows: usize,
    },
}

// ---------------------------------------------------------------------------
// ReductionError
// ---------------------------------------------------------------------------

/// Fatal conditions raised by the reduction core.
///
/// Skipped corrections are not errors, see
/// [`MissingInput`](crate::reduce::correct::MissingInput).
#[derive(Debug, Error)]
pub enum ReductionError {
    #[error("{stage}: {category} frame has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        stage: Stage,
        category: FrameCategory,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("flat normalization: residual has no dynamic range (range {range:e})")]
    DegenerateNormalization { range: f64 },

    #[error("flat normalization: master flat has non-finite value {value} at row {row}, column {col}")]
    NonFiniteFlat { row: usize, col: usize, value: f64 },

    #[error("flat fielding: normalized flat is zero at row {row}, column {col} of the {category} frame")]
    DivisionSingularity {
        category: FrameCategory,
        row: usize,
        col: usize,
    },

    #[error("extraction: {0}")]
    TraceGeometry(#[from] TraceFault),

    #[error("wavelength calibration: mapping is not strictly monotonic at sample {index}")]
    Monotonicity { index: usize },

    #[error("no science frames provided, nothing to extract")]
    MissingScience,

    #[error("trace point selection was cancelled before two points were chosen")]
    TraceCancelled,

    #[error("trace picker failed: {0}")]
    Interactive(String),

    #[error("spectrum arrays differ in length: wavelength {wavelength}, flux {flux}, error {error:?}")]
    SpectrumLength {
        wavelength: usize,
        flux: usize,
        error: Option<usize>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReductionError {
    /// The stage this error belongs to, when it can be attributed to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ShapeMismatch { stage, .. } => Some(*stage),
            Self::DegenerateNormalization { .. } | Self::NonFiniteFlat { .. } => {
                Some(Stage::NormalizeFlat)
            }
            Self::DivisionSingularity { .. } => Some(Stage::FlatFielding),
            Self::TraceGeometry(_) | Self::TraceCancelled | Self::Interactive(_) => {
                Some(Stage::Extraction)
            }
            Self::Monotonicity { .. } => Some(Stage::WavelengthCalibration),
            Self::MissingScience => Some(Stage::Stack),
            Self::SpectrumLength { .. } | Self::InvalidConfig(_) => None,
        }
    }

    /// The frame category involved, when there is one.
    pub fn category(&self) -> Option<FrameCategory> {
        match self {
            Self::ShapeMismatch { category, .. } | Self::DivisionSingularity { category, .. } => {
                Some(*category)
            }
            Self::DegenerateNormalization { .. } | Self::NonFiniteFlat { .. } => {
                Some(FrameCategory::Flat)
            }
            Self::MissingScience | Self::TraceGeometry(_) => Some(FrameCategory::Science),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReductionError>;
