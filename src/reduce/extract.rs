//! Aperture extraction along a straight trace.

use log::{debug, info};
use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::data::model::{Frame, MetadataValue, Spectrum, WavelengthScale};
use crate::error::{Result, TraceFault};

/// Default aperture half-width in rows.
pub const DEFAULT_APERTURE_RADIUS: usize = 5;

/// A point on the detector, `x` = column, `y` = row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct TracePoint {
    pub x: f64,
    pub y: f64,
}

impl TracePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for TracePoint {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<TracePoint> for [f64; 2] {
    fn from(p: TracePoint) -> Self {
        [p.x, p.y]
    }
}

/// The two points defining a linear trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceEndpoints {
    pub start: TracePoint,
    pub end: TracePoint,
}

impl TraceEndpoints {
    pub fn new(start: TracePoint, end: TracePoint) -> Self {
        Self { start, end }
    }

    /// Endpoints ordered by column, rejecting non-finite or vertical traces.
    pub fn ordered(&self) -> std::result::Result<(TracePoint, TracePoint), TraceFault> {
        let (a, b) = (self.start, self.end);
        if ![a.x, a.y, b.x, b.y].iter().all(|v| v.is_finite()) {
            return Err(TraceFault::NonFinite {
                x1: a.x,
                y1: a.y,
                x2: b.x,
                y2: b.y,
            });
        }
        if a.x == b.x {
            return Err(TraceFault::ZeroLength { x: a.x });
        }
        Ok(if a.x < b.x { (a, b) } else { (b, a) })
    }

    /// Rounded trace row at column `x`. Kept in `f64` so rows far off the
    /// frame are bounds-checked before any integer conversion.
    fn row_at(start: TracePoint, end: TracePoint, x: f64) -> f64 {
        let slope = (end.y - start.y) / (end.x - start.x);
        (start.y + slope * (x - start.x)).round()
    }
}

/// Supplies trace endpoints for a frame.
pub trait TracePointSource {
    fn trace_endpoints(&mut self, frame: &Frame) -> Result<TraceEndpoints>;
}

/// Endpoints taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct FixedTracePoints(pub TraceEndpoints);

impl TracePointSource for FixedTracePoints {
    fn trace_endpoints(&mut self, _frame: &Frame) -> Result<TraceEndpoints> {
        Ok(self.0)
    }
}

/// Sum `frame` over rows `y(x) - radius ..= y(x) + radius` for every column
/// the trace spans.
///
/// The wavelength axis is the column index, tagged [`WavelengthScale::Pixel`].
/// Columns or aperture rows outside the frame are an error, never clipped.
pub fn extract_spectrum(
    frame: &Frame,
    endpoints: &TraceEndpoints,
    radius: usize,
) -> Result<Spectrum> {
    let (start, end) = endpoints.ordered()?;
    let (rows, cols) = frame.shape();
    let first_col = start.x.round() as i64;
    let last_col = end.x.round() as i64;
    for column in [first_col, last_col] {
        if column < 0 || column >= cols as i64 {
            return Err(TraceFault::ColumnOutOfBounds { column, cols }.into());
        }
    }

    let data = frame.data();
    let mut wavelength = Vec::with_capacity((last_col - first_col + 1) as usize);
    let mut flux = Vec::with_capacity(wavelength.capacity());

    for column in first_col..=last_col {
        let centre = TraceEndpoints::row_at(start, end, column as f64);
        let (lo, hi) = (centre - radius as f64, centre + radius as f64);
        if !(lo >= 0.0 && hi < rows as f64) {
            // `as` saturates, so far-off rows still report sensibly.
            return Err(TraceFault::ApertureOutOfBounds {
                column,
                first_row: lo as i64,
                last_row: hi as i64,
                rows,
            }
            .into());
        }
        let sum: f64 = data
            .slice(s![lo as usize..=hi as usize, column as usize])
            .sum();
        wavelength.push(column as f64);
        flux.push(sum);
    }

    debug!(
        "Trace from ({:.1}, {:.1}) to ({:.1}, {:.1}), aperture radius {radius}",
        start.x, start.y, end.x, end.y
    );
    info!("Extracted {} columns ({first_col}..={last_col})", flux.len());

    let mut spectrum = Spectrum::new(wavelength, flux, None, WavelengthScale::Pixel)?;
    spectrum
        .metadata
        .insert("aperture_radius".into(), MetadataValue::Integer(radius as i64));
    Ok(spectrum)
}
