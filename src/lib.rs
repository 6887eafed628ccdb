//! Long-slit spectroscopic reduction: frame classification, master
//! calibration frames, flat fielding, aperture extraction and wavelength
//! calibration, plus an egui viewer for the extracted spectra.

pub mod app;
pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod reduce;
pub mod state;
pub mod ui;

pub use config::ReductionConfig;
pub use error::{ReductionError, Stage};
pub use reduce::pipeline::{Pipeline, ReductionOutput, ReductionReport};
