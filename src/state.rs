use std::path::Path;

use eframe::egui::Color32;

use crate::color::generate_palette;
use crate::data::loader::load_spectrum_csv;
use crate::data::model::{Spectrum, WavelengthScale};

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// One spectrum shown in the viewer.
#[derive(Debug, Clone)]
pub struct LoadedSpectrum {
    pub spectrum: Spectrum,
    /// Legend name: the spectrum's label, else the file stem.
    pub name: String,
    pub color: Color32,
    pub visible: bool,
}

/// The full UI state, independent of rendering.
#[derive(Debug, Default)]
pub struct AppState {
    pub spectra: Vec<LoadedSpectrum>,

    /// Scale each trace to [0, 1] so spectra of different flux compare.
    pub minmax_scaling: bool,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    /// Add a spectrum and recolour all spectra so hues stay evenly spaced.
    pub fn add_spectrum(&mut self, spectrum: Spectrum, fallback_name: &str) {
        let name = spectrum.label().unwrap_or(fallback_name).to_string();
        self.spectra.push(LoadedSpectrum {
            spectrum,
            name,
            color: Color32::GRAY,
            visible: true,
        });
        let palette = generate_palette(self.spectra.len());
        for (loaded, color) in self.spectra.iter_mut().zip(palette) {
            loaded.color = color;
        }
    }

    /// Load a spectrum CSV, recording failures in the status line.
    pub fn load_file(&mut self, path: &Path) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match load_spectrum_csv(path) {
            Ok(spectrum) => {
                self.add_spectrum(spectrum, &stem);
                self.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to load {}: {e:#}", path.display());
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    pub fn set_all_visible(&mut self, visible: bool) {
        for loaded in &mut self.spectra {
            loaded.visible = visible;
        }
    }

    pub fn visible(&self) -> impl Iterator<Item = &LoadedSpectrum> {
        self.spectra.iter().filter(|s| s.visible)
    }

    /// X axis label. Mixed scales fall back to a neutral label.
    pub fn axis_label(&self) -> String {
        let mut scales = self.visible().map(|s| s.spectrum.scale());
        match scales.next() {
            None => WavelengthScale::Pixel.axis_label(),
            Some(first) if scales.all(|s| s == first) => first.axis_label(),
            Some(_) => "Wavelength / pixel (mixed)".to_string(),
        }
    }
}
