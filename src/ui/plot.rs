use eframe::egui::Ui;
use egui_plot::{Legend, Line, Plot, PlotPoints};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Spectral plot (central panel)
// ---------------------------------------------------------------------------

/// Rescale `values` to [0, 1]. A flat trace maps to all zeros.
pub fn minmax_scaled(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range.abs() >= f64::EPSILON) {
        vec![0.0; values.len()]
    } else {
        values.iter().map(|&v| (v - min) / range).collect()
    }
}

/// Render the spectral plot in the central panel.
pub fn spectral_plot(ui: &mut Ui, state: &AppState) {
    if state.spectra.is_empty() {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open a spectrum to view it  (File → Open…)");
        });
        return;
    }

    let y_label = if state.minmax_scaling {
        "Flux (min-max scaled)"
    } else {
        "Flux [counts]"
    };

    Plot::new("spectral_plot")
        .legend(Legend::default())
        .x_axis_label(state.axis_label())
        .y_axis_label(y_label)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            for loaded in state.visible() {
                let sp = &loaded.spectrum;
                let flux = if state.minmax_scaling {
                    minmax_scaled(sp.flux())
                } else {
                    sp.flux().to_vec()
                };

                let points: PlotPoints = sp
                    .wavelength()
                    .iter()
                    .zip(flux.iter())
                    .map(|(&w, &f)| [w, f])
                    .collect();

                let line = Line::new(points)
                    .name(&loaded.name)
                    .color(loaded.color)
                    .width(1.5);

                plot_ui.line(line);
            }
        });
}
