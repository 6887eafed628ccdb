use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – loaded spectra
// ---------------------------------------------------------------------------

/// Render the left panel listing loaded spectra.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Spectra");
    ui.separator();

    if state.spectra.is_empty() {
        ui.label("No spectrum loaded.");
        return;
    }

    ui.horizontal(|ui: &mut Ui| {
        if ui.small_button("All").clicked() {
            state.set_all_visible(true);
        }
        if ui.small_button("None").clicked() {
            state.set_all_visible(false);
        }
    });

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            for loaded in &mut state.spectra {
                let text = RichText::new(&loaded.name).color(loaded.color);
                ui.checkbox(&mut loaded.visible, text)
                    .on_hover_text(format!(
                        "{} samples, {} axis",
                        loaded.spectrum.len(),
                        loaded.spectrum.scale()
                    ));
            }
        });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        ui.label(format!(
            "{} spectra loaded, {} visible",
            state.spectra.len(),
            state.visible().count()
        ));

        ui.separator();

        if ui
            .selectable_label(state.minmax_scaling, "Min-Max Scaling")
            .clicked()
        {
            state.minmax_scaling = !state.minmax_scaling;
        }

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialog
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let files = rfd::FileDialog::new()
        .set_title("Open extracted spectra")
        .add_filter("Spectrum CSV", &["csv"])
        .pick_files();

    for path in files.unwrap_or_default() {
        log::debug!("Opening {}", path.display());
        state.load_file(&path);
    }
}
