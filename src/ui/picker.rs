use std::sync::{Arc, Mutex};

use eframe::egui::{self, Color32, ColorImage, TextureHandle, TextureOptions, Ui};
use egui_plot::{Line, Plot, PlotImage, PlotPoint, PlotPoints, Points};

use crate::color::gray_levels;
use crate::data::model::Frame;
use crate::error::{ReductionError, Result};
use crate::reduce::extract::{TraceEndpoints, TracePoint, TracePointSource};

// ---------------------------------------------------------------------------
// Selection logic (no rendering)
// ---------------------------------------------------------------------------

/// Clicked trace points. A third click starts a new selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceSelection {
    points: Vec<TracePoint>,
}

impl TraceSelection {
    pub fn click(&mut self, point: TracePoint) {
        if self.points.len() >= 2 {
            self.points.clear();
        }
        self.points.push(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    /// Both endpoints, once two points the extractor can lay a trace
    /// through are chosen.
    pub fn endpoints(&self) -> Option<TraceEndpoints> {
        match self.points.as_slice() {
            [a, b] => {
                let endpoints = TraceEndpoints::new(*a, *b);
                endpoints.ordered().is_ok().then_some(endpoints)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Picker window
// ---------------------------------------------------------------------------

struct TracePickerApp {
    texture: TextureHandle,
    shape: (usize, usize),
    selection: TraceSelection,
    result: Arc<Mutex<Option<TraceEndpoints>>>,
}

impl TracePickerApp {
    fn new(
        ctx: &egui::Context,
        image: ColorImage,
        shape: (usize, usize),
        result: Arc<Mutex<Option<TraceEndpoints>>>,
    ) -> Self {
        Self {
            texture: ctx.load_texture("science_frame", image, TextureOptions::NEAREST),
            shape,
            selection: TraceSelection::default(),
            result,
        }
    }

    fn toolbar(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui: &mut Ui| {
            ui.label(match self.selection.points().len() {
                0 => "Click the start of the trace",
                1 => "Click the end of the trace",
                _ if self.selection.endpoints().is_some() => "Accept, or click again to restart",
                _ => "Both points share an x coordinate, click again",
            });
            ui.separator();

            if ui.button("Clear").clicked() {
                self.selection.clear();
            }
            let accept = ui.add_enabled(
                self.selection.endpoints().is_some(),
                egui::Button::new("Accept"),
            );
            if accept.clicked() {
                if let (Some(endpoints), Ok(mut slot)) =
                    (self.selection.endpoints(), self.result.lock())
                {
                    *slot = Some(endpoints);
                }
                ui.ctx().send_viewport_cmd(egui::ViewportCommand::Close);
            }
            if ui.button("Cancel").clicked() {
                ui.ctx().send_viewport_cmd(egui::ViewportCommand::Close);
            }
        });
    }

    fn frame_plot(&self, ui: &mut Ui) -> Option<PlotPoint> {
        let (rows, cols) = self.shape;
        // Pixel (col, row) is centred on plot coordinate (col, row).
        let centre = PlotPoint::new(cols as f64 / 2.0 - 0.5, rows as f64 / 2.0 - 0.5);
        let size = egui::vec2(cols as f32, rows as f32);
        let picked: Vec<[f64; 2]> = self
            .selection
            .points()
            .iter()
            .map(|p| [p.x, p.y])
            .collect();

        Plot::new("trace_picker")
            .data_aspect(1.0)
            .x_axis_label("Column")
            .y_axis_label("Row")
            .allow_double_click_reset(true)
            .show(ui, |plot_ui| {
                plot_ui.image(PlotImage::new(self.texture.id(), centre, size));
                if picked.len() == 2 {
                    plot_ui.line(
                        Line::new(PlotPoints::from(picked.clone()))
                            .color(Color32::LIGHT_RED)
                            .width(1.5),
                    );
                }
                plot_ui.points(
                    Points::new(PlotPoints::from(picked))
                        .radius(4.0)
                        .color(Color32::RED),
                );

                if plot_ui.response().clicked() {
                    plot_ui.pointer_coordinate()
                } else {
                    None
                }
            })
            .inner
    }
}

impl eframe::App for TracePickerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("picker_toolbar").show(ctx, |ui| {
            self.toolbar(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(p) = self.frame_plot(ui) {
                self.selection.click(TracePoint::new(p.x, p.y));
            }
        });
    }
}

// ---------------------------------------------------------------------------
// TracePointSource
// ---------------------------------------------------------------------------

/// Shows the science frame in a window and blocks until the user accepts
/// two trace points or closes the window.
#[derive(Debug, Clone)]
pub struct InteractiveTracePicker {
    title: String,
}

impl Default for InteractiveTracePicker {
    fn default() -> Self {
        Self {
            title: "specpink – select the spectral trace".to_string(),
        }
    }
}

impl TracePointSource for InteractiveTracePicker {
    fn trace_endpoints(&mut self, frame: &Frame) -> Result<TraceEndpoints> {
        let (rows, cols) = frame.shape();
        // Texture row 0 is the top of the image, so flip to put frame row 0
        // at the bottom of the plot.
        let image = ColorImage::from_gray([cols, rows], &gray_levels(frame.data(), true));
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);

        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1000.0, 700.0])
                .with_min_inner_size([400.0, 300.0]),
            ..Default::default()
        };

        eframe::run_native(
            &self.title,
            options,
            Box::new(move |cc| {
                Ok(Box::new(TracePickerApp::new(
                    &cc.egui_ctx,
                    image,
                    (rows, cols),
                    slot,
                )))
            }),
        )
        .map_err(|e| ReductionError::Interactive(e.to_string()))?;

        let chosen = result
            .lock()
            .map_err(|_| ReductionError::Interactive("trace selection lock poisoned".into()))?
            .take();
        chosen.ok_or(ReductionError::TraceCancelled)
    }
}
