use eframe::egui::Color32;
use ndarray::Array2;
use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Grayscale stretch for frame previews
// ---------------------------------------------------------------------------

/// Row-major 8-bit levels of `data`, linearly stretched so the minimum is 0
/// and the maximum 255. Non-finite pixels are black. With `flip_rows` the
/// last row comes first, so row 0 ends up at the bottom of an image.
pub fn gray_levels(data: &Array2<f64>, flip_rows: bool) -> Vec<u8> {
    let (min, max) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    let level = |v: f64| -> u8 {
        if !v.is_finite() || !(range > 0.0) {
            0
        } else {
            ((v - min) / range * 255.0).round() as u8
        }
    };

    let mut rows: Vec<_> = data.rows().into_iter().collect();
    if flip_rows {
        rows.reverse();
    }
    rows.iter()
        .flat_map(|row| row.iter().map(|&v| level(v)))
        .collect()
}
