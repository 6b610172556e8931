// src/visualizer.rs
use eframe::egui;
use egui::Color32;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use crate::drivers::Spectrum;
/// Points drawn per trace; longer series are reduced to per-bucket min/max.
pub const MAX_PLOT_POINTS: usize = 4000;
// Power density floor so empty bins stay finite on the log axis.
const POWER_FLOOR: f64 = 1e-30;
const PALETTE: [Color32; 8] = [
    Color32::from_rgb(31, 119, 180),
    Color32::from_rgb(255, 127, 14),
    Color32::from_rgb(44, 160, 44),
    Color32::from_rgb(214, 39, 40),
    Color32::from_rgb(148, 103, 189),
    Color32::from_rgb(140, 86, 75),
    Color32::from_rgb(227, 119, 194),
    Color32::from_rgb(127, 127, 127),
];
pub fn channel_color(index: usize) -> Color32 {
    PALETTE[index % PALETTE.len()]
}
/// One trace, ready for egui_plot.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub label: String,
    pub color: Color32,
    pub points: Vec<[f64; 2]>,
}
/// Both plots of one frame, already decimated and log-scaled.
#[derive(Clone, Debug, PartialEq)]
pub struct PlotView {
    pub time: Vec<Series>,
    pub spectrum: Vec<Series>,
    pub unit: String,
}
impl PlotView {
    /// `unit` is the display form (markup already rendered).
    pub fn build(spectrum: &Spectrum, unit: &str) -> Self {
        let mut time = Vec::with_capacity(spectrum.scaled.len());
        let mut power = Vec::with_capacity(spectrum.power.len());
        for (i, label) in spectrum.channel_labels.iter().enumerate() {
            let color = channel_color(i);
            if let Some(values) = spectrum.scaled.get(i) {
                time.push(Series {
                    label: label.clone(),
                    color,
                    points: decimate_min_max(&spectrum.time_s, values, MAX_PLOT_POINTS),
                });
            }
            if let Some(bins) = spectrum.power.get(i) {
                // DC is zero after mean removal, leave it off the log axis
                let (f, p) = match (spectrum.frequencies_hz.get(1..), bins.get(1..)) {
                    (Some(f), Some(p)) => (f, p),
                    _ => (&[][..], &[][..]),
                };
                let log_p: Vec<f64> = p.iter().map(|&v| log_power(v)).collect();
                power.push(Series {
                    label: label.clone(),
                    color,
                    points: decimate_min_max(f, &log_p, MAX_PLOT_POINTS),
                });
            }
        }
        Self {
            time,
            spectrum: power,
            unit: unit.to_owned(),
        }
    }
}
pub fn log_power(p: f64) -> f64 {
    p.max(POWER_FLOOR).log10()
}
pub fn spectrum_unit(unit: &str) -> String {
    format!("{unit}²/Hz")
}
/// Keeps the shape of long traces: each bucket contributes its minimum and
/// maximum, in the order they occur.
pub fn decimate_min_max(xs: &[f64], ys: &[f64], max_points: usize) -> Vec<[f64; 2]> {
    let n = xs.len().min(ys.len());
    if n <= max_points || max_points < 2 {
        return (0..n).map(|i| [xs[i], ys[i]]).collect();
    }
    let buckets = max_points / 2;
    let bucket_len = n.div_ceil(buckets);
    let mut out = Vec::with_capacity(2 * buckets);
    for start in (0..n).step_by(bucket_len) {
        let end = (start + bucket_len).min(n);
        let mut lo = start;
        let mut hi = start;
        for i in start..end {
            if ys[i] < ys[lo] {
                lo = i;
            }
            if ys[i] > ys[hi] {
                hi = i;
            }
        }
        let (a, b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        out.push([xs[a], ys[a]]);
        if b != a {
            out.push([xs[b], ys[b]]);
        }
    }
    out
}
/// Time series above, spectrum below. `rescale` drops any user zoom.
pub fn draw(ui: &mut egui::Ui, view: Option<&PlotView>, rescale: bool) {
    let height = ((ui.available_height() - ui.spacing().item_spacing.y) / 2.0).max(80.0);
    let unit = view.map(|v| v.unit.as_str()).unwrap_or("V");
    let mut time_plot = Plot::new("time_plot")
        .legend(Legend::default())
        .height(height)
        .x_axis_label("time (s)")
        .y_axis_label(unit.to_owned());
    if rescale {
        time_plot = time_plot.reset();
    }
    time_plot.show(ui, |plot_ui| {
        for series in view.map(|v| v.time.as_slice()).unwrap_or_default() {
            plot_ui.line(
                Line::new(PlotPoints::new(series.points.clone()))
                    .name(&series.label)
                    .color(series.color),
            );
        }
    });
    let mut spectrum_plot = Plot::new("spectrum_plot")
        .legend(Legend::default())
        .height(height)
        .x_axis_label("frequency (Hz)")
        .y_axis_label(spectrum_unit(unit))
        .y_axis_formatter(|y, _digits, _range| format!("1e{y:.0}"));
    if rescale {
        spectrum_plot = spectrum_plot.reset();
    }
    spectrum_plot.show(ui, |plot_ui| {
        for series in view.map(|v| v.spectrum.as_slice()).unwrap_or_default() {
            plot_ui.line(
                Line::new(PlotPoints::new(series.points.clone()))
                    .name(&series.label)
                    .color(series.color),
            );
        }
    });
}
