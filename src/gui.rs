// src/gui.rs
use std::time::{Duration, Instant};

use eframe::egui;
use egui::{Color32, RichText};
use log::{info, warn};

use crate::config::{DeviceKind, Settings};
use crate::drivers::{
    fft, AcquisitionController, DeviceSession, LabJackU6, SimulatedDevice,
};
use crate::recorder::{self, Recorder, Snapshot};
use crate::types::*;
use crate::visualizer::{self, PlotView};

const ABOUT_TEXT: &str = "LJSA: spectrum analyzer for the LabJack U6.\n\n\
Streams the enabled analog inputs, plots the time series and their power \
spectral density, and saves raw samples as JSON.";

enum Dialog {
    Unit(String),
    Prefactor(String),
    Frequency(String),
    Time(String),
    About,
}

impl Dialog {
    fn title(&self) -> &'static str {
        match self {
            Dialog::Unit(_) => "Scaling: unit",
            Dialog::Prefactor(_) => "Scaling: prefactor",
            Dialog::Frequency(_) => "Sample frequency",
            Dialog::Time(_) => "Sample time",
            Dialog::About => "About LJSA",
        }
    }

    fn prompt(&self) -> &'static str {
        match self {
            Dialog::Unit(_) => "Unit (markup such as m$^2$/s is allowed)",
            Dialog::Prefactor(_) => "Prefactor applied to raw volts",
            Dialog::Frequency(_) => "Per-channel rate (Hz, or e.g. 12.5 kHz)",
            Dialog::Time(_) => "Sampling time in seconds",
            Dialog::About => "",
        }
    }
}

pub struct LjsaApp {
    controller: AcquisitionController<Box<dyn DeviceSession>>,
    recorder: Recorder,
    scaling: Scaling,
    enabled: Vec<bool>,
    rate_hz: u32,
    sample_time_s: f64,
    tick: Duration,
    last_tick: Option<Instant>,

    // what the plots show
    view: Option<PlotView>,
    opened: Option<Snapshot>,
    rescale: bool,

    save_all: bool,
    dialog: Option<Dialog>,
    input_error: Option<String>,
}

impl LjsaApp {
    pub fn new(settings: Settings) -> Self {
        let device: Box<dyn DeviceSession> = match settings.device {
            DeviceKind::U6 => Box::new(LabJackU6::new(
                settings.driver_library.clone(),
                settings.tick(),
            )),
            DeviceKind::Simulated => Box::new(SimulatedDevice::new()),
        };
        info!("using {}", device.name());
        let mut recorder = Recorder::new();
        if let Some(folder) = &settings.save_all_folder {
            if let Err(e) = recorder.set_save_all(folder.clone()) {
                warn!("cannot save to {}: {e}", folder.display());
            }
        }
        let enabled = (0..settings.channel_count)
            .map(|c| settings.enabled_channels.contains(&c))
            .collect();
        Self {
            controller: AcquisitionController::new(device, settings.acquisition()),
            save_all: recorder.is_saving_all(),
            recorder,
            scaling: settings.scaling(),
            enabled,
            rate_hz: settings.rate_hz,
            sample_time_s: settings.sample_time_s,
            tick: settings.tick(),
            last_tick: None,
            view: None,
            opened: None,
            rescale: false,
            dialog: None,
            input_error: None,
        }
    }

    fn requested_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            channels: self
                .enabled
                .iter()
                .enumerate()
                .filter(|(_, on)| **on)
                .map(|(i, _)| ChannelId(i as u8))
                .collect(),
            rate_hz: self.rate_hz,
            sample_time_s: self.sample_time_s,
        }
    }

    fn apply_settings(&mut self) {
        let settings = self.requested_settings();
        if let Err(e) = self.controller.apply_settings(settings) {
            warn!("acquisition not restarted: {e}");
            self.recorder.flush();
        }
        self.rescale = true;
    }

    fn start(&mut self, mode: AcquisitionMode) {
        self.input_error = None;
        if self.controller.start(mode).is_ok() {
            self.opened = None;
            self.rescale = true;
        }
    }

    fn stop(&mut self) {
        self.controller.stop();
        self.recorder.flush();
    }

    /// One timer step of acquisition and saving.
    fn poll(&mut self) {
        let report = self.controller.tick();
        for block in &report.completed {
            self.recorder
                .enqueue(Snapshot::capture(block, &self.scaling));
        }
        self.recorder.write_next();
        if report.stopped.is_some() {
            self.recorder.flush();
        }
        let live = report.refreshed && self.controller.last_block().is_none();
        if live || !report.completed.is_empty() {
            self.opened = None;
            self.refresh_view();
        }
    }

    /// New display scaling, also applied to an opened file so the plots follow it.
    fn set_scaling(&mut self, scaling: Scaling) {
        if let Some(snapshot) = self.opened.as_mut() {
            snapshot.prefactor = scaling.prefactor;
            snapshot.unit = scaling.unit.clone();
        }
        self.scaling = scaling;
        self.refresh_view();
    }

    fn refresh_view(&mut self) {
        let (frame, scaling) = match &self.opened {
            Some(snapshot) => (snapshot.to_frame(), snapshot.scaling()),
            None => match self.controller.latest_frame() {
                Some(frame) => (frame, self.scaling.clone()),
                None => {
                    self.view = None;
                    return;
                }
            },
        };
        match fft::compute(&frame, scaling.prefactor) {
            Ok(spectrum) => {
                self.view = Some(PlotView::build(&spectrum, &scaling.display_unit()));
            }
            Err(e) => {
                warn!("cannot plot frame: {e}");
                self.view = None;
            }
        }
    }

    fn open_file(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("JSON", &["json"])
            .pick_file()
        else {
            return;
        };
        match recorder::load_one(&path) {
            Ok(snapshot) => {
                info!("opened {}", path.display());
                self.controller.clear();
                self.opened = Some(snapshot);
                self.rescale = true;
                self.refresh_view();
                self.recorder.note(format!("Opened {}.", path.display()));
            }
            Err(e) => {
                warn!("failed to open {}: {e}", path.display());
                self.recorder
                    .note(format!("Failed to open {}: {e}", path.display()));
            }
        }
    }

    fn save_last(&mut self) {
        let Some(block) = self.controller.last_block() else {
            return;
        };
        let snapshot = Snapshot::capture(block, &self.scaling);
        let Some(path) = rfd::FileDialog::new()
            .add_filter("JSON", &["json"])
            .set_file_name("ljsa.json")
            .save_file()
        else {
            return;
        };
        // failures already reach the status bar
        let _ = self.recorder.save_one(&snapshot, &path);
    }

    fn toggle_save_all(&mut self) {
        if !self.save_all {
            self.recorder.clear_save_all();
            return;
        }
        let folder = rfd::FileDialog::new()
            .set_title("Choose folder or enter new folder name")
            .pick_folder();
        match folder {
            Some(folder) => {
                if let Err(e) = self.recorder.set_save_all(folder.clone()) {
                    self.recorder
                        .note(format!("Cannot save to {}: {e}", folder.display()));
                    self.save_all = false;
                }
            }
            None => self.save_all = false,
        }
    }

    fn menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                if ui.button("Open").clicked() {
                    self.open_file();
                }
                ui.menu_button("Frequency", |ui| {
                    let enabled = self.enabled.iter().filter(|on| **on).count();
                    for rate in rate_options(enabled) {
                        if ui.radio(self.rate_hz == rate, rate_label(rate)).clicked() {
                            self.rate_hz = rate;
                            self.apply_settings();
                            ui.close_menu();
                        }
                    }
                    ui.separator();
                    if ui.button("Custom...").clicked() {
                        self.dialog = Some(Dialog::Frequency(self.rate_hz.to_string()));
                        ui.close_menu();
                    }
                });
                ui.menu_button("Time", |ui| {
                    for seconds in TIME_PRESETS_S {
                        if ui
                            .radio(self.sample_time_s == seconds, time_label(seconds))
                            .clicked()
                        {
                            self.sample_time_s = seconds;
                            self.apply_settings();
                            ui.close_menu();
                        }
                    }
                    ui.separator();
                    if ui.button("Custom...").clicked() {
                        self.dialog = Some(Dialog::Time(self.sample_time_s.to_string()));
                        ui.close_menu();
                    }
                });
                ui.menu_button("Scaling", |ui| {
                    if ui.button("set unit").clicked() {
                        self.dialog = Some(Dialog::Unit(self.scaling.unit.clone()));
                        ui.close_menu();
                    }
                    if ui.button("set prefactor").clicked() {
                        self.dialog =
                            Some(Dialog::Prefactor(self.scaling.prefactor.to_string()));
                        ui.close_menu();
                    }
                });
                if ui.button("About").clicked() {
                    self.dialog = Some(Dialog::About);
                }
            });
        });
    }

    fn toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let mut channels_changed = false;
                for (i, on) in self.enabled.iter_mut().enumerate() {
                    let label = ChannelId(i as u8).to_string();
                    channels_changed |= ui.checkbox(on, label).changed();
                }
                if channels_changed {
                    self.apply_settings();
                }
                ui.separator();
                let running = self.controller.is_running();
                if ui.add_enabled(!running, egui::Button::new("Start")).clicked() {
                    self.start(AcquisitionMode::Continuous);
                }
                if ui.add_enabled(!running, egui::Button::new("Single")).clicked() {
                    self.start(AcquisitionMode::Single);
                }
                if ui.add_enabled(running, egui::Button::new("Stop")).clicked() {
                    self.stop();
                }
                ui.separator();
                let has_block = self.controller.last_block().is_some();
                if ui
                    .add_enabled(has_block, egui::Button::new("Save last"))
                    .clicked()
                {
                    self.save_last();
                }
                if ui.checkbox(&mut self.save_all, "Save all").changed() {
                    self.toggle_save_all();
                }
                ui.separator();
                ui.label(format!(
                    "{} per channel, {}",
                    rate_label(self.rate_hz),
                    time_label(self.sample_time_s)
                ));
            });
        });
    }

    fn status_bar(&mut self, ctx: &egui::Context, now: Instant) {
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(self.controller.status());
                if let Some(block) = self.controller.last_block() {
                    let total = block.frame.points() * block.frame.samples.len();
                    ui.separator();
                    ui.label(format!("Dropped {} of {} points.", block.dropped, total));
                }
                let file_status = self.recorder.status(now);
                if !file_status.is_empty() {
                    ui.separator();
                    ui.label(file_status);
                }
                if let Some(warning) = self.requested_settings().rate_warning() {
                    ui.separator();
                    ui.label(RichText::new(warning).color(Color32::YELLOW));
                }
                if let Some(error) = &self.input_error {
                    ui.separator();
                    ui.label(RichText::new(error).color(Color32::RED));
                }
            });
        });
    }

    fn show_dialog(&mut self, ctx: &egui::Context) {
        let Some(mut dialog) = self.dialog.take() else {
            return;
        };
        let prompt = dialog.prompt();
        let mut keep = true;
        let mut submit = false;
        egui::Window::new(dialog.title())
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| match &mut dialog {
                Dialog::About => {
                    ui.label(ABOUT_TEXT);
                    if ui.button("OK").clicked() {
                        keep = false;
                    }
                }
                Dialog::Unit(text)
                | Dialog::Prefactor(text)
                | Dialog::Frequency(text)
                | Dialog::Time(text) => {
                    ui.label(prompt);
                    let response = ui.text_edit_singleline(text);
                    let entered =
                        response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    ui.horizontal(|ui| {
                        if ui.button("OK").clicked() || entered {
                            submit = true;
                        }
                        if ui.button("Cancel").clicked() {
                            keep = false;
                        }
                    });
                }
            });
        if submit {
            keep = !self.submit_dialog(&dialog);
        }
        if keep {
            self.dialog = Some(dialog);
        } else if !submit {
            self.input_error = None;
        }
    }

    /// Applies a dialog's value. Returns false when the text was rejected.
    fn submit_dialog(&mut self, dialog: &Dialog) -> bool {
        let result = match dialog {
            Dialog::Unit(text) => parse_unit(text).map(|unit| {
                self.set_scaling(Scaling {
                    unit,
                    ..self.scaling.clone()
                });
            }),
            Dialog::Prefactor(text) => parse_prefactor(text).map(|prefactor| {
                self.rescale = true;
                self.set_scaling(Scaling {
                    prefactor,
                    ..self.scaling.clone()
                });
            }),
            Dialog::Frequency(text) => parse_rate(text).map(|rate| {
                self.rate_hz = rate;
                self.apply_settings();
            }),
            Dialog::Time(text) => parse_sample_time(text).map(|seconds| {
                self.sample_time_s = seconds;
                self.apply_settings();
            }),
            Dialog::About => Ok(()),
        };
        match result {
            Ok(()) => {
                self.input_error = None;
                true
            }
            Err(e) => {
                self.input_error = Some(e.to_string());
                false
            }
        }
    }
}

impl eframe::App for LjsaApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        let due = self
            .last_tick
            .map_or(true, |last| now.duration_since(last) >= self.tick);
        if due {
            self.last_tick = Some(now);
            self.poll();
        }

        self.menu_bar(ctx);
        self.toolbar(ctx);
        self.status_bar(ctx, now);
        self.show_dialog(ctx);
        egui::CentralPanel::default().show(ctx, |ui| {
            visualizer::draw(ui, self.view.as_ref(), self.rescale);
        });
        self.rescale = false;

        let elapsed = self.last_tick.map(|t| t.elapsed()).unwrap_or_default();
        ctx.request_repaint_after(self.tick.saturating_sub(elapsed));
    }
}

impl Drop for LjsaApp {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{AcquiredBlock, TimeSeriesFrame};

    fn simulated_app() -> LjsaApp {
        LjsaApp::new(Settings {
            device: DeviceKind::Simulated,
            ..Settings::default()
        })
    }

    fn peak(view: &PlotView) -> f64 {
        view.time[0]
            .points
            .iter()
            .map(|[_, y]| y.abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn scaling_edits_apply_to_an_opened_file() {
        let mut app = simulated_app();
        let block = AcquiredBlock {
            frame: TimeSeriesFrame {
                sample_rate_hz: 100.0,
                channel_labels: vec!["AIN0".into()],
                samples: vec![vec![0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0]],
            },
            dropped: 0,
        };
        let file_scaling = Scaling {
            prefactor: 1.0,
            unit: "V".into(),
        };
        app.opened = Some(Snapshot::capture(&block, &file_scaling));
        app.refresh_view();
        let before = peak(app.view.as_ref().unwrap());

        assert!(app.submit_dialog(&Dialog::Prefactor("2".into())));
        assert!(app.submit_dialog(&Dialog::Unit("mm".into())));
        let opened = app.opened.as_ref().unwrap();
        assert_eq!(opened.prefactor, 2.0);
        assert_eq!(opened.unit, "mm");
        let view = app.view.as_ref().unwrap();
        assert_eq!(view.unit, "mm");
        assert!((peak(view) - 2.0 * before).abs() < 1e-12);
    }

    #[test]
    fn rejected_scaling_keeps_the_dialog_open() {
        let mut app = simulated_app();
        assert!(!app.submit_dialog(&Dialog::Prefactor("0".into())));
        assert!(app.input_error.is_some());
        assert_eq!(app.scaling.prefactor, 1.0);
    }
}
