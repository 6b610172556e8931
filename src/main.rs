// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod config;
mod drivers;
mod gui;
mod recorder;
mod types;
mod visualizer;
use eframe::egui;
use log::warn;
use config::Settings;
fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let settings = Settings::load().unwrap_or_else(|e| {
        warn!("{e:#}; using default settings");
        Settings::default()
    });
    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1200.0, 800.0])
        .with_min_inner_size([800.0, 500.0])
        .with_title("LJSA");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "LJSA",
        options,
        Box::new(|_cc| Box::new(gui::LjsaApp::new(settings))),
    )
}
