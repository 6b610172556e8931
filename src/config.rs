//! Startup settings, read once from a JSON file.
//!
//! The file is `$LJSA_CONFIG` or `./ljsa.json`; every key is optional.
//!
//! ```json
//! { "device": "simulated", "rate_hz": 10000, "enabled_channels": [0, 1] }
//! ```
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::types::{
    AcquisitionSettings, ChannelId, Scaling, MAX_SAMPLE_TIME_S, U6_ANALOG_INPUTS,
};

pub const CONFIG_ENV: &str = "LJSA_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "ljsa.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    U6,
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceKind,
    /// Per-channel scan rate.
    pub rate_hz: u32,
    pub sample_time_s: f64,
    /// Number of channel checkboxes (AIN0..).
    pub channel_count: u8,
    pub enabled_channels: Vec<u8>,
    pub prefactor: f64,
    pub unit: String,
    /// UI timer period; also the device read timeout.
    pub tick_ms: u64,
    /// Overrides the Exodriver library path.
    pub driver_library: Option<PathBuf>,
    /// Start with save-all enabled into this folder.
    pub save_all_folder: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: DeviceKind::U6,
            rate_hz: 5000,
            sample_time_s: 2.0,
            channel_count: 4,
            enabled_channels: vec![0],
            prefactor: 1.0,
            unit: "V".to_owned(),
            tick_ms: 100,
            driver_library: None,
            save_all_folder: None,
        }
    }
}

impl Settings {
    /// Missing file means defaults; a file that cannot be parsed is an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("loaded config from {}", path.display());
        Ok(settings.sanitized())
    }

    /// Replaces out-of-range values with defaults, logging each one.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.channel_count == 0 || self.channel_count > U6_ANALOG_INPUTS {
            let clamped = self.channel_count.clamp(1, U6_ANALOG_INPUTS);
            warn!("channel_count {} out of range, using {clamped}", self.channel_count);
            self.channel_count = clamped;
        }
        let count = self.channel_count;
        self.enabled_channels.retain(|&c| {
            let keep = c < count;
            if !keep {
                warn!("ignoring enabled channel AIN{c}: only {count} channels shown");
            }
            keep
        });
        self.enabled_channels.sort_unstable();
        self.enabled_channels.dedup();
        if self.rate_hz == 0 {
            warn!("rate_hz must be positive, using {}", defaults.rate_hz);
            self.rate_hz = defaults.rate_hz;
        }
        if !(self.sample_time_s > 0.0 && self.sample_time_s <= MAX_SAMPLE_TIME_S) {
            warn!("sample_time_s {} out of range, using {}", self.sample_time_s, defaults.sample_time_s);
            self.sample_time_s = defaults.sample_time_s;
        }
        if !(self.prefactor.is_finite() && self.prefactor != 0.0) {
            warn!("prefactor {} invalid, using {}", self.prefactor, defaults.prefactor);
            self.prefactor = defaults.prefactor;
        }
        if self.unit.trim().is_empty() {
            self.unit = defaults.unit;
        }
        if self.tick_ms == 0 {
            self.tick_ms = defaults.tick_ms;
        }
        self
    }

    pub fn acquisition(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            channels: self.enabled_channels.iter().copied().map(ChannelId).collect(),
            rate_hz: self.rate_hz,
            sample_time_s: self.sample_time_s,
        }
    }

    pub fn scaling(&self) -> Scaling {
        Scaling {
            prefactor: self.prefactor,
            unit: self.unit.clone(),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ljsa.json");
        fs::write(&path, r#"{"device": "simulated", "rate_hz": 10000}"#).unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.device, DeviceKind::Simulated);
        assert_eq!(settings.rate_hz, 10_000);
        assert_eq!(settings.sample_time_s, 2.0);
        assert_eq!(settings.channel_count, 4);
        assert_eq!(settings.acquisition().channels, vec![ChannelId(0)]);
        assert_eq!(settings.scaling(), Scaling::default());
        assert_eq!(settings.tick(), Duration::from_millis(100));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ rate_hz: ").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
        fs::write(&path, r#"{"device": "u3"}"#).unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_replaced() {
        let settings = Settings {
            channel_count: 20,
            enabled_channels: vec![3, 1, 3, 15],
            rate_hz: 0,
            sample_time_s: 601.0,
            prefactor: 0.0,
            unit: " ".into(),
            tick_ms: 0,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(settings.channel_count, 14);
        assert_eq!(settings.enabled_channels, vec![1, 3]);
        assert_eq!(settings.rate_hz, 5000);
        assert_eq!(settings.sample_time_s, 2.0);
        assert_eq!(settings.prefactor, 1.0);
        assert_eq!(settings.unit, "V");
        assert_eq!(settings.tick_ms, 100);
    }
}
