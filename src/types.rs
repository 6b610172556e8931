// src/types.rs
use std::fmt;

use thiserror::Error;

use crate::drivers::protocol;

/// Aggregate stream rate of the U6 across all enabled channels.
pub const MAX_AGGREGATE_RATE_HZ: u32 = 50_000;
/// Single-ended analog inputs on a U6.
pub const U6_ANALOG_INPUTS: u8 = 14;
/// Longest sampling time accepted from the UI.
pub const MAX_SAMPLE_TIME_S: f64 = 600.0;
pub const TIME_PRESETS_S: [f64; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 10.0];

// Analog input identifier, shown as AIN<n>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u8);

impl ChannelId {
    pub fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AIN{}", self.0)
    }
}

// Start button behaviour
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionMode {
    Continuous,
    Single,
}

/// Display scaling. Saved files always hold raw values; the prefactor and
/// unit are stored next to them.
#[derive(Clone, Debug, PartialEq)]
pub struct Scaling {
    pub prefactor: f64,
    pub unit: String,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            prefactor: 1.0,
            unit: "V".to_owned(),
        }
    }
}

impl Scaling {
    pub fn display_unit(&self) -> String {
        render_markup(&self.unit)
    }
}

/// Validated sampling configuration shared by every enabled channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionSettings {
    pub channels: Vec<ChannelId>,
    pub rate_hz: u32,
    pub sample_time_s: f64,
}

impl AcquisitionSettings {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_packet(&self) -> usize {
        protocol::samples_per_packet(self.rate_hz)
    }

    /// Packets needed to cover the sampling time; the last packet is never cut.
    pub fn packets_needed(&self) -> usize {
        let samples = self.sample_time_s * self.rate_hz as f64 * self.num_channels() as f64;
        let spp = self.samples_per_packet() as f64;
        (samples / spp).ceil().max(1.0) as usize
    }

    /// Complete scans delivered by `packets_needed` packets.
    pub fn points_per_channel(&self) -> usize {
        let channels = self.num_channels().max(1);
        (self.packets_needed() * self.samples_per_packet() / channels).max(1)
    }

    pub fn max_rate_hz(&self) -> u32 {
        max_rate_for(self.num_channels())
    }

    /// Non-fatal warning for the status bar when the rate no longer fits.
    pub fn rate_warning(&self) -> Option<String> {
        if self.channels.is_empty() {
            return Some("No channels selected.".to_owned());
        }
        if self.rate_hz > self.max_rate_hz() {
            return Some(format!(
                "Sample rate too high for {} channels.",
                self.num_channels()
            ));
        }
        None
    }
}

pub fn max_rate_for(channels: usize) -> u32 {
    MAX_AGGREGATE_RATE_HZ / channels.max(1) as u32
}

/// Frequency menu entries for the given number of enabled channels.
pub fn rate_options(channels: usize) -> Vec<u32> {
    let max = max_rate_for(channels);
    let mut options: Vec<u32> = [500, 1000, 2000, 5000]
        .into_iter()
        .filter(|&f| f <= max)
        .collect();
    options.extend((10_000..=max).step_by(5_000));
    options
}

pub fn rate_label(rate_hz: u32) -> String {
    if rate_hz > 1000 {
        format!("{:.2} kHz", rate_hz as f64 / 1000.0)
    } else {
        format!("{rate_hz} Hz")
    }
}

pub fn time_label(seconds: f64) -> String {
    format!("{seconds:.2} s")
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("frequency must be a positive whole number of Hz")]
    BadFrequency,
    #[error("sampling time must be between 0 and 600 s")]
    BadTime,
    #[error("prefactor must be a finite, non-zero number")]
    BadPrefactor,
    #[error("unit must not be empty")]
    EmptyUnit,
}

/// Parses "5000", "5000 Hz" or "5 kHz".
pub fn parse_rate(text: &str) -> Result<u32, InputError> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (number, multiplier) = if let Some(n) = lower.strip_suffix("khz") {
        (n.trim(), 1000.0)
    } else if let Some(n) = lower.strip_suffix("hz") {
        (n.trim(), 1.0)
    } else {
        (lower.as_str(), 1.0)
    };
    let value: f64 = number
        .parse()
        .map_err(|_| InputError::NotANumber(trimmed.to_owned()))?;
    let hz = value * multiplier;
    if !hz.is_finite() || hz < 1.0 || hz.fract() != 0.0 || hz > u32::MAX as f64 {
        return Err(InputError::BadFrequency);
    }
    Ok(hz as u32)
}

/// Parses a sampling time in seconds ("2", "2.5", "2 s").
pub fn parse_sample_time(text: &str) -> Result<f64, InputError> {
    let trimmed = text.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed).trim();
    let value: f64 = number
        .parse()
        .map_err(|_| InputError::NotANumber(trimmed.to_owned()))?;
    if !value.is_finite() || value <= 0.0 || value > MAX_SAMPLE_TIME_S {
        return Err(InputError::BadTime);
    }
    Ok(value)
}

pub fn parse_prefactor(text: &str) -> Result<f64, InputError> {
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| InputError::NotANumber(trimmed.to_owned()))?;
    if !value.is_finite() || value == 0.0 {
        return Err(InputError::BadPrefactor);
    }
    Ok(value)
}

pub fn parse_unit(text: &str) -> Result<String, InputError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(InputError::EmptyUnit);
    }
    Ok(trimmed.to_owned())
}

/// Renders TeX-style unit markup ("m$^2$/s", "V/$\sqrt{\mathrm{Hz}}$")
/// as plain text with superscripts.
pub fn render_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' | '{' | '}' => {}
            '\\' => {
                let mut word = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphabetic() {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "sqrt" => out.push('√'),
                    "mu" => out.push('µ'),
                    "Omega" => out.push('Ω'),
                    "circ" => out.push('°'),
                    // \mathrm and friends only change the font
                    _ => {}
                }
            }
            '^' => {
                let mut group = String::new();
                if chars.peek() == Some(&'{') {
                    chars.next();
                    for next in chars.by_ref() {
                        if next == '}' {
                            break;
                        }
                        group.push(next);
                    }
                } else if let Some(next) = chars.next() {
                    group.push(next);
                }
                out.extend(group.chars().map(|g| superscript(g).unwrap_or(g)));
            }
            _ => out.push(c),
        }
    }
    out
}

fn superscript(c: char) -> Option<char> {
    Some(match c {
        '0' => '⁰',
        '1' => '¹',
        '2' => '²',
        '3' => '³',
        '4' => '⁴',
        '5' => '⁵',
        '6' => '⁶',
        '7' => '⁷',
        '8' => '⁸',
        '9' => '⁹',
        '-' => '⁻',
        '+' => '⁺',
        _ => return None,
    })
}
