use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::{DaqError, TimeSeriesFrame};
/// Scaled time series and power spectral density for each channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub sample_rate_hz: f64,
    pub time_s: Vec<f64>,
    pub scaled: Vec<Vec<f64>>, // channel -> samples
    pub frequencies_hz: Vec<f64>,
    pub power: Vec<Vec<f64>>, // channel -> bins
    pub channel_labels: Vec<String>,
}
/// Periodic Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}
/// Computes the spectrum of `frame` after multiplying it by `prefactor`.
///
/// Each channel is mean-removed, Hann-windowed and transformed; the result is
/// the one-sided density `2|X_k|^2 / (fs * sum(w^2))` with the DC bin (and the
/// Nyquist bin for even lengths) left undoubled.
pub fn compute(frame: &TimeSeriesFrame, prefactor: f64) -> Result<Spectrum, DaqError> {
    if frame.sample_rate_hz <= 0.0 {
        return Err(DaqError::InvalidSampleRate);
    }
    let n = frame.points();
    if let Some(bad) = frame.samples.iter().find(|c| c.len() != n) {
        return Err(DaqError::ChannelMismatch {
            expected: n,
            actual: bad.len(),
        });
    }
    let fs = frame.sample_rate_hz;
    let time_s = (0..n).map(|i| i as f64 / fs).collect();
    let scaled: Vec<Vec<f64>> = frame
        .samples
        .iter()
        .map(|channel| channel.iter().map(|v| prefactor * v).collect())
        .collect();
    let bins = if n == 0 { 0 } else { n / 2 + 1 };
    let frequencies_hz = (0..bins).map(|k| k as f64 * fs / n as f64).collect();
    let window = hann_window(n);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n.max(1));
    let power = scaled
        .iter()
        .map(|channel| {
            if n == 0 {
                return Vec::new();
            }
            let mean = channel.iter().sum::<f64>() / n as f64;
            let mut buffer: Vec<Complex64> = channel
                .iter()
                .zip(&window)
                .map(|(v, w)| Complex64::new((v - mean) * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            let scale = 1.0 / (fs * window_power);
            // bins mirrored into the one-sided half
            let doubled_end = if n % 2 == 0 { bins - 1 } else { bins };
            buffer
                .iter()
                .take(bins)
                .enumerate()
                .map(|(k, c)| {
                    let p = c.norm_sqr() * scale;
                    if k > 0 && k < doubled_end {
                        2.0 * p
                    } else {
                        p
                    }
                })
                .collect()
        })
        .collect();
    Ok(Spectrum {
        sample_rate_hz: fs,
        time_s,
        scaled,
        frequencies_hz,
        power,
        channel_labels: frame.channel_labels.clone(),
    })
}
#[cfg(test)]
mod tests {
    use super::*;
    fn sine_frame(rate: f64, n: usize, freq: f64, amplitude: f64, offset: f64) -> TimeSeriesFrame {
        let samples = (0..n)
            .map(|i| offset + amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin())
            .collect();
        TimeSeriesFrame {
            sample_rate_hz: rate,
            channel_labels: vec!["AIN0".into()],
            samples: vec![samples],
        }
    }
    #[test]
    fn axes_follow_rate_and_length() {
        let frame = sine_frame(1000.0, 1000, 125.0, 1.0, 0.0);
        let spectrum = compute(&frame, 1.0).unwrap();
        assert_eq!(spectrum.time_s.len(), 1000);
        assert_eq!(spectrum.time_s[1], 0.001);
        assert_eq!(spectrum.frequencies_hz.len(), 501);
        assert_eq!(spectrum.frequencies_hz[125], 125.0);
        assert_eq!(spectrum.frequencies_hz[500], 500.0);
        assert_eq!(spectrum.power[0].len(), 501);
    }
    #[test]
    fn tone_peaks_at_its_bin_and_conserves_power() {
        let frame = sine_frame(1000.0, 1000, 125.0, 2.0, 3.0);
        let spectrum = compute(&frame, 1.0).unwrap();
        let power = &spectrum.power[0];
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, 125);
        // mean removal leaves no DC
        assert!(power[0] < 1e-20);
        let df = spectrum.frequencies_hz[1];
        let total: f64 = power.iter().sum::<f64>() * df;
        assert!((total - 2.0).abs() < 1e-6, "total {total}");
    }
    #[test]
    fn prefactor_scales_series_and_power() {
        let frame = sine_frame(500.0, 256, 50.0, 1.0, 0.0);
        let raw = compute(&frame, 1.0).unwrap();
        let scaled = compute(&frame, 0.1).unwrap();
        for (a, b) in raw.scaled[0].iter().zip(&scaled.scaled[0]) {
            assert_eq!(0.1 * a, *b);
        }
        let peak = 256 * 50 / 500;
        let ratio = scaled.power[0][peak] / raw.power[0][peak];
        assert!((ratio - 0.01).abs() < 1e-9);
    }
    #[test]
    fn deterministic_across_calls() {
        let frame = sine_frame(2000.0, 777, 33.0, 0.7, 0.2);
        let first = compute(&frame, 1.5).unwrap();
        let second = compute(&frame, 1.5).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.power[0].len(), 389);
    }
    #[test]
    fn hann_window_is_periodic() {
        let w = hann_window(4);
        assert_eq!(w[0], 0.0);
        assert!((w[1] - 0.5).abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert_eq!(hann_window(1), vec![1.0]);
    }
    #[test]
    fn empty_and_ragged_frames() {
        let empty = TimeSeriesFrame {
            sample_rate_hz: 100.0,
            channel_labels: vec!["AIN0".into()],
            samples: vec![Vec::new()],
        };
        let spectrum = compute(&empty, 1.0).unwrap();
        assert!(spectrum.frequencies_hz.is_empty());
        assert!(spectrum.power[0].is_empty());
        let ragged = TimeSeriesFrame {
            sample_rate_hz: 100.0,
            channel_labels: vec!["AIN0".into(), "AIN1".into()],
            samples: vec![vec![0.0; 4], vec![0.0; 3]],
        };
        assert!(matches!(
            compute(&ragged, 1.0),
            Err(DaqError::ChannelMismatch { expected: 4, actual: 3 })
        ));
    }
}
