#[cfg(test)]
use std::collections::VecDeque;
use crate::drivers::protocol;
use crate::drivers::DaqError;
use crate::types::{max_rate_for, ChannelId, MAX_AGGREGATE_RATE_HZ};
/// Channel set and per-channel scan rate accepted by the device.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    channels: Vec<ChannelId>,
    rate_hz: u32,
}
impl StreamConfig {
    /// Fails when the channels together would exceed the aggregate rate limit.
    pub fn new(channels: Vec<ChannelId>, rate_hz: u32) -> Result<Self, DaqError> {
        if channels.is_empty() {
            return Err(DaqError::NoChannels);
        }
        if rate_hz == 0 {
            return Err(DaqError::InvalidSampleRate);
        }
        let aggregate = channels.len() as u64 * rate_hz as u64;
        if aggregate > MAX_AGGREGATE_RATE_HZ as u64 {
            return Err(DaqError::RateTooHigh {
                channels: channels.len(),
                rate: rate_hz,
                max: max_rate_for(channels.len()),
            });
        }
        Ok(Self { channels, rate_hz })
    }
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }
    pub fn samples_per_packet(&self) -> usize {
        protocol::samples_per_packet(self.rate_hz)
    }
}
/// Interleaved samples (volts) from one device packet, channel order as configured.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Packet {
    pub samples: Vec<f64>,
}
/// Everything one poll produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollBatch {
    pub packets: Vec<Packet>,
    /// Samples (not scans) lost since the previous poll, counted over all channels.
    pub dropped: u64,
}
impl PollBatch {
    pub fn sample_count(&self) -> usize {
        self.packets.iter().map(|p| p.samples.len()).sum()
    }
}
/// A streaming acquisition source. `poll` must return within about one UI tick.
pub trait DeviceSession {
    fn name(&self) -> &str;
    fn configure(&mut self, config: &StreamConfig) -> Result<(), DaqError>;
    /// Per-channel rate the hardware actually runs at for `config`.
    fn effective_rate_hz(&self, config: &StreamConfig) -> f64 {
        config.rate_hz() as f64
    }
    fn start(&mut self) -> Result<(), DaqError>;
    /// Stopping an idle session is a no-op.
    fn stop(&mut self) -> Result<(), DaqError>;
    fn poll(&mut self) -> Result<PollBatch, DaqError>;
    fn is_streaming(&self) -> bool;
}
impl<D: DeviceSession + ?Sized> DeviceSession for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn configure(&mut self, config: &StreamConfig) -> Result<(), DaqError> {
        (**self).configure(config)
    }
    fn effective_rate_hz(&self, config: &StreamConfig) -> f64 {
        (**self).effective_rate_hz(config)
    }
    fn start(&mut self) -> Result<(), DaqError> {
        (**self).start()
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        (**self).stop()
    }
    fn poll(&mut self) -> Result<PollBatch, DaqError> {
        (**self).poll()
    }
    fn is_streaming(&self) -> bool {
        (**self).is_streaming()
    }
}
/// Scripted device that replays queued poll results.
#[cfg(test)]
pub struct ManualDevice {
    queue: VecDeque<Result<PollBatch, DaqError>>,
    pub configured: Option<StreamConfig>,
    /// Rate reported instead of the requested one, like a divided device clock.
    pub clock_rate_hz: Option<f64>,
    pub streaming: bool,
    pub starts: usize,
    pub stops: usize,
}
#[cfg(test)]
impl ManualDevice {
    pub fn new(results: impl IntoIterator<Item = Result<PollBatch, DaqError>>) -> Self {
        Self {
            queue: results.into_iter().collect(),
            configured: None,
            clock_rate_hz: None,
            streaming: false,
            starts: 0,
            stops: 0,
        }
    }
}
#[cfg(test)]
impl DeviceSession for ManualDevice {
    fn name(&self) -> &str {
        "manual"
    }
    fn configure(&mut self, config: &StreamConfig) -> Result<(), DaqError> {
        self.configured = Some(config.clone());
        Ok(())
    }
    fn effective_rate_hz(&self, config: &StreamConfig) -> f64 {
        self.clock_rate_hz.unwrap_or(config.rate_hz() as f64)
    }
    fn start(&mut self) -> Result<(), DaqError> {
        if self.configured.is_none() {
            return Err(DaqError::NotConfigured);
        }
        self.streaming = true;
        self.starts += 1;
        Ok(())
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        if self.streaming {
            self.streaming = false;
            self.stops += 1;
        }
        Ok(())
    }
    fn poll(&mut self) -> Result<PollBatch, DaqError> {
        self.queue.pop_front().unwrap_or_else(|| Ok(PollBatch::default()))
    }
    fn is_streaming(&self) -> bool {
        self.streaming
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn channels(n: u8) -> Vec<ChannelId> {
        (0..n).map(ChannelId).collect()
    }
    #[test]
    fn configuration_succeeds_iff_within_aggregate_rate() {
        for c in 1..=14u8 {
            for r in [1u32, 500, 3_571, 5_000, 12_500, 16_666, 16_667, 25_000, 30_000, 50_000] {
                let ok = StreamConfig::new(channels(c), r).is_ok();
                assert_eq!(ok, c as u32 * r <= 50_000, "c={c} r={r}");
            }
        }
    }
    #[test]
    fn two_channels_at_30khz_rejected() {
        let err = StreamConfig::new(channels(2), 30_000).unwrap_err();
        assert!(matches!(
            err,
            DaqError::RateTooHigh {
                channels: 2,
                rate: 30_000,
                max: 25_000
            }
        ));
    }
    #[test]
    fn empty_or_zero_rate_rejected() {
        assert!(matches!(
            StreamConfig::new(Vec::new(), 1000),
            Err(DaqError::NoChannels)
        ));
        assert!(matches!(
            StreamConfig::new(channels(1), 0),
            Err(DaqError::InvalidSampleRate)
        ));
    }
    #[test]
    fn manual_device_requires_configuration() {
        let mut device = ManualDevice::new([]);
        assert!(device.start().is_err());
        let config = StreamConfig::new(channels(1), 1000).unwrap();
        let mut boxed: Box<dyn DeviceSession> = Box::new(ManualDevice::new([]));
        boxed.configure(&config).unwrap();
        boxed.start().unwrap();
        assert!(boxed.is_streaming());
        assert_eq!(boxed.poll().unwrap().sample_count(), 0);
    }
}
