use std::time::Instant;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::drivers::source::{DeviceSession, Packet, PollBatch, StreamConfig};
use crate::drivers::DaqError;
/// Frequency of the test tone (the U6 timer output the analyzer was wired to).
pub const TEST_TONE_HZ: f64 = 125.0;
/// Logic high of the simulated square wave on the first channel.
const SQUARE_HIGH_V: f64 = 3.3;
const NOISE_V: f64 = 0.005;
/// More backlog than this is discarded and reported as dropped.
const MAX_BACKLOG_S: f64 = 1.0;
enum Pacing {
    WallClock,
    FixedPackets(usize),
}
/// Stand-in for a U6: a square wave on the first channel and sine harmonics
/// of the same tone on the others, plus a little noise.
pub struct SimulatedDevice {
    config: Option<StreamConfig>,
    pacing: Pacing,
    rng: StdRng,
    started_at: Option<Instant>,
    // samples generated since start (all channels)
    emitted: u64,
}
impl SimulatedDevice {
    pub fn new() -> Self {
        Self::with_pacing(Pacing::WallClock)
    }
    /// Deterministic variant that returns `packets` packets on every poll.
    pub fn with_fixed_packets(packets: usize) -> Self {
        Self::with_pacing(Pacing::FixedPackets(packets))
    }
    fn with_pacing(pacing: Pacing) -> Self {
        Self {
            config: None,
            pacing,
            rng: StdRng::seed_from_u64(0x1AB6),
            started_at: None,
            emitted: 0,
        }
    }
    fn sample(&mut self, config: &StreamConfig, index: u64) -> f64 {
        let channels = config.num_channels() as u64;
        let channel = (index % channels) as usize;
        let t = (index / channels) as f64 / config.rate_hz() as f64;
        let phase = (TEST_TONE_HZ * t).fract();
        let clean = if channel == 0 {
            if phase < 0.5 {
                SQUARE_HIGH_V
            } else {
                0.0
            }
        } else {
            let harmonic = (channel + 1) as f64;
            (2.0 * std::f64::consts::PI * TEST_TONE_HZ * harmonic * t).sin()
        };
        clean + self.rng.gen_range(-NOISE_V..NOISE_V)
    }
}
impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}
impl DeviceSession for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated U6"
    }
    fn configure(&mut self, config: &StreamConfig) -> Result<(), DaqError> {
        // re-validate so a hand-built config cannot bypass the aggregate limit
        let config = StreamConfig::new(config.channels().to_vec(), config.rate_hz())?;
        debug!(
            "simulated stream: {} channels at {} Hz",
            config.num_channels(),
            config.rate_hz()
        );
        self.config = Some(config);
        Ok(())
    }
    fn start(&mut self) -> Result<(), DaqError> {
        if self.config.is_none() {
            return Err(DaqError::NotConfigured);
        }
        self.started_at = Some(Instant::now());
        self.emitted = 0;
        info!("simulated stream started");
        Ok(())
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        if self.started_at.take().is_some() {
            info!("simulated stream stopped after {} samples", self.emitted);
        }
        Ok(())
    }
    fn poll(&mut self) -> Result<PollBatch, DaqError> {
        let (Some(config), Some(started_at)) = (self.config.clone(), self.started_at) else {
            return Err(DaqError::NotConfigured);
        };
        let spp = config.samples_per_packet() as u64;
        let aggregate_rate = config.rate_hz() as f64 * config.num_channels() as f64;
        let mut dropped = 0;
        let packets = match self.pacing {
            Pacing::FixedPackets(n) => n as u64,
            Pacing::WallClock => {
                let due = (started_at.elapsed().as_secs_f64() * aggregate_rate) as u64;
                let backlog = due.saturating_sub(self.emitted);
                let limit = (MAX_BACKLOG_S * aggregate_rate) as u64;
                if backlog > limit {
                    // whole scans only, so channels stay aligned with the buffers
                    let channels = config.num_channels() as u64;
                    dropped = (backlog - limit) / channels * channels;
                    self.emitted += dropped;
                }
                (backlog - dropped) / spp
            }
        };
        let mut batch = PollBatch {
            packets: Vec::with_capacity(packets as usize),
            dropped,
        };
        for _ in 0..packets {
            let samples = (0..spp)
                .map(|i| self.sample(&config, self.emitted + i))
                .collect();
            self.emitted += spp;
            batch.packets.push(Packet { samples });
        }
        Ok(batch)
    }
    fn is_streaming(&self) -> bool {
        self.started_at.is_some()
    }
}
