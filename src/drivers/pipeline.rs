use log::{error, info, warn};
use crate::drivers::source::{DeviceSession, StreamConfig};
use crate::drivers::{ChannelBuffers, DaqError, TimeSeriesFrame};
use crate::types::{AcquisitionMode, AcquisitionSettings};
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Running(AcquisitionMode),
}
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    User,
    /// A single acquisition finished.
    Completed,
    Error(String),
}
/// One finished acquisition: exactly the configured number of points per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquiredBlock {
    pub frame: TimeSeriesFrame,
    pub dropped: u64,
}
/// What one `tick` changed.
#[derive(Debug, Default)]
pub struct TickReport {
    pub refreshed: bool,
    pub completed: Vec<AcquiredBlock>,
    pub stopped: Option<StopReason>,
}
/// Drives a device session from the UI timer and cuts its stream into blocks.
pub struct AcquisitionController<D: DeviceSession> {
    device: D,
    settings: AcquisitionSettings,
    state: AcquisitionState,
    buffers: Option<ChannelBuffers>,
    last_block: Option<AcquiredBlock>,
    // dropped samples of the acquisition in progress
    dropped: u64,
    status: String,
}
impl<D: DeviceSession> AcquisitionController<D> {
    pub fn new(device: D, settings: AcquisitionSettings) -> Self {
        Self {
            device,
            settings,
            state: AcquisitionState::Idle,
            buffers: None,
            last_block: None,
            dropped: 0,
            status: "Stopped.".to_owned(),
        }
    }
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }
    pub fn state(&self) -> AcquisitionState {
        self.state
    }
    pub fn is_running(&self) -> bool {
        matches!(self.state, AcquisitionState::Running(_))
    }
    pub fn status(&self) -> String {
        match self.state {
            AcquisitionState::Running(mode) => {
                let label = match mode {
                    AcquisitionMode::Continuous => "Streaming",
                    AcquisitionMode::Single => "Single acquisition",
                };
                format!("{label} ({:.0}%)", 100.0 * self.progress())
            }
            AcquisitionState::Idle => self.status.clone(),
        }
    }
    /// Fraction of the acquisition in progress already received.
    pub fn progress(&self) -> f64 {
        self.buffers.as_ref().map(ChannelBuffers::progress).unwrap_or(0.0)
    }
    pub fn last_block(&self) -> Option<&AcquiredBlock> {
        self.last_block.as_ref()
    }
    /// The most recent completed block, or the partial rolling buffer before
    /// the first block of this run has finished.
    pub fn latest_frame(&self) -> Option<TimeSeriesFrame> {
        if let Some(block) = &self.last_block {
            return Some(block.frame.clone());
        }
        self.buffers
            .as_ref()
            .map(ChannelBuffers::frame)
            .filter(|frame| !frame.is_empty())
    }
    /// Forget the displayed data, e.g. after a file was opened.
    pub fn clear(&mut self) {
        self.last_block = None;
        if !self.is_running() {
            self.buffers = None;
        }
    }
    pub fn start(&mut self, mode: AcquisitionMode) -> Result<(), DaqError> {
        if self.is_running() {
            self.state = AcquisitionState::Running(mode);
            return Ok(());
        }
        match self.begin() {
            Ok(()) => {
                self.state = AcquisitionState::Running(mode);
                info!(
                    "{} acquisition started: {:?}, {} Hz, {} points per channel",
                    self.device.name(),
                    self.settings.channels,
                    self.settings.rate_hz,
                    self.settings.points_per_channel()
                );
                Ok(())
            }
            Err(e) => {
                error!("failed to start acquisition: {e}");
                if let Err(stop_err) = self.device.stop() {
                    warn!("failed to stop {}: {stop_err}", self.device.name());
                }
                self.status = format!("Aborted: {e}");
                Err(e)
            }
        }
    }
    fn begin(&mut self) -> Result<(), DaqError> {
        let config = StreamConfig::new(self.settings.channels.clone(), self.settings.rate_hz)?;
        let labels = config.channels().iter().map(|c| c.to_string()).collect();
        let rate_hz = self.device.effective_rate_hz(&config);
        let buffers = ChannelBuffers::with_points(
            labels,
            rate_hz,
            self.settings.points_per_channel(),
        )?;
        self.device.configure(&config)?;
        self.device.start()?;
        self.buffers = Some(buffers);
        self.last_block = None;
        self.dropped = 0;
        Ok(())
    }
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.halt(StopReason::User);
    }
    fn halt(&mut self, reason: StopReason) {
        if self.device.is_streaming() {
            if let Err(e) = self.device.stop() {
                warn!("failed to stop {}: {e}", self.device.name());
            }
        }
        self.state = AcquisitionState::Idle;
        self.status = match &reason {
            StopReason::User => "Stopped.".to_owned(),
            StopReason::Completed => "Acquisition complete.".to_owned(),
            StopReason::Error(e) => format!("Aborted: {e}"),
        };
        info!("acquisition stopped: {reason:?}");
    }
    /// Replaces the settings; a running acquisition restarts with them and
    /// its partial buffers are discarded.
    pub fn apply_settings(&mut self, settings: AcquisitionSettings) -> Result<(), DaqError> {
        if settings == self.settings {
            return Ok(());
        }
        self.settings = settings;
        let AcquisitionState::Running(mode) = self.state else {
            return Ok(());
        };
        if let Err(e) = self.device.stop() {
            warn!("failed to stop {}: {e}", self.device.name());
        }
        self.state = AcquisitionState::Idle;
        self.buffers = None;
        self.start(mode)
    }
    /// One timer step: a single device poll, demultiplexed into the buffers.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let AcquisitionState::Running(mode) = self.state else {
            return report;
        };
        let batch = match self.device.poll() {
            Ok(batch) => batch,
            Err(e) => {
                error!("acquisition aborted: {e}");
                let reason = StopReason::Error(e.to_string());
                self.halt(reason.clone());
                report.stopped = Some(reason);
                return report;
            }
        };
        let Some(buffers) = self.buffers.as_mut() else {
            return report;
        };
        self.dropped += batch.dropped;
        report.refreshed = !batch.packets.is_empty();
        for packet in &batch.packets {
            for frame in buffers.push_interleaved(&packet.samples) {
                report.completed.push(AcquiredBlock {
                    frame,
                    dropped: self.dropped,
                });
                self.dropped = 0;
            }
        }
        if mode == AcquisitionMode::Single && !report.completed.is_empty() {
            report.completed.truncate(1);
            self.halt(StopReason::Completed);
            report.stopped = Some(StopReason::Completed);
        }
        if let Some(block) = report.completed.last() {
            info!(
                "acquisition complete: {} points per channel ({:.2} s), {} dropped",
                block.frame.points(),
                block.frame.duration_seconds(),
                block.dropped
            );
            self.last_block = Some(block.clone());
        }
        report
    }
    #[cfg(test)]
    pub fn device(&self) -> &D {
        &self.device
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulated::SimulatedDevice;
    use crate::drivers::source::{ManualDevice, Packet, PollBatch};
    use crate::types::ChannelId;
    fn settings(channels: u8, rate_hz: u32, sample_time_s: f64) -> AcquisitionSettings {
        AcquisitionSettings {
            channels: (0..channels).map(ChannelId).collect(),
            rate_hz,
            sample_time_s,
        }
    }
    fn batch(values: &[f64], dropped: u64) -> Result<PollBatch, DaqError> {
        Ok(PollBatch {
            packets: vec![Packet {
                samples: values.to_vec(),
            }],
            dropped,
        })
    }
    #[test]
    fn one_channel_at_50khz_for_two_seconds() {
        let device = SimulatedDevice::with_fixed_packets(500);
        let mut controller = AcquisitionController::new(device, settings(1, 50_000, 2.0));
        controller.start(AcquisitionMode::Continuous).unwrap();
        let mut blocks = Vec::new();
        for _ in 0..8 {
            blocks.extend(controller.tick().completed);
        }
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert!(block.frame.points() >= 100_000);
        assert_eq!(block.frame.channel_labels, vec!["AIN0".to_string()]);
        assert_eq!(block.dropped, 0);
        assert!(controller.is_running());
    }
    #[test]
    fn too_fast_for_two_channels_rejected_before_start() {
        let device = ManualDevice::new([]);
        let mut controller = AcquisitionController::new(device, settings(2, 30_000, 1.0));
        let err = controller.start(AcquisitionMode::Continuous).unwrap_err();
        assert!(matches!(err, DaqError::RateTooHigh { max: 25_000, .. }));
        assert_eq!(controller.state(), AcquisitionState::Idle);
        assert!(controller.device().configured.is_none());
        assert_eq!(controller.device().starts, 0);
        assert!(controller.status().starts_with("Aborted:"));
    }
    #[test]
    fn single_mode_stops_after_first_block() {
        // 1 channel, 5 Hz, 1 s: one 5-sample packet
        let device = ManualDevice::new([
            batch(&[1.0, 2.0, 3.0], 0),
            batch(&[4.0, 5.0, 6.0, 7.0], 2),
        ]);
        let mut controller = AcquisitionController::new(device, settings(1, 5, 1.0));
        assert_eq!(controller.settings().points_per_channel(), 5);
        controller.start(AcquisitionMode::Single).unwrap();
        let first = controller.tick();
        assert!(first.refreshed);
        assert!(first.completed.is_empty());
        assert_eq!(controller.latest_frame().unwrap().samples[0], vec![1.0, 2.0, 3.0]);
        let second = controller.tick();
        assert_eq!(second.stopped, Some(StopReason::Completed));
        assert_eq!(second.completed.len(), 1);
        assert_eq!(second.completed[0].frame.samples[0], vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(second.completed[0].dropped, 2);
        assert_eq!(controller.state(), AcquisitionState::Idle);
        assert_eq!(controller.status(), "Acquisition complete.");
        assert_eq!(controller.device().stops, 1);
        // display holds the completed block, not the rolling tail
        assert_eq!(controller.latest_frame().unwrap().samples[0], vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }
    #[test]
    fn device_error_returns_to_idle() {
        let device = ManualDevice::new([
            batch(&[0.5; 3], 0),
            Err(DaqError::StreamPacket { code: 48 }),
        ]);
        let mut controller = AcquisitionController::new(device, settings(1, 10, 1.0));
        controller.start(AcquisitionMode::Continuous).unwrap();
        assert!(controller.tick().stopped.is_none());
        let report = controller.tick();
        assert!(matches!(report.stopped, Some(StopReason::Error(_))));
        assert_eq!(controller.state(), AcquisitionState::Idle);
        assert_eq!(controller.status(), "Aborted: stream packet error 48");
        assert!(!controller.device().streaming);
        // further ticks do nothing
        assert!(!controller.tick().refreshed);
    }
    #[test]
    fn continuous_mode_keeps_streaming_across_blocks() {
        let device = ManualDevice::new([batch(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 0)]);
        let mut controller = AcquisitionController::new(device, settings(1, 3, 1.0));
        controller.start(AcquisitionMode::Continuous).unwrap();
        let report = controller.tick();
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.completed[1].frame.samples[0], vec![4.0, 5.0, 6.0]);
        assert!(report.stopped.is_none());
        assert!((controller.progress() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(controller.device().starts, 1);
    }
    #[test]
    fn blocks_carry_the_device_clock_rate() {
        // 700 Hz asks for one 25-sample packet; the divided clock runs faster
        let mut device = ManualDevice::new([batch(&[0.5; 25], 0)]);
        device.clock_rate_hz = Some(4_000_000.0 / 256.0 / 22.0);
        let mut controller = AcquisitionController::new(device, settings(1, 700, 0.01));
        controller.start(AcquisitionMode::Single).unwrap();
        let report = controller.tick();
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].frame.points(), 25);
        let rate = report.completed[0].frame.sample_rate_hz;
        assert!((rate - 710.227).abs() < 1e-3, "rate {rate}");
    }
    #[test]
    fn settings_change_restarts_running_acquisition() {
        let device = ManualDevice::new([batch(&[1.0, 2.0], 0)]);
        let mut controller = AcquisitionController::new(device, settings(1, 10, 1.0));
        controller.start(AcquisitionMode::Continuous).unwrap();
        controller.tick();
        assert!(controller.progress() > 0.0);
        controller.apply_settings(settings(2, 10, 1.0)).unwrap();
        assert!(controller.is_running());
        assert_eq!(controller.device().starts, 2);
        assert_eq!(controller.device().stops, 1);
        assert_eq!(controller.progress(), 0.0);
        assert_eq!(controller.device().configured.as_ref().unwrap().num_channels(), 2);
        controller.stop();
        assert_eq!(controller.status(), "Stopped.");
        // idle changes are only stored
        controller.apply_settings(settings(3, 10, 1.0)).unwrap();
        assert_eq!(controller.device().starts, 2);
        assert_eq!(controller.settings().num_channels(), 3);
    }
}
