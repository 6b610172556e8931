use std::collections::VecDeque;
use crate::drivers::DaqError;
/// Flattened view of per-channel samples.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesFrame {
    pub sample_rate_hz: f64,
    pub channel_labels: Vec<String>,
    pub samples: Vec<Vec<f64>>, // channels x samples
}
impl TimeSeriesFrame {
    pub fn points(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }
    pub fn duration_seconds(&self) -> f64 {
        self.points() as f64 / self.sample_rate_hz
    }
    pub fn is_empty(&self) -> bool {
        self.points() == 0
    }
}
/// Rolling buffers fed with interleaved samples, one queue per channel.
///
/// Frames expose at most `capacity` complete scans. Every time `capacity`
/// fresh scans have arrived the newest frame is one completed acquisition,
/// which `push_interleaved` hands back.
pub struct ChannelBuffers {
    per_channel: Vec<VecDeque<f64>>, // channel -> samples
    channel_labels: Vec<String>,
    sample_rate_hz: f64,
    capacity: usize,
    // channel index the next interleaved sample belongs to
    cursor: usize,
    fresh_scans: usize,
}
impl ChannelBuffers {
    pub fn with_points(
        channel_labels: Vec<String>,
        sample_rate_hz: f64,
        points: usize,
    ) -> Result<Self, DaqError> {
        if sample_rate_hz <= 0.0 {
            return Err(DaqError::InvalidSampleRate);
        }
        if channel_labels.is_empty() {
            return Err(DaqError::NoChannels);
        }
        let capacity = points.max(1);
        let per_channel = channel_labels
            .iter()
            .map(|_| VecDeque::with_capacity(capacity + 2))
            .collect();
        Ok(Self {
            per_channel,
            channel_labels,
            sample_rate_hz,
            capacity,
            cursor: 0,
            fresh_scans: 0,
        })
    }
    /// Scans collected towards the acquisition in progress.
    pub fn fresh_scans(&self) -> usize {
        self.fresh_scans
    }
    pub fn progress(&self) -> f64 {
        self.fresh_scans as f64 / self.capacity as f64
    }
    pub fn push_interleaved(&mut self, samples: &[f64]) -> Vec<TimeSeriesFrame> {
        let mut completed = Vec::new();
        let channels = self.per_channel.len();
        for &sample in samples {
            let queue = &mut self.per_channel[self.cursor];
            // one spare slot so a half-received scan never evicts a complete one
            if queue.len() > self.capacity {
                queue.pop_front();
            }
            queue.push_back(sample);
            self.cursor += 1;
            if self.cursor == channels {
                self.cursor = 0;
                self.fresh_scans += 1;
                if self.fresh_scans == self.capacity {
                    self.fresh_scans = 0;
                    completed.push(self.frame());
                }
            }
        }
        completed
    }
    /// Complete scans currently held; a half-received scan is left out.
    pub fn frame(&self) -> TimeSeriesFrame {
        let trimmed_len = |idx: usize, queue: &VecDeque<f64>| {
            if idx < self.cursor {
                queue.len().saturating_sub(1)
            } else {
                queue.len()
            }
        };
        let points = self
            .per_channel
            .iter()
            .enumerate()
            .map(|(idx, queue)| trimmed_len(idx, queue))
            .min()
            .unwrap_or(0)
            .min(self.capacity);
        let samples = self
            .per_channel
            .iter()
            .enumerate()
            .map(|(idx, queue)| {
                let end = trimmed_len(idx, queue);
                queue.range(end - points..end).copied().collect()
            })
            .collect();
        TimeSeriesFrame {
            sample_rate_hz: self.sample_rate_hz,
            channel_labels: self.channel_labels.clone(),
            samples,
        }
    }
}
