use thiserror::Error;
#[derive(Debug, Error)]
pub enum DaqError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("no channels selected")]
    NoChannels,
    #[error("sample rate {rate} Hz too high for {channels} channels (max {max} Hz)")]
    RateTooHigh { channels: usize, rate: u32, max: u32 },
    #[error("stream not configured")]
    NotConfigured,
    #[error("failed to load driver library: {0}")]
    Driver(String),
    #[error("no LabJack U6 found")]
    DeviceNotFound,
    #[error("USB {op} failed: transferred {actual} of {expected} bytes")]
    Transfer {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected response to {command}: {detail}")]
    BadResponse { command: &'static str, detail: String },
    #[error("{command} returned device error {code}")]
    Device { command: &'static str, code: u8 },
    #[error("stream packet error {code}")]
    StreamPacket { code: u8 },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
