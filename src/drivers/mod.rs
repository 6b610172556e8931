// src/drivers/mod.rs
// Acquisition back end: device sessions, stream buffers and spectra.
pub mod buffer;
pub mod error;
pub mod fft;
pub mod labjack;
pub mod pipeline;
pub mod protocol;
pub mod simulated;
pub mod source;
pub use buffer::{ChannelBuffers, TimeSeriesFrame};
pub use error::DaqError;
pub use fft::Spectrum;
pub use labjack::LabJackU6;
pub use pipeline::{AcquiredBlock, AcquisitionController, AcquisitionState, StopReason, TickReport};
pub use simulated::SimulatedDevice;
pub use source::{DeviceSession, StreamConfig};
