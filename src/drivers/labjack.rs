use std::ffi::c_void;
use std::os::raw::{c_uint, c_ulong};
use std::path::{Path, PathBuf};
use std::time::Duration;
use libloading::Library;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use crate::drivers::protocol::{self, Calibration, StreamParams};
use crate::drivers::source::{DeviceSession, Packet, PollBatch, StreamConfig};
use crate::drivers::DaqError;
#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY: &str = "liblabjackusb.dylib";
#[cfg(not(target_os = "macos"))]
const DEFAULT_LIBRARY: &str = "liblabjackusb.so";
/// Largest stream transfer requested in one read.
const MAX_PACKETS_PER_READ: usize = 48;
/// Reads ask for this many ticks of data so a late tick can catch up.
const READ_HEADROOM: f64 = 2.0;
/// Wait for the reads after the first one in a poll.
const FOLLOW_UP_READ_TIMEOUT: Duration = Duration::from_millis(25);
/// Consecutive empty reads tolerated before the stream counts as dead.
const MAX_EMPTY_READS: u32 = 30;
const COMMAND_TIMEOUT_MS: c_uint = 1000;
type Handle = *mut c_void;
/// Exodriver entry points, resolved once per process.
struct ExodriverApi {
    #[allow(dead_code)]
    lib: Library,
    open_device: unsafe extern "C" fn(c_uint, c_uint, c_ulong) -> Handle,
    write_to: unsafe extern "C" fn(Handle, *const u8, c_ulong, c_uint) -> c_ulong,
    read_to: unsafe extern "C" fn(Handle, *mut u8, c_ulong, c_uint) -> c_ulong,
    stream_to: unsafe extern "C" fn(Handle, *mut u8, c_ulong, c_uint) -> c_ulong,
    close_device: unsafe extern "C" fn(Handle),
}
// SAFETY: the table only holds the library handle and plain function pointers.
unsafe impl Send for ExodriverApi {}
unsafe impl Sync for ExodriverApi {}
impl ExodriverApi {
    fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("{} not found (is the Exodriver installed?)", path.display()))?;
        // Safety: signatures follow labjackusb.h.
        unsafe {
            Ok(Self {
                open_device: *lib.get(b"LJUSB_OpenDevice\0")?,
                write_to: *lib.get(b"LJUSB_WriteTO\0")?,
                read_to: *lib.get(b"LJUSB_ReadTO\0")?,
                stream_to: *lib.get(b"LJUSB_StreamTO\0")?,
                close_device: *lib.get(b"LJUSB_CloseDevice\0")?,
                lib,
            })
        }
    }
    fn instance(path: &Path) -> Result<&'static ExodriverApi, DaqError> {
        static API: OnceCell<ExodriverApi> = OnceCell::new();
        API.get_or_try_init(|| Self::load(path))
            .map_err(|e| DaqError::Driver(format!("{e:#}")))
    }
}
/// An open U6 with its calibration.
struct U6Handle {
    api: &'static ExodriverApi,
    handle: Handle,
    calibration: Calibration,
}
impl U6Handle {
    fn open(api: &'static ExodriverApi) -> Result<Self, DaqError> {
        let handle = unsafe { (api.open_device)(1, 0, protocol::U6_PRODUCT_ID as c_ulong) };
        if handle.is_null() {
            return Err(DaqError::DeviceNotFound);
        }
        let mut device = Self {
            api,
            handle,
            calibration: Calibration::default(),
        };
        match device.read_calibration() {
            Ok(cal) => device.calibration = cal,
            Err(e) => warn!("using nominal calibration: {e}"),
        }
        info!(
            "U6 opened (slope {:.9} V/bit, offset {:.6} V)",
            device.calibration.slope, device.calibration.offset
        );
        Ok(device)
    }
    fn write(&self, op: &'static str, bytes: &[u8]) -> Result<(), DaqError> {
        let written = unsafe {
            (self.api.write_to)(self.handle, bytes.as_ptr(), bytes.len() as c_ulong, COMMAND_TIMEOUT_MS)
        } as usize;
        if written != bytes.len() {
            return Err(DaqError::Transfer {
                op,
                expected: bytes.len(),
                actual: written,
            });
        }
        Ok(())
    }
    fn write_read(
        &self,
        op: &'static str,
        command: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, DaqError> {
        self.write(op, command)?;
        let mut response = vec![0u8; response_len];
        let read = unsafe {
            (self.api.read_to)(
                self.handle,
                response.as_mut_ptr(),
                response_len as c_ulong,
                COMMAND_TIMEOUT_MS,
            )
        } as usize;
        // short replies (e.g. a bad-checksum echo) are judged by the caller
        response.truncate(read);
        Ok(response)
    }
    fn read_calibration(&self) -> Result<Calibration, DaqError> {
        let response = self.write_read(
            "ReadCal",
            &protocol::read_cal_command(0),
            protocol::READ_CAL_RESPONSE_LEN,
        )?;
        protocol::parse_calibration(&response)
    }
    fn stream_read(&self, len: usize, timeout: Duration) -> Vec<u8> {
        let mut buffer = vec![0u8; len];
        let read = unsafe {
            (self.api.stream_to)(
                self.handle,
                buffer.as_mut_ptr(),
                len as c_ulong,
                timeout.as_millis().min(c_uint::MAX as u128) as c_uint,
            )
        } as usize;
        buffer.truncate(read);
        buffer
    }
}
impl Drop for U6Handle {
    fn drop(&mut self) {
        unsafe { (self.api.close_device)(self.handle) };
        debug!("U6 handle closed");
    }
}
/// LabJack U6 streaming through the Exodriver (`liblabjackusb`).
///
/// The device is opened lazily on the first `configure`, so a missing
/// driver or unplugged device shows up as a start error rather than at launch.
pub struct LabJackU6 {
    library: PathBuf,
    tick: Duration,
    device: Option<U6Handle>,
    params: Option<StreamParams>,
    packets_per_read: usize,
    streaming: bool,
    empty_reads: u32,
    last_counter: Option<u8>,
}
impl LabJackU6 {
    pub fn new(library: Option<PathBuf>, tick: Duration) -> Self {
        Self {
            library: library.unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY)),
            tick,
            device: None,
            params: None,
            packets_per_read: 1,
            streaming: false,
            empty_reads: 0,
            last_counter: None,
        }
    }
    fn device(&mut self) -> Result<&U6Handle, DaqError> {
        if self.device.is_none() {
            let api = ExodriverApi::instance(&self.library)?;
            self.device = Some(U6Handle::open(api)?);
        }
        self.device.as_ref().ok_or(DaqError::DeviceNotFound)
    }
    fn stream_params(config: &StreamConfig) -> StreamParams {
        let channels: Vec<u8> = config.channels().iter().map(|c| c.number()).collect();
        StreamParams::for_rate(&channels, config.rate_hz())
    }
    /// Packets one poll asks for: at least everything produced during a tick.
    fn packets_per_tick(config: &StreamConfig, tick: Duration) -> usize {
        let samples = config.rate_hz() as f64 * config.num_channels() as f64 * tick.as_secs_f64();
        let packets = (READ_HEADROOM * samples / config.samples_per_packet() as f64).ceil() as usize;
        packets.max(1)
    }
}
/// Splits a poll into transfers of at most `MAX_PACKETS_PER_READ` packets.
fn read_chunks(packets: usize) -> Vec<usize> {
    let mut chunks = vec![MAX_PACKETS_PER_READ; packets / MAX_PACKETS_PER_READ];
    if packets % MAX_PACKETS_PER_READ != 0 {
        chunks.push(packets % MAX_PACKETS_PER_READ);
    }
    chunks
}
impl DeviceSession for LabJackU6 {
    fn name(&self) -> &str {
        "LabJack U6"
    }
    fn configure(&mut self, config: &StreamConfig) -> Result<(), DaqError> {
        if self.streaming {
            self.stop()?;
        }
        let params = Self::stream_params(config);
        let device = self.device()?;
        // a stream left running by an earlier session rejects StreamConfig
        let _ = device.write_read("StreamStop", &protocol::stream_stop_command(), protocol::SHORT_RESPONSE_LEN);
        let response = device.write_read(
            "StreamConfig",
            &protocol::stream_config_command(&params),
            protocol::STREAM_CONFIG_RESPONSE_LEN,
        )?;
        protocol::check_stream_config_response(&response)?;
        info!(
            "U6 stream configured: {:?} at {} Hz (device rate {:.3} Hz)",
            config.channels(),
            config.rate_hz(),
            params.effective_rate_hz()
        );
        self.packets_per_read = Self::packets_per_tick(config, self.tick);
        self.params = Some(params);
        Ok(())
    }
    fn effective_rate_hz(&self, config: &StreamConfig) -> f64 {
        Self::stream_params(config).effective_rate_hz()
    }
    fn start(&mut self) -> Result<(), DaqError> {
        if self.params.is_none() {
            return Err(DaqError::NotConfigured);
        }
        let device = self.device()?;
        let response = device.write_read(
            "StreamStart",
            &protocol::stream_start_command(),
            protocol::SHORT_RESPONSE_LEN,
        )?;
        protocol::check_short_response("StreamStart", &response, 0xA9)?;
        self.streaming = true;
        self.empty_reads = 0;
        self.last_counter = None;
        info!("U6 stream started");
        Ok(())
    }
    fn stop(&mut self) -> Result<(), DaqError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        let device = self.device()?;
        let response = device.write_read(
            "StreamStop",
            &protocol::stream_stop_command(),
            protocol::SHORT_RESPONSE_LEN,
        )?;
        protocol::check_short_response("StreamStop", &response, 0xB1)?;
        info!("U6 stream stopped");
        Ok(())
    }
    fn poll(&mut self) -> Result<PollBatch, DaqError> {
        if !self.streaming {
            return Err(DaqError::NotConfigured);
        }
        let params = self.params.clone().ok_or(DaqError::NotConfigured)?;
        let packet_len = params.packet_len();
        let len = self.packets_per_read * packet_len;
        let tick = self.tick;
        let chunks = read_chunks(self.packets_per_read);
        let device = self.device()?;
        let calibration = device.calibration;
        let mut transfer = Vec::with_capacity(len);
        for (i, packets) in chunks.into_iter().enumerate() {
            let wanted = packets * packet_len;
            let timeout = if i == 0 { tick } else { FOLLOW_UP_READ_TIMEOUT };
            let chunk = device.stream_read(wanted, timeout);
            transfer.extend_from_slice(&chunk);
            // the device buffer is drained
            if chunk.len() < wanted {
                break;
            }
        }
        if transfer.is_empty() {
            self.empty_reads += 1;
            if self.empty_reads > MAX_EMPTY_READS {
                error!("U6 stream produced no data for {} reads", self.empty_reads);
                return Err(DaqError::Transfer {
                    op: "StreamData",
                    expected: len,
                    actual: 0,
                });
            }
            return Ok(PollBatch::default());
        }
        self.empty_reads = 0;
        if transfer.len() % packet_len != 0 {
            warn!(
                "partial stream transfer: {} bytes, packet size {packet_len}",
                transfer.len()
            );
        }
        let packets = protocol::parse_stream_transfer(&transfer, params.samples_per_packet)?;
        if let Some(last) = packets.last() {
            debug!("U6 stream backlog {}", last.backlog);
        }
        let mut batch = PollBatch::default();
        for packet in packets {
            if let Some(prev) = self.last_counter {
                if packet.counter != prev.wrapping_add(1) {
                    warn!("stream packet counter jumped from {prev} to {}", packet.counter);
                }
            }
            self.last_counter = Some(packet.counter);
            match packet.error {
                0 => {}
                protocol::ERR_AUTORECOVER_ACTIVE => {}
                protocol::ERR_AUTORECOVER_END => {
                    batch.dropped += packet.missed_samples(params.channels.len())
                }
                code => return Err(DaqError::StreamPacket { code }),
            }
            batch.packets.push(Packet {
                samples: packet.codes.iter().map(|&c| calibration.volts(c)).collect(),
            });
        }
        if batch.dropped > 0 {
            warn!("U6 reported {} dropped samples", batch.dropped);
        }
        Ok(batch)
    }
    fn is_streaming(&self) -> bool {
        self.streaming
    }
}
impl Drop for LabJackU6 {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelId;
    #[test]
    fn reads_drain_at_least_the_stream_rate() {
        for tick_ms in [20u64, 100, 250] {
            let tick = Duration::from_millis(tick_ms);
            for c in 1..=14u8 {
                for rate in [1u32, 100, 500, 3_571, 5_000, 12_500, 25_000, 50_000] {
                    let channels = (0..c).map(ChannelId).collect();
                    let Ok(config) = StreamConfig::new(channels, rate) else {
                        continue;
                    };
                    let packets = LabJackU6::packets_per_tick(&config, tick);
                    let drained = (packets * config.samples_per_packet()) as f64 / tick.as_secs_f64();
                    let produced = rate as f64 * c as f64;
                    assert!(drained >= produced, "c={c} rate={rate} tick={tick_ms}ms: {drained} < {produced}");
                }
            }
        }
    }
    #[test]
    fn polls_are_split_into_bounded_reads() {
        let tick = Duration::from_millis(100);
        let fast = StreamConfig::new(vec![ChannelId(0)], 50_000).unwrap();
        // 5000 samples per tick, twice over, in 25-sample packets
        let packets = LabJackU6::packets_per_tick(&fast, tick);
        assert_eq!(packets, 400);
        let chunks = read_chunks(packets);
        assert!(chunks.iter().all(|&n| n <= MAX_PACKETS_PER_READ));
        assert_eq!(chunks.iter().sum::<usize>(), 400);
        assert_eq!(read_chunks(100), vec![48, 48, 4]);
        assert_eq!(read_chunks(48), vec![48]);
        let slow = StreamConfig::new(vec![ChannelId(0)], 100).unwrap();
        assert_eq!(LabJackU6::packets_per_tick(&slow, tick), 1);
        assert_eq!(read_chunks(1), vec![1]);
    }
    #[test]
    fn effective_rate_follows_the_divided_clock() {
        let device = LabJackU6::new(None, Duration::from_millis(100));
        let rate = |hz| device.effective_rate_hz(&StreamConfig::new(vec![ChannelId(0)], hz).unwrap());
        assert!((rate(700) - 15_625.0 / 22.0).abs() < 1e-9);
        assert!((rate(500) - 15_625.0 / 31.0).abs() < 1e-9);
        assert!((rate(45_000) - 4_000_000.0 / 88.0).abs() < 1e-9);
        assert_eq!(rate(5_000), 5_000.0);
    }
    #[test]
    fn missing_library_is_a_start_error() {
        let mut device = LabJackU6::new(
            Some(PathBuf::from("/nonexistent/liblabjackusb.so")),
            Duration::from_millis(100),
        );
        let config = StreamConfig::new(vec![ChannelId(0)], 1000).unwrap();
        assert!(device.configure(&config).is_err());
        assert!(device.start().is_err());
        assert!(device.stop().is_ok());
    }
}
