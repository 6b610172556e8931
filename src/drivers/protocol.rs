//! LabJack U6 low-level command framing.
//!
//! Only the commands the analyzer needs are covered: StreamConfig,
//! StreamStart, StreamStop and ReadCal, plus decoding of stream data packets.
//! Byte layouts follow the U6 low-level function reference.
use crate::drivers::error::DaqError;
pub const U6_PRODUCT_ID: u32 = 6;
pub const MAX_SAMPLES_PER_PACKET: usize = 25;
/// Fixed bytes around the samples of a stream packet (12 header + 2 trailer).
const PACKET_OVERHEAD: usize = 14;
const STREAM_CLOCK_HZ: f64 = 4_000_000.0;
const SLOW_STREAM_CLOCK_HZ: f64 = STREAM_CLOCK_HZ / 256.0;
const EXTENDED: u8 = 0xF8;
const CMD_STREAM_CONFIG: u8 = 0x11;
const CMD_READ_CAL: u8 = 0x2D;
pub const STREAM_CONFIG_RESPONSE_LEN: usize = 8;
pub const SHORT_RESPONSE_LEN: usize = 4;
pub const READ_CAL_RESPONSE_LEN: usize = 40;
/// Auto-recover active: the device buffer overflowed and scans are being discarded.
pub const ERR_AUTORECOVER_ACTIVE: u8 = 59;
/// Auto-recover finished: bytes 6..10 carry the number of skipped scans.
pub const ERR_AUTORECOVER_END: u8 = 60;
/// Nominal +/-10 V calibration used when the device cannot be read.
pub const NOMINAL_AIN10V_SLOPE: f64 = 0.000315805780;
pub const NOMINAL_AIN10V_OFFSET: f64 = -10.5869565220;
pub fn samples_per_packet(rate_hz: u32) -> usize {
    if (rate_hz as usize) < MAX_SAMPLES_PER_PACKET {
        (rate_hz as usize).max(1)
    } else {
        MAX_SAMPLES_PER_PACKET
    }
}
pub fn packet_len(samples_per_packet: usize) -> usize {
    PACKET_OVERHEAD + 2 * samples_per_packet
}
pub fn checksum8(bytes: &[u8]) -> u8 {
    let total: u32 = bytes.iter().map(|&b| b as u32).sum();
    let folded = (total & 0xff) + ((total >> 8) & 0xff);
    ((folded & 0xff) + ((folded >> 8) & 0xff)) as u8
}
pub fn checksum16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}
fn seal_extended(command: &mut [u8]) {
    let c16 = checksum16(&command[6..]);
    command[4..6].copy_from_slice(&c16.to_le_bytes());
    command[0] = checksum8(&command[1..6]);
}
/// Calibration of the +/-10 V range (gain index 0).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub slope: f64,
    pub offset: f64,
}
impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: NOMINAL_AIN10V_SLOPE,
            offset: NOMINAL_AIN10V_OFFSET,
        }
    }
}
impl Calibration {
    pub fn volts(&self, code: u16) -> f64 {
        self.slope * code as f64 + self.offset
    }
}
/// 32.32 signed fixed point as stored in the U6 calibration memory.
pub fn fixed_point_to_f64(bytes: &[u8; 8]) -> f64 {
    let fraction = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let whole = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    whole as f64 + fraction as f64 / 4_294_967_296.0
}
/// Stream timing derived from a per-channel scan rate.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamParams {
    pub channels: Vec<u8>,
    pub samples_per_packet: usize,
    pub scan_interval: u16,
    pub divide_clock_by_256: bool,
}
impl StreamParams {
    pub fn for_rate(channels: &[u8], rate_hz: u32) -> Self {
        let rate = rate_hz.max(1) as f64;
        let (divide_clock_by_256, clock) = if rate < 1000.0 {
            (true, SLOW_STREAM_CLOCK_HZ)
        } else {
            (false, STREAM_CLOCK_HZ)
        };
        let scan_interval = (clock / rate).clamp(1.0, u16::MAX as f64) as u16;
        Self {
            channels: channels.to_vec(),
            samples_per_packet: samples_per_packet(rate_hz),
            scan_interval,
            divide_clock_by_256,
        }
    }
    /// Scan rate the device actually runs at after integer division of the clock.
    pub fn effective_rate_hz(&self) -> f64 {
        let clock = if self.divide_clock_by_256 {
            SLOW_STREAM_CLOCK_HZ
        } else {
            STREAM_CLOCK_HZ
        };
        clock / self.scan_interval as f64
    }
    pub fn packet_len(&self) -> usize {
        packet_len(self.samples_per_packet)
    }
}
pub fn stream_config_command(params: &StreamParams) -> Vec<u8> {
    let n = params.channels.len();
    let mut command = vec![0u8; 14 + 2 * n];
    command[1] = EXTENDED;
    command[2] = (n + 4) as u8;
    command[3] = CMD_STREAM_CONFIG;
    command[6] = n as u8;
    // resolution index 0 = default
    command[7] = 0;
    command[8] = params.samples_per_packet as u8;
    // settling factor 0 = auto
    command[10] = 0;
    // internal 4 MHz clock
    command[11] = if params.divide_clock_by_256 { 1 << 1 } else { 0 };
    command[12..14].copy_from_slice(&params.scan_interval.to_le_bytes());
    for (i, &channel) in params.channels.iter().enumerate() {
        command[14 + 2 * i] = channel;
        // gain x1, single ended
        command[15 + 2 * i] = 0;
    }
    seal_extended(&mut command);
    command
}
pub fn stream_start_command() -> [u8; 2] {
    [0xA8, 0xA8]
}
pub fn stream_stop_command() -> [u8; 2] {
    [0xB0, 0xB0]
}
pub fn read_cal_command(block: u8) -> [u8; 8] {
    let mut command = [0u8; 8];
    command[1] = EXTENDED;
    command[2] = 0x01;
    command[3] = CMD_READ_CAL;
    command[7] = block;
    seal_extended(&mut command);
    command
}
fn check_checksum_reply(command: &'static str, response: &[u8]) -> Result<(), DaqError> {
    if response.len() >= 2 && response[0] == 0xB8 && response[1] == 0xB8 {
        return Err(DaqError::BadResponse {
            command,
            detail: "device reported a bad checksum".into(),
        });
    }
    Ok(())
}
/// Validates an extended command reply: echo bytes then the error code at byte 6.
pub fn check_extended_response(
    command: &'static str,
    response: &[u8],
    expected_len: usize,
    command_number: u8,
) -> Result<(), DaqError> {
    check_checksum_reply(command, response)?;
    if response.len() < expected_len {
        return Err(DaqError::BadResponse {
            command,
            detail: format!("{} bytes, expected {expected_len}", response.len()),
        });
    }
    if response[1] != EXTENDED || response[3] != command_number {
        return Err(DaqError::BadResponse {
            command,
            detail: format!("header {:02X?}", &response[..4]),
        });
    }
    if response[6] != 0 {
        return Err(DaqError::Device {
            command,
            code: response[6],
        });
    }
    Ok(())
}
pub fn check_stream_config_response(response: &[u8]) -> Result<(), DaqError> {
    check_extended_response(
        "StreamConfig",
        response,
        STREAM_CONFIG_RESPONSE_LEN,
        CMD_STREAM_CONFIG,
    )
}
/// StreamStart and StreamStop reply with four bytes, error code at byte 2.
pub fn check_short_response(
    command: &'static str,
    response: &[u8],
    echo: u8,
) -> Result<(), DaqError> {
    check_checksum_reply(command, response)?;
    if response.len() < SHORT_RESPONSE_LEN || response[1] != echo {
        return Err(DaqError::BadResponse {
            command,
            detail: format!("{response:02X?}"),
        });
    }
    if response[2] != 0 {
        return Err(DaqError::Device {
            command,
            code: response[2],
        });
    }
    Ok(())
}
pub fn parse_calibration(response: &[u8]) -> Result<Calibration, DaqError> {
    check_extended_response("ReadCal", response, READ_CAL_RESPONSE_LEN, CMD_READ_CAL)?;
    let mut slope = [0u8; 8];
    let mut offset = [0u8; 8];
    slope.copy_from_slice(&response[8..16]);
    offset.copy_from_slice(&response[16..24]);
    Ok(Calibration {
        slope: fixed_point_to_f64(&slope),
        offset: fixed_point_to_f64(&offset),
    })
}
/// One decoded stream data packet.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamPacket {
    pub counter: u8,
    pub error: u8,
    /// Skipped scans, only meaningful with `ERR_AUTORECOVER_END`.
    pub skipped: u32,
    pub backlog: u8,
    pub codes: Vec<u16>,
}
impl StreamPacket {
    /// Scans lost during auto-recover.
    pub fn missed(&self) -> u64 {
        if self.error == ERR_AUTORECOVER_END {
            self.skipped as u64
        } else {
            0
        }
    }
    /// Lost samples over all `channels` of each skipped scan.
    pub fn missed_samples(&self, channels: usize) -> u64 {
        self.missed() * channels as u64
    }
}
pub fn parse_stream_packet(
    bytes: &[u8],
    samples_per_packet: usize,
) -> Result<StreamPacket, DaqError> {
    let len = packet_len(samples_per_packet);
    if bytes.len() != len {
        return Err(DaqError::BadResponse {
            command: "StreamData",
            detail: format!("packet of {} bytes, expected {len}", bytes.len()),
        });
    }
    if bytes[1] != 0xF9 || bytes[3] != 0xC0 {
        return Err(DaqError::BadResponse {
            command: "StreamData",
            detail: format!("header {:02X?}", &bytes[..4]),
        });
    }
    let codes = bytes[12..12 + 2 * samples_per_packet]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(StreamPacket {
        counter: bytes[10],
        error: bytes[11],
        skipped: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        backlog: bytes[12 + 2 * samples_per_packet],
        codes,
    })
}
/// Splits one USB stream transfer into packets, ignoring a trailing fragment.
pub fn parse_stream_transfer(
    buffer: &[u8],
    samples_per_packet: usize,
) -> Result<Vec<StreamPacket>, DaqError> {
    buffer
        .chunks_exact(packet_len(samples_per_packet))
        .map(|chunk| parse_stream_packet(chunk, samples_per_packet))
        .collect()
}
