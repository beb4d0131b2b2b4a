//! Wire format of the Ethernet transport.
//!
//! Control traffic is request/response over UDP; measurement data streams
//! over a separate TCP connection. Packets are built from little-endian
//! 16-bit words.
//!
//! ```text
//! Command: opcode u16 | seq u16 | payload ... | zero padding to 16 bytes
//! Answer:  resp u16 | pad u16 | opcode u16 | seq u16 | data ...
//! ```
//!
//! Response codes 0..=2 are successes. Some commands are followed by
//! extension packets with the answer layout; `READ_INI` sends the device
//! ini in one such packet.
//!
//! Every line on the data stream starts with a six-word sentinel which is
//! validated and stripped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ndarray::Array2;
use tokio_util::codec::Decoder;
use tracing::trace;
use vmk_core::{Error, Frame, Result};

use crate::TimerValue;

/// Minimum size of a command datagram.
pub const COMMAND_MIN_LEN: usize = 16;

/// Size of the answer header preceding its data.
pub const ANSWER_HEADER_LEN: usize = 8;

/// Largest response code that still means success.
pub const MAX_SUCCESS_RESPONSE: u16 = 2;

/// Size of the packed ini record.
pub const INI_LEN: usize = 30;

/// Marker byte meaning "flag set" in the ini.
const INI_FLAG_SET: u8 = 0xAB;

/// Words every measurement line starts with.
pub const LINE_SENTINEL: [u16; 6] = [0, 0, 0x8000, 0x8000, 0xABAB, 0xABAB];

/// Ethernet command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EthernetOpcode {
    /// Program the exposure timer.
    SetTimer = 0x0002,
    /// Start registration of N lines.
    ReadMultiline = 0x0005,
    /// Select pixel count and chip count per line.
    SetLineLength = 0x000C,
    /// Set the number of requested lines.
    SetLineNumber = 0x0010,
    /// Read the device configuration record.
    ReadIni = 0x800B,
    /// Read detector assembly permutation info.
    ReadAssemblySwap = 0x8013,
}

impl EthernetOpcode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for EthernetOpcode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0002 => Ok(Self::SetTimer),
            0x0005 => Ok(Self::ReadMultiline),
            0x000C => Ok(Self::SetLineLength),
            0x0010 => Ok(Self::SetLineNumber),
            0x800B => Ok(Self::ReadIni),
            0x8013 => Ok(Self::ReadAssemblySwap),
            other => Err(Error::protocol(format!(
                "Unknown Ethernet opcode 0x{other:04X}"
            ))),
        }
    }
}

/// Outbound control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetCommand {
    pub opcode: EthernetOpcode,
    pub seq: u16,
    pub payload: Bytes,
}

impl EthernetCommand {
    pub fn new(opcode: EthernetOpcode, seq: u16, payload: Bytes) -> Self {
        Self {
            opcode,
            seq,
            payload,
        }
    }

    /// Wire form, zero-padded to [`COMMAND_MIN_LEN`].
    pub fn encode(&self) -> Bytes {
        let len = (4 + self.payload.len()).max(COMMAND_MIN_LEN);
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u16_le(self.opcode.as_u16());
        buf.put_u16_le(self.seq);
        buf.put_slice(&self.payload);
        buf.resize(len, 0);
        buf.freeze()
    }

    /// Parse a command datagram (used by device simulators).
    ///
    /// # Errors
    /// Returns `Error::ProtocolMismatch` on a short datagram or unknown opcode.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < 4 {
            return Err(Error::protocol(format!(
                "Command datagram too short: {} bytes",
                src.len()
            )));
        }
        let mut header = &src[..4];
        let opcode = EthernetOpcode::try_from(header.get_u16_le())?;
        let seq = header.get_u16_le();
        Ok(Self {
            opcode,
            seq,
            payload: Bytes::copy_from_slice(&src[4..]),
        })
    }
}

/// Inbound answer or extension datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetAnswer {
    pub response_code: u16,
    pub opcode: u16,
    pub seq: u16,
    pub data: Bytes,
}

impl EthernetAnswer {
    /// # Errors
    /// Returns `Error::ProtocolMismatch` if the datagram is shorter than the
    /// answer header.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < ANSWER_HEADER_LEN {
            return Err(Error::protocol(format!(
                "Answer datagram too short: {} bytes",
                src.len()
            )));
        }
        let mut header = &src[..ANSWER_HEADER_LEN];
        let response_code = header.get_u16_le();
        header.advance(2);
        let opcode = header.get_u16_le();
        let seq = header.get_u16_le();
        Ok(Self {
            response_code,
            opcode,
            seq,
            data: Bytes::copy_from_slice(&src[ANSWER_HEADER_LEN..]),
        })
    }

    /// Successful answer to `command` carrying `data` (used by device simulators).
    pub fn reply(command: &EthernetCommand, data: &[u8]) -> Self {
        Self {
            response_code: 0,
            opcode: command.opcode.as_u16(),
            seq: command.seq,
            data: Bytes::copy_from_slice(data),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ANSWER_HEADER_LEN + self.data.len());
        buf.put_u16_le(self.response_code);
        buf.put_u16_le(0);
        buf.put_u16_le(self.opcode);
        buf.put_u16_le(self.seq);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Check that this datagram answers `command`.
    ///
    /// # Errors
    /// - `Error::ProtocolMismatch` on sequence or opcode mismatch
    /// - `Error::DeviceFailure` if the response code is above 2
    pub fn validate(&self, command: &EthernetCommand) -> Result<()> {
        if self.seq != command.seq {
            return Err(Error::protocol(format!(
                "Response sequence number mismatch: expected {}, got {}",
                command.seq, self.seq
            )));
        }
        if self.opcode != command.opcode.as_u16() {
            return Err(Error::protocol(format!(
                "Response opcode mismatch: expected 0x{:04X}, got 0x{:04X}",
                command.opcode.as_u16(),
                self.opcode
            )));
        }
        if self.response_code > MAX_SUCCESS_RESPONSE {
            return Err(Error::DeviceFailure {
                code: self.response_code,
                command: command.opcode.as_u16(),
            });
        }
        Ok(())
    }
}

/// `READ_INI` payload.
pub fn ini_request_payload() -> Bytes {
    Bytes::from_static(&[0])
}

/// `SET_TIMER` payload: mantissa, two pad bytes, exponent.
pub fn timer_payload(timer: TimerValue) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16_le(timer.mantissa());
    buf.put_u16_le(0);
    buf.put_u16_le(u16::from(timer.exponent()));
    buf.freeze()
}

/// `SET_LINE_LENGTH` payload. Zero in either field selects the device default.
pub fn line_length_payload(num_pixels: u32, num_chips: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u32_le(num_pixels);
    buf.put_u16_le(num_chips);
    buf.freeze()
}

/// `READ_MULTILINE` payload: mode word 0, two pad bytes, line count.
pub fn multiline_payload(n_times: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u16_le(0);
    buf.put_u16_le(0);
    buf.put_u32_le(n_times);
    buf.freeze()
}

/// Device configuration record returned by `READ_INI`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIni {
    /// Number of chips in the detector assembly (1..=255).
    pub num_chips: u8,
    pub pixels_per_chip: u16,
    pub chip_type: u16,
    /// ADC sampling period.
    pub adc_rate: u8,
    pub config_bits: u8,
    pub assembly_type: u8,
    /// Minimal exposure in milliseconds.
    pub min_exposure_ms: f64,
    /// Total pixels per line across all chips, sentinel included.
    pub num_pixels: u32,
    /// A calibration diagram is stored on the device.
    pub dia_present: bool,
    /// Radiator temperature stabilisation is on.
    pub thermostat_enabled: bool,
    /// Radiator target temperature, °C.
    pub mtr0: f32,
    /// Reference voltage Ui0, V.
    pub mui0: f32,
}

impl DeviceIni {
    /// Parse the packed 30-byte record.
    ///
    /// # Errors
    /// Returns `Error::ProtocolMismatch` if fewer than 30 bytes are given.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < INI_LEN {
            return Err(Error::protocol(format!(
                "Device ini too short: {} of {INI_LEN} bytes",
                src.len()
            )));
        }
        let mut buf = &src[..INI_LEN];

        let num_chips = buf.get_u8();
        buf.advance(3);
        let pixels_per_chip = buf.get_u16_le();
        let chip_type = buf.get_u16_le();
        let adc_rate = buf.get_u8();
        let config_bits = buf.get_u8();
        buf.advance(1);
        let assembly_type = buf.get_u8();
        let min_exposure_value = buf.get_u16_le();
        let min_exposure_exponent = buf.get_u16_le();
        let num_pixels = buf.get_u32_le();
        let dia_present = buf.get_u8() == INI_FLAG_SET;
        let thermostat_enabled = buf.get_u8() == INI_FLAG_SET;
        let mtr0 = buf.get_f32_le();
        let mui0 = buf.get_f32_le();

        Ok(Self {
            num_chips,
            pixels_per_chip,
            chip_type,
            adc_rate,
            config_bits,
            assembly_type,
            min_exposure_ms: 0.1
                * f64::from(min_exposure_value)
                * 10f64.powi(i32::from(min_exposure_exponent)),
            num_pixels,
            dia_present,
            thermostat_enabled,
            mtr0,
            mui0,
        })
    }

    /// Pixels per frame row once the line sentinel is stripped.
    pub fn pixel_count(&self) -> usize {
        (self.num_pixels as usize).saturating_sub(LINE_SENTINEL.len())
    }

    /// Pack into the wire record (used by device simulators).
    ///
    /// The minimal exposure is written with exponent 0.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(INI_LEN);
        buf.put_u8(self.num_chips);
        buf.put_bytes(0, 3);
        buf.put_u16_le(self.pixels_per_chip);
        buf.put_u16_le(self.chip_type);
        buf.put_u8(self.adc_rate);
        buf.put_u8(self.config_bits);
        buf.put_u8(0);
        buf.put_u8(self.assembly_type);
        buf.put_u16_le((self.min_exposure_ms * 10.0).round() as u16);
        buf.put_u16_le(0);
        buf.put_u32_le(self.num_pixels);
        buf.put_u8(if self.dia_present { INI_FLAG_SET } else { 0 });
        buf.put_u8(if self.thermostat_enabled { INI_FLAG_SET } else { 0 });
        buf.put_f32_le(self.mtr0);
        buf.put_f32_le(self.mui0);
        buf.freeze()
    }
}

/// Decoder for one `READ_MULTILINE` readout on the TCP data stream.
///
/// Configure the expected shape with [`MultilineDecoder::expect_lines`] before
/// each readout; the decoder yields a single [`Frame`] once all
/// `n_times × line_len × 2` bytes have arrived.
#[derive(Debug, Default)]
pub struct MultilineDecoder {
    n_times: usize,
    line_len: usize,
}

impl MultilineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `n_times` lines of `line_len` words (sentinel included).
    pub fn expect_lines(&mut self, n_times: usize, line_len: usize) {
        self.n_times = n_times;
        self.line_len = line_len;
    }

    fn expected_bytes(&self) -> usize {
        self.n_times * self.line_len * 2
    }
}

impl Decoder for MultilineDecoder {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let expected = self.expected_bytes();
        if expected == 0 {
            return Ok(None);
        }
        if src.len() < expected {
            src.reserve(expected - src.len());
            return Ok(None);
        }

        let raw = src.split_to(expected);
        let frame = decode_ethernet_lines(&raw, self.n_times, self.line_len)?;
        trace!(n_times = self.n_times, "Decoded multiline readout");
        self.n_times = 0;
        Ok(Some(frame))
    }
}

/// Validate and strip the per-line sentinel.
///
/// `line_len` counts the sentinel words; the resulting frame has
/// `line_len - 6` columns and no clipped samples.
///
/// # Errors
/// - `Error::InvalidHeader` naming the first line whose sentinel differs
/// - `Error::ProtocolMismatch` if the byte count does not match the shape
pub fn decode_ethernet_lines(raw: &[u8], n_times: usize, line_len: usize) -> Result<Frame> {
    if line_len < LINE_SENTINEL.len() {
        return Err(Error::protocol(format!(
            "Line length {line_len} is shorter than the line sentinel"
        )));
    }
    let expected = n_times * line_len * 2;
    if raw.len() != expected {
        return Err(Error::protocol(format!(
            "Expected {expected} stream bytes, got {}",
            raw.len()
        )));
    }

    let pixel_count = line_len - LINE_SENTINEL.len();
    let mut samples = Vec::with_capacity(n_times * pixel_count);
    for (line, bytes) in raw.chunks_exact(line_len * 2).enumerate() {
        let mut words = bytes
            .chunks_exact(2)
            .map(|word| u16::from_le_bytes([word[0], word[1]]));

        let header_ok = LINE_SENTINEL
            .iter()
            .all(|&expected| words.next() == Some(expected));
        if !header_ok {
            return Err(Error::InvalidHeader { line });
        }
        samples.extend(words.map(i32::from));
    }

    let samples = Array2::from_shape_vec((n_times, pixel_count), samples)
        .map_err(|e| Error::protocol(format!("Invalid sample layout: {e}")))?;
    Ok(Frame::unclipped(samples))
}

/// Encode one measurement line with its sentinel (used by device simulators).
pub fn encode_line(samples: &[u16], dst: &mut BytesMut) {
    dst.reserve((LINE_SENTINEL.len() + samples.len()) * 2);
    for &word in LINE_SENTINEL.iter().chain(samples) {
        dst.put_u16_le(word);
    }
}
