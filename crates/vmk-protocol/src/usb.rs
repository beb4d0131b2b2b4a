//! Wire format of the USB (FTDI FIFO) transport.
//!
//! # Packets
//!
//! All integers are little-endian.
//!
//! ```text
//! Command: "#CMD" | code u8 | length u8 (=4) | seq u16 | data u32     (12 bytes)
//! Answer:  "#ANS" | status u8 | length u8    | seq u16 | data u16     (10 bytes)
//! Data:    "#DAT" | length u16 | payload[length]
//! ```
//!
//! A command is answered by exactly one answer packet. `READ_FRAME` is
//! additionally followed by a stream of `#DAT` chunks whose payloads
//! concatenate to the requested sample bytes.
//!
//! # Samples
//!
//! Samples are 16-bit words with bit 15 inverted. After restoring bit 15 a
//! value of `0xFFFF` marks a saturated (clipped) pixel.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ndarray::Array2;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;
use vmk_core::{Error, Frame, Result};

/// Magic prefix of a command packet.
pub const COMMAND_MAGIC: &[u8; 4] = b"#CMD";

/// Magic prefix of an answer packet.
pub const ANSWER_MAGIC: &[u8; 4] = b"#ANS";

/// Magic prefix of a data chunk.
pub const DATA_MAGIC: &[u8; 4] = b"#DAT";

pub const COMMAND_LEN: usize = 12;
pub const ANSWER_LEN: usize = 10;
pub const DATA_HEADER_LEN: usize = 6;

/// Length byte carried by every command (size of the data field).
const COMMAND_DATA_LEN: u8 = 4;

/// Bit inverted in every transmitted sample.
const SAMPLE_XOR: u16 = 0x8000;

/// Sample value marking a saturated pixel.
const CLIPPED_SAMPLE: u16 = 0xFFFF;

/// Command codes understood by the USB firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UsbCommandCode {
    /// Write the control register.
    WriteCr = 0x01,
    /// Program the exposure timer.
    WriteTimer = 0x02,
    /// Start a readout of N lines.
    ReadFrame = 0x05,
    /// Set the number of pixels per line.
    WritePixelNumber = 0x0C,
    ReadVersion = 0x91,
    ReadErrors = 0x92,
}

impl UsbCommandCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for UsbCommandCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::WriteCr),
            0x02 => Ok(Self::WriteTimer),
            0x05 => Ok(Self::ReadFrame),
            0x0C => Ok(Self::WritePixelNumber),
            0x91 => Ok(Self::ReadVersion),
            0x92 => Ok(Self::ReadErrors),
            other => Err(Error::protocol(format!(
                "Unknown USB command code 0x{other:02X}"
            ))),
        }
    }
}

/// Status byte of an answer packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    Success,
    Failure,
    UnknownCommand,
    Other(u8),
}

impl AnswerStatus {
    pub const SUCCESS: u8 = 0x2B;
    pub const FAILURE: u8 = 0x2D;
    pub const UNKNOWN: u8 = 0x3F;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::SUCCESS => Self::Success,
            Self::FAILURE => Self::Failure,
            Self::UNKNOWN => Self::UnknownCommand,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Success => Self::SUCCESS,
            Self::Failure => Self::FAILURE,
            Self::UnknownCommand => Self::UNKNOWN,
            Self::Other(other) => other,
        }
    }
}

/// Outbound command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbCommand {
    pub code: UsbCommandCode,
    pub seq: u16,
    pub data: u32,
}

impl UsbCommand {
    pub fn new(code: UsbCommandCode, seq: u16, data: u32) -> Self {
        Self { code, seq, data }
    }

    /// Append the 12-byte wire form to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(COMMAND_LEN);
        dst.put_slice(COMMAND_MAGIC);
        dst.put_u8(self.code.as_u8());
        dst.put_u8(COMMAND_DATA_LEN);
        dst.put_u16_le(self.seq);
        dst.put_u32_le(self.data);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(COMMAND_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse a command packet (used by device simulators).
    ///
    /// # Errors
    /// Returns `Error::ProtocolMismatch` on a short packet, bad magic or
    /// unknown command code.
    pub fn parse(mut src: &[u8]) -> Result<Self> {
        if src.len() < COMMAND_LEN {
            return Err(Error::protocol(format!(
                "Command packet too short: {} bytes",
                src.len()
            )));
        }
        if &src[..4] != COMMAND_MAGIC {
            return Err(Error::protocol("Received bad #CMD magic"));
        }
        src.advance(4);
        let code = UsbCommandCode::try_from(src.get_u8())?;
        let _length = src.get_u8();
        let seq = src.get_u16_le();
        let data = src.get_u32_le();
        Ok(Self { code, seq, data })
    }
}

/// Inbound answer packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbAnswer {
    pub status: u8,
    pub length: u8,
    pub seq: u16,
    pub data: u16,
}

impl UsbAnswer {
    /// Successful answer echoing `seq` (used by device simulators).
    pub fn success(seq: u16) -> Self {
        Self {
            status: AnswerStatus::SUCCESS,
            length: 2,
            seq,
            data: 0,
        }
    }

    pub fn status(&self) -> AnswerStatus {
        AnswerStatus::from_byte(self.status)
    }

    /// Check that this answer acknowledges `command`.
    ///
    /// The answer carries no command code, so correlation is by sequence
    /// number only.
    ///
    /// # Errors
    /// - `Error::ProtocolMismatch` if the sequence number differs
    /// - `Error::DeviceFailure` if the status is not SUCCESS
    pub fn validate(&self, command: &UsbCommand) -> Result<u16> {
        if self.seq != command.seq {
            return Err(Error::protocol(format!(
                "Answer sequence mismatch: expected {}, got {}",
                command.seq, self.seq
            )));
        }
        if self.status() != AnswerStatus::Success {
            return Err(Error::DeviceFailure {
                code: u16::from(self.status),
                command: u16::from(command.code.as_u8()),
            });
        }
        Ok(self.data)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(ANSWER_LEN);
        dst.put_slice(ANSWER_MAGIC);
        dst.put_u8(self.status);
        dst.put_u8(self.length);
        dst.put_u16_le(self.seq);
        dst.put_u16_le(self.data);
    }
}

/// Codec for the command/answer exchange: encodes [`UsbCommand`]s and
/// decodes 10-byte [`UsbAnswer`]s.
///
/// A bad answer magic is fatal; there is no resynchronisation.
#[derive(Debug, Default)]
pub struct AnswerCodec;

impl AnswerCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for AnswerCodec {
    type Item = UsbAnswer;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<UsbAnswer>> {
        if src.len() < ANSWER_LEN {
            src.reserve(ANSWER_LEN - src.len());
            return Ok(None);
        }
        if &src[..4] != ANSWER_MAGIC {
            return Err(Error::protocol("Received bad #ANS magic from device"));
        }

        let mut packet = src.split_to(ANSWER_LEN);
        packet.advance(4);
        let answer = UsbAnswer {
            status: packet.get_u8(),
            length: packet.get_u8(),
            seq: packet.get_u16_le(),
            data: packet.get_u16_le(),
        };
        trace!(seq = answer.seq, status = answer.status, "Decoded #ANS");
        Ok(Some(answer))
    }
}

impl Encoder<UsbCommand> for AnswerCodec {
    type Error = Error;

    fn encode(&mut self, item: UsbCommand, dst: &mut BytesMut) -> Result<()> {
        trace!(code = ?item.code, seq = item.seq, data = item.data, "Encoding #CMD");
        item.encode(dst);
        Ok(())
    }
}

/// Decoder for the `#DAT` chunk stream following `READ_FRAME`.
///
/// Tracks how many payload bytes are still expected; each decoded item is
/// the payload of one chunk. A chunk longer than the remaining byte count,
/// an odd chunk length, or a bad magic is a protocol violation.
#[derive(Debug)]
pub struct DataChunkDecoder {
    remaining: usize,
}

impl DataChunkDecoder {
    pub fn new(expected_bytes: usize) -> Self {
        Self {
            remaining: expected_bytes,
        }
    }

    /// Payload bytes still expected.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

impl Decoder for DataChunkDecoder {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < DATA_HEADER_LEN {
            return Ok(None);
        }
        if &src[..4] != DATA_MAGIC {
            return Err(Error::protocol("Received bad #DAT magic from device"));
        }

        let length = usize::from(u16::from_le_bytes([src[4], src[5]]));
        if length % 2 != 0 {
            return Err(Error::protocol(format!(
                "Data chunk length {length} is not a whole number of samples"
            )));
        }
        if length > self.remaining {
            return Err(Error::protocol(format!(
                "Data chunk of {length} bytes exceeds the {} bytes still expected",
                self.remaining
            )));
        }

        let total = DATA_HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(DATA_HEADER_LEN);
        let payload = src.split_to(length).freeze();
        self.remaining -= length;
        trace!(length, remaining = self.remaining, "Decoded #DAT chunk");
        Ok(Some(payload))
    }
}

/// Encode one `#DAT` chunk (used by device simulators).
pub fn encode_data_chunk(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(DATA_HEADER_LEN + payload.len());
    dst.put_slice(DATA_MAGIC);
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
}

/// Encode a sample the way the detector transmits it.
pub fn encode_sample(value: u16) -> u16 {
    value ^ SAMPLE_XOR
}

/// Decode raw USB sample bytes into a frame of shape `[n_times, pixel_count]`.
///
/// # Errors
/// Returns `Error::ProtocolMismatch` if the byte count does not match the
/// requested shape.
pub fn decode_usb_samples(raw: &[u8], n_times: usize, pixel_count: usize) -> Result<Frame> {
    let expected = n_times * pixel_count * 2;
    if raw.len() != expected {
        return Err(Error::protocol(format!(
            "Expected {expected} sample bytes, got {}",
            raw.len()
        )));
    }

    let (samples, clipped): (Vec<i32>, Vec<bool>) = raw
        .chunks_exact(2)
        .map(|word| {
            let sample = u16::from_le_bytes([word[0], word[1]]) ^ SAMPLE_XOR;
            (i32::from(sample), sample == CLIPPED_SAMPLE)
        })
        .unzip();

    let shape = (n_times, pixel_count);
    let samples = Array2::from_shape_vec(shape, samples)
        .map_err(|e| Error::protocol(format!("Invalid sample layout: {e}")))?;
    let clipped = Array2::from_shape_vec(shape, clipped)
        .map_err(|e| Error::protocol(format!("Invalid sample layout: {e}")))?;
    Frame::new(samples, clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_command_layout() {
        let cmd = UsbCommand::new(UsbCommandCode::WriteTimer, 0x0102, 0x0001_03E8);
        let bytes = cmd.to_bytes();
        assert_eq!(
            bytes.as_ref(),
            &[
                b'#', b'C', b'M', b'D', 0x02, 0x04, 0x02, 0x01, 0xE8, 0x03, 0x01, 0x00
            ]
        );
        assert_eq!(UsbCommand::parse(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_decode_answer() {
        let mut buf = BytesMut::from(&b"#ANS\x2B\x02\x05\x00\x34\x12"[..]);
        let answer = AnswerCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(answer.status(), AnswerStatus::Success);
        assert_eq!(answer.seq, 5);
        assert_eq!(answer.data, 0x1234);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_answer() {
        let mut codec = AnswerCodec::new();
        let mut buf = BytesMut::from(&b"#ANS\x2B"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\x02\x01\x00\x00\x00");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_bad_answer_magic() {
        let mut buf = BytesMut::from(&b"#ANZ\x2B\x02\x01\x00\x00\x00"[..]);
        let err = AnswerCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
    }

    #[test]
    fn test_validate_sequence_mismatch() {
        let cmd = UsbCommand::new(UsbCommandCode::ReadFrame, 7, 1);
        let answer = UsbAnswer::success(8);
        assert!(matches!(
            answer.validate(&cmd),
            Err(Error::ProtocolMismatch { .. })
        ));
    }

    #[rstest]
    #[case(AnswerStatus::FAILURE)]
    #[case(AnswerStatus::UNKNOWN)]
    #[case(0x00)]
    fn test_validate_failure_status(#[case] status: u8) {
        let cmd = UsbCommand::new(UsbCommandCode::WriteCr, 3, 0);
        let answer = UsbAnswer {
            status,
            ..UsbAnswer::success(3)
        };
        let err = answer.validate(&cmd).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceFailure { code, command: 0x01 } if code == u16::from(status)
        ));
    }

    #[test]
    fn test_data_chunks() {
        let mut buf = BytesMut::new();
        encode_data_chunk(&[1, 2, 3, 4], &mut buf);
        encode_data_chunk(&[5, 6], &mut buf);

        let mut decoder = DataChunkDecoder::new(6);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(decoder.remaining(), 2);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_ref(), &[5, 6]);
        assert!(decoder.is_complete());
    }

    #[test]
    fn test_data_chunk_waits_for_payload() {
        let mut full = BytesMut::new();
        encode_data_chunk(&[9, 9, 9, 9], &mut full);
        let mut buf = full.split_to(8);

        let mut decoder = DataChunkDecoder::new(4);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.unsplit(full);
        assert!(decoder.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_data_chunk_overflow() {
        let mut buf = BytesMut::new();
        encode_data_chunk(&[0; 8], &mut buf);
        let err = DataChunkDecoder::new(4).decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
    }

    #[test]
    fn test_data_chunk_odd_length() {
        let mut buf = BytesMut::new();
        encode_data_chunk(&[0; 3], &mut buf);
        assert!(DataChunkDecoder::new(4).decode(&mut buf).is_err());
    }

    #[test]
    fn test_data_chunk_bad_magic() {
        let mut buf = BytesMut::from(&b"#DAX\x02\x00\x00\x00"[..]);
        assert!(DataChunkDecoder::new(2).decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_samples() {
        let values: [u16; 4] = [0, 0x1234, 0xFFFF, 0x7FFF];
        let raw: Vec<u8> = values
            .iter()
            .flat_map(|&v| encode_sample(v).to_le_bytes())
            .collect();

        let frame = decode_usb_samples(&raw, 2, 2).unwrap();
        assert_eq!(frame.samples().as_slice().unwrap(), &[0, 0x1234, 0xFFFF, 0x7FFF]);
        assert_eq!(
            frame.clipped().as_slice().unwrap(),
            &[false, false, true, false]
        );
    }

    #[test]
    fn test_decode_samples_wrong_length() {
        assert!(decode_usb_samples(&[0; 6], 1, 4).is_err());
    }
}
