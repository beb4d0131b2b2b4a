//! USB transport over an FTDI FIFO bridge.
//!
//! # Exchange
//!
//! ```text
//! host                         device
//!  │ ── #CMD code seq data ──────▶ │
//!  │ ◀───────── #ANS status seq ── │
//!  │ ◀──── #DAT len payload ────── │  (READ_FRAME only, repeated)
//! ```
//!
//! Reads accumulate partial bridge reads until a complete packet is
//! buffered. The read timeout is measured from the last read that returned
//! data, so a slow but progressing readout never times out.

use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace, warn};
use vmk_core::constants::USB_PIXEL_COUNT;
use vmk_core::{Error, Frame, Result, UsbIdentity};
use vmk_protocol::{
    AnswerCodec, DataChunkDecoder, SequenceTracker, TimerValue, UsbCommand, UsbCommandCode,
    decode_usb_samples,
};

use crate::ftdi::FtdiBridge;
use crate::traits::{DeviceTransport, UsbBridge};

/// Bit mode mask and value selecting synchronous 245 FIFO mode.
const FIFO_BITMODE: u8 = 0x40;

/// Bridge-level read/write timeout programmed at open.
const BRIDGE_TIMEOUT: Duration = Duration::from_millis(300);

/// Timer value programmed at open (100 ms).
const INITIAL_TIMER: u32 = 0x03E8;

/// USB transport generic over the bridge primitive.
///
/// Production code uses [`FtdiBridge`]; tests drive the same exchange logic
/// through [`MockBridge`](crate::mock::MockBridge).
#[derive(Debug)]
pub struct UsbTransport<B> {
    bridge: B,
    codec: AnswerCodec,
    buffer: BytesMut,
    sequence: SequenceTracker,
    read_timeout: Duration,
    pixel_count: usize,
    opened: bool,
}

impl UsbTransport<FtdiBridge> {
    /// Open the FTDI bridge matching `identity` and run the device handshake.
    ///
    /// # Errors
    ///
    /// - `Error::DeviceNotFound` if no matching device is attached
    /// - `Error::Usb` if the device cannot be opened or claimed
    /// - any exchange error from the handshake
    pub async fn open(identity: &UsbIdentity) -> Result<Self> {
        info!("Opening USB spectrometer {}", identity);
        let bridge = FtdiBridge::open(identity).await?;
        Self::with_bridge(bridge, identity.read_timeout).await
    }
}

impl<B: UsbBridge> UsbTransport<B> {
    /// Run the device handshake over an already opened bridge.
    ///
    /// Sets FIFO bit mode and bridge timeouts, then writes the control
    /// register, the initial timer and the pixel count.
    ///
    /// # Errors
    ///
    /// Returns any bridge or exchange error from the handshake.
    pub async fn with_bridge(mut bridge: B, read_timeout: Duration) -> Result<Self> {
        bridge.set_bitmode(FIFO_BITMODE, FIFO_BITMODE).await?;
        bridge.set_timeouts(BRIDGE_TIMEOUT, BRIDGE_TIMEOUT).await?;

        let mut transport = Self {
            bridge,
            codec: AnswerCodec::new(),
            buffer: BytesMut::with_capacity(64 * 1024),
            sequence: SequenceTracker::new(),
            read_timeout,
            pixel_count: USB_PIXEL_COUNT,
            opened: true,
        };

        transport.send_command(UsbCommandCode::WriteCr, 0).await?;
        transport
            .send_command(UsbCommandCode::WriteTimer, INITIAL_TIMER)
            .await?;
        transport
            .send_command(UsbCommandCode::WritePixelNumber, USB_PIXEL_COUNT as u32)
            .await?;

        info!(
            pixel_count = transport.pixel_count,
            "USB spectrometer handshake complete"
        );
        Ok(transport)
    }

    /// Send one command and return the data word of its answer.
    ///
    /// The sequence counter advances only after the answer has been fully
    /// validated.
    ///
    /// # Errors
    ///
    /// - `Error::DeviceClosed` after close
    /// - `Error::Timeout` if the answer does not arrive in time
    /// - `Error::ProtocolMismatch` on bad magic or sequence number
    /// - `Error::DeviceFailure` if the device rejects the command
    pub async fn send_command(&mut self, code: UsbCommandCode, data: u32) -> Result<u16> {
        self.ensure_open()?;

        let command = UsbCommand::new(code, self.sequence.current(), data);
        let mut packet = BytesMut::new();
        self.codec.encode(command, &mut packet)?;
        self.bridge.write(&packet).await?;

        let answer = loop {
            if let Some(answer) = self.codec.decode(&mut self.buffer)? {
                break answer;
            }
            self.fill().await?;
        };

        let value = answer.validate(&command)?;
        self.sequence.advance();
        trace!(?code, seq = command.seq, value, "Command acknowledged");
        Ok(value)
    }

    /// Firmware version word.
    pub async fn read_version(&mut self) -> Result<u16> {
        self.send_command(UsbCommandCode::ReadVersion, 0).await
    }

    /// Device error register.
    pub async fn read_errors(&mut self) -> Result<u16> {
        self.send_command(UsbCommandCode::ReadErrors, 0).await
    }

    /// Sequence number the next command will carry.
    pub fn next_sequence(&self) -> u16 {
        self.sequence.current()
    }

    /// Access the underlying bridge.
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    fn ensure_open(&self) -> Result<()> {
        if self.opened {
            Ok(())
        } else {
            Err(Error::DeviceClosed)
        }
    }

    /// Append at least one byte from the bridge to the receive buffer.
    async fn fill(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            let chunk = match tokio::time::timeout_at(deadline, self.bridge.read()).await {
                Ok(result) => result?,
                Err(_) => return Err(self.timeout_error()),
            };
            if !chunk.is_empty() {
                self.buffer.extend_from_slice(&chunk);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error());
            }
        }
    }

    fn timeout_error(&self) -> Error {
        warn!(
            "Device read timeout after {}ms",
            self.read_timeout.as_millis()
        );
        Error::timeout(self.read_timeout)
    }
}

impl<B: UsbBridge> DeviceTransport for UsbTransport<B> {
    fn is_open(&self) -> bool {
        self.opened
    }

    fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    async fn set_timer(&mut self, millis: u32) -> Result<()> {
        self.ensure_open()?;
        let timer = TimerValue::from_millis(millis)?;
        debug!(
            millis,
            mantissa = timer.mantissa(),
            exponent = timer.exponent(),
            "Setting exposure timer"
        );
        self.send_command(UsbCommandCode::WriteTimer, timer.usb_data())
            .await?;
        Ok(())
    }

    async fn read_frame(&mut self, n_times: usize) -> Result<Frame> {
        self.ensure_open()?;
        let lines = u32::try_from(n_times)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| Error::configuration(format!("Invalid line count {n_times}")))?;

        self.send_command(UsbCommandCode::ReadFrame, lines).await?;

        let expected = n_times * self.pixel_count * 2;
        let mut decoder = DataChunkDecoder::new(expected);
        let mut raw = BytesMut::with_capacity(expected);
        while !decoder.is_complete() {
            match decoder.decode(&mut self.buffer)? {
                Some(chunk) => raw.extend_from_slice(&chunk),
                None => self.fill().await?,
            }
        }

        trace!(n_times, bytes = expected, "Frame received");
        decode_usb_samples(&raw, n_times, self.pixel_count)
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.opened = false;
        self.buffer.clear();
        self.bridge.close().await?;
        info!("USB spectrometer closed");
        Ok(())
    }
}
