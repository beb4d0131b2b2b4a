//! Simulated FTDI bridge with device firmware behind it.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::trace;
use vmk_core::{Error, Result};
use vmk_protocol::usb::{encode_data_chunk, encode_sample};
use vmk_protocol::{AnswerStatus, UsbAnswer, UsbCommand, UsbCommandCode};

use crate::traits::UsbBridge;

/// Largest `#DAT` payload the simulated firmware sends.
const DEFAULT_CHUNK_LEN: usize = 4096;

/// Most bytes a single bridge read returns.
const DEFAULT_READ_SIZE: usize = 1000;

/// Delay of an empty read, standing in for the bridge read timeout.
const IDLE_READ_DELAY: Duration = Duration::from_millis(5);

/// One-shot fault applied to the next command the firmware receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeFault {
    /// Answer with a corrupted `#ANS` magic.
    BadAnswerMagic,
    /// Answer echoing the wrong sequence number.
    WrongSequence,
    /// Answer with FAILURE status.
    FailureStatus,
    /// Answer with UNKNOWN status.
    UnknownCommand,
    /// Never answer.
    Stall,
    /// Corrupt the magic of the first data chunk of a readout.
    BadDataMagic,
    /// Make the last data chunk of a readout longer than requested.
    OversizedChunk,
}

#[derive(Debug)]
struct Firmware {
    pixel_count: usize,
    timer: u32,
    chunk_len: usize,
    read_size: usize,
    read_delay: Duration,
    outbox: BytesMut,
    commands: Vec<UsbCommand>,
    faults: VecDeque<BridgeFault>,
    bitmode: Option<(u8, u8)>,
    timeouts: Option<(Duration, Duration)>,
    closed: bool,
}

impl Firmware {
    fn handle_command(&mut self, command: UsbCommand) {
        self.commands.push(command);
        let fault = self.faults.pop_front();

        let mut answer = UsbAnswer::success(command.seq);
        match fault {
            Some(BridgeFault::Stall) => {
                trace!(seq = command.seq, "Simulated firmware stalls");
                return;
            }
            Some(BridgeFault::WrongSequence) => answer.seq = command.seq.wrapping_add(1),
            Some(BridgeFault::FailureStatus) => answer.status = AnswerStatus::FAILURE,
            Some(BridgeFault::UnknownCommand) => answer.status = AnswerStatus::UNKNOWN,
            _ => {}
        }

        let start = self.outbox.len();
        answer.encode(&mut self.outbox);
        if fault == Some(BridgeFault::BadAnswerMagic) {
            self.outbox[start + 3] = b'X';
        }
        if answer.status != AnswerStatus::SUCCESS {
            return;
        }

        match command.code {
            UsbCommandCode::WriteTimer => self.timer = command.data,
            UsbCommandCode::WritePixelNumber => self.pixel_count = command.data as usize,
            UsbCommandCode::ReadFrame => self.push_readout(command.data as usize, fault),
            _ => {}
        }
    }

    /// Queue `n_times` lines of `pixel + row` samples as `#DAT` chunks.
    fn push_readout(&mut self, n_times: usize, fault: Option<BridgeFault>) {
        let mut raw = Vec::with_capacity(n_times * self.pixel_count * 2);
        for row in 0..n_times {
            for pixel in 0..self.pixel_count {
                raw.extend_from_slice(&encode_sample((pixel + row) as u16).to_le_bytes());
            }
        }
        if fault == Some(BridgeFault::OversizedChunk) {
            raw.extend_from_slice(&[0, 0]);
        }

        let start = self.outbox.len();
        for chunk in raw.chunks(self.chunk_len) {
            encode_data_chunk(chunk, &mut self.outbox);
        }
        if fault == Some(BridgeFault::BadDataMagic) && self.outbox.len() > start + 3 {
            self.outbox[start + 3] = b'X';
        }
    }
}

/// Simulated FTDI bridge.
///
/// Commands written to the bridge are decoded and answered by a simulated
/// firmware; reads hand the answers back in partial slices so the transport's
/// accumulation logic is exercised. Frames carry `pixel + row` samples.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use vmk_hardware::mock::MockBridge;
/// use vmk_hardware::{DeviceTransport, UsbTransport};
///
/// #[tokio::main]
/// async fn main() -> vmk_core::Result<()> {
///     let (bridge, handle) = MockBridge::new();
///     let mut transport = UsbTransport::with_bridge(bridge, Duration::from_secs(1)).await?;
///
///     let frame = transport.read_frame(2).await?;
///     assert_eq!(frame.samples()[[1, 0]], 1);
///     assert_eq!(handle.commands().len(), 4);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockBridge {
    firmware: Arc<Mutex<Firmware>>,
}

impl MockBridge {
    /// Create a bridge and the handle controlling its firmware.
    pub fn new() -> (Self, MockBridgeHandle) {
        let firmware = Arc::new(Mutex::new(Firmware {
            pixel_count: 0,
            timer: 0,
            chunk_len: DEFAULT_CHUNK_LEN,
            read_size: DEFAULT_READ_SIZE,
            read_delay: Duration::ZERO,
            outbox: BytesMut::new(),
            commands: Vec::new(),
            faults: VecDeque::new(),
            bitmode: None,
            timeouts: None,
            closed: false,
        }));
        let handle = MockBridgeHandle {
            firmware: Arc::clone(&firmware),
        };
        (Self { firmware }, handle)
    }

    fn firmware(&self) -> MutexGuard<'_, Firmware> {
        lock(&self.firmware)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.firmware().closed {
            Err(Error::DeviceClosed)
        } else {
            Ok(())
        }
    }
}

impl UsbBridge for MockBridge {
    async fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<()> {
        self.ensure_open()?;
        self.firmware().bitmode = Some((mask, mode));
        Ok(())
    }

    async fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.ensure_open()?;
        self.firmware().timeouts = Some((read, write));
        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes> {
        self.ensure_open()?;
        let (chunk, delay) = {
            let mut firmware = self.firmware();
            let n = firmware.read_size.min(firmware.outbox.len());
            (firmware.outbox.split_to(n).freeze(), firmware.read_delay)
        };
        if chunk.is_empty() {
            tokio::time::sleep(IDLE_READ_DELAY.max(delay)).await;
        } else if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(chunk)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let command = UsbCommand::parse(data)?;
        self.firmware().handle_command(command);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut firmware = self.firmware();
        if firmware.closed {
            return Err(Error::DeviceClosed);
        }
        firmware.closed = true;
        Ok(())
    }
}

/// Handle for inspecting and steering a [`MockBridge`].
#[derive(Debug, Clone)]
pub struct MockBridgeHandle {
    firmware: Arc<Mutex<Firmware>>,
}

impl MockBridgeHandle {
    /// Apply `fault` to the next command (faults queue in order).
    pub fn inject(&self, fault: BridgeFault) {
        lock(&self.firmware).faults.push_back(fault);
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<UsbCommand> {
        lock(&self.firmware).commands.clone()
    }

    /// Last `WRITE_TIMER` data word accepted.
    pub fn timer(&self) -> u32 {
        lock(&self.firmware).timer
    }

    pub fn bitmode(&self) -> Option<(u8, u8)> {
        lock(&self.firmware).bitmode
    }

    pub fn timeouts(&self) -> Option<(Duration, Duration)> {
        lock(&self.firmware).timeouts
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.firmware).closed
    }

    /// Largest `#DAT` payload to send (rounded down to whole samples).
    pub fn set_chunk_len(&self, chunk_len: usize) {
        lock(&self.firmware).chunk_len = (chunk_len & !1).max(2);
    }

    /// Latency added to every bridge read.
    pub fn set_read_delay(&self, read_delay: Duration) {
        lock(&self.firmware).read_delay = read_delay;
    }

    /// Most bytes returned by one bridge read.
    pub fn set_read_size(&self, read_size: usize) {
        lock(&self.firmware).read_size = read_size.max(1);
    }
}

fn lock(firmware: &Mutex<Firmware>) -> MutexGuard<'_, Firmware> {
    firmware.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
