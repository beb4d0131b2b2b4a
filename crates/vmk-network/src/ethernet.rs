//! Ethernet transport: UDP control channel plus TCP data stream.
//!
//! # Architecture
//!
//! ```text
//! EthernetTransport
//!     │
//!     ├─> ControlChannel ──(UDP :555)──> device   command / answer (+ ext packets)
//!     │
//!     └─> FramedRead<TcpStream, MultilineDecoder> <──(TCP :556)── device lines
//! ```
//!
//! The device ini is read once at open and drives every readout: the line
//! length programmed before each `READ_MULTILINE`, the byte count expected
//! on the stream, and the minimal exposure accepted by `set_timer`.
//!
//! # Timeout Handling
//!
//! Control exchanges wait up to the identity timeout for each datagram.
//! Stream reads additionally allow the exposure time of every requested
//! line.

use bytes::Bytes;
use futures::StreamExt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, trace, warn};
use vmk_core::{EthernetIdentity, Error, Frame, Result};
use vmk_hardware::DeviceTransport;
use vmk_protocol::ethernet::{
    ini_request_payload, line_length_payload, multiline_payload, timer_payload,
};
use vmk_protocol::{
    DeviceIni, EthernetAnswer, EthernetCommand, EthernetOpcode, MultilineDecoder,
    SequenceTracker, TimerValue,
};

/// Receive buffer for one control datagram.
const UDP_BUFFER_SIZE: usize = 65536;

/// Request/answer exchange over the UDP control port.
#[derive(Debug)]
struct ControlChannel {
    socket: UdpSocket,
    sequence: SequenceTracker,
    timeout: Duration,
    buffer: Vec<u8>,
}

impl ControlChannel {
    async fn connect(device: SocketAddr, timeout: Duration) -> Result<Self> {
        let local: SocketAddr = match device.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(device).await?;
        debug!("Control channel bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            sequence: SequenceTracker::new(),
            timeout,
            buffer: vec![0; UDP_BUFFER_SIZE],
        })
    }

    /// Send one command and collect the data of its answer followed by
    /// `ext_packets` extension packets.
    async fn exchange(
        &mut self,
        opcode: EthernetOpcode,
        payload: Bytes,
        ext_packets: usize,
    ) -> Result<Vec<Bytes>> {
        let command = EthernetCommand::new(opcode, self.sequence.current(), payload);
        trace!(?opcode, seq = command.seq, "Sending control command");
        self.socket.send(&command.encode()).await?;

        let mut responses = Vec::with_capacity(1 + ext_packets);
        for _ in 0..=ext_packets {
            let n = match tokio::time::timeout(self.timeout, self.socket.recv(&mut self.buffer))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Receive timeout after {}ms", self.timeout.as_millis());
                    return Err(Error::timeout(self.timeout));
                }
            };
            let answer = EthernetAnswer::parse(&self.buffer[..n])?;
            answer.validate(&command)?;
            responses.push(answer.data);
        }

        self.sequence.advance();
        trace!(?opcode, seq = command.seq, "Control command acknowledged");
        Ok(responses)
    }
}

#[derive(Debug)]
struct Channels {
    control: ControlChannel,
    data: FramedRead<TcpStream, MultilineDecoder>,
}

/// Ethernet spectrometer transport.
///
/// # Example
///
/// ```no_run
/// use vmk_core::EthernetIdentity;
/// use vmk_hardware::DeviceTransport;
/// use vmk_network::EthernetTransport;
///
/// # async fn example() -> vmk_core::Result<()> {
/// let identity = EthernetIdentity::new("192.168.0.10".parse().unwrap());
/// let mut transport = EthernetTransport::open(&identity).await?;
/// println!("{} pixels per line", transport.pixel_count());
///
/// transport.set_timer(10).await?;
/// let frame = transport.read_frame(2).await?;
/// transport.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EthernetTransport {
    identity: EthernetIdentity,
    channels: Option<Channels>,
    ini: DeviceIni,
    exposure_ms: u32,
}

impl EthernetTransport {
    /// Connect the data stream, bind the control socket and read the
    /// device ini.
    ///
    /// # Errors
    ///
    /// - `Error::Timeout` if the device does not accept the connection or
    ///   answer `READ_INI` in time
    /// - `Error::Io` on socket failures
    /// - protocol and failure errors from the ini exchange
    pub async fn open(identity: &EthernetIdentity) -> Result<Self> {
        info!("Connecting to spectrometer at {}", identity);

        let data_addr = SocketAddr::new(identity.ip_address, identity.data_port);
        let stream = match tokio::time::timeout(identity.timeout, TcpStream::connect(data_addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Data connection failed: {}", e);
                return Err(e.into());
            }
            Err(_) => {
                warn!("Connection timeout after {}ms", identity.timeout.as_millis());
                return Err(Error::timeout(identity.timeout));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let control_addr = SocketAddr::new(identity.ip_address, identity.control_port);
        let mut control = ControlChannel::connect(control_addr, identity.timeout).await?;

        let responses = control
            .exchange(EthernetOpcode::ReadIni, ini_request_payload(), 1)
            .await?;
        let ini = DeviceIni::parse(&responses[1])?;
        info!(
            num_chips = ini.num_chips,
            num_pixels = ini.num_pixels,
            min_exposure_ms = ini.min_exposure_ms,
            "Device ini read"
        );

        Ok(Self {
            identity: identity.clone(),
            channels: Some(Channels {
                control,
                data: FramedRead::new(stream, MultilineDecoder::new()),
            }),
            ini,
            exposure_ms: 0,
        })
    }

    /// Device configuration read at open.
    pub fn ini(&self) -> &DeviceIni {
        &self.ini
    }

    pub fn identity(&self) -> &EthernetIdentity {
        &self.identity
    }

    /// Sequence number the next control command will carry.
    pub fn next_sequence(&self) -> Option<u16> {
        self.channels
            .as_ref()
            .map(|channels| channels.control.sequence.current())
    }

    /// Configure how many chips and pixels a line covers. Zero in either
    /// argument selects the device default.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceClosed` after close, or any exchange error.
    pub async fn set_line_length(&mut self, num_pixels: u32, num_chips: u16) -> Result<()> {
        let channels = self.channels()?;
        channels
            .control
            .exchange(
                EthernetOpcode::SetLineLength,
                line_length_payload(num_pixels, num_chips),
                0,
            )
            .await?;
        Ok(())
    }

    fn channels(&mut self) -> Result<&mut Channels> {
        self.channels.as_mut().ok_or(Error::DeviceClosed)
    }
}

impl DeviceTransport for EthernetTransport {
    fn is_open(&self) -> bool {
        self.channels.is_some()
    }

    fn pixel_count(&self) -> usize {
        self.ini.pixel_count()
    }

    async fn set_timer(&mut self, millis: u32) -> Result<()> {
        self.channels()?;
        if f64::from(millis) < self.ini.min_exposure_ms {
            return Err(Error::configuration(format!(
                "Exposure {millis}ms is below the device minimum of {}ms",
                self.ini.min_exposure_ms
            )));
        }
        let timer = TimerValue::from_millis(millis)?;
        debug!(
            millis,
            mantissa = timer.mantissa(),
            exponent = timer.exponent(),
            "Setting exposure timer"
        );

        self.channels()?
            .control
            .exchange(EthernetOpcode::SetTimer, timer_payload(timer), 0)
            .await?;
        self.exposure_ms = millis;
        Ok(())
    }

    async fn read_frame(&mut self, n_times: usize) -> Result<Frame> {
        self.channels()?;
        let lines = u32::try_from(n_times)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| Error::configuration(format!("Invalid line count {n_times}")))?;

        let num_pixels = self.ini.num_pixels;
        let num_chips = u16::from(self.ini.num_chips);
        self.set_line_length(num_pixels, num_chips).await?;

        let wait = self.identity.timeout
            + Duration::from_millis(u64::from(self.exposure_ms) * n_times as u64);
        let channels = self.channels()?;
        channels
            .control
            .exchange(EthernetOpcode::ReadMultiline, multiline_payload(lines), 0)
            .await?;

        channels
            .data
            .decoder_mut()
            .expect_lines(n_times, num_pixels as usize);

        match tokio::time::timeout(wait, channels.data.next()).await {
            Ok(Some(Ok(frame))) => {
                trace!(n_times, "Readout received");
                Ok(frame)
            }
            Ok(Some(Err(e))) => {
                error!("Readout failed: {}", e);
                Err(e)
            }
            Ok(None) => {
                error!("Data stream closed by device");
                Err(Error::protocol("Data stream closed before the readout completed"))
            }
            Err(_) => {
                warn!("Readout timeout after {}ms", wait.as_millis());
                Err(Error::timeout(wait))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut channels = self.channels.take().ok_or(Error::DeviceClosed)?;
        if let Err(e) = channels.data.get_mut().shutdown().await {
            debug!("Data stream shutdown failed: {}", e);
        }
        info!("Disconnected from spectrometer at {}", self.identity);
        Ok(())
    }
}
