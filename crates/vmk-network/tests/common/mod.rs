//! Simulated Ethernet spectrometer for transport tests.
//!
//! Binds a UDP control socket and a TCP data listener on loopback and
//! answers the subset of commands the transport issues.

#![allow(dead_code)]

use bytes::BytesMut;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use vmk_core::EthernetIdentity;
use vmk_protocol::ethernet::encode_line;
use vmk_protocol::{DeviceIni, EthernetAnswer, EthernetCommand, EthernetOpcode, LINE_SENTINEL};

pub const TIMEOUT: Duration = Duration::from_millis(300);

/// Pixels per line after the sentinel is stripped.
pub const PIXEL_COUNT: usize = 64;

pub const MIN_EXPOSURE_MS: f64 = 2.0;

/// Misbehaviour the simulated device applies to the next matching command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// Answer with response code 3.
    Reject(EthernetOpcode),
    /// Never answer.
    Silent(EthernetOpcode),
    /// Answer with the wrong sequence number.
    WrongSequence(EthernetOpcode),
    /// Break the sentinel of the given line in the next readout.
    CorruptHeader { line: usize },
    /// Send half of the next readout, then close the stream.
    Truncate,
}

#[derive(Debug, Default)]
struct DeviceState {
    commands: Vec<EthernetCommand>,
    line_length: Option<(u32, u16)>,
    timer: Option<(u16, u16)>,
    fault: Option<DeviceFault>,
}

/// Running simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub identity: EthernetIdentity,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn inject(&self, fault: DeviceFault) {
        self.state.lock().unwrap().fault = Some(fault);
    }

    pub fn commands(&self) -> Vec<EthernetCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn opcodes(&self) -> Vec<EthernetOpcode> {
        self.commands().iter().map(|c| c.opcode).collect()
    }

    pub fn line_length(&self) -> Option<(u32, u16)> {
        self.state.lock().unwrap().line_length
    }

    /// Last programmed timer as (mantissa, exponent).
    pub fn timer(&self) -> Option<(u16, u16)> {
        self.state.lock().unwrap().timer
    }
}

pub fn device_ini() -> DeviceIni {
    DeviceIni {
        num_chips: 1,
        pixels_per_chip: PIXEL_COUNT as u16,
        chip_type: 3,
        adc_rate: 4,
        config_bits: 0,
        assembly_type: 0,
        min_exposure_ms: MIN_EXPOSURE_MS,
        num_pixels: (PIXEL_COUNT + LINE_SENTINEL.len()) as u32,
        dia_present: false,
        thermostat_enabled: true,
        mtr0: 20.0,
        mui0: 1.25,
    }
}

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a simulated device on loopback.
pub async fn spawn_device() -> SimulatedDevice {
    init_tracing();
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let socket = UdpSocket::bind((loopback, 0)).await.unwrap();
    let listener = TcpListener::bind((loopback, 0)).await.unwrap();
    let identity = EthernetIdentity::new(loopback)
        .with_ports(
            socket.local_addr().unwrap().port(),
            listener.local_addr().unwrap().port(),
        )
        .with_timeout(TIMEOUT);

    let state = Arc::new(Mutex::new(DeviceState::default()));
    let (stream_tx, stream_rx) = mpsc::unbounded_channel();

    tokio::spawn(serve_stream(listener, stream_rx));
    tokio::spawn(serve_control(socket, state.clone(), stream_tx));

    SimulatedDevice { identity, state }
}

/// Bytes for the data stream; `None` closes it.
type StreamChunk = Option<Vec<u8>>;

async fn serve_stream(listener: TcpListener, mut rx: mpsc::UnboundedReceiver<StreamChunk>) {
    let Ok((mut stream, _)) = listener.accept().await else {
        return;
    };
    while let Some(chunk) = rx.recv().await {
        match chunk {
            Some(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            None => {
                let _ = stream.shutdown().await;
                return;
            }
        }
    }
}

async fn serve_control(
    socket: UdpSocket,
    state: Arc<Mutex<DeviceState>>,
    stream: mpsc::UnboundedSender<StreamChunk>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let Ok(command) = EthernetCommand::parse(&buf[..n]) else {
            continue;
        };

        let (answers, readout) = {
            let mut state = state.lock().unwrap();
            state.commands.push(command.clone());
            handle_command(&mut state, &command)
        };

        for answer in answers {
            let _ = socket.send_to(&answer.encode(), peer).await;
        }
        for chunk in readout {
            let _ = stream.send(chunk);
        }
    }
}

fn handle_command(
    state: &mut DeviceState,
    command: &EthernetCommand,
) -> (Vec<EthernetAnswer>, Vec<StreamChunk>) {
    let mut answer = EthernetAnswer::reply(command, &[]);
    match state.fault {
        Some(DeviceFault::Silent(op)) if op == command.opcode => {
            state.fault = None;
            return (Vec::new(), Vec::new());
        }
        Some(DeviceFault::Reject(op)) if op == command.opcode => {
            state.fault = None;
            answer.response_code = 3;
            return (vec![answer], Vec::new());
        }
        Some(DeviceFault::WrongSequence(op)) if op == command.opcode => {
            state.fault = None;
            answer.seq = answer.seq.wrapping_add(7);
            return (vec![answer], Vec::new());
        }
        _ => {}
    }

    let payload = &command.payload;
    match command.opcode {
        EthernetOpcode::ReadIni => {
            let ext = EthernetAnswer::reply(command, &device_ini().encode());
            (vec![answer, ext], Vec::new())
        }
        EthernetOpcode::SetLineLength => {
            let pixels = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let chips = u16::from_le_bytes([payload[4], payload[5]]);
            state.line_length = Some((pixels, chips));
            (vec![answer], Vec::new())
        }
        EthernetOpcode::SetTimer => {
            let mantissa = u16::from_le_bytes([payload[0], payload[1]]);
            let exponent = u16::from_le_bytes([payload[4], payload[5]]);
            state.timer = Some((mantissa, exponent));
            (vec![answer], Vec::new())
        }
        EthernetOpcode::ReadMultiline => {
            let n_times = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
            let line_len = state
                .line_length
                .map(|(pixels, _)| pixels as usize)
                .unwrap_or(PIXEL_COUNT + LINE_SENTINEL.len());
            let mut raw = readout(n_times as usize, line_len - LINE_SENTINEL.len());

            let chunks = match state.fault.take() {
                Some(DeviceFault::CorruptHeader { line }) => {
                    raw[line * line_len * 2 + 8] ^= 0xFF;
                    vec![Some(raw)]
                }
                Some(DeviceFault::Truncate) => {
                    raw.truncate(raw.len() / 2);
                    vec![Some(raw), None]
                }
                other => {
                    state.fault = other;
                    vec![Some(raw)]
                }
            };
            (vec![answer], chunks)
        }
        _ => (vec![answer], Vec::new()),
    }
}

/// `n_times` lines where pixel `p` of row `r` reads `p + r`.
pub fn readout(n_times: usize, pixel_count: usize) -> Vec<u8> {
    let mut raw = BytesMut::new();
    for row in 0..n_times {
        let samples: Vec<u16> = (0..pixel_count).map(|p| (p + row) as u16).collect();
        encode_line(&samples, &mut raw);
    }
    raw.to_vec()
}
