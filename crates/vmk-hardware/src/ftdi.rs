//! FTDI FT232H bridge over `rusb`.
//!
//! Talks to the chip directly through libusb: vendor control requests for
//! reset and bit mode, bulk endpoints for the FIFO stream. Every bulk
//! transfer runs on the blocking pool.
//!
//! The chip prefixes each USB packet it sends with two modem status bytes;
//! [`FtdiBridge::read`](crate::traits::UsbBridge::read) strips them so the
//! caller sees the raw FIFO stream.

use bytes::{Bytes, BytesMut};
use rusb::{Context, DeviceHandle, UsbContext};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vmk_core::{Error, Result, UsbIdentity};

use crate::traits::UsbBridge;

/// Vendor request type, host to device.
const REQTYPE_OUT: u8 = 0x40;

const SIO_RESET: u8 = 0x00;
const SIO_SET_BITMODE: u8 = 0x0B;

const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

/// Interface A; FTDI requests index interfaces from 1.
const INTERFACE: u8 = 0;
const INTERFACE_INDEX: u16 = 1;

const ENDPOINT_IN: u8 = 0x81;
const ENDPOINT_OUT: u8 = 0x02;

/// High-speed bulk packet size.
const PACKET_SIZE: usize = 512;

/// Modem status bytes at the start of every inbound packet.
const STATUS_LEN: usize = 2;

const READ_BUFFER_SIZE: usize = 64 * PACKET_SIZE;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Open FTDI device handle.
pub struct FtdiBridge {
    handle: Option<Arc<DeviceHandle<Context>>>,
    description: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl fmt::Debug for FtdiBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtdiBridge")
            .field("device", &self.description)
            .field("open", &self.handle.is_some())
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl FtdiBridge {
    /// Open the first attached device matching `identity`.
    ///
    /// An empty serial in the identity matches any serial.
    ///
    /// # Errors
    ///
    /// - `Error::DeviceNotFound` if no attached device matches
    /// - `Error::Usb` if libusb fails to open or claim the device
    pub async fn open(identity: &UsbIdentity) -> Result<Self> {
        let target = identity.clone();
        let handle = tokio::task::spawn_blocking(move || find_and_open(&target))
            .await
            .map_err(|e| Error::usb(format!("USB worker task failed: {e}")))??;

        info!("FTDI bridge opened for {}", identity);
        Ok(Self {
            handle: Some(Arc::new(handle)),
            description: identity.to_string(),
            read_timeout: CONTROL_TIMEOUT,
            write_timeout: CONTROL_TIMEOUT,
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&DeviceHandle<Context>) -> rusb::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle.clone().ok_or(Error::DeviceClosed)?;
        tokio::task::spawn_blocking(move || op(&handle))
            .await
            .map_err(|e| Error::usb(format!("USB worker task failed: {e}")))?
            .map_err(usb_error)
    }
}

impl UsbBridge for FtdiBridge {
    async fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<()> {
        debug!("Setting bitmode 0x{:02X} for mask 0x{:02X}", mode, mask);
        let value = (u16::from(mode) << 8) | u16::from(mask);
        self.blocking(move |h| {
            h.write_control(
                REQTYPE_OUT,
                SIO_SET_BITMODE,
                value,
                INTERFACE_INDEX,
                &[],
                CONTROL_TIMEOUT,
            )
        })
        .await?;
        Ok(())
    }

    async fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        debug!(
            "Setting timeouts: reading {} ms, writing {} ms",
            read.as_millis(),
            write.as_millis()
        );
        self.read_timeout = read;
        self.write_timeout = write;
        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes> {
        let timeout = self.read_timeout;
        let raw = self
            .blocking(move |h| {
                let mut buf = vec![0u8; READ_BUFFER_SIZE];
                match h.read_bulk(ENDPOINT_IN, &mut buf, timeout) {
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(buf)
                    }
                    Err(rusb::Error::Timeout) => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(strip_modem_status(&raw))
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.write_timeout;
        let data = data.to_vec();
        self.blocking(move |h| {
            let mut written = 0;
            while written < data.len() {
                written += h.write_bulk(ENDPOINT_OUT, &data[written..], timeout)?;
            }
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or(Error::DeviceClosed)?;
        tokio::task::spawn_blocking(move || handle.release_interface(INTERFACE))
            .await
            .map_err(|e| Error::usb(format!("USB worker task failed: {e}")))?
            .map_err(usb_error)?;
        info!("FTDI bridge closed for {}", self.description);
        Ok(())
    }
}

fn find_and_open(identity: &UsbIdentity) -> Result<DeviceHandle<Context>> {
    let context = Context::new().map_err(usb_error)?;

    for device in context.devices().map_err(usb_error)?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() != identity.vendor_id
            || descriptor.product_id() != identity.product_id
        {
            continue;
        }

        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Skipping FTDI device on bus {}: {}", device.bus_number(), e);
                continue;
            }
        };

        if !identity.serial.is_empty() {
            let serial = handle
                .read_serial_number_string_ascii(&descriptor)
                .unwrap_or_default();
            if serial != identity.serial {
                continue;
            }
        }

        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        handle.claim_interface(INTERFACE).map_err(usb_error)?;
        reset(&handle)?;
        return Ok(handle);
    }

    Err(Error::DeviceNotFound(identity.to_string()))
}

/// Reset the chip and purge both FIFOs.
fn reset(handle: &DeviceHandle<Context>) -> Result<()> {
    for value in [SIO_RESET_SIO, SIO_RESET_PURGE_RX, SIO_RESET_PURGE_TX] {
        handle
            .write_control(
                REQTYPE_OUT,
                SIO_RESET,
                value,
                INTERFACE_INDEX,
                &[],
                CONTROL_TIMEOUT,
            )
            .map_err(usb_error)?;
    }
    Ok(())
}

fn strip_modem_status(raw: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(raw.len());
    for packet in raw.chunks(PACKET_SIZE) {
        if packet.len() > STATUS_LEN {
            payload.extend_from_slice(&packet[STATUS_LEN..]);
        }
    }
    payload.freeze()
}

fn usb_error(error: rusb::Error) -> Error {
    match error {
        rusb::Error::NoDevice | rusb::Error::NotFound => {
            Error::DeviceNotFound(error.to_string())
        }
        other => Error::usb(other.to_string()),
    }
}
