//! Enum wrapper for transport dispatch.
//!
//! [`DeviceTransport`] uses native `async fn` and is therefore not
//! object-safe; `Box<dyn DeviceTransport>` does not exist. [`AnyTransport`]
//! provides concrete dispatch over every transport the driver ships, and is
//! what the registry and the spectrometer hold.
//!
//! # Examples
//!
//! ```
//! use vmk_hardware::DeviceTransport;
//! #[cfg(feature = "mock")]
//! use vmk_hardware::mock::MockTransport;
//! use vmk_spectrometer::AnyTransport;
//!
//! #[tokio::main]
//! async fn main() -> vmk_core::Result<()> {
//!     let mut transport = AnyTransport::Mock(MockTransport::new().with_pixel_count(8));
//!     let frame = transport.read_frame(1).await?;
//!     assert_eq!(frame.pixel_count(), 8);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use vmk_core::{DeviceIdentity, Frame, Result};
use vmk_hardware::mock::MockTransport;
use vmk_hardware::{DeviceTransport, FtdiBridge, UsbTransport};
use vmk_network::EthernetTransport;

/// Transport shared between a spectrometer, its acquisition worker and the
/// registry entry that opened it. The mutex serialises exchanges.
pub type SharedTransport = Arc<Mutex<AnyTransport>>;

/// Any transport the driver can open.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    /// FTDI USB bridge.
    Usb(UsbTransport<FtdiBridge>),
    /// UDP control + TCP data.
    Ethernet(EthernetTransport),
    /// In-process simulated detector.
    #[cfg(feature = "mock")]
    Mock(MockTransport),
}

impl AnyTransport {
    /// Open the transport matching the identity's variant.
    ///
    /// # Errors
    ///
    /// Returns whatever the concrete transport's open reports.
    pub async fn open(identity: &DeviceIdentity) -> Result<Self> {
        match identity {
            DeviceIdentity::Usb(id) => Ok(Self::Usb(UsbTransport::open(id).await?)),
            DeviceIdentity::Ethernet(id) => Ok(Self::Ethernet(EthernetTransport::open(id).await?)),
            #[cfg(feature = "mock")]
            DeviceIdentity::Mock(id) => Ok(Self::Mock(MockTransport::from_identity(id))),
        }
    }

    /// Wrap for sharing with an acquisition worker.
    pub fn into_shared(self) -> SharedTransport {
        Arc::new(Mutex::new(self))
    }
}

#[cfg(feature = "mock")]
impl From<MockTransport> for AnyTransport {
    fn from(transport: MockTransport) -> Self {
        Self::Mock(transport)
    }
}

impl From<EthernetTransport> for AnyTransport {
    fn from(transport: EthernetTransport) -> Self {
        Self::Ethernet(transport)
    }
}

impl From<UsbTransport<FtdiBridge>> for AnyTransport {
    fn from(transport: UsbTransport<FtdiBridge>) -> Self {
        Self::Usb(transport)
    }
}

impl DeviceTransport for AnyTransport {
    fn is_open(&self) -> bool {
        match self {
            Self::Usb(t) => t.is_open(),
            Self::Ethernet(t) => t.is_open(),
            #[cfg(feature = "mock")]
            Self::Mock(t) => t.is_open(),
        }
    }

    fn pixel_count(&self) -> usize {
        match self {
            Self::Usb(t) => t.pixel_count(),
            Self::Ethernet(t) => t.pixel_count(),
            #[cfg(feature = "mock")]
            Self::Mock(t) => t.pixel_count(),
        }
    }

    async fn set_timer(&mut self, millis: u32) -> Result<()> {
        match self {
            Self::Usb(t) => t.set_timer(millis).await,
            Self::Ethernet(t) => t.set_timer(millis).await,
            #[cfg(feature = "mock")]
            Self::Mock(t) => t.set_timer(millis).await,
        }
    }

    async fn read_frame(&mut self, n_times: usize) -> Result<Frame> {
        match self {
            Self::Usb(t) => t.read_frame(n_times).await,
            Self::Ethernet(t) => t.read_frame(n_times).await,
            #[cfg(feature = "mock")]
            Self::Mock(t) => t.read_frame(n_times).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Usb(t) => t.close().await,
            Self::Ethernet(t) => t.close().await,
            #[cfg(feature = "mock")]
            Self::Mock(t) => t.close().await,
        }
    }
}
