use crate::constants::{
    DEFAULT_ETHERNET_TIMEOUT, DEFAULT_USB_PRODUCT_ID, DEFAULT_USB_READ_TIMEOUT,
    DEFAULT_USB_VENDOR_ID, ETHERNET_CONTROL_PORT, ETHERNET_DATA_PORT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::Duration;

/// Identity of a physical (or simulated) spectrometer.
///
/// Identities are the keys of the transport registry: opening an identity
/// that is already registered closes the previous handle first. Timeouts are
/// tuning parameters, not identity, and are ignored by equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum DeviceIdentity {
    Usb(UsbIdentity),
    Ethernet(EthernetIdentity),
    #[cfg(feature = "mock")]
    Mock(MockIdentity),
}

impl DeviceIdentity {
    /// USB identity with the default FTDI vendor/product ids.
    #[must_use]
    pub fn usb() -> Self {
        Self::Usb(UsbIdentity::default())
    }

    /// Ethernet identity on the default control/data ports.
    #[must_use]
    pub fn ethernet(ip_address: IpAddr) -> Self {
        Self::Ethernet(EthernetIdentity::new(ip_address))
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Usb(id) => write!(f, "{id}"),
            Self::Ethernet(id) => write!(f, "{id}"),
            #[cfg(feature = "mock")]
            Self::Mock(id) => write!(f, "mock:{}", id.name),
        }
    }
}

/// USB identity: FTDI bridge selected by vendor id, product id and serial.
///
/// An empty serial selects the first device with matching ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: String,
    pub read_timeout: Duration,
}

impl UsbIdentity {
    #[must_use]
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Default for UsbIdentity {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_USB_VENDOR_ID,
            product_id: DEFAULT_USB_PRODUCT_ID,
            serial: String::new(),
            read_timeout: DEFAULT_USB_READ_TIMEOUT,
        }
    }
}

impl PartialEq for UsbIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.serial == other.serial
    }
}

impl Eq for UsbIdentity {}

impl Hash for UsbIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor_id.hash(state);
        self.product_id.hash(state);
        self.serial.hash(state);
    }
}

impl fmt::Display for UsbIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "usb:{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if !self.serial.is_empty() {
            write!(f, ":{}", self.serial)?;
        }
        Ok(())
    }
}

/// Ethernet identity: UDP control port and TCP data port on one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthernetIdentity {
    pub ip_address: IpAddr,
    pub control_port: u16,
    pub data_port: u16,
    pub timeout: Duration,
}

impl EthernetIdentity {
    #[must_use]
    pub fn new(ip_address: IpAddr) -> Self {
        Self {
            ip_address,
            control_port: ETHERNET_CONTROL_PORT,
            data_port: ETHERNET_DATA_PORT,
            timeout: DEFAULT_ETHERNET_TIMEOUT,
        }
    }

    /// Override the control and data ports (device simulators bind
    /// unprivileged ports).
    #[must_use]
    pub fn with_ports(mut self, control_port: u16, data_port: u16) -> Self {
        self.control_port = control_port;
        self.data_port = data_port;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PartialEq for EthernetIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.ip_address == other.ip_address
            && self.control_port == other.control_port
            && self.data_port == other.data_port
    }
}

impl Eq for EthernetIdentity {}

impl Hash for EthernetIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip_address.hash(state);
        self.control_port.hash(state);
        self.data_port.hash(state);
    }
}

impl fmt::Display for EthernetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "eth:{}:{}/{}",
            self.ip_address, self.control_port, self.data_port
        )
    }
}

/// Identity of an in-process simulated device.
#[cfg(feature = "mock")]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MockIdentity {
    pub name: String,
    pub pixel_count: usize,
}

#[cfg(feature = "mock")]
impl MockIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, pixel_count: usize) -> Self {
        Self {
            name: name.into(),
            pixel_count,
        }
    }
}
