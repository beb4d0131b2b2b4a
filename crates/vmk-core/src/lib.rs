pub mod constants;
pub mod data;
pub mod error;
pub mod frame;
pub mod identity;
pub mod persist;

pub use data::{Data, Spectrum};
pub use error::{Error, Result};
pub use frame::Frame;
#[cfg(feature = "mock")]
pub use identity::MockIdentity;
pub use identity::{DeviceIdentity, EthernetIdentity, UsbIdentity};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
