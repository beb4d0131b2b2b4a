//! Network transport for VMK spectrometers.
//!
//! Ethernet devices take commands over UDP and stream measurement lines
//! over TCP. [`EthernetTransport`] drives both channels with the codecs
//! from `vmk-protocol` and implements
//! [`DeviceTransport`](vmk_hardware::DeviceTransport) so the spectrometer
//! layer treats it like any other transport.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vmk_core::EthernetIdentity;
//! use vmk_network::EthernetTransport;
//!
//! # async fn example() -> vmk_core::Result<()> {
//! let identity = EthernetIdentity::new("192.168.0.10".parse().unwrap())
//!     .with_timeout(Duration::from_millis(1500));
//!
//! let transport = EthernetTransport::open(&identity).await?;
//! println!("min exposure {} ms", transport.ini().min_exposure_ms);
//! # Ok(())
//! # }
//! ```

mod ethernet;

pub use ethernet::EthernetTransport;
