//! Spectrometer driver: configuration, calibration and acquisition on top
//! of the USB, Ethernet and mock transports.
//!
//! # Components
//!
//! - **TransportRegistry**: caller-owned map of open transports, one per
//!   device identity
//! - **Spectrometer**: crop/scale, dark-signal and wavelength calibration,
//!   background acquisition
//! - **FactoryConfig / DeviceConfig**: per-unit and per-session settings
//!
//! # Example
//!
//! ```no_run
//! use vmk_core::DeviceIdentity;
//! use vmk_spectrometer::{ConfigUpdate, FactoryConfig, Spectrometer, TransportRegistry};
//!
//! #[tokio::main]
//! async fn main() -> vmk_core::Result<()> {
//!     let mut registry = TransportRegistry::new();
//!     let factory = FactoryConfig::load("factory.json")?;
//!     let mut spectrometer =
//!         Spectrometer::open(&mut registry, &DeviceIdentity::usb(), factory).await?;
//!
//!     let report = spectrometer
//!         .set_config(
//!             ConfigUpdate::new()
//!                 .exposure(10)
//!                 .wavelength_calibration_path("profile.json")
//!                 .dark_signal_path("dark.json"),
//!         )
//!         .await?;
//!     for warning in &report.warnings {
//!         eprintln!("{warning}");
//!     }
//!
//!     if !spectrometer.is_configured() {
//!         spectrometer.read_dark_signal(None).await?;
//!         spectrometer.save_dark_signal()?;
//!     }
//!
//!     spectrometer
//!         .read_non_block(|spectrum| println!("{:?}", spectrum.intensity().row(0)), Some(100), 10)
//!         .await?;
//!     let delivered = spectrometer.wait_reading().await?;
//!     println!("{delivered} spectra");
//!
//!     registry.close_all().await
//! }
//! ```

pub mod acquisition;
pub mod calibration;
pub mod config;
mod readout;
pub mod registry;
pub mod spectrometer;
pub mod transport;

pub use acquisition::Acquisition;
pub use calibration::{DarkSignal, WavelengthCalibration};
pub use config::{ConfigReport, ConfigUpdate, ConfigWarning, DeviceConfig, FactoryConfig};
pub use registry::TransportRegistry;
pub use spectrometer::Spectrometer;
pub use transport::{AnyTransport, SharedTransport};
