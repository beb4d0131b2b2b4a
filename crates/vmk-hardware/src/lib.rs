//! Transport layer for VMK spectrometers.
//!
//! This crate defines the [`DeviceTransport`] capability shared by every
//! way of reaching an instrument and implements the USB variant on top of
//! an FTDI bridge. The Ethernet variant lives in `vmk-network`.
//!
//! # Design
//!
//! - **Async-first**: all I/O goes through native `async fn` in traits
//!   (Rust 1.90 + Edition 2024 RPITIT).
//! - **One exchange at a time**: every operation completes its
//!   request/answer exchange before returning.
//! - **Layered**: the USB transport is generic over [`UsbBridge`], the raw
//!   byte primitive. [`FtdiBridge`] drives real hardware through `rusb`;
//!   [`mock::MockBridge`] simulates the firmware for tests.
//!
//! # Example
//!
//! ```no_run
//! use vmk_core::UsbIdentity;
//! use vmk_hardware::{DeviceTransport, UsbTransport};
//!
//! # async fn example() -> vmk_core::Result<()> {
//! let mut transport = UsbTransport::open(&UsbIdentity::default()).await?;
//! transport.set_timer(20).await?;
//! let frame = transport.read_frame(4).await?;
//! println!("{} lines of {} pixels", frame.n_times(), frame.pixel_count());
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod ftdi;
#[cfg(feature = "mock")]
pub mod mock;
pub mod traits;
pub mod usb;

pub use ftdi::FtdiBridge;
pub use traits::{DeviceTransport, UsbBridge};
pub use usb::UsbTransport;
