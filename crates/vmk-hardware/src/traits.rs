//! Transport trait definitions.
//!
//! A transport owns one physical channel to a spectrometer and runs the
//! request/answer protocol over it. Every operation completes one exchange
//! before returning; there is never more than one outstanding request.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT),
//! eliminating the need for the `async_trait` macro.

#![allow(async_fn_in_trait)]

use bytes::Bytes;
use std::time::Duration;
use vmk_core::{Frame, Result};

/// Capability shared by the USB, Ethernet and mock transports.
///
/// # Object Safety and Dynamic Dispatch
///
/// This trait is NOT object-safe because `async fn` methods return
/// `impl Future`. Use generic parameters, or the `AnyTransport` enum
/// wrapper in `vmk-spectrometer` for runtime selection.
///
/// # Examples
///
/// ```no_run
/// use vmk_hardware::DeviceTransport;
/// use vmk_core::Result;
///
/// async fn snapshot<T: DeviceTransport>(transport: &mut T) -> Result<i32> {
///     transport.set_timer(50).await?;
///     let frame = transport.read_frame(1).await?;
///     Ok(frame.samples()[[0, 0]])
/// }
/// ```
pub trait DeviceTransport: Send {
    /// Returns `false` once [`close`](Self::close) has been called.
    fn is_open(&self) -> bool;

    /// Pixels per line in frames returned by [`read_frame`](Self::read_frame).
    fn pixel_count(&self) -> usize;

    /// Program the per-accumulation exposure.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` if the exposure cannot be encoded (or is
    ///   below the device minimum)
    /// - `Error::DeviceClosed` after close
    /// - protocol, failure and timeout errors from the exchange
    async fn set_timer(&mut self, millis: u32) -> Result<()>;

    /// Acquire `n_times` consecutive lines.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` if `n_times` is zero
    /// - `Error::DeviceClosed` after close
    /// - protocol, failure, header and timeout errors from the readout
    async fn read_frame(&mut self, n_times: usize) -> Result<Frame>;

    /// Release the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceClosed` if the transport is already closed.
    async fn close(&mut self) -> Result<()>;
}

/// Byte-level FTDI bridge primitive consumed by the USB transport.
///
/// The bridge delivers the raw FIFO stream; framing, sequencing and
/// timeouts measured across partial reads are the transport's job.
pub trait UsbBridge: Send {
    /// Configure the chip bit mode (`0x40`/`0x40` selects synchronous FIFO).
    async fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<()>;

    /// Configure the bridge-level read and write timeouts.
    async fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()>;

    /// Read whatever the bridge has buffered.
    ///
    /// Returns an empty buffer when the bridge read timeout elapses with no
    /// data.
    async fn read(&mut self) -> Result<Bytes>;

    /// Write all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
