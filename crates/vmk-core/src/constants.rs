//! Protocol and device constants for VMK spectrometers.
//!
//! # Transports
//!
//! The instrument is reachable over two physical transports:
//!
//! | Transport | Control channel        | Data channel             |
//! |-----------|------------------------|--------------------------|
//! | USB       | FTDI FIFO `#CMD`/`#ANS`| same FIFO, `#DAT` chunks |
//! | Ethernet  | UDP port 555           | TCP port 556             |
//!
//! Both transports share the exposure timer encoding: a 10-bit mantissa and a
//! 2-bit decimal exponent in units of 0.1 ms.

use std::time::Duration;

// ============================================================================
// USB identity
// ============================================================================

/// FTDI vendor id.
pub const DEFAULT_USB_VENDOR_ID: u16 = 0x0403;

/// FT232H product id.
pub const DEFAULT_USB_PRODUCT_ID: u16 = 0x6014;

/// Default read timeout for accumulating a complete USB answer or data chunk.
pub const DEFAULT_USB_READ_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Number of pixels read out by the USB detector assembly.
pub const USB_PIXEL_COUNT: usize = 0x1006;

// ============================================================================
// Ethernet identity
// ============================================================================

/// UDP port for control commands.
pub const ETHERNET_CONTROL_PORT: u16 = 555;

/// TCP port for measurement data.
pub const ETHERNET_DATA_PORT: u16 = 556;

/// Default timeout for Ethernet control exchanges and stream reads.
pub const DEFAULT_ETHERNET_TIMEOUT: Duration = Duration::from_millis(3000);

// ============================================================================
// Exposure timer
// ============================================================================

/// Width of the timer mantissa in bits.
pub const TIMER_MANTISSA_BITS: u32 = 10;

/// Largest representable decimal exponent (2 bits).
pub const TIMER_MAX_EXPONENT: u8 = 3;

/// Timer resolution in milliseconds (one mantissa step at exponent 0).
pub const TIMER_RESOLUTION_MS: f64 = 0.1;

// ============================================================================
// Acquisition defaults
// ============================================================================

/// Exposure programmed by the USB open handshake (0x03E8 × 0.1 ms).
pub const DEFAULT_EXPOSURE_MS: u32 = 100;

/// Number of accumulations read per frame by default.
pub const DEFAULT_N_TIMES: usize = 1;
