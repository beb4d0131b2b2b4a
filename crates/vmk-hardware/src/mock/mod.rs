//! Mock device implementations for testing and development.
//!
//! [`MockBridge`] simulates the FTDI bridge together with the device
//! firmware behind it, so the real USB transport can be exercised without
//! hardware. [`MockTransport`] replaces a whole transport with a
//! deterministic in-process detector.

pub mod bridge;
pub mod transport;

// Re-export commonly used types
pub use bridge::{BridgeFault, MockBridge, MockBridgeHandle};
pub use transport::{MockTransport, MockTransportHandle};
