//! Common test utilities for transport integration tests.

#![allow(dead_code)]

use std::time::Duration;
use vmk_hardware::UsbTransport;
use vmk_hardware::mock::{MockBridge, MockBridgeHandle};

pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// USB transport over a simulated bridge, handshake completed.
pub async fn open_usb() -> (UsbTransport<MockBridge>, MockBridgeHandle) {
    init_tracing();
    let (bridge, handle) = MockBridge::new();
    let transport = UsbTransport::with_bridge(bridge, READ_TIMEOUT)
        .await
        .expect("handshake with simulated firmware");
    (transport, handle)
}
