//! Common test utilities for spectrometer integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use vmk_core::persist::write_json;
use vmk_hardware::mock::{MockTransport, MockTransportHandle};
use vmk_spectrometer::{FactoryConfig, Spectrometer, WavelengthCalibration};

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write a factory config file into `dir` and return its path.
pub fn write_factory_config(dir: &Path, start: usize, end: usize, reverse: bool) -> PathBuf {
    let path = dir.join("cfg.json");
    let config = FactoryConfig {
        start,
        end,
        reverse,
        intensity_scale: 1.0,
    };
    write_json(&path, &config).unwrap();
    path
}

/// Write a wavelength calibration file into `dir` and return its path.
pub fn write_calibration(dir: &Path, wavelengths: Vec<f64>) -> PathBuf {
    let path = dir.join("profile.json");
    WavelengthCalibration::new(wavelengths).save(&path).unwrap();
    path
}

/// Spectrometer over a 4096-pixel mock detector, factory window loaded
/// from a file like a real unit.
pub async fn create_device(
    dir: &Path,
    start: usize,
    end: usize,
    reverse: bool,
) -> (Spectrometer, MockTransportHandle) {
    init_tracing();
    let factory = FactoryConfig::load(write_factory_config(dir, start, end, reverse)).unwrap();
    let transport = MockTransport::new();
    let handle = transport.handle();
    let spectrometer = Spectrometer::with_transport(transport, factory)
        .await
        .unwrap();
    (spectrometer, handle)
}

/// Device with window `0..10`: the first row of every frame reads 0..9.
pub async fn default_device(dir: &Path) -> (Spectrometer, MockTransportHandle) {
    create_device(dir, 0, 10, false).await
}
