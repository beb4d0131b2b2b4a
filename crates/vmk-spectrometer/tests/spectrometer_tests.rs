//! Integration tests for Spectrometer configuration and reads.

mod common;

use common::{create_device, default_device, write_calibration};
use ndarray::Array1;
use rstest::rstest;
use vmk_core::{DeviceIdentity, Error, MockIdentity};
use vmk_spectrometer::{
    ConfigUpdate, ConfigWarning, DarkSignal, FactoryConfig, Spectrometer, TransportRegistry,
};

#[rstest]
#[tokio::test]
async fn test_factory_window(
    #[values(10, 20, 30)] start: usize,
    #[values(40, 50, 60)] end: usize,
    #[values(true, false)] reverse: bool,
) {
    let dir = tempfile::tempdir().unwrap();
    let (spectrometer, _handle) = create_device(dir.path(), start, end, reverse).await;

    let data = spectrometer.read_raw().await.unwrap();
    let intensity = data.intensity();
    assert_eq!(intensity.ncols(), end - start);
    if reverse {
        assert!(intensity[[0, 0]] > intensity[[0, 1]]);
        assert_eq!(intensity[[0, 0]], (end - 1) as f64);
    } else {
        assert!(intensity[[0, 0]] < intensity[[0, 1]]);
        assert_eq!(intensity[[0, 0]], start as f64);
    }
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[tokio::test]
async fn test_exposure(#[case] exposure: u32) {
    let dir = tempfile::tempdir().unwrap();
    let (mut spectrometer, handle) = default_device(dir.path()).await;

    spectrometer
        .set_config(ConfigUpdate::new().exposure(exposure))
        .await
        .unwrap();

    assert_eq!(spectrometer.read_raw().await.unwrap().exposure(), exposure);
    assert_eq!(handle.exposure(), Some(exposure));
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[tokio::test]
async fn test_n_times(#[case] n_times: usize) {
    let dir = tempfile::tempdir().unwrap();
    let (mut spectrometer, handle) = default_device(dir.path()).await;

    spectrometer
        .set_config(ConfigUpdate::new().n_times(n_times))
        .await
        .unwrap();

    let data = spectrometer.read_raw().await.unwrap();
    assert_eq!(data.n_times(), n_times);
    assert_eq!(handle.lines_read(), n_times);
}

#[tokio::test]
async fn test_intensity_scale() {
    let factory = FactoryConfig::new(4, 8, false, 2.5).unwrap();
    let mut spectrometer =
        Spectrometer::with_transport(vmk_hardware::mock::MockTransport::new(), factory)
            .await
            .unwrap();
    spectrometer
        .set_config(ConfigUpdate::new().n_times(2))
        .await
        .unwrap();

    let data = spectrometer.read_raw().await.unwrap();
    assert_eq!(data.intensity().row(1).to_vec(), vec![12.5, 15.0, 17.5, 20.0]);
}

#[tokio::test]
async fn test_full_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let (mut first, _handle) = default_device(dir.path()).await;
    assert!(!first.is_configured());
    assert!(matches!(
        first.read(false).await,
        Err(Error::NotConfigured { .. })
    ));

    let wavelengths: Vec<f64> = (0..10).map(f64::from).collect();
    let profile_path = write_calibration(dir.path(), wavelengths.clone());
    let dark_signal_path = dir.path().join("dark");

    let report = first
        .set_config(
            ConfigUpdate::new()
                .dark_signal_path(&dark_signal_path)
                .wavelength_calibration_path(&profile_path),
        )
        .await
        .unwrap();
    assert!(report.is_clean());

    // nothing persisted yet: still not configured
    assert!(!first.is_configured());
    assert!(first.read(false).await.is_err());

    first.read_dark_signal(None).await.unwrap();
    assert!(first.is_configured());

    let spectrum = first.read(false).await.unwrap();
    assert_eq!(spectrum.wavelength(), Some(&Array1::from(wavelengths)));
    // the mock repeats the same ramp, so the corrected signal is flat zero
    assert!(spectrum.intensity().iter().all(|&v| v == 0.0));
    first.save_dark_signal().unwrap();

    let (mut second, _handle) = default_device(dir.path()).await;
    assert!(!second.is_configured());
    let report = second
        .set_config(
            ConfigUpdate::new()
                .dark_signal_path(&dark_signal_path)
                .wavelength_calibration_path(&profile_path),
        )
        .await
        .unwrap();

    assert!(report.is_clean());
    assert!(second.is_configured());
    assert_eq!(
        second.dark_signal().unwrap().baseline(),
        first.dark_signal().unwrap().baseline()
    );
}

#[tokio::test]
async fn test_incompatible_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let (mut spectrometer, _handle) = default_device(dir.path()).await;
    let profile_path = write_calibration(dir.path(), vec![1.0, 2.0, 3.0]);

    let err = spectrometer
        .set_config(ConfigUpdate::new().wavelength_calibration_path(&profile_path))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert!(err.is_recoverable());
    assert!(spectrometer.wavelength().is_none());
    assert_eq!(spectrometer.config().wavelength_calibration_path, None);
}

#[tokio::test]
async fn test_dark_signal_exposure_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let dark_signal_path = dir.path().join("dark");

    let (mut first, _handle) = default_device(dir.path()).await;
    first
        .set_config(
            ConfigUpdate::new()
                .exposure(333)
                .dark_signal_path(&dark_signal_path),
        )
        .await
        .unwrap();
    first.read_dark_signal(None).await.unwrap();
    first.save_dark_signal().unwrap();

    let (mut second, _handle) = default_device(dir.path()).await;
    let report = second
        .set_config(ConfigUpdate::new().dark_signal_path(&dark_signal_path))
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(
        report.warnings[0],
        ConfigWarning::DarkSignalExposureMismatch {
            configured: 100,
            persisted: 333,
            ..
        }
    ));
    assert!(report.warnings[0].to_string().contains("exposure"));
    assert!(second.dark_signal().is_none());

    // switching to the persisted exposure picks the baseline up
    let report = second
        .set_config(ConfigUpdate::new().exposure(333))
        .await
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(second.dark_signal().unwrap().exposure(), 333);
}

#[tokio::test]
async fn test_dark_signal_wrong_width() {
    let dir = tempfile::tempdir().unwrap();
    let dark_signal_path = dir.path().join("dark");
    DarkSignal::new(100, Array1::zeros(4))
        .save(&dark_signal_path)
        .unwrap();

    let (mut spectrometer, _handle) = default_device(dir.path()).await;
    let err = spectrometer
        .set_config(ConfigUpdate::new().dark_signal_path(&dark_signal_path))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[tokio::test]
async fn test_force_read() {
    let dir = tempfile::tempdir().unwrap();
    let (mut spectrometer, _handle) = default_device(dir.path()).await;

    spectrometer.read_dark_signal(None).await.unwrap();
    let spectrum = spectrometer.read(true).await.unwrap();

    assert!(spectrum.wavelength().is_none());
    assert_eq!(spectrum.intensity()[[0, 9]], 9.0);
}

#[tokio::test]
async fn test_read_dark_signal_line_count() {
    let dir = tempfile::tempdir().unwrap();
    let (mut spectrometer, handle) = default_device(dir.path()).await;

    let dark = spectrometer.read_dark_signal(Some(4)).await.unwrap();
    // mean of rows 0..4 of the ramp
    assert_eq!(dark.baseline()[0], 1.5);
    assert_eq!(dark.exposure(), 100);
    assert_eq!(handle.lines_read(), 4);
}

#[tokio::test]
async fn test_device_close() {
    let dir = tempfile::tempdir().unwrap();
    let (mut spectrometer, handle) = default_device(dir.path()).await;

    spectrometer.read_raw().await.unwrap();
    spectrometer.close().await.unwrap();
    assert!(handle.is_closed());

    assert!(matches!(
        spectrometer.read_raw().await,
        Err(Error::DeviceClosed)
    ));
    assert!(matches!(
        spectrometer.read(true).await,
        Err(Error::DeviceClosed)
    ));
    assert!(matches!(
        spectrometer.set_config(ConfigUpdate::new()).await,
        Err(Error::DeviceClosed)
    ));
    assert!(matches!(spectrometer.close().await, Err(Error::DeviceClosed)));
}

#[tokio::test]
async fn test_registry_reopen_closes_previous_spectrometer() {
    common::init_tracing();
    let mut registry = TransportRegistry::new();
    let identity = DeviceIdentity::Mock(MockIdentity::new("bench", 64));
    let factory = FactoryConfig::new(0, 10, false, 1.0).unwrap();

    let first = Spectrometer::open(&mut registry, &identity, factory.clone())
        .await
        .unwrap();
    let second = Spectrometer::open(&mut registry, &identity, factory)
        .await
        .unwrap();

    assert_eq!(registry.len(), 1);
    assert!(matches!(first.read_raw().await, Err(Error::DeviceClosed)));
    assert_eq!(second.read_raw().await.unwrap().pixel_count(), 10);

    registry.close_all().await.unwrap();
    assert!(matches!(second.read_raw().await, Err(Error::DeviceClosed)));
}
