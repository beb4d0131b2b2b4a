//! Read path from a raw transport frame to a calibrated spectrum.
//!
//! [`Readout`] is a snapshot of everything a read needs: the transport, the
//! factory window, the exposure and, once configured, the calibration. The
//! spectrometer builds one per read and hands one to its acquisition worker,
//! so both go through exactly the same conversion.

use ndarray::{Array2, Axis, s};
use std::sync::Arc;
use tracing::trace;
use vmk_core::{Data, Frame, Result, Spectrum};
use vmk_hardware::DeviceTransport;

use crate::calibration::{DarkSignal, WavelengthCalibration};
use crate::config::FactoryConfig;
use crate::transport::SharedTransport;

/// Dark baseline and wavelength axis, both matching the factory window.
#[derive(Debug, Clone)]
pub(crate) struct Calibration {
    pub dark_signal: Arc<DarkSignal>,
    pub wavelength: Arc<WavelengthCalibration>,
}

#[derive(Debug, Clone)]
pub(crate) struct Readout {
    pub transport: SharedTransport,
    pub factory: FactoryConfig,
    pub exposure: u32,
    pub calibration: Option<Calibration>,
}

impl Readout {
    /// One frame of `n_times` accumulations, cropped and scaled.
    pub async fn read_raw(&self, n_times: usize) -> Result<Data> {
        let frame = self.transport.lock().await.read_frame(n_times).await?;
        crop(&self.factory, frame, self.exposure)
    }

    /// Dark-corrected spectrum with its wavelength axis. Without calibration
    /// the raw measurement is returned without wavelength.
    pub async fn read(&self, n_times: usize) -> Result<Spectrum> {
        let raw = self.read_raw(n_times).await?;
        match &self.calibration {
            Some(calibration) => calibrate(raw, calibration),
            None => Ok(Spectrum::uncalibrated(raw)),
        }
    }
}

/// Crop a frame to the factory window, orient it and scale it.
pub(crate) fn crop(factory: &FactoryConfig, frame: Frame, exposure: u32) -> Result<Data> {
    factory.check_detector(frame.pixel_count())?;

    let (samples, clipped) = frame.into_parts();
    let mut samples = samples.slice_move(s![.., factory.start..factory.end]);
    let mut clipped = clipped.slice_move(s![.., factory.start..factory.end]);
    if factory.reverse {
        samples.invert_axis(Axis(1));
        clipped.invert_axis(Axis(1));
    }

    let scale = factory.intensity_scale;
    let intensity: Array2<f64> = samples.mapv(|sample| f64::from(sample) * scale);
    trace!(shape = ?intensity.dim(), "Frame cropped");
    Data::new(intensity, clipped.to_owned(), exposure)
}

/// Subtract the baseline from every accumulation and attach wavelengths.
pub(crate) fn calibrate(raw: Data, calibration: &Calibration) -> Result<Spectrum> {
    let baseline = calibration.dark_signal.baseline();
    let intensity = raw.intensity() - baseline;
    let data = Data::new(intensity, raw.clipped().clone(), raw.exposure())?;
    Spectrum::new(data, calibration.wavelength.wavelengths().clone())
}
