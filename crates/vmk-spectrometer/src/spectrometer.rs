//! Spectrometer orchestration.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  open / with_transport  ┌──────────────────┐
//! │ Closed │◄────────────────────────│ Open, unconfigured│
//! └────────┘         close           └──────────────────┘
//!      ▲                                │          ▲
//!      │                     dark signal│          │exposure change
//!      │                   + wavelength │          │drops dark signal
//!      │                                ▼          │
//!      │        close            ┌──────────────────┐
//!      └─────────────────────────│ Open, configured │
//!                                └──────────────────┘
//! ```
//!
//! Only a configured spectrometer produces calibrated spectra. Raw reads and
//! forced reads work as soon as the device is open.

use ndarray::Array1;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vmk_core::{Data, DeviceIdentity, Error, Result, Spectrum};
use vmk_hardware::DeviceTransport;

use crate::acquisition::Acquisition;
use crate::calibration::{DarkSignal, WavelengthCalibration};
use crate::config::{ConfigReport, ConfigUpdate, ConfigWarning, DeviceConfig, FactoryConfig};
use crate::readout::{Calibration, Readout};
use crate::registry::TransportRegistry;
use crate::transport::{AnyTransport, SharedTransport};

/// An open spectrometer.
///
/// # Examples
///
/// ```
/// use vmk_core::{DeviceIdentity, MockIdentity};
/// use vmk_spectrometer::{ConfigUpdate, FactoryConfig, Spectrometer, TransportRegistry};
///
/// #[tokio::main]
/// async fn main() -> vmk_core::Result<()> {
///     let mut registry = TransportRegistry::new();
///     let identity = DeviceIdentity::Mock(MockIdentity::new("bench", 4096));
///     let factory = FactoryConfig::new(100, 200, false, 1.0)?;
///
///     let mut spectrometer = Spectrometer::open(&mut registry, &identity, factory).await?;
///     spectrometer.set_config(ConfigUpdate::new().exposure(20).n_times(2)).await?;
///
///     let data = spectrometer.read_raw().await?;
///     assert_eq!(data.shape(), (2, 100));
///
///     spectrometer.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Spectrometer {
    transport: SharedTransport,
    factory: FactoryConfig,
    config: DeviceConfig,
    dark_signal: Option<Arc<DarkSignal>>,
    wavelength: Option<Arc<WavelengthCalibration>>,
    acquisition: Option<Acquisition>,
    closed: bool,
}

impl Spectrometer {
    /// Open the device through `registry`.
    ///
    /// # Errors
    ///
    /// - the transport's open error
    /// - `Error::Configuration` if the factory window does not fit the
    ///   detector
    pub async fn open(
        registry: &mut TransportRegistry,
        identity: &DeviceIdentity,
        factory: FactoryConfig,
    ) -> Result<Self> {
        let transport = registry.open(identity).await?;
        Self::with_shared(transport, factory).await
    }

    /// Wrap an already opened transport.
    ///
    /// # Errors
    ///
    /// Same as [`Spectrometer::open`] after the transport is opened.
    pub async fn with_transport(
        transport: impl Into<AnyTransport>,
        factory: FactoryConfig,
    ) -> Result<Self> {
        Self::with_shared(transport.into().into_shared(), factory).await
    }

    /// Wrap a transport that is shared with a registry.
    ///
    /// The default exposure is programmed so device and configuration agree
    /// from the start.
    ///
    /// # Errors
    ///
    /// Same as [`Spectrometer::open`] after the transport is opened.
    pub async fn with_shared(transport: SharedTransport, factory: FactoryConfig) -> Result<Self> {
        factory.validate()?;
        let config = DeviceConfig::default();
        {
            let mut device = transport.lock().await;
            factory.check_detector(device.pixel_count())?;
            device.set_timer(config.exposure_ms).await?;
        }

        info!(
            start = factory.start,
            end = factory.end,
            reverse = factory.reverse,
            "Spectrometer opened"
        );
        Ok(Self {
            transport,
            factory,
            config,
            dark_signal: None,
            wavelength: None,
            acquisition: None,
            closed: false,
        })
    }

    pub fn factory(&self) -> &FactoryConfig {
        &self.factory
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn dark_signal(&self) -> Option<&DarkSignal> {
        self.dark_signal.as_deref()
    }

    pub fn wavelength(&self) -> Option<&Array1<f64>> {
        self.wavelength.as_deref().map(WavelengthCalibration::wavelengths)
    }

    /// Dark signal and wavelength calibration are both loaded.
    pub fn is_configured(&self) -> bool {
        self.dark_signal.is_some() && self.wavelength.is_some()
    }

    /// An acquisition started by [`read_non_block`](Self::read_non_block)
    /// is still running.
    pub fn is_reading(&self) -> bool {
        self.acquisition
            .as_ref()
            .is_some_and(|acquisition| !acquisition.is_finished())
    }

    /// Apply a configuration update.
    ///
    /// Files named by the update are loaded and checked before anything is
    /// changed, so a failed update leaves the configuration untouched. A
    /// persisted dark signal captured at another exposure is not loaded; the
    /// returned report carries a warning instead.
    ///
    /// # Errors
    ///
    /// - `Error::DeviceClosed` after close
    /// - `Error::Configuration` while an acquisition is running
    /// - `Error::ShapeMismatch` if the wavelength calibration or a persisted
    ///   dark signal does not cover the factory window
    /// - I/O and serialization errors reading the calibration files
    /// - `Error::Configuration` and transport errors programming the timer
    pub async fn set_config(&mut self, update: ConfigUpdate) -> Result<ConfigReport> {
        self.ensure_open().await?;
        self.ensure_idle("change the configuration")?;
        let next = update.apply_to(&self.config);
        let width = self.factory.width();
        let mut report = ConfigReport::default();

        if next.n_times == 0 {
            return Err(Error::configuration("n_times must be at least 1"));
        }

        let wavelength = match &update.wavelength_calibration_path {
            Some(path) => {
                let calibration = WavelengthCalibration::load(path)?;
                calibration.check_width(width)?;
                debug!("Wavelength calibration loaded from {}", path.display());
                Some(Arc::new(calibration))
            }
            None => None,
        };

        let exposure_changed = next.exposure_ms != self.config.exposure_ms;
        let stale = self
            .dark_signal
            .as_ref()
            .is_some_and(|dark| dark.exposure() != next.exposure_ms);
        let reload = update.dark_signal_path.is_some() || stale || self.dark_signal.is_none();
        let persisted = match &next.dark_signal_path {
            Some(path) if reload => load_dark_signal(path, width)?,
            _ => None,
        };

        if exposure_changed || next.n_times != self.config.n_times {
            self.transport
                .lock()
                .await
                .set_timer(next.exposure_ms)
                .await?;
            debug!(
                exposure_ms = next.exposure_ms,
                n_times = next.n_times,
                "Acquisition parameters updated"
            );
        }

        if let Some(wavelength) = wavelength {
            self.wavelength = Some(wavelength);
        }

        if stale && let Some(dark) = self.dark_signal.take() {
            let warning = ConfigWarning::StaleDarkSignal {
                captured: dark.exposure(),
                configured: next.exposure_ms,
            };
            warn!("{}", warning);
            report.warnings.push(warning);
        }

        if let (Some(dark), Some(path)) = (persisted, &next.dark_signal_path) {
            if dark.exposure() == next.exposure_ms {
                debug!("Dark signal loaded from {}", path.display());
                self.dark_signal = Some(Arc::new(dark));
            } else {
                let warning = ConfigWarning::DarkSignalExposureMismatch {
                    path: path.clone(),
                    configured: next.exposure_ms,
                    persisted: dark.exposure(),
                };
                warn!("{}", warning);
                report.warnings.push(warning);
            }
        }

        self.config = next;
        Ok(report)
    }

    /// One cropped, scaled frame of `n_times` accumulations.
    ///
    /// # Errors
    ///
    /// `Error::DeviceClosed` after close, or any transport error.
    pub async fn read_raw(&self) -> Result<Data> {
        self.ensure_open().await?;
        self.readout().read_raw(self.config.n_times).await
    }

    /// Dark-corrected spectrum with wavelengths.
    ///
    /// With `force`, calibration is skipped and the raw measurement is
    /// returned without wavelength.
    ///
    /// # Errors
    ///
    /// - `Error::NotConfigured` without `force` unless dark signal and
    ///   wavelength calibration are loaded
    /// - `Error::DeviceClosed` after close, or any transport error
    pub async fn read(&self, force: bool) -> Result<Spectrum> {
        self.ensure_open().await?;
        if force {
            let raw = self.readout().read_raw(self.config.n_times).await?;
            return Ok(Spectrum::uncalibrated(raw));
        }
        let readout = self.calibrated_readout()?;
        readout.read(self.config.n_times).await
    }

    /// Capture a dark-signal baseline at the current exposure.
    ///
    /// Reads `n_times` accumulations, or the configured count if `None`.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` while an acquisition is running
    /// - `Error::DeviceClosed` after close, or any transport error
    pub async fn read_dark_signal(&mut self, n_times: Option<usize>) -> Result<&DarkSignal> {
        self.ensure_open().await?;
        self.ensure_idle("capture a dark signal")?;
        let n_times = n_times.unwrap_or(self.config.n_times);
        let raw = self.readout().read_raw(n_times).await?;

        let dark = Arc::new(DarkSignal::capture(&raw));
        info!(
            exposure_ms = dark.exposure(),
            n_times, "Dark signal captured"
        );
        Ok(&**self.dark_signal.insert(dark))
    }

    /// Persist the dark signal to the configured path.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` if no dark signal is loaded or no path is
    ///   configured
    /// - I/O and serialization errors writing the file
    pub fn save_dark_signal(&self) -> Result<()> {
        let dark = self
            .dark_signal
            .as_ref()
            .ok_or_else(|| Error::configuration("No dark signal to save"))?;
        let path = self
            .config
            .dark_signal_path
            .as_ref()
            .ok_or_else(|| Error::configuration("No dark signal path configured"))?;

        dark.save(path)?;
        info!("Dark signal saved to {}", path.display());
        Ok(())
    }

    /// Start reading calibrated spectra in the background.
    ///
    /// Every `frames_interval` accumulations are delivered to `callback` as
    /// one spectrum, until `frames_to_read` accumulations were read; with
    /// `None` reading continues until [`stop_reading`](Self::stop_reading).
    /// A running acquisition is stopped first.
    ///
    /// # Errors
    ///
    /// - `Error::NotConfigured` unless the spectrometer is configured
    /// - `Error::Configuration` if `frames_interval` is zero
    /// - `Error::DeviceClosed` after close
    pub async fn read_non_block<F>(
        &mut self,
        callback: F,
        frames_to_read: Option<usize>,
        frames_interval: usize,
    ) -> Result<()>
    where
        F: FnMut(Spectrum) + Send + 'static,
    {
        self.ensure_open().await?;
        if frames_interval == 0 {
            return Err(Error::configuration("frames_interval must be at least 1"));
        }
        let readout = self.calibrated_readout()?;

        self.stop_reading().await?;
        self.acquisition = Some(Acquisition::start(
            readout,
            callback,
            frames_to_read,
            frames_interval,
        ));
        Ok(())
    }

    /// Wait for the running acquisition to finish and return the number of
    /// spectra delivered. Returns 0 if nothing is running.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the acquisition.
    pub async fn wait_reading(&mut self) -> Result<usize> {
        match self.acquisition.take() {
            Some(acquisition) => acquisition.wait().await,
            None => Ok(0),
        }
    }

    /// Stop the running acquisition, if any. No callback runs after this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Task` if an acquisition task panicked.
    pub async fn stop_reading(&mut self) -> Result<()> {
        match self.acquisition.take() {
            Some(acquisition) => acquisition.stop().await,
            None => Ok(()),
        }
    }

    /// Stop any acquisition and close the transport.
    ///
    /// # Errors
    ///
    /// `Error::DeviceClosed` if already closed, or the transport's close
    /// error.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::DeviceClosed);
        }
        if let Err(e) = self.stop_reading().await {
            warn!("Acquisition did not stop cleanly: {}", e);
        }
        self.closed = true;
        self.transport.lock().await.close().await?;
        info!("Spectrometer closed");
        Ok(())
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.closed || !self.transport.lock().await.is_open() {
            return Err(Error::DeviceClosed);
        }
        Ok(())
    }

    /// The acquisition worker reads with a snapshot of exposure and
    /// calibration; neither may change under it.
    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.is_reading() {
            return Err(Error::configuration(format!(
                "Cannot {action} while an acquisition is running; stop it first"
            )));
        }
        Ok(())
    }

    fn readout(&self) -> Readout {
        Readout {
            transport: Arc::clone(&self.transport),
            factory: self.factory.clone(),
            exposure: self.config.exposure_ms,
            calibration: None,
        }
    }

    fn calibrated_readout(&self) -> Result<Readout> {
        let calibration = match (&self.dark_signal, &self.wavelength) {
            (Some(dark_signal), Some(wavelength)) => Calibration {
                dark_signal: Arc::clone(dark_signal),
                wavelength: Arc::clone(wavelength),
            },
            (None, None) => {
                return Err(Error::not_configured(
                    "dark signal and wavelength calibration",
                ));
            }
            (None, _) => return Err(Error::not_configured("dark signal")),
            (_, None) => return Err(Error::not_configured("wavelength calibration")),
        };
        Ok(Readout {
            calibration: Some(calibration),
            ..self.readout()
        })
    }
}

impl Drop for Spectrometer {
    fn drop(&mut self) {
        if let Some(acquisition) = &self.acquisition {
            acquisition.cancel();
        }
    }
}

/// Load a persisted dark signal if one exists at `path`.
fn load_dark_signal(path: &Path, width: usize) -> Result<Option<DarkSignal>> {
    let Some(dark) = DarkSignal::load_if_exists(path)? else {
        return Ok(None);
    };
    dark.check_width(width)?;
    Ok(Some(dark))
}
