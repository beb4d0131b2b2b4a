//! Factory and device configuration.
//!
//! [`FactoryConfig`] describes the physical unit and never changes after it
//! is loaded. [`DeviceConfig`] is the acquisition setup; it is changed only
//! through [`Spectrometer::set_config`](crate::Spectrometer::set_config)
//! with a [`ConfigUpdate`], which returns a [`ConfigReport`] listing soft
//! problems that did not prevent the update.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use vmk_core::constants::{DEFAULT_EXPOSURE_MS, DEFAULT_N_TIMES};
use vmk_core::persist::read_json;
use vmk_core::{Error, Result};

/// Per-unit calibration: the useful pixel window, its orientation and the
/// intensity scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// First pixel of the window.
    pub start: usize,
    /// One past the last pixel of the window.
    pub end: usize,
    /// Reverse the window so wavelength increases with the column index.
    pub reverse: bool,
    pub intensity_scale: f64,
}

impl FactoryConfig {
    /// # Errors
    /// Returns `Error::Configuration` unless `start < end`.
    pub fn new(start: usize, end: usize, reverse: bool, intensity_scale: f64) -> Result<Self> {
        let config = Self {
            start,
            end,
            reverse,
            intensity_scale,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file `{start, end, reverse, intensity_scale}`.
    ///
    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be read,
    /// and `Error::Configuration` if the window is empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::Configuration` unless `start < end`.
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(Error::configuration(format!(
                "Pixel window start {} must be below end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Number of pixels in the window.
    pub fn width(&self) -> usize {
        self.end - self.start
    }

    /// Check that the window fits a detector `pixel_count` pixels wide.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if the window extends past the detector.
    pub fn check_detector(&self, pixel_count: usize) -> Result<()> {
        if self.end > pixel_count {
            return Err(Error::configuration(format!(
                "Pixel window {}..{} exceeds detector width {}",
                self.start, self.end, pixel_count
            )));
        }
        Ok(())
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            start: 2050,
            end: 3850,
            reverse: true,
            intensity_scale: 1.0,
        }
    }
}

/// Acquisition setup of an open spectrometer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Exposure of one accumulation, milliseconds.
    pub exposure_ms: u32,
    /// Accumulations per frame.
    pub n_times: usize,
    pub wavelength_calibration_path: Option<PathBuf>,
    pub dark_signal_path: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            exposure_ms: DEFAULT_EXPOSURE_MS,
            n_times: DEFAULT_N_TIMES,
            wavelength_calibration_path: None,
            dark_signal_path: None,
        }
    }
}

/// Partial change to a [`DeviceConfig`]; unset fields are left as they are.
///
/// # Examples
///
/// ```
/// use vmk_spectrometer::ConfigUpdate;
///
/// let update = ConfigUpdate::new()
///     .exposure(20)
///     .n_times(4)
///     .dark_signal_path("dark.json");
/// assert_eq!(update.exposure_ms, Some(20));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub exposure_ms: Option<u32>,
    pub n_times: Option<usize>,
    pub wavelength_calibration_path: Option<PathBuf>,
    pub dark_signal_path: Option<PathBuf>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exposure(mut self, exposure_ms: u32) -> Self {
        self.exposure_ms = Some(exposure_ms);
        self
    }

    #[must_use]
    pub fn n_times(mut self, n_times: usize) -> Self {
        self.n_times = Some(n_times);
        self
    }

    #[must_use]
    pub fn wavelength_calibration_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wavelength_calibration_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn dark_signal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dark_signal_path = Some(path.into());
        self
    }

    /// `config` with this update applied.
    pub(crate) fn apply_to(&self, config: &DeviceConfig) -> DeviceConfig {
        DeviceConfig {
            exposure_ms: self.exposure_ms.unwrap_or(config.exposure_ms),
            n_times: self.n_times.unwrap_or(config.n_times),
            wavelength_calibration_path: self
                .wavelength_calibration_path
                .clone()
                .or_else(|| config.wavelength_calibration_path.clone()),
            dark_signal_path: self
                .dark_signal_path
                .clone()
                .or_else(|| config.dark_signal_path.clone()),
        }
    }
}

/// Soft problem found while applying a configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigWarning {
    /// The persisted dark signal was captured at another exposure and was
    /// not loaded.
    DarkSignalExposureMismatch {
        path: PathBuf,
        configured: u32,
        persisted: u32,
    },
    /// The loaded dark signal no longer matches the configured exposure and
    /// was dropped.
    StaleDarkSignal { captured: u32, configured: u32 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DarkSignalExposureMismatch {
                path,
                configured,
                persisted,
            } => write!(
                f,
                "Dark signal at {} was captured at exposure {}ms, configured exposure is {}ms",
                path.display(),
                persisted,
                configured
            ),
            Self::StaleDarkSignal {
                captured,
                configured,
            } => write!(
                f,
                "Dark signal captured at exposure {}ms dropped after exposure changed to {}ms",
                captured, configured
            ),
        }
    }
}

/// Outcome of a successful configuration update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReport {
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigReport {
    /// Returns `true` if the update applied without warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use vmk_core::persist::write_json;

    #[test]
    fn test_factory_default() {
        let config = FactoryConfig::default();
        assert_eq!((config.start, config.end), (2050, 3850));
        assert!(config.reverse);
        assert_eq!(config.width(), 1800);
    }

    #[rstest]
    #[case(10, 10)]
    #[case(40, 10)]
    fn test_factory_rejects_empty_window(#[case] start: usize, #[case] end: usize) {
        let err = FactoryConfig::new(start, end, false, 1.0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_factory_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.json");
        std::fs::write(
            &path,
            r#"{"start": 10, "end": 40, "reverse": true, "intensity_scale": 0.5}"#,
        )
        .unwrap();

        let config = FactoryConfig::load(&path).unwrap();
        assert_eq!(config, FactoryConfig::new(10, 40, true, 0.5).unwrap());
    }

    #[test]
    fn test_factory_load_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.json");
        let invalid = FactoryConfig {
            start: 50,
            end: 40,
            reverse: false,
            intensity_scale: 1.0,
        };
        write_json(&path, &invalid).unwrap();

        assert!(FactoryConfig::load(&path).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_check_detector() {
        let config = FactoryConfig::new(0, 100, false, 1.0).unwrap();
        assert!(config.check_detector(100).is_ok());
        assert!(config.check_detector(99).is_err());
    }

    #[test]
    fn test_update_merges() {
        let base = DeviceConfig {
            dark_signal_path: Some("dark.json".into()),
            ..DeviceConfig::default()
        };
        let merged = ConfigUpdate::new().n_times(3).apply_to(&base);

        assert_eq!(merged.n_times, 3);
        assert_eq!(merged.exposure_ms, DEFAULT_EXPOSURE_MS);
        assert_eq!(merged.dark_signal_path, Some(PathBuf::from("dark.json")));
        assert_eq!(merged.wavelength_calibration_path, None);
    }

    #[test]
    fn test_warning_mentions_exposure() {
        let warning = ConfigWarning::DarkSignalExposureMismatch {
            path: "dark.json".into(),
            configured: 100,
            persisted: 333,
        };
        assert!(warning.to_string().contains("exposure"));
    }
}
