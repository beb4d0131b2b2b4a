//! Wavelength calibration and dark-signal baselines.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use vmk_core::persist::{read_json, write_json};
use vmk_core::{Data, Error, Result};

/// Wavelength of every pixel in the factory window, in nanometres.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthCalibration {
    wavelengths: Array1<f64>,
}

#[derive(Serialize, Deserialize)]
struct WavelengthFile {
    wavelengths: Vec<f64>,
}

impl WavelengthCalibration {
    pub fn new(wavelengths: impl Into<Array1<f64>>) -> Self {
        Self {
            wavelengths: wavelengths.into(),
        }
    }

    /// Load `{wavelengths: [..]}` from a JSON file.
    ///
    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file: WavelengthFile = read_json(path.as_ref())?;
        Ok(Self::new(file.wavelengths))
    }

    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = WavelengthFile {
            wavelengths: self.wavelengths.to_vec(),
        };
        write_json(path.as_ref(), &file)
    }

    pub fn wavelengths(&self) -> &Array1<f64> {
        &self.wavelengths
    }

    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// # Errors
    /// Returns `Error::ShapeMismatch` unless there is one wavelength per
    /// pixel of a `width`-pixel window.
    pub fn check_width(&self, width: usize) -> Result<()> {
        if self.len() != width {
            return Err(Error::shape_mismatch(&[width], &[self.len()]));
        }
        Ok(())
    }
}

/// Per-pixel detector baseline captured with the shutter closed.
///
/// A baseline is only meaningful at the exposure it was captured at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DarkSignal {
    exposure: u32,
    #[serde(with = "baseline_vec")]
    baseline: Array1<f64>,
    captured_at: DateTime<Utc>,
}

impl DarkSignal {
    pub fn new(exposure: u32, baseline: Array1<f64>) -> Self {
        Self {
            exposure,
            baseline,
            captured_at: Utc::now(),
        }
    }

    /// Per-pixel mean over the accumulations of `data`.
    pub fn capture(data: &Data) -> Self {
        Self::new(data.exposure(), data.mean_over_frames())
    }

    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Load from `path` if the file exists.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_if_exists(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No dark signal persisted at {}", path.display());
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    pub fn exposure(&self) -> u32 {
        self.exposure
    }

    pub fn baseline(&self) -> &Array1<f64> {
        &self.baseline
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.baseline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
    }

    /// # Errors
    /// Returns `Error::ShapeMismatch` unless the baseline covers exactly
    /// `width` pixels.
    pub fn check_width(&self, width: usize) -> Result<()> {
        if self.len() != width {
            return Err(Error::shape_mismatch(&[width], &[self.len()]));
        }
        Ok(())
    }
}

/// Baseline persisted as a plain number list.
mod baseline_vec {
    use ndarray::Array1;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(baseline: &Array1<f64>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(baseline.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Array1<f64>, D::Error> {
        Vec::<f64>::deserialize(d).map(Array1::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_wavelength_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, r#"{"wavelengths": [400.0, 401.5, 403.0]}"#).unwrap();

        let calibration = WavelengthCalibration::load(&path).unwrap();
        assert_eq!(calibration.wavelengths(), &array![400.0, 401.5, 403.0]);
        assert!(calibration.check_width(3).is_ok());
        assert!(matches!(
            calibration.check_width(10),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_dark_signal_capture() {
        let data = Data::new(
            array![[1.0, 10.0], [3.0, 20.0]],
            array![[false, false], [false, false]],
            25,
        )
        .unwrap();

        let dark = DarkSignal::capture(&data);
        assert_eq!(dark.exposure(), 25);
        assert_eq!(dark.baseline(), &array![2.0, 15.0]);
    }

    #[test]
    fn test_dark_signal_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dark");

        let dark = DarkSignal::new(333, array![0.5, 1.5, 2.5]);
        dark.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["exposure"], 333);
        assert_eq!(json["baseline"], serde_json::json!([0.5, 1.5, 2.5]));
        assert!(json["captured_at"].is_string());

        let loaded = DarkSignal::load_if_exists(&path).unwrap().unwrap();
        assert_eq!(loaded, dark);
    }

    #[test]
    fn test_dark_signal_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            DarkSignal::load_if_exists(dir.path().join("dark"))
                .unwrap()
                .is_none()
        );
    }
}
