//! Measurement value types.
//!
//! [`Data`] is a cropped, scaled measurement: an intensity matrix of shape
//! `[n_times, pixels]`, a clipped-flag matrix of the same shape, and the
//! exposure (milliseconds per accumulation) it was taken at. [`Spectrum`]
//! adds the per-pixel wavelength axis produced by wavelength calibration.
//!
//! # Arithmetic
//!
//! ```
//! use ndarray::array;
//! use vmk_core::Data;
//!
//! let signal = Data::new(array![[10.0, 20.0]], array![[false, true]], 5).unwrap();
//! let dark = Data::new(array![[1.0, 2.0]], array![[true, false]], 5).unwrap();
//!
//! let corrected = (&signal - &dark).unwrap();
//! assert_eq!(corrected.intensity(), &array![[9.0, 18.0]]);
//! assert_eq!(corrected.clipped(), &array![[true, true]]);
//!
//! let scaled = &corrected * 2.0;
//! assert_eq!(scaled.intensity(), &array![[18.0, 36.0]]);
//! ```
//!
//! Multiplying two measurements has no physical meaning and is not
//! provided: `&a * &b` does not compile.

use crate::persist::{read_json, write_json};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis, Slice, Zip};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};
use std::path::Path;

/// Calibrated measurement without a wavelength axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    intensity: Array2<f64>,
    clipped: Array2<bool>,
    exposure: u32,
}

impl Data {
    /// Create a measurement.
    ///
    /// # Errors
    /// Returns `Error::ShapeMismatch` if `intensity` and `clipped` differ in shape.
    pub fn new(intensity: Array2<f64>, clipped: Array2<bool>, exposure: u32) -> Result<Self> {
        if intensity.shape() != clipped.shape() {
            return Err(Error::shape_mismatch(intensity.shape(), clipped.shape()));
        }
        Ok(Self {
            intensity,
            clipped,
            exposure,
        })
    }

    #[must_use]
    pub fn intensity(&self) -> &Array2<f64> {
        &self.intensity
    }

    #[must_use]
    pub fn clipped(&self) -> &Array2<bool> {
        &self.clipped
    }

    /// Exposure of a single accumulation in milliseconds.
    #[must_use]
    pub fn exposure(&self) -> u32 {
        self.exposure
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.intensity.dim()
    }

    #[must_use]
    pub fn n_times(&self) -> usize {
        self.intensity.nrows()
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.intensity.ncols()
    }

    /// Returns `true` if any sample in the measurement is clipped.
    #[must_use]
    pub fn any_clipped(&self) -> bool {
        self.clipped.iter().any(|&c| c)
    }

    /// Per-pixel mean over all accumulations.
    ///
    /// An empty measurement yields a zero vector of the pixel width.
    #[must_use]
    pub fn mean_over_frames(&self) -> Array1<f64> {
        self.intensity
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.pixel_count()))
    }

    /// Select a sub-block of rows (accumulations) and columns (pixels).
    ///
    /// Bounds are clamped to the measurement like sequence slicing:
    /// `data.slice(1.., ..)` drops the first row, `data.slice(.., 1..2)`
    /// keeps a single pixel column across all rows.
    ///
    /// # Panics
    /// Panics if a slice step is zero.
    #[must_use]
    pub fn slice(&self, rows: impl Into<Slice>, cols: impl Into<Slice>) -> Data {
        let rows = clamp_slice(rows.into(), self.n_times());
        let cols = clamp_slice(cols.into(), self.pixel_count());

        let intensity = self
            .intensity
            .slice_axis(Axis(0), rows)
            .slice_axis(Axis(1), cols)
            .to_owned();
        let clipped = self
            .clipped
            .slice_axis(Axis(0), rows)
            .slice_axis(Axis(1), cols)
            .to_owned();

        Data {
            intensity,
            clipped,
            exposure: self.exposure,
        }
    }

    /// Elementwise sum with another measurement of identical shape.
    ///
    /// Clipped flags are OR-ed. Both operands must share one exposure.
    ///
    /// # Errors
    /// Returns `Error::ShapeMismatch` if the shapes differ and
    /// `Error::ExposureMismatch` if the exposures differ.
    pub fn checked_add(&self, rhs: &Data) -> Result<Data> {
        self.combine(rhs, |a, b| a + b)
    }

    /// Elementwise difference with another measurement of identical shape.
    ///
    /// # Errors
    /// Same as [`Data::checked_add`].
    pub fn checked_sub(&self, rhs: &Data) -> Result<Data> {
        self.combine(rhs, |a, b| a - b)
    }

    fn combine(&self, rhs: &Data, op: impl Fn(f64, f64) -> f64) -> Result<Data> {
        if self.intensity.shape() != rhs.intensity.shape() {
            return Err(Error::shape_mismatch(
                self.intensity.shape(),
                rhs.intensity.shape(),
            ));
        }
        if self.exposure != rhs.exposure {
            return Err(Error::ExposureMismatch {
                left: self.exposure,
                right: rhs.exposure,
            });
        }

        let intensity = Zip::from(&self.intensity)
            .and(&rhs.intensity)
            .map_collect(|&a, &b| op(a, b));
        let clipped = Zip::from(&self.clipped)
            .and(&rhs.clipped)
            .map_collect(|&a, &b| a || b);

        Ok(Data {
            intensity,
            clipped,
            exposure: self.exposure,
        })
    }

    fn map_intensity(&self, f: impl Fn(f64) -> f64) -> Data {
        Data {
            intensity: self.intensity.mapv(f),
            clipped: self.clipped.clone(),
            exposure: self.exposure,
        }
    }

    /// Write the measurement to a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), &Snapshot::new(self, None))
    }

    /// Read a measurement written by [`Data::save`] or [`Spectrum::save`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Data> {
        let snapshot: Snapshot = read_json(path.as_ref())?;
        snapshot.data.validated()
    }

    fn validated(self) -> Result<Data> {
        Data::new(self.intensity, self.clipped, self.exposure)
    }
}

impl Add<&Data> for &Data {
    type Output = Result<Data>;

    fn add(self, rhs: &Data) -> Result<Data> {
        self.checked_add(rhs)
    }
}

impl Add for Data {
    type Output = Result<Data>;

    fn add(self, rhs: Data) -> Result<Data> {
        self.checked_add(&rhs)
    }
}

impl Sub<&Data> for &Data {
    type Output = Result<Data>;

    fn sub(self, rhs: &Data) -> Result<Data> {
        self.checked_sub(rhs)
    }
}

impl Sub for Data {
    type Output = Result<Data>;

    fn sub(self, rhs: Data) -> Result<Data> {
        self.checked_sub(&rhs)
    }
}

impl Add<f64> for &Data {
    type Output = Data;

    fn add(self, rhs: f64) -> Data {
        self.map_intensity(|v| v + rhs)
    }
}

impl Add<f64> for Data {
    type Output = Data;

    fn add(self, rhs: f64) -> Data {
        &self + rhs
    }
}

impl Sub<f64> for &Data {
    type Output = Data;

    fn sub(self, rhs: f64) -> Data {
        self.map_intensity(|v| v - rhs)
    }
}

impl Sub<f64> for Data {
    type Output = Data;

    fn sub(self, rhs: f64) -> Data {
        &self - rhs
    }
}

impl Mul<f64> for &Data {
    type Output = Data;

    fn mul(self, rhs: f64) -> Data {
        self.map_intensity(|v| v * rhs)
    }
}

impl Mul<f64> for Data {
    type Output = Data;

    fn mul(self, rhs: f64) -> Data {
        &self * rhs
    }
}

/// Measurement with an optional wavelength axis.
///
/// The wavelength is absent when the spectrum was read without calibration
/// (forced read). When present its length equals the pixel width.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    data: Data,
    wavelength: Option<Array1<f64>>,
}

impl Spectrum {
    /// Attach a wavelength axis to a measurement.
    ///
    /// # Errors
    /// Returns `Error::ShapeMismatch` if the wavelength length differs from
    /// the pixel width.
    pub fn new(data: Data, wavelength: Array1<f64>) -> Result<Self> {
        if wavelength.len() != data.pixel_count() {
            return Err(Error::shape_mismatch(
                &[data.pixel_count()],
                &[wavelength.len()],
            ));
        }
        Ok(Self {
            data,
            wavelength: Some(wavelength),
        })
    }

    /// Wrap a measurement without wavelength calibration.
    #[must_use]
    pub fn uncalibrated(data: Data) -> Self {
        Self {
            data,
            wavelength: None,
        }
    }

    #[must_use]
    pub fn data(&self) -> &Data {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Data {
        self.data
    }

    #[must_use]
    pub fn intensity(&self) -> &Array2<f64> {
        self.data.intensity()
    }

    #[must_use]
    pub fn clipped(&self) -> &Array2<bool> {
        self.data.clipped()
    }

    #[must_use]
    pub fn exposure(&self) -> u32 {
        self.data.exposure()
    }

    #[must_use]
    pub fn wavelength(&self) -> Option<&Array1<f64>> {
        self.wavelength.as_ref()
    }

    #[must_use]
    pub fn n_times(&self) -> usize {
        self.data.n_times()
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.data.pixel_count()
    }

    /// Slice like [`Data::slice`]; the wavelength follows the column slice.
    #[must_use]
    pub fn slice(&self, rows: impl Into<Slice>, cols: impl Into<Slice>) -> Spectrum {
        let cols = cols.into();
        let wavelength = self.wavelength.as_ref().map(|wl| {
            wl.slice_axis(Axis(0), clamp_slice(cols, wl.len()))
                .to_owned()
        });
        Spectrum {
            data: self.data.slice(rows, cols),
            wavelength,
        }
    }

    /// Write the spectrum, wavelength included, to a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(
            path.as_ref(),
            &Snapshot::new(&self.data, self.wavelength.clone()),
        )
    }

    /// Read a spectrum written by [`Spectrum::save`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or the stored
    /// wavelength does not match the stored intensity width.
    pub fn load(path: impl AsRef<Path>) -> Result<Spectrum> {
        let snapshot: Snapshot = read_json(path.as_ref())?;
        let data = snapshot.data.validated()?;
        match snapshot.wavelength {
            Some(wavelength) => Spectrum::new(data, wavelength),
            None => Ok(Spectrum::uncalibrated(data)),
        }
    }
}

impl From<Spectrum> for Data {
    fn from(spectrum: Spectrum) -> Self {
        spectrum.data
    }
}

/// On-disk form of a saved measurement.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    data: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wavelength: Option<Array1<f64>>,
}

impl Snapshot {
    fn new(data: &Data, wavelength: Option<Array1<f64>>) -> Self {
        Self {
            saved_at: Utc::now(),
            data: data.clone(),
            wavelength,
        }
    }
}

/// Resolve negative indices and clamp bounds to `len`.
fn clamp_slice(slice: Slice, len: usize) -> Slice {
    let len = len as isize;
    let resolve = |index: isize| {
        if index < 0 {
            (index + len).max(0)
        } else {
            index.min(len)
        }
    };
    let start = resolve(slice.start);
    let end = resolve(slice.end.unwrap_or(len)).max(start);
    Slice::new(start, Some(end), slice.step)
}
