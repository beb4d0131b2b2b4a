use crate::{Error, Result};
use ndarray::Array2;

/// Raw detector frame as delivered by a transport.
///
/// `samples` has shape `[n_times, pixel_count]`: one row per accumulation
/// (line), one column per detector pixel. `clipped` has the same shape and
/// flags saturated samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    samples: Array2<i32>,
    clipped: Array2<bool>,
}

impl Frame {
    /// Create a frame, checking that both matrices have the same shape.
    ///
    /// # Errors
    /// Returns `Error::ShapeMismatch` if the shapes differ.
    pub fn new(samples: Array2<i32>, clipped: Array2<bool>) -> Result<Self> {
        if samples.shape() != clipped.shape() {
            return Err(Error::shape_mismatch(samples.shape(), clipped.shape()));
        }
        Ok(Self { samples, clipped })
    }

    /// Create a frame with no clipped samples.
    #[must_use]
    pub fn unclipped(samples: Array2<i32>) -> Self {
        let clipped = Array2::from_elem(samples.raw_dim(), false);
        Self { samples, clipped }
    }

    /// Number of accumulations (rows).
    #[must_use]
    pub fn n_times(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of pixels per accumulation (columns).
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.samples.ncols()
    }

    #[must_use]
    pub fn samples(&self) -> &Array2<i32> {
        &self.samples
    }

    #[must_use]
    pub fn clipped(&self) -> &Array2<bool> {
        &self.clipped
    }

    #[must_use]
    pub fn into_parts(self) -> (Array2<i32>, Array2<bool>) {
        (self.samples, self.clipped)
    }
}
