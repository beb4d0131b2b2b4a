//! Exposure timer encoding.
//!
//! The device expresses an exposure as `0.1 ms × mantissa × 10^exponent`
//! with a 10-bit mantissa and a 2-bit exponent. Both transports share the
//! scheme; they differ only in how the pair is packed into a command.

use vmk_core::constants::{TIMER_MANTISSA_BITS, TIMER_MAX_EXPONENT, TIMER_RESOLUTION_MS};
use vmk_core::{Error, Result};

/// Mantissa/exponent pair programming the exposure timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerValue {
    mantissa: u16,
    exponent: u8,
}

impl TimerValue {
    /// Encode an exposure in milliseconds.
    ///
    /// Precision beyond three significant digits is truncated, matching the
    /// device's own rounding.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if the exposure needs an exponent
    /// above 3.
    ///
    /// # Examples
    ///
    /// ```
    /// use vmk_protocol::TimerValue;
    ///
    /// let timer = TimerValue::from_millis(200).unwrap();
    /// assert_eq!(timer.mantissa(), 200);
    /// assert_eq!(timer.exponent(), 1);
    /// assert_eq!(timer.usb_data(), 0x0001_00C8);
    /// ```
    pub fn from_millis(millis: u32) -> Result<Self> {
        let mut mantissa = u64::from(millis) * 10;
        let mut exponent = 0u8;
        while mantissa >= 1 << TIMER_MANTISSA_BITS {
            mantissa /= 10;
            exponent += 1;
        }
        if exponent > TIMER_MAX_EXPONENT {
            return Err(Error::configuration(format!(
                "Exposure {millis}ms is too large for the device timer"
            )));
        }
        Ok(Self {
            mantissa: mantissa as u16,
            exponent,
        })
    }

    /// Build from raw fields as reported by the device (no range check).
    pub fn from_raw(mantissa: u16, exponent: u8) -> Self {
        Self { mantissa, exponent }
    }

    pub fn mantissa(&self) -> u16 {
        self.mantissa
    }

    pub fn exponent(&self) -> u8 {
        self.exponent
    }

    /// Packed 32-bit USB command data: mantissa in the low half, exponent
    /// in bits 16 and up.
    pub fn usb_data(&self) -> u32 {
        u32::from(self.mantissa) | (u32::from(self.exponent) << 16)
    }

    /// Exposure represented by this value, in milliseconds.
    pub fn millis(&self) -> f64 {
        TIMER_RESOLUTION_MS * f64::from(self.mantissa) * 10f64.powi(i32::from(self.exponent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0)]
    #[case(1, 10, 0)]
    #[case(102, 1020, 0)]
    #[case(103, 103, 1)]
    #[case(1000, 1000, 1)]
    #[case(1024, 102, 2)]
    #[case(10_000, 1000, 2)]
    #[case(100_000, 1000, 3)]
    #[case(102_399, 1023, 3)]
    fn test_encoding(#[case] millis: u32, #[case] mantissa: u16, #[case] exponent: u8) {
        let timer = TimerValue::from_millis(millis).unwrap();
        assert_eq!(timer.mantissa(), mantissa);
        assert_eq!(timer.exponent(), exponent);
    }

    #[rstest]
    #[case(102_400)]
    #[case(1_000_000)]
    #[case(u32::MAX)]
    fn test_too_large(#[case] millis: u32) {
        let err = TimerValue::from_millis(millis).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_usb_data_packing() {
        let timer = TimerValue::from_millis(10_000).unwrap();
        assert_eq!(timer.usb_data(), 1000 | (2 << 16));
    }

    #[test]
    fn test_handshake_timer_is_default_exposure() {
        let timer = TimerValue::from_raw(0x03E8, 0);
        assert!((timer.millis() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_millis_roundtrip_within_precision() {
        for millis in [1u32, 5, 37, 250, 999, 4321, 65_000] {
            let encoded = TimerValue::from_millis(millis).unwrap().millis();
            assert!(encoded <= f64::from(millis) + 1e-9);
            assert!(encoded >= f64::from(millis) * 0.99 - 1e-9);
        }
    }
}
