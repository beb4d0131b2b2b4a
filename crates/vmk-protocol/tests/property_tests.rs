//! Property-based tests for protocol invariants.

mod common;

use proptest::prelude::*;
use vmk_protocol::{DataChunkDecoder, SequenceTracker, TimerValue, decode_usb_samples};
use tokio_util::codec::Decoder;

proptest! {
    /// Property: every encodable exposure fits the mantissa and never
    /// overstates the requested time.
    #[test]
    fn prop_timer_encoding_bounds(millis in 0u32..102_400) {
        let timer = TimerValue::from_millis(millis).unwrap();
        prop_assert!(timer.mantissa() < 1024);
        prop_assert!(timer.exponent() <= 3);
        prop_assert!(timer.millis() <= f64::from(millis) + 1e-6);
    }

    /// Property: exposures beyond the timer range are rejected.
    #[test]
    fn prop_timer_rejects_large(millis in 102_400u32..) {
        prop_assert!(TimerValue::from_millis(millis).is_err());
    }

    /// Property: the sequence counter is a wrapping u16 increment.
    #[test]
    fn prop_sequence_wraps(start in any::<u16>(), steps in 0u32..3000) {
        let mut seq = SequenceTracker::starting_at(start);
        for _ in 0..steps {
            seq.advance();
        }
        prop_assert_eq!(seq.current(), start.wrapping_add(steps as u16));
    }

    /// Property: USB samples survive transmission regardless of chunking,
    /// and only 0xFFFF is flagged clipped.
    #[test]
    fn prop_usb_samples_decode(
        values in prop::collection::vec(any::<u16>(), 1..256),
        chunk_words in 1usize..64,
    ) {
        let mut wire = common::usb_readout(&values, chunk_words * 2);
        let mut decoder = DataChunkDecoder::new(values.len() * 2);

        let mut raw = Vec::new();
        while let Some(chunk) = decoder.decode(&mut wire).unwrap() {
            raw.extend_from_slice(&chunk);
        }
        prop_assert!(decoder.is_complete());

        let frame = decode_usb_samples(&raw, 1, values.len()).unwrap();
        for (i, &v) in values.iter().enumerate() {
            prop_assert_eq!(frame.samples()[[0, i]], i32::from(v));
            prop_assert_eq!(frame.clipped()[[0, i]], v == 0xFFFF);
        }
    }
}
