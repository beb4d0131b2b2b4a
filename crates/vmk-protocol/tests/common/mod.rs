//! Common test utilities for protocol integration tests.
//!
//! Helpers here build wire bytes the way a device would send them, so the
//! tests exercise decoders against realistic streams rather than
//! hand-assembled byte arrays.

#![allow(dead_code)]

use bytes::BytesMut;
use vmk_protocol::usb::{encode_data_chunk, encode_sample};

/// Wire bytes of a USB readout, split into `#DAT` chunks of at most
/// `chunk_len` payload bytes.
pub fn usb_readout(values: &[u16], chunk_len: usize) -> BytesMut {
    let raw: Vec<u8> = values
        .iter()
        .flat_map(|&v| encode_sample(v).to_le_bytes())
        .collect();

    let mut wire = BytesMut::new();
    for chunk in raw.chunks(chunk_len) {
        encode_data_chunk(chunk, &mut wire);
    }
    wire
}

/// Mock detector line: `pixel + row`, matching the in-process simulators.
pub fn ramp_line(pixel_count: usize, row: usize) -> Vec<u16> {
    (0..pixel_count).map(|p| (p + row) as u16).collect()
}
