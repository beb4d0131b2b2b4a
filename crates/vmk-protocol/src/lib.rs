//! Binary framing of the VMK spectrometer protocols.
//!
//! Pure encode/decode: no I/O happens here. Transports in `vmk-hardware`
//! and `vmk-network` drive these codecs over their byte channels.

pub mod ethernet;
pub mod sequence;
pub mod timer;
pub mod usb;

pub use ethernet::{
    DeviceIni, EthernetAnswer, EthernetCommand, EthernetOpcode, LINE_SENTINEL, MultilineDecoder,
    decode_ethernet_lines,
};
pub use sequence::SequenceTracker;
pub use timer::TimerValue;
pub use usb::{
    AnswerCodec, AnswerStatus, DataChunkDecoder, UsbAnswer, UsbCommand, UsbCommandCode,
    decode_usb_samples,
};
