/// 16-bit command sequence counter.
///
/// Every outbound command carries the current value; the answer must echo
/// it. The counter advances only after a fully validated exchange, so
/// the next command after a failed exchange reuses the same number. It
/// wraps from 65535 to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTracker {
    next: u16,
}

impl SequenceTracker {
    /// Counter starting at 1, the first sequence number a device expects
    /// after power-up.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(value: u16) -> Self {
        Self { next: value }
    }

    /// Sequence number for the next command.
    pub fn current(&self) -> u16 {
        self.next
    }

    /// Mark the current exchange as completed.
    pub fn advance(&mut self) {
        self.next = self.next.wrapping_add(1);
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
