//! Last-error slot
//!
//! Outcome of the most recent operation. Reset to absent when an operation
//! starts; written once by whichever step decides the outcome.

/// Cached outcome code of the most recent operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSlot {
    present: bool,
    value: u8,
}

impl ErrorSlot {
    /// Create an absent slot
    pub const fn new() -> Self {
        Self {
            present: false,
            value: 0,
        }
    }

    /// Forget the cached outcome
    pub fn reset(&mut self) {
        self.present = false;
    }

    /// Record an outcome
    pub fn set(&mut self, value: u8) {
        self.present = true;
        self.value = value;
    }

    /// The cached outcome, if any
    pub fn get(&self) -> Option<u8> {
        self.present.then_some(self.value)
    }

    pub fn is_present(&self) -> bool {
        self.present
    }
}
