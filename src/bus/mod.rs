//! Bus Module
//!
//! The byte-level channel to the co-processor.
//!
//! ## Responsibilities
//! - Readiness wait (bounded by the implementation)
//! - Chip-select control
//! - Single byte write/read clocks
//!
//! The physical peripheral is not part of this crate: boards provide a
//! [`BusChannel`] implementation, and [`crate::sim::Coprocessor`] provides one
//! for host-side testing.

mod guard;

pub use guard::SelectGuard;

use thiserror::Error;

/// Failures reported by a bus implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The co-processor did not signal ready within the implementation's bound
    #[error("co-processor not ready (timeout)")]
    NotReady,

    /// The peripheral could not be brought up
    #[error("bus initialization failed")]
    InitFailed,

    /// A byte transfer failed at the peripheral level
    #[error("byte transfer failed")]
    Transfer,
}

/// Half-duplex byte channel with chip-select and readiness signalling
pub trait BusChannel {
    /// Bring the peripheral up. Called lazily before the first transaction.
    fn begin(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Block until the co-processor signals ready, or fail once the
    /// implementation's internal bound is exceeded
    fn wait_ready(&mut self) -> Result<(), BusError>;

    /// Assert chip-select
    fn select(&mut self);

    /// Release chip-select
    fn deselect(&mut self);

    /// Clock one byte out (the byte clocked in is discarded)
    fn write_byte(&mut self, byte: u8) -> Result<(), BusError>;

    /// Clock a dummy byte out and return the byte clocked in
    fn read_byte(&mut self) -> Result<u8, BusError>;
}

impl<B: BusChannel + ?Sized> BusChannel for Box<B> {
    fn begin(&mut self) -> Result<(), BusError> {
        (**self).begin()
    }

    fn wait_ready(&mut self) -> Result<(), BusError> {
        (**self).wait_ready()
    }

    fn select(&mut self) {
        (**self).select()
    }

    fn deselect(&mut self) {
        (**self).deselect()
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        (**self).write_byte(byte)
    }

    fn read_byte(&mut self) -> Result<u8, BusError> {
        (**self).read_byte()
    }
}
