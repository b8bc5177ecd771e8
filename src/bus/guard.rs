//! Scoped bus acquisition
//!
//! One guard per transaction phase: acquiring waits for readiness and
//! asserts chip-select, dropping releases it on every exit path.

use std::ops::{Deref, DerefMut};

use super::{BusChannel, BusError};

/// Holds chip-select asserted for as long as it lives
pub struct SelectGuard<'a, B: BusChannel + ?Sized> {
    bus: &'a mut B,
}

impl<'a, B: BusChannel + ?Sized> SelectGuard<'a, B> {
    /// Wait for the co-processor and select it
    ///
    /// Chip-select is never asserted when the readiness wait fails.
    pub fn acquire(bus: &'a mut B) -> Result<Self, BusError> {
        bus.wait_ready()?;
        bus.select();
        Ok(Self { bus })
    }
}

impl<B: BusChannel + ?Sized> Deref for SelectGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.bus
    }
}

impl<B: BusChannel + ?Sized> DerefMut for SelectGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.bus
    }
}

impl<B: BusChannel + ?Sized> Drop for SelectGuard<'_, B> {
    fn drop(&mut self) {
        self.bus.deselect();
    }
}
