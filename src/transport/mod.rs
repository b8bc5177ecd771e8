//! Transport Module
//!
//! Runs one command/response transaction at a time over a [`BusChannel`].
//!
//! ## Transaction Phases
//! 1. **Send**: wait ready, select, clock out the request plus filler, deselect
//! 2. **Reply**: wait ready, select, clock in the reply, deselect
//!
//! The co-processor prepares its answer between the two phases. Each phase
//! holds its own [`SelectGuard`], so chip-select is released on every exit
//! path, including failures in the middle of a frame.
//!
//! ## Error Slot
//! Every [`Transport::execute`] resets the slot. A transport failure writes
//! [`FAILURE`]; client layers write `0` once they see a remote success. When
//! the slot is still absent, [`Transport::last_error`] asks the co-processor
//! for its errno and caches the answer.

mod error_slot;

pub use error_slot::ErrorSlot;

use crate::bus::{BusChannel, SelectGuard};
use crate::config::Config;
use crate::error::{LinkError, Result, FAILURE};
use crate::protocol::{encode_request, read_reply, Opcode, OutParam, Param, RequestFrame};

/// Command/response engine bound to one bus
pub struct Transport<B: BusChannel> {
    /// Byte channel to the co-processor
    bus: B,

    /// Transport tunables
    config: Config,

    /// Outcome of the most recent operation
    last_error: ErrorSlot,

    /// Whether `bus.begin()` has run
    initialized: bool,
}

impl<B: BusChannel> Transport<B> {
    /// Create a transport; the bus is brought up on first use
    pub fn new(bus: B, config: Config) -> Self {
        Self {
            bus,
            config,
            last_error: ErrorSlot::new(),
            initialized: false,
        }
    }

    /// Bring the bus up if it has not been yet
    fn ensure_initialized(&mut self) -> Result<()> {
        if !self.initialized {
            tracing::debug!("Initializing bus");
            self.bus.begin()?;
            self.initialized = true;
        }
        Ok(())
    }

    /// Re-run bus initialization and forget the cached outcome
    pub fn reinitialize(&mut self) -> Result<()> {
        self.initialized = false;
        self.last_error.reset();
        if let Err(e) = self.ensure_initialized() {
            self.last_error.set(FAILURE);
            return Err(e);
        }
        Ok(())
    }

    /// Execute one transaction
    ///
    /// Every argument is sent with the opcode's request width; `outs` must
    /// match the number of parameters the co-processor replies with.
    pub fn execute(
        &mut self,
        opcode: Opcode,
        args: &[&[u8]],
        outs: &mut [OutParam<'_>],
    ) -> Result<()> {
        self.last_error.reset();

        let width = opcode.request_width();
        let params: Vec<Param<'_>> = args.iter().map(|arg| Param::new(width, arg)).collect();
        let frame = match encode_request(opcode, &params) {
            Ok(frame) => frame,
            Err(e) => {
                // Rejected before touching the bus
                self.last_error.set(e.code());
                return Err(e);
            }
        };

        let result = self
            .ensure_initialized()
            .and_then(|_| self.transact(opcode, &frame, outs));

        if let Err(ref e) = result {
            tracing::warn!("{:?}: error waiting for response: {}", opcode, e);
            self.last_error.set(FAILURE);
        }
        result
    }

    /// Both bus phases of one transaction
    fn transact(
        &mut self,
        opcode: Opcode,
        frame: &RequestFrame,
        outs: &mut [OutParam<'_>],
    ) -> Result<()> {
        if self.config.trace_frames {
            tracing::trace!(
                "{:?} request: {:02x?} + {} filler",
                opcode,
                &frame.bytes[..],
                frame.padding
            );
        } else {
            tracing::trace!("{:?} request: {} bytes", opcode, frame.total_len());
        }

        // Phase 1: send
        {
            let mut sel = SelectGuard::acquire(&mut self.bus)?;
            for &byte in frame.bytes.iter() {
                sel.write_byte(byte)?;
            }
            for _ in 0..frame.padding {
                sel.read_byte()?;
            }
        }

        // Phase 2: reply
        {
            let attempts = self.config.reply_start_attempts;
            let mut sel = SelectGuard::acquire(&mut self.bus)?;
            read_reply(
                || sel.read_byte().map_err(LinkError::from),
                opcode,
                outs,
                attempts,
            )?;
        }

        if self.config.trace_frames {
            for (index, out) in outs.iter().enumerate() {
                tracing::trace!("{:?} reply[{}]: {:02x?}", opcode, index, out.data());
            }
        }

        Ok(())
    }

    /// Outcome code of the most recent operation
    ///
    /// Returns the cached value when present; otherwise queries the
    /// co-processor's errno once and caches the result.
    pub fn last_error(&mut self) -> u8 {
        if let Some(code) = self.last_error.get() {
            return code;
        }

        let mut code = [0u8; 1];
        let mut outs = [OutParam::new(&mut code)];
        match self.execute(Opcode::SocketErrno, &[], &mut outs) {
            Ok(()) => {
                let value = outs[0].data().first().copied().unwrap_or(0);
                self.last_error.set(value);
                value
            }
            Err(_) => FAILURE,
        }
    }

    /// Record a remote success
    pub fn mark_success(&mut self) {
        self.last_error.set(0);
    }

    /// Record a code decided locally
    pub fn set_last_error(&mut self, code: u8) {
        self.last_error.set(code);
    }

    /// Record a local precondition failure without touching the bus
    pub fn fail_local(&mut self, err: LinkError) -> LinkError {
        self.last_error.set(err.code());
        err
    }

    /// Build the error for a remote-reported failure, fetching its code
    pub fn remote_failure(&mut self) -> LinkError {
        LinkError::from_code(self.last_error())
    }

    /// Current slot contents, without any round trip
    pub fn error_slot(&self) -> ErrorSlot {
        self.last_error
    }

    /// Put back a slot captured with [`Transport::error_slot`]
    pub fn restore_error_slot(&mut self, slot: ErrorSlot) {
        self.last_error = slot;
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Borrow the bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
