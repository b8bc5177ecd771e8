//! Simulator Module
//!
//! An in-memory co-processor that speaks the wire protocol, for testing and
//! for running the driver on a host without hardware.
//!
//! ## How It Works
//! ```text
//!   select ─► write request bytes ─► deselect ──► decode + execute
//!                                                      │
//!   select ◄─ read reply bytes ◄────── queued reply ◄──┘
//! ```
//! Bytes written while selected are collected; releasing chip-select after
//! a write phase decodes them as a request, runs it against the
//! [`Firmware`] and queues the encoded reply. Reads clock out the queued
//! reply, then dummy bytes. Releasing chip-select after a read-only phase
//! discards whatever was left unread.
//!
//! ## Fault Injection
//! - Unresponsive: every readiness wait fails
//! - Corrupt next reply: the echoed opcode is wrong
//! - Drop next reply: nothing is queued, the reader sees only dummy bytes

mod firmware;
mod flash;
mod network;
mod nvs;

pub use firmware::Firmware;
pub use flash::FlashImage;
pub use network::{Network, DEFAULT_MAX_SOCKETS, EPHEMERAL_START, LOCAL_IP};
pub use nvs::{Entry, Nvs, DEFAULT_CAPACITY, DEFAULT_PARTITION, MAX_KEY_LEN, SLOT_SIZE};

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{BusChannel, BusError};
use crate::error::Result;
use crate::protocol::{decode_request, encode_reply, Opcode, DUMMY_BYTE, ERR_CMD};

/// One request seen by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// Decoded opcode; `None` when the request could not be decoded
    pub opcode: Option<Opcode>,

    /// Bytes clocked during the request phase, filler included
    pub request_len: usize,
}

#[derive(Debug, Default)]
struct Faults {
    unresponsive: bool,
    corrupt_next_reply: bool,
    drop_next_reply: bool,
}

#[derive(Debug, Default)]
struct Chip {
    firmware: Firmware,
    selected: bool,
    incoming: Vec<u8>,
    clocked: usize,
    outgoing: VecDeque<u8>,
    faults: Faults,
    log: Vec<Transaction>,
    begin_calls: usize,
}

impl Chip {
    /// Chip-select released after a write phase
    fn process_request(&mut self) {
        let request = match decode_request(&self.incoming) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Simulator rejected request: {}", e);
                self.log.push(Transaction {
                    opcode: None,
                    request_len: self.clocked,
                });
                self.outgoing = VecDeque::from(vec![ERR_CMD]);
                return;
            }
        };

        self.log.push(Transaction {
            opcode: Some(request.opcode),
            request_len: self.clocked,
        });

        let params = self.firmware.handle(&request);
        if std::mem::take(&mut self.faults.drop_next_reply) {
            tracing::debug!("Dropping reply to {:?}", request.opcode);
            self.outgoing.clear();
            return;
        }

        let refs: Vec<&[u8]> = params.iter().map(Vec::as_slice).collect();
        let mut reply = encode_reply(request.opcode, &refs);
        if std::mem::take(&mut self.faults.corrupt_next_reply) {
            tracing::debug!("Corrupting reply to {:?}", request.opcode);
            reply[1] ^= 0x01;
        }
        self.outgoing = VecDeque::from(reply);
    }
}

/// Simulated co-processor
///
/// Clones share the same chip, so a test can keep one clone for inspection
/// while the driver owns another as its bus.
#[derive(Debug, Clone, Default)]
pub struct Coprocessor {
    chip: Arc<Mutex<Chip>>,
}

impl Coprocessor {
    /// Fresh co-processor with empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Co-processor running the given firmware state
    pub fn with_firmware(firmware: Firmware) -> Self {
        let chip = Chip {
            firmware,
            ..Chip::default()
        };
        Self {
            chip: Arc::new(Mutex::new(chip)),
        }
    }

    /// Run `f` against the firmware state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut Firmware) -> R) -> R {
        f(&mut self.chip.lock().firmware)
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Make every readiness wait fail (or stop doing so)
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.chip.lock().faults.unresponsive = unresponsive;
    }

    /// Answer the next request with a wrong echoed opcode
    pub fn corrupt_next_reply(&self) {
        self.chip.lock().faults.corrupt_next_reply = true;
    }

    /// Execute the next request but never answer it
    pub fn drop_next_reply(&self) {
        self.chip.lock().faults.drop_next_reply = true;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Requests seen so far
    pub fn transactions(&self) -> Vec<Transaction> {
        self.chip.lock().log.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.chip.lock().log.len()
    }

    pub fn clear_log(&self) {
        self.chip.lock().log.clear();
    }

    /// Times the bus was initialized
    pub fn begin_count(&self) -> usize {
        self.chip.lock().begin_calls
    }

    /// Make `content` downloadable from `url`
    pub fn serve(&self, url: &str, content: &[u8]) {
        self.with_state(|fw| {
            fw.downloads.insert(url.to_string(), content.to_vec());
        });
    }

    /// Contents of a stored file
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.with_state(|fw| fw.files.get(name).cloned())
    }

    pub fn open_sockets(&self) -> usize {
        self.with_state(|fw| fw.network.open_count())
    }

    // =========================================================================
    // Flash Persistence
    // =========================================================================

    /// Snapshot of the non-volatile state
    pub fn image(&self) -> FlashImage {
        self.with_state(|fw| FlashImage {
            namespaces: fw.nvs.namespaces().clone(),
            nvs_capacity: fw.nvs.capacity() as u64,
            files: fw.files.clone(),
        })
    }

    /// Replace the non-volatile state (open namespaces are closed)
    pub fn restore(&self, image: FlashImage) {
        self.with_state(|fw| {
            fw.nvs = Nvs::restore(image.namespaces, image.nvs_capacity as usize);
            fw.files = image.files;
        });
    }

    pub fn save_image(&self, path: &Path) -> Result<()> {
        self.image().save(path)
    }

    pub fn load_image(&self, path: &Path) -> Result<()> {
        let image = FlashImage::load(path)?;
        tracing::debug!(
            "Loaded flash image from {:?}: {} namespaces, {} files",
            path,
            image.namespaces.len(),
            image.files.len()
        );
        self.restore(image);
        Ok(())
    }
}

impl BusChannel for Coprocessor {
    fn begin(&mut self) -> std::result::Result<(), BusError> {
        self.chip.lock().begin_calls += 1;
        Ok(())
    }

    fn wait_ready(&mut self) -> std::result::Result<(), BusError> {
        if self.chip.lock().faults.unresponsive {
            return Err(BusError::NotReady);
        }
        Ok(())
    }

    fn select(&mut self) {
        let mut chip = self.chip.lock();
        chip.selected = true;
        chip.incoming.clear();
        chip.clocked = 0;
    }

    fn deselect(&mut self) {
        let mut chip = self.chip.lock();
        chip.selected = false;
        if chip.incoming.is_empty() {
            chip.outgoing.clear();
        } else {
            chip.process_request();
            chip.incoming.clear();
        }
    }

    fn write_byte(&mut self, byte: u8) -> std::result::Result<(), BusError> {
        let mut chip = self.chip.lock();
        if !chip.selected {
            return Err(BusError::Transfer);
        }
        chip.incoming.push(byte);
        chip.clocked += 1;
        Ok(())
    }

    fn read_byte(&mut self) -> std::result::Result<u8, BusError> {
        let mut chip = self.chip.lock();
        if !chip.selected {
            return Err(BusError::Transfer);
        }
        chip.clocked += 1;
        Ok(chip.outgoing.pop_front().unwrap_or(DUMMY_BYTE))
    }
}
