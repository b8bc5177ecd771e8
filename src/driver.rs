//! Driver Module
//!
//! The shared entry point that hands out socket, preference and storage
//! clients bound to one co-processor.
//!
//! ## Responsibilities
//! - Own the [`Transport`] for one bus
//! - Serialize transactions between all clients
//! - Expose the shared last-error slot

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::BusChannel;
use crate::config::Config;
use crate::error::Result;
use crate::preferences::Preferences;
use crate::socket::{Protocol, Socket, Type};
use crate::storage::Storage;
use crate::transport::Transport;

/// Cloneable handle to one co-processor
///
/// ## Concurrency Model: One Transaction In Flight
///
/// - Every client operation locks the transport once and runs its complete
///   transaction sequence (including a follow-up errno query) under the lock
/// - The two bus phases of a transaction can never interleave with another
///   transaction, even when clones are used from several threads
/// - Ordering *between* operations is the caller's business: `last_error()`
///   reflects whichever operation ran last on this co-processor
pub struct Driver<B: BusChannel> {
    inner: Arc<Mutex<Transport<B>>>,
}

impl<B: BusChannel> Clone for Driver<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BusChannel> Driver<B> {
    /// Create a driver over `bus`; the bus is initialized on first use
    pub fn new(bus: B, config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Transport::new(bus, config))),
        }
    }

    /// Create a driver with default config
    pub fn with_defaults(bus: B) -> Self {
        Self::new(bus, Config::default())
    }

    /// Run `f` with exclusive access to the transport
    pub fn transaction<R>(&self, f: impl FnOnce(&mut Transport<B>) -> R) -> R {
        let mut transport = self.inner.lock();
        f(&mut transport)
    }

    /// Outcome code of the most recent operation
    ///
    /// `0` on success, [`crate::FAILURE`] on a transport failure, otherwise
    /// the errno reported by the co-processor.
    pub fn last_error(&self) -> u8 {
        self.transaction(|t| t.last_error())
    }

    /// Re-initialize the bus (e.g. after resetting the co-processor)
    pub fn reinitialize(&self) -> Result<()> {
        self.transaction(|t| t.reinitialize())
    }

    /// Open a socket
    pub fn socket(&self, ty: Type, proto: Protocol) -> Result<Socket<B>> {
        Socket::open(self, ty, proto)
    }

    /// Create a preferences client (no namespace open yet)
    pub fn preferences(&self) -> Preferences<B> {
        Preferences::new(self)
    }

    /// Create a storage client
    pub fn storage(&self) -> Storage<B> {
        Storage::new(self)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get a copy of the configuration
    pub fn config(&self) -> Config {
        self.transaction(|t| t.config().clone())
    }
}
