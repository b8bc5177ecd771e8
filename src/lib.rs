//! # ninalink
//!
//! Host-side driver for a WiFi network co-processor reached over a
//! half-duplex serial bus:
//! - BSD-style sockets living on the co-processor
//! - Typed key-value preferences in its non-volatile storage
//! - Named-file storage with a client-side cursor
//! - A simulated co-processor for host testing
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐  ┌───────────────┐  ┌──────────────┐
//! │    Socket    │  │  Preferences  │  │   Storage    │
//! └──────┬───────┘  └───────┬───────┘  └──────┬───────┘
//!        └──────────────────┼─────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                 Driver (Arc<Mutex>)                 │
//! │          one transaction in flight at a time        │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │       Transport (framing, two bus phases,           │
//! │                  last-error slot)                   │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//!                  ┌────────▼────────┐
//!                  │   BusChannel    │
//!                  │ (board or sim)  │
//!                  └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ninalink::sim::Coprocessor;
//! use ninalink::{Config, Driver};
//!
//! let driver = Driver::new(Coprocessor::new(), Config::default());
//! let mut prefs = driver.preferences();
//! prefs.begin("app", false, None).unwrap();
//! prefs.put("boots", 3u32).unwrap();
//! assert_eq!(prefs.get("boots", 0u32).unwrap(), 3);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod bus;
pub mod protocol;
pub mod transport;
pub mod driver;

pub mod socket;
pub mod preferences;
pub mod storage;

pub mod sim;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{errno, LinkError, Result, FAILURE};
pub use config::{Config, ConfigBuilder};
pub use bus::{BusChannel, BusError};
pub use driver::Driver;
pub use socket::{Handle, Protocol, Socket, SocketOption, State, TimeVal, Type};
pub use preferences::{PrefValue, PreferenceType, Preferences};
pub use storage::{Storage, StorageFile};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ninalink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
