//! Flash image persistence for the simulated co-processor
//!
//! Saves the non-volatile parts of the simulator (preference namespaces and
//! the file store) so state survives between runs.
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header                                 │
//! │ ┌──────────┬──────────┬──────────────┐ │
//! │ │Magic (4) │Version(2)│ Payload Len  │ │
//! │ └──────────┴──────────┴──────────────┘ │
//! │ ┌──────────────────────────────────┐   │
//! │ │ CRC32 of payload (4)             │   │
//! │ └──────────────────────────────────┘   │
//! ├────────────────────────────────────────┤
//! │ Payload (bincode)                      │
//! └────────────────────────────────────────┘
//! ```
//! All header integers are little-endian.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

use super::nvs::Entry;

/// Magic bytes identifying a flash image
pub(crate) const MAGIC: &[u8; 4] = b"NINA";

/// Current image format version
pub(crate) const VERSION: u16 = 1;

/// Header: magic (4) + version (2) + payload length (4) + crc (4)
pub(crate) const HEADER_SIZE: usize = 14;

/// Persisted simulator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashImage {
    /// Preference namespaces: namespace → key → entry
    pub namespaces: BTreeMap<String, BTreeMap<String, Entry>>,

    /// NVS slot capacity
    pub nvs_capacity: u64,

    /// File store contents
    pub files: BTreeMap<String, Vec<u8>>,
}

impl FlashImage {
    /// Serialize with header and checksum
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| LinkError::Serialization(e.to_string()))?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| LinkError::Serialization("flash image too large".to_string()))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Validate header and checksum, then deserialize
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(LinkError::Corruption(format!(
                "image too short: {} bytes",
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC {
            return Err(LinkError::Corruption(format!(
                "Invalid flash image magic: expected NINA, got {:?}",
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(LinkError::Corruption(format!(
                "Unsupported flash image version: {}",
                version
            )));
        }

        let payload_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let stored_crc = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + payload_len)
            .ok_or_else(|| {
                LinkError::Corruption(format!(
                    "payload truncated: expected {} bytes, got {}",
                    payload_len,
                    bytes.len() - HEADER_SIZE
                ))
            })?;

        let computed_crc = crc32fast::hash(payload);
        if computed_crc != stored_crc {
            return Err(LinkError::Corruption(format!(
                "CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed_crc
            )));
        }

        bincode::deserialize(payload).map_err(|e| LinkError::Serialization(e.to_string()))
    }

    /// Write the image to `path`, replacing any previous one
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        let tmp = path.with_extension("tmp");

        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;

        tracing::debug!("Saved flash image to {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Read an image from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }
}
