//! Simulated non-volatile preference storage
//!
//! Entries live in namespaces and occupy 32-byte slots like the ESP-IDF
//! NVS layout: one header slot per entry plus data slots for strings and
//! blobs. Keys and namespace names are at most 15 bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::preferences::PreferenceType;

/// Longest key or namespace name
pub const MAX_KEY_LEN: usize = 15;

/// Size of one storage slot
pub const SLOT_SIZE: usize = 32;

/// Default slot count
pub const DEFAULT_CAPACITY: usize = 504;

/// Partition label accepted by `begin`
pub const DEFAULT_PARTITION: &str = "nvs";

/// One stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub tag: u8,
    pub data: Vec<u8>,
}

impl Entry {
    fn slots(&self) -> usize {
        match PreferenceType::from_u8(self.tag) {
            PreferenceType::Str | PreferenceType::Blob => 1 + self.data.len().div_ceil(SLOT_SIZE),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenNamespace {
    name: String,
    read_only: bool,
}

/// Namespaced key-value store
#[derive(Debug, Clone)]
pub struct Nvs {
    namespaces: BTreeMap<String, BTreeMap<String, Entry>>,
    capacity: usize,
    open: Option<OpenNamespace>,
}

impl Default for Nvs {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Nvs {
    pub fn new(capacity: usize) -> Self {
        Self {
            namespaces: BTreeMap::new(),
            capacity,
            open: None,
        }
    }

    /// Rebuild from persisted namespaces
    pub fn restore(namespaces: BTreeMap<String, BTreeMap<String, Entry>>, capacity: usize) -> Self {
        Self {
            namespaces,
            capacity,
            open: None,
        }
    }

    pub fn namespaces(&self) -> &BTreeMap<String, BTreeMap<String, Entry>> {
        &self.namespaces
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn used_slots(&self) -> usize {
        self.namespaces
            .values()
            .flat_map(|entries| entries.values())
            .map(Entry::slots)
            .sum()
    }

    // -------------------------------------------------------------------------
    // Namespace Lifecycle
    // -------------------------------------------------------------------------

    pub fn begin(&mut self, name: &str, read_only: bool, partition: Option<&str>) -> bool {
        if name.is_empty() || name.len() > MAX_KEY_LEN {
            return false;
        }
        if partition.is_some_and(|label| label != DEFAULT_PARTITION) {
            return false;
        }
        if read_only && !self.namespaces.contains_key(name) {
            return false;
        }

        self.namespaces.entry(name.to_string()).or_default();
        self.open = Some(OpenNamespace {
            name: name.to_string(),
            read_only,
        });
        true
    }

    pub fn end(&mut self) {
        self.open = None;
    }

    fn entries(&self) -> Option<&BTreeMap<String, Entry>> {
        let open = self.open.as_ref()?;
        self.namespaces.get(&open.name)
    }

    fn entries_mut(&mut self) -> Option<&mut BTreeMap<String, Entry>> {
        let open = self.open.as_ref()?;
        if open.read_only {
            return None;
        }
        self.namespaces.get_mut(&open.name)
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    pub fn clear(&mut self) -> bool {
        match self.entries_mut() {
            Some(entries) => {
                entries.clear();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries_mut()
            .is_some_and(|entries| entries.remove(key).is_some())
    }

    pub fn type_of(&self, key: &str) -> PreferenceType {
        self.entries()
            .and_then(|entries| entries.get(key))
            .map(|entry| PreferenceType::from_u8(entry.tag))
            .unwrap_or(PreferenceType::Invalid)
    }

    /// Stored size of a string or blob; 0 for scalars and absent keys
    pub fn bytes_len(&self, key: &str) -> usize {
        match self.entries().and_then(|entries| entries.get(key)) {
            Some(entry) if PreferenceType::from_u8(entry.tag).fixed_width().is_none() => {
                entry.data.len()
            }
            _ => 0,
        }
    }

    /// Free slots
    pub fn free_entries(&self) -> usize {
        self.capacity.saturating_sub(self.used_slots())
    }

    /// Store a value; returns the byte count reported back (0 on failure)
    pub fn put(&mut self, key: &str, tag: u8, data: &[u8]) -> usize {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return 0;
        }
        let ty = PreferenceType::from_u8(tag);
        match ty {
            PreferenceType::Invalid => return 0,
            PreferenceType::Str if data.last() != Some(&0) => return 0,
            _ => {}
        }
        if ty.fixed_width().is_some_and(|width| width != data.len()) {
            return 0;
        }

        let entry = Entry {
            tag,
            data: data.to_vec(),
        };
        let replaced_slots = self
            .entries()
            .and_then(|entries| entries.get(key))
            .map(Entry::slots)
            .unwrap_or(0);
        if entry.slots() > self.free_entries() + replaced_slots {
            return 0;
        }

        match self.entries_mut() {
            Some(entries) => {
                entries.insert(key.to_string(), entry);
            }
            None => return 0,
        }

        match ty {
            PreferenceType::Str => data.len() - 1,
            _ => data.len(),
        }
    }

    /// Stored bytes when `tag` matches the entry's type
    pub fn get(&self, key: &str, tag: u8) -> Option<&[u8]> {
        self.entries()
            .and_then(|entries| entries.get(key))
            .filter(|entry| entry.tag == tag)
            .map(|entry| entry.data.as_slice())
    }
}
