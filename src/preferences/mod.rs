//! Preferences Module
//!
//! Typed key-value store kept in the co-processor's non-volatile storage,
//! scoped to one namespace opened with [`Preferences::begin`].
//!
//! ## Value Encoding
//! - Scalars: little-endian bytes of the exact width, tagged with their type
//! - `bool`: stored as `U8`
//! - `f32`/`f64`: stored as `Blob` of the exact width
//! - Strings: bytes up to the first NUL plus a terminating NUL, tagged `Str`
//! - Byte blobs: raw bytes, embedded zeros preserved, tagged `Blob`
//!
//! ## Absent Keys
//! Getters first ask for the key's type. When it reports no entry the
//! caller's default is returned without fetching anything, and the error
//! slot keeps whatever the previous operation left in it.

mod value;

pub use value::{PrefValue, PreferenceType};

use crate::bus::BusChannel;
use crate::driver::Driver;
use crate::error::Result;
use crate::protocol::{Opcode, OutParam};
use crate::transport::Transport;

/// Client for one preferences namespace
pub struct Preferences<B: BusChannel> {
    driver: Driver<B>,
    namespace: Option<String>,
}

impl<B: BusChannel> Preferences<B> {
    pub fn new(driver: &Driver<B>) -> Self {
        Self {
            driver: driver.clone(),
            namespace: None,
        }
    }

    // =========================================================================
    // Namespace Lifecycle
    // =========================================================================

    /// Open `namespace`, optionally on a named partition
    ///
    /// Returns whether the co-processor opened it.
    pub fn begin(
        &mut self,
        namespace: &str,
        read_only: bool,
        partition: Option<&str>,
    ) -> Result<bool> {
        let opened = self.driver.transaction(|t| -> Result<bool> {
            let mut ok = [0u8; 1];
            let mut outs = [OutParam::new(&mut ok)];
            let flag = [u8::from(read_only)];
            match partition {
                Some(label) => t.execute(
                    Opcode::PrefBegin,
                    &[namespace.as_bytes(), &flag, label.as_bytes()],
                    &mut outs,
                )?,
                None => t.execute(Opcode::PrefBegin, &[namespace.as_bytes(), &flag], &mut outs)?,
            }
            t.mark_success();
            Ok(outs[0].data().first().copied().unwrap_or(0) != 0)
        })?;

        if opened {
            tracing::debug!(
                "Opened preferences namespace {:?} (read_only={})",
                namespace,
                read_only
            );
            self.namespace = Some(namespace.to_string());
        }
        Ok(opened)
    }

    /// Close the namespace; does nothing when none is open
    pub fn end(&mut self) {
        let Some(namespace) = self.namespace.take() else {
            return;
        };

        let result: Result<()> = self.driver.transaction(|t| {
            let mut ack = [0u8; 1];
            let mut outs = [OutParam::new(&mut ack)];
            t.execute(Opcode::PrefEnd, &[], &mut outs)?;
            t.mark_success();
            Ok(())
        });
        match result {
            Ok(()) => tracing::debug!("Closed preferences namespace {:?}", namespace),
            Err(e) => {
                tracing::debug!("Closing preferences namespace {:?} failed: {}", namespace, e)
            }
        }
    }

    /// Name of the open namespace
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    // =========================================================================
    // Entry Management
    // =========================================================================

    /// Remove every entry in the namespace
    pub fn clear(&self) -> Result<bool> {
        self.driver
            .transaction(|t| flag_reply(t, Opcode::PrefClear, &[]))
    }

    /// Remove one entry; `false` when there was none
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.driver
            .transaction(|t| flag_reply(t, Opcode::PrefRemove, &[key.as_bytes()]))
    }

    pub fn get_type(&self, key: &str) -> Result<PreferenceType> {
        self.driver.transaction(|t| type_of(t, key))
    }

    pub fn is_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_type(key)?.exists())
    }

    /// Stored length of a string (including its NUL) or blob
    pub fn bytes_length(&self, key: &str) -> Result<usize> {
        self.driver.transaction(|t| bytes_length_in(t, key))
    }

    /// Remaining entry capacity of the backing store
    pub fn free_entries(&self) -> Result<usize> {
        self.driver
            .transaction(|t| u32_reply(t, Opcode::PrefStat, &[]).map(|n| n as usize))
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    /// Store a fixed-width value; returns the bytes written
    pub fn put<T: PrefValue>(&self, key: &str, value: T) -> Result<usize> {
        self.put_tagged(key, T::TYPE, &value.to_bytes())
    }

    /// Fetch a fixed-width value, or `default` when the key is absent
    pub fn get<T: PrefValue>(&self, key: &str, default: T) -> Result<T> {
        self.driver.transaction(|t| {
            let before = t.error_slot();
            if !type_of(t, key)?.exists() {
                t.restore_error_slot(before);
                return Ok(default);
            }

            let mut scratch = vec![0u8; T::SIZE];
            fetch(t, key, T::TYPE, &mut scratch)?;
            Ok(T::from_bytes(&scratch))
        })
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// Store a string; content after an embedded NUL is not stored
    ///
    /// Returns what the co-processor reports written (the string length,
    /// without the terminator).
    pub fn put_str(&self, key: &str, value: &str) -> Result<usize> {
        let bytes = value.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

        let mut image = Vec::with_capacity(end + 1);
        image.extend_from_slice(&bytes[..end]);
        image.push(0);
        self.put_tagged(key, PreferenceType::Str, &image)
    }

    /// Fetch a string, or `default` when the key is absent
    pub fn get_string(&self, key: &str, default: &str) -> Result<String> {
        self.driver.transaction(|t| {
            let before = t.error_slot();
            if !type_of(t, key)?.exists() {
                t.restore_error_slot(before);
                return Ok(default.to_string());
            }

            let len = bytes_length_in(t, key)?;
            let mut buf = vec![0u8; len + 1];
            fetch(t, key, PreferenceType::Str, &mut buf)?;
            buf[len] = 0;

            let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
            Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
        })
    }

    /// Fetch a string's raw bytes into `buf`; returns the bytes received
    ///
    /// No terminator is added: size `buf` from [`Self::bytes_length`].
    pub fn get_str_into(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        self.driver
            .transaction(|t| fetch(t, key, PreferenceType::Str, buf))
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    /// Store raw bytes
    pub fn put_bytes(&self, key: &str, value: &[u8]) -> Result<usize> {
        self.put_tagged(key, PreferenceType::Blob, value)
    }

    /// Fetch raw bytes into `buf`; returns the bytes received
    pub fn get_bytes(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        self.driver
            .transaction(|t| fetch(t, key, PreferenceType::Blob, buf))
    }

    fn put_tagged(&self, key: &str, ty: PreferenceType, image: &[u8]) -> Result<usize> {
        self.driver.transaction(|t| {
            u32_reply(t, Opcode::PrefPut, &[key.as_bytes(), &[ty as u8], image]).map(|n| n as usize)
        })
    }
}

impl<B: BusChannel> Drop for Preferences<B> {
    fn drop(&mut self) {
        self.end();
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn type_of<B: BusChannel>(t: &mut Transport<B>, key: &str) -> Result<PreferenceType> {
    let mut tag = [PreferenceType::Invalid as u8; 1];
    let mut outs = [OutParam::new(&mut tag)];
    t.execute(Opcode::PrefGetType, &[key.as_bytes()], &mut outs)?;
    t.mark_success();

    let raw = outs[0]
        .data()
        .first()
        .copied()
        .unwrap_or(PreferenceType::Invalid as u8);
    Ok(PreferenceType::from_u8(raw))
}

fn bytes_length_in<B: BusChannel>(t: &mut Transport<B>, key: &str) -> Result<usize> {
    u32_reply(t, Opcode::PrefLen, &[key.as_bytes()]).map(|n| n as usize)
}

/// Typed fetch into `buf`; returns the bytes received
fn fetch<B: BusChannel>(
    t: &mut Transport<B>,
    key: &str,
    ty: PreferenceType,
    buf: &mut [u8],
) -> Result<usize> {
    let mut outs = [OutParam::new(buf)];
    t.execute(Opcode::PrefGet, &[key.as_bytes(), &[ty as u8]], &mut outs)?;
    t.mark_success();
    Ok(outs[0].len())
}

fn u32_reply<B: BusChannel>(t: &mut Transport<B>, opcode: Opcode, args: &[&[u8]]) -> Result<u32> {
    let mut value = [0u8; 4];
    let mut outs = [OutParam::new(&mut value)];
    t.execute(opcode, args, &mut outs)?;
    t.mark_success();

    let mut raw = [0u8; 4];
    let data = outs[0].data();
    raw[..data.len()].copy_from_slice(data);
    Ok(u32::from_le_bytes(raw))
}

fn flag_reply<B: BusChannel>(t: &mut Transport<B>, opcode: Opcode, args: &[&[u8]]) -> Result<bool> {
    let mut ok = [0u8; 1];
    let mut outs = [OutParam::new(&mut ok)];
    t.execute(opcode, args, &mut outs)?;
    t.mark_success();
    Ok(outs[0].data().first().copied().unwrap_or(0) != 0)
}
