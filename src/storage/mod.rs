//! Storage Module
//!
//! Named blobs in the co-processor's filesystem.
//!
//! ## Responsibilities
//! - Existence/size probes, reads and writes at an offset, removal
//! - Fetching a URL straight into a file on the co-processor
//! - A client-side cursor wrapper ([`StorageFile`]) for sequential access
//!
//! The remote side keeps no handles: every request names the file and
//! carries an explicit offset and length.
//!
//! ## Request Layout
//! ```text
//! ┌───────────────┬───────────────┬──────────┬─────────────────────┐
//! │ Offset (u32)  │ Length (u32)  │ Name     │ Data (write only)   │
//! └───────────────┴───────────────┴──────────┴─────────────────────┘
//! ```
//! Offsets and lengths are little-endian.

mod file;

pub use file::StorageFile;

use crate::bus::BusChannel;
use crate::driver::Driver;
use crate::error::{LinkError, Result};
use crate::protocol::{Opcode, OutParam};
use crate::transport::Transport;

/// Length reported for a file that does not exist
const ABSENT: i32 = -1;

/// Client for the co-processor's file store
pub struct Storage<B: BusChannel> {
    driver: Driver<B>,
}

impl<B: BusChannel> Clone for Storage<B> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
        }
    }
}

impl<B: BusChannel> Storage<B> {
    pub fn new(driver: &Driver<B>) -> Self {
        Self {
            driver: driver.clone(),
        }
    }

    /// Length of `name`, or `None` when it does not exist
    pub fn exists(&self, name: &str) -> Result<Option<usize>> {
        self.driver.transaction(|t| {
            let mut raw = ABSENT.to_le_bytes();
            let mut outs = [OutParam::new(&mut raw)];
            t.execute(
                Opcode::FileExists,
                &[&0u32.to_le_bytes(), &4u32.to_le_bytes(), name.as_bytes()],
                &mut outs,
            )?;
            t.mark_success();

            let data = outs[0].data();
            if data.len() < 4 {
                return Ok(None);
            }
            let len = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok(usize::try_from(len).ok())
        })
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.driver.transaction(|t| {
            let mut ack = [0u8; 1];
            let mut outs = [OutParam::new(&mut ack)];
            t.execute(
                Opcode::FileDelete,
                &[&0u32.to_le_bytes(), &0u32.to_le_bytes(), name.as_bytes()],
                &mut outs,
            )?;
            t.mark_success();
            Ok(())
        })
    }

    /// Read from `offset` into `buf`
    ///
    /// Large reads are split into transfers of at most `max_transfer` bytes.
    /// Stops early when the co-processor returns less than asked for.
    /// Returns the bytes read.
    pub fn read(&self, name: &str, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.driver.transaction(|t| {
            let chunk_size = t.config().transfer_cap();
            let mut total = 0;

            while total < buf.len() {
                let want = (buf.len() - total).min(chunk_size);
                let at = wire_u32(t, offset + total, "offset")?;
                let len = wire_u32(t, want, "length")?;

                let mut outs = [OutParam::new(&mut buf[total..total + want])];
                t.execute(
                    Opcode::FileRead,
                    &[&at.to_le_bytes(), &len.to_le_bytes(), name.as_bytes()],
                    &mut outs,
                )?;
                t.mark_success();

                let got = outs[0].len();
                total += got;
                if got < want {
                    break;
                }
            }

            if buf.len() > chunk_size {
                tracing::debug!("Read {} bytes of {:?} in chunks of {}", total, name, chunk_size);
            }
            Ok(total)
        })
    }

    /// Write `data` at `offset`, creating or extending the file
    pub fn write(&self, name: &str, offset: usize, data: &[u8]) -> Result<()> {
        self.driver.transaction(|t| {
            let chunk_size = t.config().transfer_cap();

            for (index, chunk) in data.chunks(chunk_size).enumerate() {
                let at = wire_u32(t, offset + index * chunk_size, "offset")?;
                let len = wire_u32(t, chunk.len(), "length")?;

                let mut ack = [0u8; 1];
                let mut outs = [OutParam::new(&mut ack)];
                t.execute(
                    Opcode::FileWrite,
                    &[&at.to_le_bytes(), &len.to_le_bytes(), name.as_bytes(), chunk],
                    &mut outs,
                )?;
                t.mark_success();
            }

            if data.len() > chunk_size {
                tracing::debug!(
                    "Wrote {} bytes of {:?} in chunks of {}",
                    data.len(),
                    name,
                    chunk_size
                );
            }
            Ok(())
        })
    }

    /// Have the co-processor download `url` into `name`
    ///
    /// Returns whether the download succeeded.
    pub fn download(&self, url: &str, name: &str) -> Result<bool> {
        let ok = self.driver.transaction(|t| -> Result<bool> {
            let mut ok = [0u8; 1];
            let mut outs = [OutParam::new(&mut ok)];
            t.execute(Opcode::FileDownload, &[url.as_bytes(), name.as_bytes()], &mut outs)?;
            t.mark_success();
            Ok(outs[0].data().first().copied().unwrap_or(0) != 0)
        })?;

        let outcome = if ok { "ok" } else { "failed" };
        tracing::debug!("Download of {} into {:?}: {}", url, name, outcome);
        Ok(ok)
    }

    /// A cursor over `name`, with its size already probed
    pub fn open(&self, name: &str) -> Result<StorageFile<B>> {
        let mut file = StorageFile::new(self.clone(), name);
        file.size()?;
        Ok(file)
    }
}

/// Offsets and lengths travel as 32-bit values
fn wire_u32<B: BusChannel>(t: &mut Transport<B>, value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        t.fail_local(LinkError::InvalidArgument(format!(
            "{} {} does not fit in 32 bits",
            what, value
        )))
    })
}
