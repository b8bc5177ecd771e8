//! Cursor over one stored file
//!
//! The cursor and the cached length live only on this side. The cached
//! length is refreshed by [`StorageFile::exists`], [`StorageFile::size`]
//! and [`StorageFile::available`]; reads clamp against whatever was cached
//! last, which may be stale if someone else changed the file since.

use crate::bus::BusChannel;
use crate::error::Result;

use super::Storage;

/// Sequential access to a named file
pub struct StorageFile<B: BusChannel> {
    storage: Storage<B>,
    name: String,
    offset: usize,
    length: usize,
}

impl<B: BusChannel> StorageFile<B> {
    pub(crate) fn new(storage: Storage<B>, name: &str) -> Self {
        Self {
            storage,
            name: name.to_string(),
            offset: 0,
            length: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Probe the file, refreshing the cached length
    pub fn exists(&mut self) -> Result<bool> {
        let probed = self.storage.exists(&self.name)?;
        self.length = probed.unwrap_or(0);
        Ok(probed.is_some())
    }

    /// Read from the cursor, clamped to the cached length
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.offset >= self.length {
            return Ok(0);
        }
        let want = buf.len().min(self.length - self.offset);

        let got = self.storage.read(&self.name, self.offset, &mut buf[..want])?;
        self.offset += got;
        Ok(got)
    }

    /// Write at the cursor; the cursor always advances by `data.len()`
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let result = self.storage.write(&self.name, self.offset, data);
        self.offset += data.len();
        result.map(|_| data.len())
    }

    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    /// Current length (0 when the file does not exist)
    pub fn size(&mut self) -> Result<usize> {
        self.exists()?;
        Ok(self.length)
    }

    /// Bytes between the cursor and the end of the file
    pub fn available(&mut self) -> Result<usize> {
        self.exists()?;
        Ok(self.length.saturating_sub(self.offset))
    }

    /// Length as of the last probe, without a round trip
    pub fn cached_len(&self) -> usize {
        self.length
    }

    /// Remove the file and rewind
    pub fn erase(&mut self) -> Result<()> {
        self.offset = 0;
        self.storage.remove(&self.name)
    }

    /// Rewind; nothing is held open remotely
    pub fn close(&mut self) {
        self.offset = 0;
    }
}
