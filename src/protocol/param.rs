//! Parameter definitions
//!
//! Request parameters are borrowed byte slices tagged with their length
//! width; reply parameters are caller-provided buffers with a fixed capacity.

use crate::config::MAX_BUFFER_PARAM;

/// Width of a parameter's length prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamWidth {
    /// 1-byte length, payload up to 255 bytes
    Short,
    /// 2-byte big-endian length, payload up to [`MAX_BUFFER_PARAM`] bytes
    Buffer,
}

impl ParamWidth {
    /// Bytes taken by the length prefix
    pub fn prefix_len(self) -> usize {
        match self {
            ParamWidth::Short => 1,
            ParamWidth::Buffer => 2,
        }
    }

    /// Largest payload this width may carry
    pub fn max_payload(self) -> usize {
        match self {
            ParamWidth::Short => u8::MAX as usize,
            ParamWidth::Buffer => MAX_BUFFER_PARAM,
        }
    }
}

/// One request parameter
#[derive(Debug, Clone, Copy)]
pub struct Param<'a> {
    pub width: ParamWidth,
    pub data: &'a [u8],
}

impl<'a> Param<'a> {
    pub fn new(width: ParamWidth, data: &'a [u8]) -> Self {
        Self { width, data }
    }

    pub fn short(data: &'a [u8]) -> Self {
        Self::new(ParamWidth::Short, data)
    }

    pub fn buffer(data: &'a [u8]) -> Self {
        Self::new(ParamWidth::Buffer, data)
    }

    /// Bytes this parameter occupies on the wire (prefix + payload)
    pub fn encoded_len(&self) -> usize {
        self.width.prefix_len() + self.data.len()
    }
}

/// One reply parameter: a fixed-capacity destination plus the length received
#[derive(Debug)]
pub struct OutParam<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> OutParam<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Capacity declared by the caller
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes stored by the last decode (never above capacity)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The stored bytes
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        self.buf
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }
}
