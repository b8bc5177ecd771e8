//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────┬──────────┬─────────┐
//! │START (1) │ Cmd (1)  │ N (1)    │ N x [Len (1|2)][Data]│ END (1)  │ filler  │
//! └──────────┴──────────┴──────────┴──────────────────────┴──────────┴─────────┘
//! ```
//! Filler bytes are clocked (read and discarded) until the request is a
//! multiple of 4 bytes long.
//!
//! ### Reply Format
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────────────┬──────────┐
//! │START (1) │Cmd|0x80  │ N (1)    │ N x [Len (1|2)][Data]   │ END (1)  │
//! └──────────┴──────────┴──────────┴─────────────────────────┴──────────┘
//! ```
//! Two-byte lengths are big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Opcode, OutParam, Param, ParamWidth};
use crate::error::{LinkError, Result};

/// Marks the beginning of every frame
pub const START_CMD: u8 = 0xE0;

/// Marks the end of every frame
pub const END_CMD: u8 = 0xEE;

/// Sent by the co-processor instead of a reply it cannot produce
pub const ERR_CMD: u8 = 0xEF;

/// Set on the echoed opcode of a reply
pub const REPLY_FLAG: u8 = 0x80;

/// Byte clocked out when only reading
pub const DUMMY_BYTE: u8 = 0xFF;

/// Request transfers are sized in multiples of this (DMA granularity)
pub const ALIGNMENT: usize = 4;

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// An encoded request ready to be clocked out
#[derive(Debug, Clone)]
pub struct RequestFrame {
    /// Bytes written during the send phase
    pub bytes: Bytes,

    /// Filler bytes to read after `bytes` to reach [`ALIGNMENT`]
    pub padding: usize,
}

impl RequestFrame {
    /// Total bytes clocked during the send phase
    pub fn total_len(&self) -> usize {
        self.bytes.len() + self.padding
    }
}

/// Filler bytes needed after `len` bytes
pub fn padding_for(len: usize) -> usize {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

/// Encode a request
///
/// Format: START + opcode + count + params + END, followed by filler
pub fn encode_request(opcode: Opcode, params: &[Param<'_>]) -> Result<RequestFrame> {
    if params.len() > u8::MAX as usize {
        return Err(LinkError::InvalidArgument(format!(
            "too many parameters: {}",
            params.len()
        )));
    }

    for param in params {
        let max = param.width.max_payload();
        if param.data.len() > max {
            return Err(LinkError::ParamTooLarge {
                len: param.data.len(),
                max,
            });
        }
    }

    let body: usize = params.iter().map(Param::encoded_len).sum();
    let mut message = BytesMut::with_capacity(4 + body);
    message.put_u8(START_CMD);
    message.put_u8(opcode as u8 & !REPLY_FLAG);
    message.put_u8(params.len() as u8);

    for param in params {
        match param.width {
            ParamWidth::Short => message.put_u8(param.data.len() as u8),
            ParamWidth::Buffer => message.put_u16(param.data.len() as u16),
        }
        message.put_slice(param.data);
    }
    message.put_u8(END_CMD);

    let padding = padding_for(message.len());
    Ok(RequestFrame {
        bytes: message.freeze(),
        padding,
    })
}

/// A request as seen by the co-processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub params: Vec<Vec<u8>>,
}

/// Decode a request from the bytes written during a send phase
///
/// Parameter widths are taken from the opcode, as the firmware does.
/// Trailing filler after END is ignored.
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    if bytes.len() < 4 {
        return Err(LinkError::Protocol(format!(
            "Incomplete request: expected at least 4 bytes, got {}",
            bytes.len()
        )));
    }

    if bytes[0] != START_CMD {
        return Err(LinkError::Protocol(format!(
            "Missing start marker: got 0x{:02x}",
            bytes[0]
        )));
    }

    let opcode = Opcode::from_u8(bytes[1]).ok_or_else(|| {
        LinkError::Protocol(format!("Unknown command type: 0x{:02x}", bytes[1]))
    })?;
    let count = bytes[2] as usize;
    let width = opcode.request_width();

    let mut pos = 3;
    let mut params = Vec::with_capacity(count);
    for index in 0..count {
        let len = match width {
            ParamWidth::Short => {
                let len = *bytes.get(pos).ok_or_else(|| truncated(opcode, index))? as usize;
                pos += 1;
                len
            }
            ParamWidth::Buffer => {
                let hi = *bytes.get(pos).ok_or_else(|| truncated(opcode, index))?;
                let lo = *bytes.get(pos + 1).ok_or_else(|| truncated(opcode, index))?;
                pos += 2;
                u16::from_be_bytes([hi, lo]) as usize
            }
        };

        let data = bytes
            .get(pos..pos + len)
            .ok_or_else(|| truncated(opcode, index))?;
        params.push(data.to_vec());
        pos += len;
    }

    match bytes.get(pos) {
        Some(&END_CMD) => Ok(Request { opcode, params }),
        Some(other) => Err(LinkError::Protocol(format!(
            "{:?}: expected end marker, got 0x{:02x}",
            opcode, other
        ))),
        None => Err(LinkError::Protocol(format!(
            "{:?}: missing end marker",
            opcode
        ))),
    }
}

fn truncated(opcode: Opcode, index: usize) -> LinkError {
    LinkError::Protocol(format!("{:?}: parameter {} truncated", opcode, index))
}

// =============================================================================
// Reply Encoding/Decoding
// =============================================================================

/// Encode a reply
///
/// Format: START + (opcode | REPLY_FLAG) + count + params + END.
/// Payloads longer than the reply width allows are truncated.
pub fn encode_reply(opcode: Opcode, params: &[&[u8]]) -> Vec<u8> {
    let width = opcode.reply_width();
    let mut message = Vec::with_capacity(
        4 + params
            .iter()
            .map(|p| width.prefix_len() + p.len())
            .sum::<usize>(),
    );
    message.push(START_CMD);
    message.push(opcode as u8 | REPLY_FLAG);
    message.push(params.len() as u8);

    for param in params {
        let data = &param[..param.len().min(width.max_payload())];
        match width {
            ParamWidth::Short => message.push(data.len() as u8),
            ParamWidth::Buffer => message.extend_from_slice(&(data.len() as u16).to_be_bytes()),
        }
        message.extend_from_slice(data);
    }
    message.push(END_CMD);

    message
}

/// Read a reply from a byte source
///
/// Clocks up to `attempts` bytes waiting for START, then validates the echoed
/// opcode and parameter count and fills `outs` in order. Payload bytes beyond
/// an out-parameter's capacity are drained and dropped.
pub fn read_reply<F>(
    mut next: F,
    opcode: Opcode,
    outs: &mut [OutParam<'_>],
    attempts: usize,
) -> Result<()>
where
    F: FnMut() -> Result<u8>,
{
    // Wait for the start marker
    let mut started = false;
    for _ in 0..attempts.max(1) {
        match next()? {
            START_CMD => {
                started = true;
                break;
            }
            ERR_CMD => return Err(LinkError::ErrorReply),
            _ => {}
        }
    }
    if !started {
        return Err(LinkError::NoReply);
    }

    let expected = opcode as u8 | REPLY_FLAG;
    let received = next()?;
    if received != expected {
        return Err(LinkError::Desync { expected, received });
    }

    let count = next()?;
    if count as usize != outs.len() {
        return Err(LinkError::ParamCount {
            expected: outs.len() as u8,
            received: count,
        });
    }

    let width = opcode.reply_width();
    for out in outs.iter_mut() {
        let len = match width {
            ParamWidth::Short => next()? as usize,
            ParamWidth::Buffer => {
                let hi = next()?;
                let lo = next()?;
                u16::from_be_bytes([hi, lo]) as usize
            }
        };

        let buf = out.buf_mut();
        let keep = len.min(buf.len());
        for slot in buf.iter_mut().take(keep) {
            *slot = next()?;
        }
        for _ in keep..len {
            next()?;
        }
        if keep < len {
            tracing::warn!(
                "{:?}: reply parameter truncated from {} to {} bytes",
                opcode,
                len,
                keep
            );
        }
        out.set_len(keep);
    }

    let end = next()?;
    if end != END_CMD {
        tracing::warn!("{:?}: reply missing end marker (got 0x{:02x})", opcode, end);
    }

    Ok(())
}

/// Decode a complete reply held in memory
///
/// Reading past the end behaves like an idle bus (dummy bytes).
pub fn decode_reply(bytes: &[u8], opcode: Opcode, outs: &mut [OutParam<'_>]) -> Result<()> {
    let mut iter = bytes.iter().copied();
    read_reply(
        || Ok(iter.next().unwrap_or(DUMMY_BYTE)),
        opcode,
        outs,
        bytes.len() + 1,
    )
}
