//! Protocol Module
//!
//! Defines the wire protocol spoken with the co-processor.
//!
//! ## Protocol Format
//!
//! Every exchange is one request followed by one reply, each framed by
//! start/end markers:
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────┬──────────┐
//! │ 0xE0     │ Cmd (1)  │ N (1)    │ N x [Len][Data]      │ 0xEE     │ + filler to 4
//! └──────────┴──────────┴──────────┴──────────────────────┴──────────┘
//! ```
//!
//! ### Parameter Widths
//! - Short:  1-byte length, up to 255 bytes
//! - Buffer: 2-byte big-endian length, up to 4000 bytes
//!
//! Each command uses a single width for its request and a single width for
//! its reply (see [`Opcode::request_width`] / [`Opcode::reply_width`]).
//!
//! ### Reply Format
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────┬──────────┐
//! │ 0xE0     │Cmd|0x80  │ N (1)    │ N x [Len][Data]      │ 0xEE     │
//! └──────────┴──────────┴──────────┴──────────────────────┴──────────┘
//! ```
//! A lone 0xEF in place of the start marker means the co-processor failed
//! to produce a reply.

mod command;
mod param;
mod codec;

pub use command::Opcode;
pub use param::{OutParam, Param, ParamWidth};
pub use codec::{
    decode_reply, decode_request, encode_reply, encode_request, padding_for, read_reply,
    Request, RequestFrame, ALIGNMENT, DUMMY_BYTE, END_CMD, ERR_CMD, REPLY_FLAG, START_CMD,
};
