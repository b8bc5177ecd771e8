//! Socket options
//!
//! An option is described by a [`SocketOption`] value: its wire id, the
//! fixed byte width exchanged with the co-processor, and how to convert
//! between the caller's type and that byte image. New options are new
//! descriptor constants; the transport never changes.

use std::fmt;
use std::time::Duration;

use super::Type;

/// Descriptor of one socket option carrying values of type `T`
pub struct SocketOption<T> {
    name: &'static str,
    id: u32,
    width: u8,
    writable: bool,
    encode: fn(&T, &mut [u8]),
    decode: fn(&[u8]) -> T,
}

impl<T> SocketOption<T> {
    /// Describe an option
    ///
    /// `encode` fills a zeroed buffer of exactly `width` bytes; `decode`
    /// always receives exactly `width` bytes (zero-filled past whatever the
    /// co-processor returned).
    pub const fn new(
        name: &'static str,
        id: u32,
        width: u8,
        writable: bool,
        encode: fn(&T, &mut [u8]),
        decode: fn(&[u8]) -> T,
    ) -> Self {
        Self {
            name,
            id,
            width,
            writable,
            encode,
            decode,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Wire-level option id (lwip `SO_*` value)
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Byte width exchanged on the wire
    pub const fn width(&self) -> u8 {
        self.width
    }

    /// False for options that can only be read
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Byte image of `value`
    pub fn encode(&self, value: &T) -> Vec<u8> {
        let mut buf = vec![0u8; self.width as usize];
        (self.encode)(value, &mut buf);
        buf
    }

    /// Value from a (possibly short) byte image
    pub fn decode(&self, bytes: &[u8]) -> T {
        let mut buf = vec![0u8; self.width as usize];
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        (self.decode)(&buf)
    }
}

impl<T> fmt::Debug for SocketOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOption")
            .field("name", &self.name)
            .field("id", &format_args!("0x{:04x}", self.id))
            .field("width", &self.width)
            .field("writable", &self.writable)
            .finish()
    }
}

// =============================================================================
// Value Options (stored as a 32-bit integer whatever their logical width)
// =============================================================================

fn encode_flag(value: &bool, buf: &mut [u8]) {
    buf.copy_from_slice(&u32::from(*value).to_le_bytes());
}

fn decode_flag(buf: &[u8]) -> bool {
    read_u32(buf) != 0
}

fn encode_u32(value: &u32, buf: &mut [u8]) {
    buf.copy_from_slice(&value.to_le_bytes());
}

fn decode_u32(buf: &[u8]) -> u32 {
    read_u32(buf)
}

fn encode_u8(value: &u8, buf: &mut [u8]) {
    buf.copy_from_slice(&u32::from(*value).to_le_bytes());
}

fn decode_u8(buf: &[u8]) -> u8 {
    read_u32(buf) as u8
}

fn encode_type(value: &Option<Type>, buf: &mut [u8]) {
    let raw = value.map(|t| t as u32).unwrap_or(0);
    buf.copy_from_slice(&raw.to_le_bytes());
}

fn decode_type(buf: &[u8]) -> Option<Type> {
    Type::from_u32(read_u32(buf))
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

impl SocketOption<bool> {
    /// Boolean option stored as a u32
    pub const fn flag(name: &'static str, id: u32, writable: bool) -> Self {
        Self::new(name, id, 4, writable, encode_flag, decode_flag)
    }
}

impl SocketOption<u32> {
    /// Unsigned integer option
    pub const fn scalar(name: &'static str, id: u32, writable: bool) -> Self {
        Self::new(name, id, 4, writable, encode_u32, decode_u32)
    }
}

// =============================================================================
// Struct Options
// =============================================================================

/// Timeout as seconds + microseconds
///
/// Laid out like the co-processor's `struct timeval`: a 64-bit seconds field,
/// a 32-bit microseconds field and 4 bytes of tail padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i32,
}

impl TimeVal {
    pub const WIDTH: u8 = 16;

    pub fn new(sec: i64, usec: i32) -> Self {
        Self { sec, usec }
    }

    /// Zero means "no timeout"
    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.usec == 0
    }

    pub fn to_duration(&self) -> Duration {
        Duration::from_secs(self.sec.max(0) as u64) + Duration::from_micros(self.usec.max(0) as u64)
    }
}

impl From<Duration> for TimeVal {
    fn from(d: Duration) -> Self {
        Self {
            sec: d.as_secs() as i64,
            usec: d.subsec_micros() as i32,
        }
    }
}

fn encode_timeval(value: &TimeVal, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&value.sec.to_le_bytes());
    buf[8..12].copy_from_slice(&value.usec.to_le_bytes());
}

fn decode_timeval(buf: &[u8]) -> TimeVal {
    let mut sec = [0u8; 8];
    sec.copy_from_slice(&buf[..8]);
    let mut usec = [0u8; 4];
    usec.copy_from_slice(&buf[8..12]);
    TimeVal {
        sec: i64::from_le_bytes(sec),
        usec: i32::from_le_bytes(usec),
    }
}

impl SocketOption<TimeVal> {
    /// Timeout option
    pub const fn timeout(name: &'static str, id: u32) -> Self {
        Self::new(name, id, TimeVal::WIDTH, true, encode_timeval, decode_timeval)
    }
}

// =============================================================================
// Supported Options
// =============================================================================

/// SO_REUSEADDR
pub const REUSE_ADDRESS: SocketOption<bool> = SocketOption::flag("SO_REUSEADDR", 0x0004, true);

/// SO_KEEPALIVE
pub const KEEP_ALIVE: SocketOption<bool> = SocketOption::flag("SO_KEEPALIVE", 0x0008, true);

/// SO_BROADCAST
pub const BROADCAST: SocketOption<bool> = SocketOption::flag("SO_BROADCAST", 0x0020, true);

/// SO_ACCEPTCONN (read-only)
pub const ACCEPTS_CONNECTIONS: SocketOption<bool> =
    SocketOption::flag("SO_ACCEPTCONN", 0x0002, false);

/// SO_RCVBUF
pub const RECV_BUFFER_SIZE: SocketOption<u32> = SocketOption::scalar("SO_RCVBUF", 0x1002, true);

/// SO_SNDTIMEO
pub const SEND_TIMEOUT: SocketOption<TimeVal> = SocketOption::timeout("SO_SNDTIMEO", 0x1005);

/// SO_RCVTIMEO
pub const RECV_TIMEOUT: SocketOption<TimeVal> = SocketOption::timeout("SO_RCVTIMEO", 0x1006);

/// SO_ERROR (read-only; reading clears the pending error)
pub const LAST_ERROR: SocketOption<u8> =
    SocketOption::new("SO_ERROR", 0x1007, 4, false, encode_u8, decode_u8);

/// SO_TYPE (read-only)
pub const SOCKET_TYPE: SocketOption<Option<Type>> =
    SocketOption::new("SO_TYPE", 0x1008, 4, false, encode_type, decode_type);

/// SO_NO_CHECK
pub const NO_UDP_CHECKSUM: SocketOption<bool> = SocketOption::flag("SO_NO_CHECK", 0x100a, true);
