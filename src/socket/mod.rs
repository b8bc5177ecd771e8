//! Socket Module
//!
//! BSD-style sockets living on the co-processor, addressed by an 8-bit
//! [`Handle`].
//!
//! ## Ownership
//! A [`Socket`] exclusively owns its handle. Moving the value moves the
//! handle; dropping it closes the handle. [`Socket::take`] moves the handle
//! out explicitly and leaves an invalid socket behind, and assigning over a
//! socket closes the handle it held before.
//!
//! ## Failures
//! Remote failures come back as [`LinkError::Remote`] carrying the errno the
//! co-processor reported. Fetching that errno is part of the failing call, so
//! a later [`crate::Driver::last_error`] answers from the cache.

mod option;

pub use option::{
    SocketOption, TimeVal, ACCEPTS_CONNECTIONS, BROADCAST, KEEP_ALIVE, LAST_ERROR,
    NO_UDP_CHECKSUM, RECV_BUFFER_SIZE, RECV_TIMEOUT, REUSE_ADDRESS, SEND_TIMEOUT, SOCKET_TYPE,
};

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::ops::BitOr;

use crate::bus::BusChannel;
use crate::driver::Driver;
use crate::error::{LinkError, Result};
use crate::protocol::{Opcode, OutParam};
use crate::transport::Transport;

/// ioctl: bytes waiting to be read (u32 result)
pub const FIONREAD: u32 = 0x4004_667F;

/// ioctl: set non-blocking mode (u32 argument)
pub const FIONBIO: u32 = 0x8004_667E;

/// Poll reply bit meaning the poll itself failed
const POLL_FAILED: u8 = 0x80;

/// Largest value option reads can return
const OPTION_CAPACITY: usize = u8::MAX as usize;

// =============================================================================
// Identifiers
// =============================================================================

/// Socket identifier on the co-processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u8);

impl Handle {
    /// The invalid sentinel
    pub const INVALID: Handle = Handle(u8::MAX);

    pub const fn new(raw: u8) -> Self {
        Handle(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u8::MAX
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#invalid")
        }
    }
}

/// Socket type
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Stream = 1,
    DGram = 2,
    Raw = 3,
}

impl Type {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Type::Stream),
            2 => Some(Type::DGram),
            3 => Some(Type::Raw),
            _ => None,
        }
    }
}

/// IP protocol number
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    IP = 0,
    ICMP = 1,
    TCP = 6,
    UDP = 17,
    IPv6 = 41,
    ICMPv6 = 58,
    UDPLite = 136,
    Raw = 255,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Protocol::IP),
            1 => Some(Protocol::ICMP),
            6 => Some(Protocol::TCP),
            17 => Some(Protocol::UDP),
            41 => Some(Protocol::IPv6),
            58 => Some(Protocol::ICMPv6),
            136 => Some(Protocol::UDPLite),
            255 => Some(Protocol::Raw),
            _ => None,
        }
    }
}

/// Poll result bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State(u8);

impl State {
    pub const NONE: State = State(0);
    pub const READABLE: State = State(0x01);
    pub const WRITABLE: State = State(0x02);
    pub const ERRORED_OUT: State = State(0x04);

    pub const fn from_bits(bits: u8) -> Self {
        State(bits & 0x07)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: State) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_readable(self) -> bool {
        self.contains(State::READABLE)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(State::WRITABLE)
    }

    pub const fn is_errored_out(self) -> bool {
        self.contains(State::ERRORED_OUT)
    }
}

impl BitOr for State {
    type Output = State;

    fn bitor(self, rhs: State) -> State {
        State(self.0 | rhs.0)
    }
}

// =============================================================================
// Socket
// =============================================================================

/// A socket on the co-processor
pub struct Socket<B: BusChannel> {
    driver: Driver<B>,
    handle: Handle,
}

impl<B: BusChannel> Socket<B> {
    /// Create a socket
    pub fn open(driver: &Driver<B>, ty: Type, proto: Protocol) -> Result<Self> {
        let handle = driver.transaction(|t| -> Result<Handle> {
            let mut raw = [u8::MAX; 1];
            let mut outs = [OutParam::new(&mut raw)];
            t.execute(Opcode::SocketCreate, &[&[ty as u8], &[proto as u8]], &mut outs)?;

            let handle = Handle::new(outs[0].data().first().copied().unwrap_or(u8::MAX));
            if !handle.is_valid() {
                return Err(t.remote_failure());
            }
            t.mark_success();
            Ok(handle)
        })?;

        tracing::debug!("Opened {:?}/{:?} socket {}", ty, proto, handle);
        Ok(Self::from_handle(driver, handle))
    }

    /// A socket that owns nothing
    pub fn invalid(driver: &Driver<B>) -> Self {
        Self::from_handle(driver, Handle::INVALID)
    }

    fn from_handle(driver: &Driver<B>, handle: Handle) -> Self {
        Self {
            driver: driver.clone(),
            handle,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Move the handle out, leaving this socket invalid
    pub fn take(&mut self) -> Self {
        let handle = std::mem::replace(&mut self.handle, Handle::INVALID);
        Self::from_handle(&self.driver, handle)
    }

    /// Give up ownership without closing; the caller becomes responsible
    pub fn into_raw(mut self) -> Handle {
        std::mem::replace(&mut self.handle, Handle::INVALID)
    }

    /// Close the socket
    ///
    /// The socket is invalid afterwards whatever the co-processor answers.
    /// Closing an invalid socket does nothing.
    pub fn close(&mut self) {
        if !self.handle.is_valid() {
            return;
        }
        let s = std::mem::replace(&mut self.handle, Handle::INVALID).raw();

        let closed = self
            .driver
            .transaction(|t| command_ok(t, Opcode::SocketClose, &[&[s]]));
        match closed {
            Ok(()) => tracing::debug!("Closed socket #{}", s),
            Err(e) => tracing::debug!("Close of socket #{} reported failure: {}", s, e),
        }
    }

    /// Handle byte, or a local EBADF failure when invalid
    fn require_open(&self, t: &mut Transport<B>) -> Result<u8> {
        if self.handle.is_valid() {
            Ok(self.handle.raw())
        } else {
            Err(t.fail_local(LinkError::InvalidSocket))
        }
    }

    // -------------------------------------------------------------------------
    // Connection Setup
    // -------------------------------------------------------------------------

    pub fn bind(&self, port: u16) -> Result<()> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            command_ok(t, Opcode::SocketBind, &[&[s], &port.to_be_bytes()])
        })
    }

    pub fn listen(&self, backlog: u8) -> Result<()> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            command_ok(t, Opcode::SocketListen, &[&[s], &[backlog]])
        })
    }

    /// Accept a pending connection
    pub fn accept(&self) -> Result<(Socket<B>, SocketAddrV4)> {
        let (handle, peer) = self.driver.transaction(|t| -> Result<(Handle, SocketAddrV4)> {
            let s = self.require_open(t)?;

            let mut raw = [u8::MAX; 1];
            let mut ip = [0u8; 4];
            let mut port = [0u8; 2];
            let mut outs = [
                OutParam::new(&mut raw),
                OutParam::new(&mut ip),
                OutParam::new(&mut port),
            ];
            t.execute(Opcode::SocketAccept, &[&[s]], &mut outs)?;

            let handle = Handle::new(outs[0].data().first().copied().unwrap_or(u8::MAX));
            if !handle.is_valid() {
                return Err(t.remote_failure());
            }
            t.mark_success();
            let peer = SocketAddrV4::new(ipv4_from(outs[1].data()), le_u16(outs[2].data()));
            Ok((handle, peer))
        })?;

        tracing::debug!("Socket {} accepted {} from {}", self.handle, handle, peer);
        Ok((Self::from_handle(&self.driver, handle), peer))
    }

    /// Connect to an IPv4 peer
    pub fn connect(&self, addr: IpAddr, port: u16) -> Result<()> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            let ip = require_ipv4(t, addr)?;
            command_ok(
                t,
                Opcode::SocketConnect,
                &[&[s], &ip.octets(), &port.to_be_bytes()],
            )
        })
    }

    /// Address of the connected peer
    pub fn peer_name(&self) -> Result<SocketAddrV4> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;

            let mut ok = [0u8; 1];
            let mut ip = [0u8; 4];
            let mut port = [0u8; 2];
            let mut outs = [
                OutParam::new(&mut ok),
                OutParam::new(&mut ip),
                OutParam::new(&mut port),
            ];
            t.execute(Opcode::SocketPeerName, &[&[s]], &mut outs)?;

            if outs[0].data().first().copied().unwrap_or(0) == 0 {
                return Err(t.remote_failure());
            }
            t.mark_success();
            Ok(SocketAddrV4::new(ipv4_from(outs[1].data()), le_u16(outs[2].data())))
        })
    }

    // -------------------------------------------------------------------------
    // Data Transfer
    // -------------------------------------------------------------------------

    /// Send up to one transfer's worth of `buf`; loop to send more
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            let len = transfer_cap(t, buf.len());

            let mut sent = [0u8; 2];
            let mut outs = [OutParam::new(&mut sent)];
            t.execute(Opcode::SocketSend, &[&[s], &buf[..len]], &mut outs)?;

            let count = be_u16(outs[0].data()) as usize;
            transferred(t, count, len)
        })
    }

    /// Receive into `buf`
    ///
    /// `Ok(0)` is a genuine zero-byte result (for a stream, the peer closed).
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            let len = transfer_cap(t, buf.len());
            let size = (len as u16).to_le_bytes();

            let mut outs = [OutParam::new(&mut buf[..len])];
            t.execute(Opcode::SocketRecv, &[&[s], &size], &mut outs)?;

            let count = outs[0].len();
            transferred(t, count, len)
        })
    }

    /// Send one datagram to an IPv4 peer
    pub fn send_to(&self, buf: &[u8], addr: IpAddr, port: u16) -> Result<usize> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            let ip = require_ipv4(t, addr)?;
            let len = transfer_cap(t, buf.len());

            let mut sent = [0u8; 2];
            let mut outs = [OutParam::new(&mut sent)];
            t.execute(
                Opcode::SocketSendTo,
                &[&[s], &ip.octets(), &port.to_be_bytes(), &buf[..len]],
                &mut outs,
            )?;

            let count = be_u16(outs[0].data()) as usize;
            transferred(t, count, len)
        })
    }

    /// Receive one datagram and its source
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4)> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            let len = transfer_cap(t, buf.len());
            let size = (len as u16).to_le_bytes();

            let mut ip = [0u8; 4];
            let mut port = [0u8; 2];
            let mut outs = [
                OutParam::new(&mut ip),
                OutParam::new(&mut port),
                OutParam::new(&mut buf[..len]),
            ];
            t.execute(Opcode::SocketRecvFrom, &[&[s], &size], &mut outs)?;

            let count = outs[2].len();
            let source = SocketAddrV4::new(ipv4_from(outs[0].data()), le_u16(outs[1].data()));
            let count = transferred(t, count, len)?;
            Ok((count, source))
        })
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Raw ioctl; the reply overwrites the front of `arg`
    ///
    /// Returns the number of reply bytes.
    pub fn ioctl(&self, code: u32, arg: &mut [u8]) -> Result<usize> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            ioctl_in(t, s, code, arg)
        })
    }

    pub fn set_non_blocking(&self, enable: bool) -> Result<()> {
        let mut arg = u32::from(enable).to_le_bytes();
        self.ioctl(FIONBIO, &mut arg).map(|_| ())
    }

    /// Bytes waiting to be read
    pub fn available_to_read(&self) -> Result<usize> {
        let mut arg = [0u8; 4];
        self.ioctl(FIONREAD, &mut arg)?;
        Ok(u32::from_le_bytes(arg) as usize)
    }

    pub fn poll(&self) -> Result<State> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;

            let mut state = [POLL_FAILED; 1];
            let mut outs = [OutParam::new(&mut state)];
            t.execute(Opcode::SocketPoll, &[&[s]], &mut outs)?;

            let bits = outs[0].data().first().copied().unwrap_or(POLL_FAILED);
            if bits & POLL_FAILED != 0 {
                return Err(t.remote_failure());
            }
            t.mark_success();
            Ok(State::from_bits(bits))
        })
    }

    // -------------------------------------------------------------------------
    // Options
    // -------------------------------------------------------------------------

    pub fn set_option<T>(&self, option: &SocketOption<T>, value: T) -> Result<()> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            if !option.is_writable() {
                return Err(t.fail_local(LinkError::InvalidArgument(format!(
                    "{} is read-only",
                    option.name()
                ))));
            }

            let image = option.encode(&value);
            command_ok(
                t,
                Opcode::SocketSetOpt,
                &[&[s], &option.id().to_le_bytes(), &image],
            )
        })
    }

    /// Read an option; the co-processor is asked for exactly the option's width
    pub fn get_option<T>(&self, option: &SocketOption<T>) -> Result<T> {
        self.driver.transaction(|t| {
            let s = self.require_open(t)?;
            let width = (option.width() as usize).min(OPTION_CAPACITY);

            let mut value = [0u8; OPTION_CAPACITY];
            let mut outs = [OutParam::new(&mut value[..width])];
            t.execute(
                Opcode::SocketGetOpt,
                &[&[s], &option.id().to_le_bytes(), &[width as u8]],
                &mut outs,
            )?;

            if outs[0].is_empty() {
                return Err(t.remote_failure());
            }
            t.mark_success();
            Ok(option.decode(outs[0].data()))
        })
    }
}

impl<B: BusChannel> Drop for Socket<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: BusChannel> fmt::Debug for Socket<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").field("handle", &self.handle).finish()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Run a command whose only reply is a success byte
fn command_ok<B: BusChannel>(t: &mut Transport<B>, opcode: Opcode, args: &[&[u8]]) -> Result<()> {
    let mut ok = [0u8; 1];
    let mut outs = [OutParam::new(&mut ok)];
    t.execute(opcode, args, &mut outs)?;

    if outs[0].data().first().copied().unwrap_or(0) == 0 {
        return Err(t.remote_failure());
    }
    t.mark_success();
    Ok(())
}

fn ioctl_in<B: BusChannel>(
    t: &mut Transport<B>,
    s: u8,
    code: u32,
    arg: &mut [u8],
) -> Result<usize> {
    let request = arg.to_vec();
    let mut outs = [OutParam::new(arg)];
    t.execute(Opcode::SocketIoctl, &[&[s], &code.to_le_bytes(), &request], &mut outs)?;

    let len = outs[0].len();
    if len == 0 {
        return Err(t.remote_failure());
    }
    t.mark_success();
    Ok(len)
}

/// Turn a transfer count into the public result
///
/// Zero is only an error when the co-processor has an errno to report.
fn transferred<B: BusChannel>(
    t: &mut Transport<B>,
    count: usize,
    requested: usize,
) -> Result<usize> {
    if count > 0 {
        t.mark_success();
        return Ok(count.min(requested));
    }
    match t.last_error() {
        0 => Ok(0),
        code => Err(LinkError::from_code(code)),
    }
}

fn transfer_cap<B: BusChannel>(t: &Transport<B>, len: usize) -> usize {
    len.min(t.config().transfer_cap()).min(u16::MAX as usize)
}

fn require_ipv4<B: BusChannel>(t: &mut Transport<B>, addr: IpAddr) -> Result<Ipv4Addr> {
    match addr {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => Err(t.fail_local(LinkError::InvalidArgument(format!(
            "{} is not an IPv4 address",
            ip
        )))),
    }
}

fn ipv4_from(bytes: &[u8]) -> Ipv4Addr {
    let mut octets = [0u8; 4];
    let len = bytes.len().min(4);
    octets[..len].copy_from_slice(&bytes[..len]);
    Ipv4Addr::from(octets)
}

fn le_u16(bytes: &[u8]) -> u16 {
    match bytes {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        [lo] => u16::from(*lo),
        [] => 0,
    }
}

fn be_u16(bytes: &[u8]) -> u16 {
    match bytes {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        [lo] => u16::from(*lo),
        [] => 0,
    }
}
