//! Simulated socket stack
//!
//! A loopback-only network: sockets can reach each other through
//! `127.0.0.1` or the simulated station address, nothing else. Calls never
//! block; where a real stack would wait the call fails with `EAGAIN`.
//!
//! Every command except the errno query clears the stored errno first, so
//! the errno reported afterwards always belongs to the latest socket call.

use std::collections::{BTreeMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::errno;
use crate::socket::{Protocol, State, Type, FIONBIO, FIONREAD};

/// Address the simulated station owns
pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 2);

/// Default maximum number of open sockets
pub const DEFAULT_MAX_SOCKETS: usize = 16;

/// First port handed out for implicit binds
pub const EPHEMERAL_START: u16 = 49152;

const SO_ACCEPTCONN: u32 = 0x0002;
const SO_REUSEADDR: u32 = 0x0004;
const SO_KEEPALIVE: u32 = 0x0008;
const SO_BROADCAST: u32 = 0x0020;
const SO_RCVBUF: u32 = 0x1002;
const SO_SNDTIMEO: u32 = 0x1005;
const SO_RCVTIMEO: u32 = 0x1006;
const SO_ERROR: u32 = 0x1007;
const SO_TYPE: u32 = 0x1008;
const SO_NO_CHECK: u32 = 0x100a;

const DEFAULT_RCVBUF: u32 = 5744;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Bound,
    Listening { backlog: usize },
    Connected,
}

#[derive(Debug)]
struct Datagram {
    source: SocketAddrV4,
    data: Vec<u8>,
}

#[derive(Debug)]
struct SimSocket {
    ty: Type,
    phase: Phase,
    local_port: Option<u16>,

    /// Connected peer address
    remote: Option<SocketAddrV4>,

    /// Handle of the other end of a stream connection
    peer: Option<u8>,
    peer_closed: bool,

    stream_rx: VecDeque<u8>,
    datagrams: VecDeque<Datagram>,
    accept_queue: VecDeque<u8>,

    options: BTreeMap<u32, Vec<u8>>,
    pending_error: u8,
    non_blocking: bool,
}

impl SimSocket {
    fn new(ty: Type) -> Self {
        Self {
            ty,
            phase: Phase::Created,
            local_port: None,
            remote: None,
            peer: None,
            peer_closed: false,
            stream_rx: VecDeque::new(),
            datagrams: VecDeque::new(),
            accept_queue: VecDeque::new(),
            options: BTreeMap::new(),
            pending_error: 0,
            non_blocking: false,
        }
    }

    fn flag(&self, id: u32) -> bool {
        self.options
            .get(&id)
            .is_some_and(|value| value.iter().any(|&b| b != 0))
    }

    fn readable_bytes(&self) -> usize {
        match self.ty {
            Type::Stream => self.stream_rx.len(),
            _ => self.datagrams.front().map(|d| d.data.len()).unwrap_or(0),
        }
    }
}

/// The loopback network
#[derive(Debug)]
pub struct Network {
    sockets: BTreeMap<u8, SimSocket>,
    errno: u8,
    next_ephemeral: u16,
    max_sockets: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SOCKETS)
    }
}

impl Network {
    pub fn new(max_sockets: usize) -> Self {
        Self {
            sockets: BTreeMap::new(),
            errno: 0,
            next_ephemeral: EPHEMERAL_START,
            max_sockets: max_sockets.min(u8::MAX as usize),
        }
    }

    /// Stored errno (what the errno query answers)
    pub fn errno(&self) -> u8 {
        self.errno
    }

    /// Clear the stored errno at the start of a socket command
    pub fn begin_command(&mut self) {
        self.errno = 0;
    }

    pub fn open_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_open(&self, handle: u8) -> bool {
        self.sockets.contains_key(&handle)
    }

    pub fn is_non_blocking(&self, handle: u8) -> bool {
        self.sockets.get(&handle).is_some_and(|s| s.non_blocking)
    }

    fn fail<T>(&mut self, code: u8, value: T) -> T {
        self.errno = code;
        value
    }

    fn is_local(ip: Ipv4Addr) -> bool {
        ip.is_loopback() || ip == LOCAL_IP
    }

    fn allocate_handle(&self) -> Option<u8> {
        if self.sockets.len() >= self.max_sockets {
            return None;
        }
        (0..self.max_sockets as u8).find(|h| !self.sockets.contains_key(h))
    }

    fn port_in_use(&self, ty: Type, port: u16) -> bool {
        self.sockets
            .values()
            .any(|s| s.ty == ty && s.local_port == Some(port) && !s.flag(SO_REUSEADDR))
    }

    fn ephemeral_port(&mut self, ty: Type) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_START);
            if !self.port_in_use(ty, port) {
                return port;
            }
        }
    }

    /// Source address a local socket is seen from
    fn source_of(&mut self, handle: u8, toward: Ipv4Addr) -> SocketAddrV4 {
        let ty = self.sockets.get(&handle).map(|s| s.ty).unwrap_or(Type::DGram);
        let port = match self.sockets.get(&handle).and_then(|s| s.local_port) {
            Some(port) => port,
            None => {
                let port = self.ephemeral_port(ty);
                if let Some(socket) = self.sockets.get_mut(&handle) {
                    socket.local_port = Some(port);
                }
                port
            }
        };
        let ip = if toward.is_loopback() {
            Ipv4Addr::LOCALHOST
        } else {
            LOCAL_IP
        };
        SocketAddrV4::new(ip, port)
    }

    // =========================================================================
    // Socket Lifecycle
    // =========================================================================

    /// Returns the new handle, or 255
    pub fn create(&mut self, ty: u8, proto: u8) -> u8 {
        let ty = match Type::from_u32(u32::from(ty)) {
            Some(ty) => ty,
            None => return self.fail(errno::EINVAL, u8::MAX),
        };
        let supported = match (ty, Protocol::from_u8(proto)) {
            (Type::Stream, Some(Protocol::IP | Protocol::TCP)) => true,
            (Type::DGram, Some(Protocol::IP | Protocol::UDP | Protocol::UDPLite)) => true,
            (Type::Raw, Some(_)) => true,
            _ => false,
        };
        if !supported {
            return self.fail(errno::EPROTONOSUPPORT, u8::MAX);
        }

        match self.allocate_handle() {
            Some(handle) => {
                self.sockets.insert(handle, SimSocket::new(ty));
                handle
            }
            None => self.fail(errno::ENFILE, u8::MAX),
        }
    }

    pub fn close(&mut self, handle: u8) -> bool {
        let socket = match self.sockets.remove(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, false),
        };

        if let Some(peer) = socket.peer.and_then(|p| self.sockets.get_mut(&p)) {
            peer.peer_closed = true;
            peer.peer = None;
        }
        // Connections nobody accepted die with the listener
        for pending in socket.accept_queue {
            self.close(pending);
        }
        true
    }

    pub fn bind(&mut self, handle: u8, port: u16) -> bool {
        let ty = match self.sockets.get(&handle) {
            Some(socket) if socket.phase == Phase::Created => socket.ty,
            Some(_) => return self.fail(errno::EINVAL, false),
            None => return self.fail(errno::EBADF, false),
        };
        let port = if port == 0 {
            self.ephemeral_port(ty)
        } else if self.port_in_use(ty, port) {
            return self.fail(errno::EADDRINUSE, false);
        } else {
            port
        };

        if let Some(socket) = self.sockets.get_mut(&handle) {
            socket.local_port = Some(port);
            socket.phase = Phase::Bound;
        }
        true
    }

    pub fn listen(&mut self, handle: u8, backlog: u8) -> bool {
        let (ty, bound) = match self.sockets.get(&handle) {
            Some(socket) => (socket.ty, socket.local_port.is_some()),
            None => return self.fail(errno::EBADF, false),
        };
        if ty != Type::Stream {
            return self.fail(errno::EOPNOTSUPP, false);
        }
        let port = if bound {
            None
        } else {
            Some(self.ephemeral_port(ty))
        };

        if let Some(socket) = self.sockets.get_mut(&handle) {
            if let Some(port) = port {
                socket.local_port = Some(port);
            }
            socket.phase = Phase::Listening {
                backlog: usize::from(backlog).max(1),
            };
        }
        true
    }

    /// Returns the accepted handle and the peer's address, or 255
    pub fn accept(&mut self, handle: u8) -> (u8, SocketAddrV4) {
        let none = (u8::MAX, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        let socket = match self.sockets.get_mut(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, none),
        };
        if !matches!(socket.phase, Phase::Listening { .. }) {
            return self.fail(errno::EINVAL, none);
        }

        match socket.accept_queue.pop_front() {
            Some(accepted) => {
                let remote = self
                    .sockets
                    .get(&accepted)
                    .and_then(|s| s.remote)
                    .unwrap_or(none.1);
                (accepted, remote)
            }
            None => self.fail(errno::EAGAIN, none),
        }
    }

    pub fn connect(&mut self, handle: u8, ip: Ipv4Addr, port: u16) -> bool {
        let ty = match self.sockets.get(&handle) {
            Some(socket) if socket.phase == Phase::Connected && socket.ty == Type::Stream => {
                return self.fail(errno::EINVAL, false);
            }
            Some(socket) => socket.ty,
            None => return self.fail(errno::EBADF, false),
        };

        if ty != Type::Stream {
            // Datagram connect only fixes the default destination
            if let Some(socket) = self.sockets.get_mut(&handle) {
                socket.remote = Some(SocketAddrV4::new(ip, port));
                socket.phase = Phase::Connected;
            }
            return true;
        }

        if !Self::is_local(ip) {
            return self.fail(errno::EHOSTUNREACH, false);
        }
        let listener = self.sockets.iter().find_map(|(&h, s)| match s.phase {
            Phase::Listening { backlog } if s.local_port == Some(port) => Some((h, backlog)),
            _ => None,
        });
        let (listener, backlog) = match listener {
            Some(found) => found,
            None => return self.refuse(handle),
        };
        let queued = self
            .sockets
            .get(&listener)
            .map(|s| s.accept_queue.len())
            .unwrap_or(0);
        if queued >= backlog {
            return self.refuse(handle);
        }

        let server = match self.allocate_handle() {
            Some(server) => server,
            None => return self.fail(errno::ENFILE, false),
        };
        let client_addr = self.source_of(handle, ip);

        let mut accepted = SimSocket::new(Type::Stream);
        accepted.phase = Phase::Connected;
        accepted.local_port = Some(port);
        accepted.remote = Some(client_addr);
        accepted.peer = Some(handle);
        self.sockets.insert(server, accepted);

        if let Some(client) = self.sockets.get_mut(&handle) {
            client.phase = Phase::Connected;
            client.remote = Some(SocketAddrV4::new(ip, port));
            client.peer = Some(server);
        }
        if let Some(listening) = self.sockets.get_mut(&listener) {
            listening.accept_queue.push_back(server);
        }
        true
    }

    /// Failed connect: the error also stays pending on the socket
    fn refuse(&mut self, handle: u8) -> bool {
        if let Some(socket) = self.sockets.get_mut(&handle) {
            socket.pending_error = errno::ECONNREFUSED;
        }
        self.fail(errno::ECONNREFUSED, false)
    }

    pub fn peer_name(&mut self, handle: u8) -> Option<SocketAddrV4> {
        match self.sockets.get(&handle) {
            Some(socket) if socket.phase == Phase::Connected => socket.remote,
            Some(_) => self.fail(errno::ENOTCONN, None),
            None => self.fail(errno::EBADF, None),
        }
    }

    // =========================================================================
    // Data Transfer
    // =========================================================================

    /// Returns the bytes accepted
    pub fn send(&mut self, handle: u8, data: &[u8]) -> usize {
        let (ty, phase, peer, remote) = match self.sockets.get(&handle) {
            Some(s) => (s.ty, s.phase, s.peer, s.remote),
            None => return self.fail(errno::EBADF, 0),
        };
        if phase != Phase::Connected {
            return self.fail(errno::ENOTCONN, 0);
        }

        if ty != Type::Stream {
            return match remote {
                Some(to) => self.send_to(handle, *to.ip(), to.port(), data),
                None => self.fail(errno::ENOTCONN, 0),
            };
        }

        match peer.and_then(|p| self.sockets.get_mut(&p)) {
            Some(other) => {
                other.stream_rx.extend(data.iter().copied());
                data.len()
            }
            None => self.fail(errno::ENOTCONN, 0),
        }
    }

    /// Returns at most `size` bytes; empty with errno 0 means end of stream
    pub fn recv(&mut self, handle: u8, size: usize) -> Vec<u8> {
        let socket = match self.sockets.get_mut(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, Vec::new()),
        };

        if socket.ty != Type::Stream {
            return match socket.datagrams.pop_front() {
                Some(mut datagram) => {
                    datagram.data.truncate(size);
                    datagram.data
                }
                None => self.fail(errno::EAGAIN, Vec::new()),
            };
        }

        if socket.phase != Phase::Connected {
            return self.fail(errno::ENOTCONN, Vec::new());
        }
        if socket.stream_rx.is_empty() {
            if socket.peer_closed {
                return Vec::new();
            }
            return self.fail(errno::EAGAIN, Vec::new());
        }

        let take = size.min(socket.stream_rx.len());
        socket.stream_rx.drain(..take).collect()
    }

    /// Returns the bytes accepted; datagrams to nobody are dropped silently
    pub fn send_to(&mut self, handle: u8, ip: Ipv4Addr, port: u16, data: &[u8]) -> usize {
        match self.sockets.get(&handle) {
            Some(socket) if socket.ty == Type::Stream => return self.fail(errno::EOPNOTSUPP, 0),
            Some(_) => {}
            None => return self.fail(errno::EBADF, 0),
        }
        if !Self::is_local(ip) {
            return data.len();
        }

        let source = self.source_of(handle, ip);
        let receiver = self.sockets.iter().find_map(|(&h, s)| {
            (h != handle && s.ty != Type::Stream && s.local_port == Some(port)).then_some(h)
        });
        if let Some(socket) = receiver.and_then(|h| self.sockets.get_mut(&h)) {
            socket.datagrams.push_back(Datagram {
                source,
                data: data.to_vec(),
            });
        }
        data.len()
    }

    pub fn recv_from(&mut self, handle: u8, size: usize) -> Option<(SocketAddrV4, Vec<u8>)> {
        let socket = match self.sockets.get_mut(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, None),
        };

        if socket.ty == Type::Stream {
            let remote = socket.remote;
            let data = self.recv(handle, size);
            return remote.map(|from| (from, data));
        }

        match socket.datagrams.pop_front() {
            Some(mut datagram) => {
                datagram.data.truncate(size);
                Some((datagram.source, datagram.data))
            }
            None => self.fail(errno::EAGAIN, None),
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Reply bytes, empty on failure
    pub fn ioctl(&mut self, handle: u8, code: u32, arg: &[u8]) -> Vec<u8> {
        let socket = match self.sockets.get_mut(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, Vec::new()),
        };

        match code {
            FIONREAD => (socket.readable_bytes() as u32).to_le_bytes().to_vec(),
            FIONBIO => {
                socket.non_blocking = arg.iter().any(|&b| b != 0);
                arg.to_vec()
            }
            _ => self.fail(errno::EINVAL, Vec::new()),
        }
    }

    /// State bits, or 0x80 on failure
    pub fn poll(&mut self, handle: u8) -> u8 {
        let socket = match self.sockets.get(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, 0x80),
        };

        let mut state = State::NONE;
        let readable = socket.readable_bytes() > 0
            || !socket.accept_queue.is_empty()
            || (socket.ty == Type::Stream && socket.peer_closed);
        if readable {
            state = state | State::READABLE;
        }
        let writable = match socket.ty {
            Type::Stream => socket.phase == Phase::Connected && !socket.peer_closed,
            _ => true,
        };
        if writable {
            state = state | State::WRITABLE;
        }
        if socket.pending_error != 0 {
            state = state | State::ERRORED_OUT;
        }
        state.bits()
    }

    pub fn set_option(&mut self, handle: u8, id: u32, value: &[u8]) -> bool {
        let socket = match self.sockets.get_mut(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, false),
        };

        match id {
            SO_REUSEADDR | SO_KEEPALIVE | SO_BROADCAST | SO_RCVBUF | SO_SNDTIMEO
            | SO_RCVTIMEO | SO_NO_CHECK => {
                socket.options.insert(id, value.to_vec());
                true
            }
            SO_ACCEPTCONN | SO_ERROR | SO_TYPE => self.fail(errno::EINVAL, false),
            _ => self.fail(errno::ENOPROTOOPT, false),
        }
    }

    /// Option bytes truncated to `capacity`, empty on failure
    pub fn get_option(&mut self, handle: u8, id: u32, capacity: usize) -> Vec<u8> {
        let socket = match self.sockets.get_mut(&handle) {
            Some(socket) => socket,
            None => return self.fail(errno::EBADF, Vec::new()),
        };

        let mut value = match id {
            SO_ACCEPTCONN => {
                let listening = matches!(socket.phase, Phase::Listening { .. });
                u32::from(listening).to_le_bytes().to_vec()
            }
            SO_ERROR => {
                let pending = std::mem::take(&mut socket.pending_error);
                u32::from(pending).to_le_bytes().to_vec()
            }
            SO_TYPE => (socket.ty as u32).to_le_bytes().to_vec(),
            SO_RCVBUF => socket
                .options
                .get(&id)
                .cloned()
                .unwrap_or_else(|| DEFAULT_RCVBUF.to_le_bytes().to_vec()),
            SO_SNDTIMEO | SO_RCVTIMEO => socket
                .options
                .get(&id)
                .cloned()
                .unwrap_or_else(|| vec![0u8; 16]),
            SO_REUSEADDR | SO_KEEPALIVE | SO_BROADCAST | SO_NO_CHECK => socket
                .options
                .get(&id)
                .cloned()
                .unwrap_or_else(|| vec![0u8; 4]),
            _ => return self.fail(errno::ENOPROTOOPT, Vec::new()),
        };
        value.truncate(capacity);
        value
    }
}
