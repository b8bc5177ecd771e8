//! Socket Tests
//!
//! Tests for socket lifecycle, connections and data transfer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4};

use ninalink::error::{errno, LinkError};
use ninalink::protocol::Opcode;
use ninalink::sim::{Coprocessor, EPHEMERAL_START, LOCAL_IP};
use ninalink::socket::{FIONBIO, FIONREAD};
use ninalink::{Config, Driver, Handle, Protocol, Socket, State, Type};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (Coprocessor, Driver<Coprocessor>) {
    let chip = Coprocessor::new();
    let driver = Driver::new(chip.clone(), Config::default());
    (chip, driver)
}

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn tcp(driver: &Driver<Coprocessor>) -> Socket<Coprocessor> {
    driver.socket(Type::Stream, Protocol::TCP).unwrap()
}

fn udp(driver: &Driver<Coprocessor>) -> Socket<Coprocessor> {
    driver.socket(Type::DGram, Protocol::UDP).unwrap()
}

/// Listener on `port` plus a connected client/server pair
fn connected_pair(
    driver: &Driver<Coprocessor>,
    port: u16,
) -> (Socket<Coprocessor>, Socket<Coprocessor>, Socket<Coprocessor>) {
    let listener = tcp(driver);
    listener.bind(port).unwrap();
    listener.listen(4).unwrap();

    let client = tcp(driver);
    client.connect(localhost(), port).unwrap();
    let (server, _) = listener.accept().unwrap();
    (listener, client, server)
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_returns_distinct_handles() {
    let (chip, driver) = setup();

    let a = tcp(&driver);
    let b = udp(&driver);

    assert!(a.is_valid());
    assert!(b.is_valid());
    assert_ne!(a.handle(), b.handle());
    assert_eq!(chip.open_sockets(), 2);
}

#[test]
fn test_open_unsupported_combination() {
    let (_chip, driver) = setup();

    let err = driver.socket(Type::Stream, Protocol::UDP).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EPROTONOSUPPORT)));
    assert_eq!(driver.last_error(), errno::EPROTONOSUPPORT);
}

#[test]
fn test_open_runs_out_of_handles() {
    let (_chip, driver) = setup();

    let sockets: Vec<_> = (0..16).map(|_| tcp(&driver)).collect();
    assert_eq!(sockets.len(), 16);

    let err = driver.socket(Type::Stream, Protocol::TCP).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::ENFILE)));
}

#[test]
fn test_drop_closes_handle() {
    let (chip, driver) = setup();

    {
        let _socket = tcp(&driver);
        assert_eq!(chip.open_sockets(), 1);
    }
    assert_eq!(chip.open_sockets(), 0);
}

#[test]
fn test_move_keeps_single_owner() {
    let (chip, driver) = setup();

    let socket = tcp(&driver);
    let handle = socket.handle();
    let moved = socket;

    assert_eq!(moved.handle(), handle);
    assert_eq!(chip.open_sockets(), 1);

    drop(moved);
    assert_eq!(chip.open_sockets(), 0);
}

#[test]
fn test_take_leaves_invalid_socket() {
    let (chip, driver) = setup();

    let mut original = tcp(&driver);
    let handle = original.handle();
    let taken = original.take();

    assert!(!original.is_valid());
    assert_eq!(taken.handle(), handle);

    // Dropping the emptied socket sends nothing
    chip.clear_log();
    drop(original);
    assert_eq!(chip.transaction_count(), 0);
    assert_eq!(chip.open_sockets(), 1);

    drop(taken);
    assert_eq!(chip.open_sockets(), 0);
}

#[test]
fn test_assignment_closes_previous_handle() {
    let (chip, driver) = setup();

    let mut socket = tcp(&driver);
    let first = socket.handle();
    socket = udp(&driver);

    assert_ne!(socket.handle(), first);
    assert_eq!(chip.open_sockets(), 1);
}

#[test]
fn test_close_is_idempotent() {
    let (chip, driver) = setup();

    let mut socket = tcp(&driver);
    socket.close();
    assert!(!socket.is_valid());
    assert_eq!(chip.open_sockets(), 0);

    chip.clear_log();
    socket.close();
    assert_eq!(chip.transaction_count(), 0);
}

#[test]
fn test_into_raw_skips_close() {
    let (chip, driver) = setup();

    let socket = tcp(&driver);
    let handle = socket.into_raw();

    assert!(handle.is_valid());
    assert_eq!(chip.open_sockets(), 1);
}

#[test]
fn test_invalid_socket_fails_locally() {
    let (chip, driver) = setup();
    let socket = Socket::invalid(&driver);

    let err = socket.bind(80).unwrap_err();
    assert!(matches!(err, LinkError::InvalidSocket));
    assert_eq!(driver.last_error(), errno::EBADF);

    let mut buf = [0u8; 4];
    assert!(socket.recv(&mut buf).is_err());
    assert!(socket.poll().is_err());
    assert_eq!(driver.last_error(), errno::EBADF);

    assert_eq!(chip.transaction_count(), 0);
}

#[test]
fn test_handle_display() {
    assert_eq!(Handle::new(3).to_string(), "#3");
    assert_eq!(Handle::INVALID.to_string(), "#invalid");
    assert!(!Handle::INVALID.is_valid());
}

// =============================================================================
// Connection Tests
// =============================================================================

#[test]
fn test_bind_port_in_use() {
    let (_chip, driver) = setup();

    let a = tcp(&driver);
    a.bind(8080).unwrap();

    let b = tcp(&driver);
    let err = b.bind(8080).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EADDRINUSE)));
}

#[test]
fn test_listen_on_datagram_socket() {
    let (_chip, driver) = setup();

    let socket = udp(&driver);
    let err = socket.listen(1).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EOPNOTSUPP)));
}

#[test]
fn test_accept_reports_peer_address() {
    let (_chip, driver) = setup();

    let listener = tcp(&driver);
    listener.bind(8080).unwrap();
    listener.listen(1).unwrap();

    let client = tcp(&driver);
    client.connect(localhost(), 8080).unwrap();

    let (server, peer) = listener.accept().unwrap();
    assert!(server.is_valid());
    assert_eq!(peer, SocketAddrV4::new(Ipv4Addr::LOCALHOST, EPHEMERAL_START));
}

#[test]
fn test_accept_without_pending_connection() {
    let (_chip, driver) = setup();

    let listener = tcp(&driver);
    listener.bind(8080).unwrap();
    listener.listen(1).unwrap();

    let err = listener.accept().unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EAGAIN)));
}

#[test]
fn test_connect_refused() {
    let (_chip, driver) = setup();

    let client = tcp(&driver);
    let err = client.connect(localhost(), 9).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::ECONNREFUSED)));
    assert_eq!(driver.last_error(), errno::ECONNREFUSED);
}

#[test]
fn test_connect_unreachable_host() {
    let (_chip, driver) = setup();

    let client = tcp(&driver);
    let err = client
        .connect(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 80)
        .unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EHOSTUNREACH)));
}

#[test]
fn test_connect_ipv6_rejected_locally() {
    let (chip, driver) = setup();
    let client = tcp(&driver);
    chip.clear_log();

    let err = client.connect(IpAddr::V6(Ipv6Addr::LOCALHOST), 80).unwrap_err();
    assert!(matches!(err, LinkError::InvalidArgument(_)));
    assert_eq!(driver.last_error(), errno::EINVAL);
    assert_eq!(chip.transaction_count(), 0);
}

#[test]
fn test_peer_name() {
    let (_chip, driver) = setup();
    let (_listener, client, server) = connected_pair(&driver, 8080);

    assert_eq!(
        client.peer_name().unwrap(),
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8080)
    );
    assert_eq!(server.peer_name().unwrap().port(), EPHEMERAL_START);

    let lonely = tcp(&driver);
    let err = lonely.peer_name().unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::ENOTCONN)));
}

#[test]
fn test_connect_through_station_address() {
    let (_chip, driver) = setup();

    let listener = tcp(&driver);
    listener.bind(80).unwrap();
    listener.listen(1).unwrap();

    let client = tcp(&driver);
    client.connect(IpAddr::V4(LOCAL_IP), 80).unwrap();

    let (_server, peer) = listener.accept().unwrap();
    assert_eq!(*peer.ip(), LOCAL_IP);
}

// =============================================================================
// Data Transfer Tests
// =============================================================================

#[test]
fn test_stream_echo() {
    let (_chip, driver) = setup();
    let (_listener, client, server) = connected_pair(&driver, 7);

    assert_eq!(client.send(b"ping").unwrap(), 4);

    let mut buf = [0u8; 16];
    let got = server.recv(&mut buf).unwrap();
    assert_eq!(&buf[..got], b"ping");

    server.send(&buf[..got]).unwrap();
    let got = client.recv(&mut buf).unwrap();
    assert_eq!(&buf[..got], b"ping");
}

#[test]
fn test_recv_would_block() {
    let (_chip, driver) = setup();
    let (_listener, client, _server) = connected_pair(&driver, 7);

    let mut buf = [0u8; 8];
    let err = client.recv(&mut buf).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EAGAIN)));
    assert_eq!(driver.last_error(), errno::EAGAIN);
}

#[test]
fn test_recv_end_of_stream_is_zero() {
    let (chip, driver) = setup();
    let (_listener, client, server) = connected_pair(&driver, 7);
    drop(server);

    chip.clear_log();
    let mut buf = [0u8; 8];
    assert_eq!(client.recv(&mut buf).unwrap(), 0);
    assert_eq!(driver.last_error(), 0);

    // The zero count needed the errno to tell it apart from a failure
    assert_eq!(
        chip.transactions().iter().map(|t| t.opcode).collect::<Vec<_>>(),
        vec![Some(Opcode::SocketRecv), Some(Opcode::SocketErrno)]
    );
}

#[test]
fn test_send_on_unconnected_socket() {
    let (_chip, driver) = setup();

    let socket = tcp(&driver);
    let err = socket.send(b"data").unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::ENOTCONN)));
}

#[test]
fn test_send_capped_by_max_transfer() {
    let chip = Coprocessor::new();
    let driver = Driver::new(chip.clone(), Config::builder().max_transfer(100).build());
    let (_listener, client, server) = connected_pair(&driver, 7);

    let data = vec![0x33u8; 250];
    assert_eq!(client.send(&data).unwrap(), 100);
    assert_eq!(server.available_to_read().unwrap(), 100);
}

#[test]
fn test_oversized_transfer_setting_still_caps_datagrams() {
    let chip = Coprocessor::new();
    let mut config = Config::default();
    config.max_transfer = 8000;
    let driver = Driver::new(chip.clone(), config);

    let receiver = udp(&driver);
    receiver.bind(5000).unwrap();
    let sender = udp(&driver);

    let data = vec![0x5Au8; 5000];
    assert_eq!(sender.send_to(&data, localhost(), 5000).unwrap(), 4000);

    let mut buf = vec![0u8; 5000];
    let (got, _) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(got, 4000);
}

#[test]
fn test_zero_transfer_setting_moves_one_byte() {
    let chip = Coprocessor::new();
    let mut config = Config::default();
    config.max_transfer = 0;
    let driver = Driver::new(chip.clone(), config);
    let (_listener, client, server) = connected_pair(&driver, 7);

    assert_eq!(client.send(b"abc").unwrap(), 1);
    assert_eq!(server.available_to_read().unwrap(), 1);
}

#[test]
fn test_partial_reads() {
    let (_chip, driver) = setup();
    let (_listener, client, server) = connected_pair(&driver, 7);

    client.send(b"abcdef").unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(server.recv(&mut buf).unwrap(), 4);
    assert_eq!(&buf, b"abcd");
    assert_eq!(server.recv(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"ef");
}

#[test]
fn test_datagram_round_trip() {
    let (_chip, driver) = setup();

    let receiver = udp(&driver);
    receiver.bind(5000).unwrap();
    let sender = udp(&driver);

    assert_eq!(sender.send_to(b"hello", localhost(), 5000).unwrap(), 5);

    let mut buf = [0u8; 32];
    let (got, from) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..got], b"hello");
    assert_eq!(from, SocketAddrV4::new(Ipv4Addr::LOCALHOST, EPHEMERAL_START));
}

#[test]
fn test_datagram_truncated_to_buffer() {
    let (_chip, driver) = setup();

    let receiver = udp(&driver);
    receiver.bind(5000).unwrap();
    let sender = udp(&driver);
    sender.send_to(b"hello world", localhost(), 5000).unwrap();

    let mut buf = [0u8; 5];
    let (got, _) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(got, 5);
    assert_eq!(&buf, b"hello");

    // The rest of the datagram is gone
    let err = receiver.recv_from(&mut buf).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EAGAIN)));
}

#[test]
fn test_datagram_to_nobody_is_dropped() {
    let (_chip, driver) = setup();

    let sender = udp(&driver);
    assert_eq!(sender.send_to(b"void", localhost(), 6000).unwrap(), 4);
}

#[test]
fn test_send_to_ipv6_rejected_locally() {
    let (_chip, driver) = setup();

    let sender = udp(&driver);
    let err = sender
        .send_to(b"x", IpAddr::V6(Ipv6Addr::LOCALHOST), 5000)
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidArgument(_)));
}

#[test]
fn test_connected_datagram_send() {
    let (_chip, driver) = setup();

    let receiver = udp(&driver);
    receiver.bind(5001).unwrap();
    let sender = udp(&driver);
    sender.connect(localhost(), 5001).unwrap();

    assert_eq!(sender.send(b"dgram").unwrap(), 5);
    let mut buf = [0u8; 8];
    assert_eq!(receiver.recv(&mut buf).unwrap(), 5);
}

// =============================================================================
// Control Tests
// =============================================================================

#[test]
fn test_poll_states() {
    let (_chip, driver) = setup();

    let listener = tcp(&driver);
    listener.bind(8080).unwrap();
    listener.listen(2).unwrap();
    assert_eq!(listener.poll().unwrap(), State::NONE);

    let client = tcp(&driver);
    client.connect(localhost(), 8080).unwrap();
    assert!(listener.poll().unwrap().is_readable());

    let (server, _) = listener.accept().unwrap();
    assert_eq!(client.poll().unwrap(), State::WRITABLE);

    server.send(b"x").unwrap();
    let state = client.poll().unwrap();
    assert_eq!(state, State::READABLE | State::WRITABLE);
    assert!(!state.is_errored_out());
}

#[test]
fn test_poll_after_refused_connect() {
    let (_chip, driver) = setup();

    let client = tcp(&driver);
    assert!(client.connect(localhost(), 9).is_err());
    assert!(client.poll().unwrap().is_errored_out());
}

#[test]
fn test_available_to_read() {
    let (_chip, driver) = setup();
    let (_listener, client, server) = connected_pair(&driver, 7);

    assert_eq!(server.available_to_read().unwrap(), 0);
    client.send(b"12345").unwrap();
    assert_eq!(server.available_to_read().unwrap(), 5);
}

#[test]
fn test_set_non_blocking() {
    let (chip, driver) = setup();
    let socket = tcp(&driver);
    let raw = socket.handle().raw();

    socket.set_non_blocking(true).unwrap();
    assert!(chip.with_state(|fw| fw.network.is_non_blocking(raw)));

    socket.set_non_blocking(false).unwrap();
    assert!(!chip.with_state(|fw| fw.network.is_non_blocking(raw)));
}

#[test]
fn test_raw_ioctl() {
    let (_chip, driver) = setup();
    let socket = tcp(&driver);

    let mut arg = 1u32.to_le_bytes();
    assert_eq!(socket.ioctl(FIONBIO, &mut arg).unwrap(), 4);

    let mut arg = [0xFFu8; 4];
    assert_eq!(socket.ioctl(FIONREAD, &mut arg).unwrap(), 4);
    assert_eq!(u32::from_le_bytes(arg), 0);

    let err = socket.ioctl(0x1234, &mut arg).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EINVAL)));
}

#[test]
fn test_operations_on_closed_remote_handle() {
    let (chip, driver) = setup();
    let socket = tcp(&driver);
    let raw = socket.handle().raw();

    // Closed behind the client's back
    chip.with_state(|fw| fw.network.close(raw));

    let err = socket.bind(1234).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EBADF)));
}
