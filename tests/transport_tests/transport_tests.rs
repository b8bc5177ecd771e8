//! Transport Tests
//!
//! Tests for the transaction engine and the last-error slot.

use ninalink::error::{errno, LinkError, FAILURE};
use ninalink::protocol::{Opcode, OutParam};
use ninalink::sim::Coprocessor;
use ninalink::transport::{ErrorSlot, Transport};
use ninalink::{Config, Driver, Protocol, Type};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (Coprocessor, Driver<Coprocessor>) {
    let chip = Coprocessor::new();
    let driver = Driver::new(chip.clone(), fast_config());
    (chip, driver)
}

/// Short reply wait so dropped replies fail quickly
fn fast_config() -> Config {
    Config::builder().reply_start_attempts(32).build()
}

fn opcodes(chip: &Coprocessor) -> Vec<Option<Opcode>> {
    chip.transactions().iter().map(|t| t.opcode).collect()
}

// =============================================================================
// Error Slot Tests
// =============================================================================

#[test]
fn test_error_slot_lifecycle() {
    let mut slot = ErrorSlot::new();
    assert!(!slot.is_present());
    assert_eq!(slot.get(), None);

    slot.set(0);
    assert_eq!(slot.get(), Some(0));

    slot.set(errno::EAGAIN);
    assert_eq!(slot.get(), Some(errno::EAGAIN));

    slot.reset();
    assert_eq!(slot.get(), None);
}

#[test]
fn test_fresh_transport_queries_errno_once() {
    let chip = Coprocessor::new();
    let mut transport = Transport::new(chip.clone(), Config::default());

    assert!(!transport.error_slot().is_present());
    assert_eq!(transport.last_error(), 0);
    assert_eq!(opcodes(&chip), vec![Some(Opcode::SocketErrno)]);

    // Answered from the cache now
    assert_eq!(transport.last_error(), 0);
    assert_eq!(chip.transaction_count(), 1);
}

#[test]
fn test_execute_resets_slot() {
    let chip = Coprocessor::new();
    let mut transport = Transport::new(chip.clone(), Config::default());
    transport.set_last_error(errno::EINVAL);

    let mut code = [0u8; 1];
    let mut outs = [OutParam::new(&mut code)];
    transport
        .execute(Opcode::SocketErrno, &[], &mut outs)
        .unwrap();

    assert!(!transport.error_slot().is_present());
}

// =============================================================================
// Outcome Recording Tests
// =============================================================================

#[test]
fn test_success_needs_no_errno_query() {
    let (chip, driver) = setup();

    let socket = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    assert!(socket.is_valid());
    assert_eq!(driver.last_error(), 0);
    assert_eq!(opcodes(&chip), vec![Some(Opcode::SocketCreate)]);
}

#[test]
fn test_remote_failure_fetches_errno_in_the_same_call() {
    let (chip, driver) = setup();

    let first = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    first.bind(8080).unwrap();
    let second = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    chip.clear_log();

    let err = second.bind(8080).unwrap_err();
    assert!(matches!(err, LinkError::Remote(errno::EADDRINUSE)));
    assert_eq!(
        opcodes(&chip),
        vec![Some(Opcode::SocketBind), Some(Opcode::SocketErrno)]
    );

    // No further round trip
    assert_eq!(driver.last_error(), errno::EADDRINUSE);
    assert_eq!(chip.transaction_count(), 2);
}

#[test]
fn test_local_failure_never_touches_bus() {
    let chip = Coprocessor::new();
    let mut transport = Transport::new(chip.clone(), Config::default());

    let too_long = vec![0u8; 256];
    let mut ok = [0u8; 1];
    let mut outs = [OutParam::new(&mut ok)];
    let err = transport
        .execute(Opcode::SocketBind, &[&too_long], &mut outs)
        .unwrap_err();

    assert!(matches!(err, LinkError::ParamTooLarge { .. }));
    assert_eq!(transport.last_error(), errno::EINVAL);
    assert_eq!(chip.transaction_count(), 0);
    assert_eq!(chip.begin_count(), 0);
}

// =============================================================================
// Transport Failure Tests
// =============================================================================

#[test]
fn test_unresponsive_chip_reports_failure() {
    let (chip, driver) = setup();
    chip.set_unresponsive(true);

    let mut prefs = driver.preferences();
    let err = prefs.begin("app", false, None).unwrap_err();

    assert!(err.is_transport());
    assert!(matches!(err, LinkError::Bus(_)));
    assert_eq!(driver.last_error(), FAILURE);
    assert_eq!(chip.transaction_count(), 0);
}

#[test]
fn test_errno_query_on_unresponsive_chip() {
    let chip = Coprocessor::new();
    let mut transport = Transport::new(chip.clone(), Config::default());
    chip.set_unresponsive(true);

    assert_eq!(transport.last_error(), FAILURE);
    assert_eq!(transport.error_slot().get(), Some(FAILURE));
}

#[test]
fn test_corrupt_reply_is_desync() {
    let (chip, driver) = setup();
    let storage = driver.storage();

    chip.corrupt_next_reply();
    let err = storage.exists("a.txt").unwrap_err();
    assert!(matches!(err, LinkError::Desync { .. }));
    assert_eq!(driver.last_error(), FAILURE);

    // The leftover reply bytes are discarded; the next call is clean
    assert_eq!(storage.exists("a.txt").unwrap(), None);
    assert_eq!(driver.last_error(), 0);
}

#[test]
fn test_dropped_reply_is_no_reply() {
    let (chip, driver) = setup();
    let storage = driver.storage();

    chip.drop_next_reply();
    let err = storage.write("a.txt", 0, b"hello").unwrap_err();
    assert!(matches!(err, LinkError::NoReply));
    assert_eq!(driver.last_error(), FAILURE);

    // The command itself ran on the chip
    assert_eq!(chip.file("a.txt"), Some(b"hello".to_vec()));
    assert_eq!(storage.exists("a.txt").unwrap(), Some(5));
}

#[test]
fn test_recovery_after_unresponsive() {
    let (chip, driver) = setup();
    chip.set_unresponsive(true);
    assert!(driver.socket(Type::Stream, Protocol::TCP).is_err());

    chip.set_unresponsive(false);
    let socket = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    assert!(socket.is_valid());
    assert_eq!(driver.last_error(), 0);
}

// =============================================================================
// Framing And Initialization Tests
// =============================================================================

#[test]
fn test_every_request_is_padded() {
    let (chip, driver) = setup();

    let mut prefs = driver.preferences();
    prefs.begin("wifi", false, None).unwrap();
    prefs.put_str("ssid", "home-network").unwrap();
    prefs.put("channel", 6u8).unwrap();
    driver.storage().write("cfg.bin", 0, &[1, 2, 3]).unwrap();

    let log = chip.transactions();
    assert!(!log.is_empty());
    for transaction in log {
        assert_eq!(
            transaction.request_len % 4,
            0,
            "{:?} clocked {} bytes",
            transaction.opcode,
            transaction.request_len
        );
    }
}

#[test]
fn test_bus_initialized_lazily() {
    let (chip, driver) = setup();
    assert_eq!(chip.begin_count(), 0);

    driver.storage().exists("x").unwrap();
    driver.storage().exists("y").unwrap();
    assert_eq!(chip.begin_count(), 1);

    driver.reinitialize().unwrap();
    assert_eq!(chip.begin_count(), 2);
}

#[test]
fn test_reinitialize_forgets_cached_error() {
    let (chip, driver) = setup();
    let socket = driver.socket(Type::DGram, Protocol::UDP).unwrap();
    assert!(socket.accept().is_err());
    assert_eq!(driver.last_error(), errno::EINVAL);

    driver.reinitialize().unwrap();
    chip.clear_log();

    // The chip's errno is cleared by the next socket call only, so the
    // fresh query still sees the old value
    assert_eq!(driver.last_error(), errno::EINVAL);
    assert_eq!(opcodes(&chip), vec![Some(Opcode::SocketErrno)]);
}

#[test]
fn test_driver_clones_share_error_slot() {
    let (_chip, driver) = setup();
    let other = driver.clone();

    let socket = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    assert!(socket.listen(1).is_ok());
    assert!(socket.accept().is_err());

    assert_eq!(other.last_error(), errno::EAGAIN);
}
