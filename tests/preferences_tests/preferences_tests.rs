//! Preferences Tests
//!
//! Tests for typed preference storage.

use ninalink::error::errno;
use ninalink::protocol::Opcode;
use ninalink::sim::{Coprocessor, DEFAULT_CAPACITY};
use ninalink::{Config, Driver, PrefValue, PreferenceType, Preferences, Protocol, Type};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (Coprocessor, Driver<Coprocessor>) {
    let chip = Coprocessor::new();
    let driver = Driver::new(chip.clone(), Config::default());
    (chip, driver)
}

fn open(driver: &Driver<Coprocessor>, namespace: &str) -> Preferences<Coprocessor> {
    let mut prefs = driver.preferences();
    assert!(prefs.begin(namespace, false, None).unwrap());
    prefs
}

fn opcodes(chip: &Coprocessor) -> Vec<Option<Opcode>> {
    chip.transactions().iter().map(|t| t.opcode).collect()
}

// =============================================================================
// Value Type Tests
// =============================================================================

#[test]
fn test_type_tags() {
    assert_eq!(PreferenceType::from_u8(4), PreferenceType::I32);
    assert_eq!(PreferenceType::from_u8(9), PreferenceType::Blob);
    assert_eq!(PreferenceType::from_u8(42), PreferenceType::Invalid);

    assert_eq!(PreferenceType::U16.fixed_width(), Some(2));
    assert_eq!(PreferenceType::I64.fixed_width(), Some(8));
    assert_eq!(PreferenceType::Str.fixed_width(), None);

    assert!(!PreferenceType::Invalid.exists());
    assert!(PreferenceType::Blob.exists());
}

#[test]
fn test_value_images() {
    assert_eq!(0x1234_5678u32.to_bytes(), vec![0x78, 0x56, 0x34, 0x12]);
    assert_eq!(<i16 as PrefValue>::TYPE, PreferenceType::I16);
    assert_eq!(<u64 as PrefValue>::SIZE, 8);

    // Short input is zero-extended
    assert_eq!(u32::from_bytes(&[1]), 1);
    assert_eq!(i64::from_bytes(&[]), 0);
}

#[test]
fn test_bool_and_float_images() {
    assert_eq!(<bool as PrefValue>::TYPE, PreferenceType::U8);
    assert_eq!(true.to_bytes(), vec![1]);
    assert!(bool::from_bytes(&[7]));

    assert_eq!(<f32 as PrefValue>::TYPE, PreferenceType::Blob);
    assert_eq!(<f64 as PrefValue>::SIZE, 8);
    assert_eq!(f64::from_bytes(&2.5f64.to_bytes()), 2.5);
}

// =============================================================================
// Namespace Tests
// =============================================================================

#[test]
fn test_begin_and_end() {
    let (chip, driver) = setup();

    let mut prefs = driver.preferences();
    assert_eq!(prefs.namespace(), None);
    assert!(prefs.begin("app", false, None).unwrap());
    assert_eq!(prefs.namespace(), Some("app"));

    prefs.end();
    assert_eq!(prefs.namespace(), None);
    assert_eq!(
        opcodes(&chip),
        vec![Some(Opcode::PrefBegin), Some(Opcode::PrefEnd)]
    );

    // Nothing open, nothing sent
    prefs.end();
    assert_eq!(chip.transaction_count(), 2);
}

#[test]
fn test_drop_ends_namespace() {
    let (chip, driver) = setup();

    {
        let _prefs = open(&driver, "app");
    }
    assert_eq!(opcodes(&chip).last(), Some(&Some(Opcode::PrefEnd)));
}

#[test]
fn test_begin_rejections() {
    let (chip, driver) = setup();
    let mut prefs = driver.preferences();

    assert!(!prefs.begin("a-namespace-too-long", false, None).unwrap());
    assert!(!prefs.begin("missing", true, None).unwrap());
    assert!(!prefs.begin("app", false, Some("spiffs")).unwrap());
    assert_eq!(prefs.namespace(), None);

    assert!(prefs.begin("app", false, Some("nvs")).unwrap());
    assert_eq!(driver.last_error(), 0);
    drop(prefs);

    // The rejected read-only namespace was not created
    assert!(chip.with_state(|fw| !fw.nvs.namespaces().contains_key("missing")));
}

#[test]
fn test_namespaces_are_isolated() {
    let (_chip, driver) = setup();

    let mut prefs = open(&driver, "one");
    prefs.put("n", 1u32).unwrap();
    prefs.end();

    assert!(prefs.begin("two", false, None).unwrap());
    assert!(!prefs.is_key("n").unwrap());
    assert_eq!(prefs.get("n", 99u32).unwrap(), 99);
}

#[test]
fn test_read_only_namespace_rejects_writes() {
    let (_chip, driver) = setup();

    let mut prefs = open(&driver, "app");
    prefs.put("n", 5i32).unwrap();
    prefs.end();

    assert!(prefs.begin("app", true, None).unwrap());
    assert_eq!(prefs.put("n", 6i32).unwrap(), 0);
    assert!(!prefs.remove("n").unwrap());
    assert!(!prefs.clear().unwrap());
    assert_eq!(prefs.get("n", 0i32).unwrap(), 5);
}

// =============================================================================
// Scalar Tests
// =============================================================================

#[test]
fn test_scalar_round_trips() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "scalars");

    assert_eq!(prefs.put("i8", -5i8).unwrap(), 1);
    assert_eq!(prefs.put("u8", 200u8).unwrap(), 1);
    assert_eq!(prefs.put("i16", -30_000i16).unwrap(), 2);
    assert_eq!(prefs.put("u16", 60_000u16).unwrap(), 2);
    assert_eq!(prefs.put("i32", i32::MIN).unwrap(), 4);
    assert_eq!(prefs.put("u32", u32::MAX).unwrap(), 4);
    assert_eq!(prefs.put("i64", -1i64 << 40).unwrap(), 8);
    assert_eq!(prefs.put("u64", u64::MAX - 1).unwrap(), 8);

    assert_eq!(prefs.get("i8", 0i8).unwrap(), -5);
    assert_eq!(prefs.get("u8", 0u8).unwrap(), 200);
    assert_eq!(prefs.get("i16", 0i16).unwrap(), -30_000);
    assert_eq!(prefs.get("u16", 0u16).unwrap(), 60_000);
    assert_eq!(prefs.get("i32", 0i32).unwrap(), i32::MIN);
    assert_eq!(prefs.get("u32", 0u32).unwrap(), u32::MAX);
    assert_eq!(prefs.get("i64", 0i64).unwrap(), -1i64 << 40);
    assert_eq!(prefs.get("u64", 0u64).unwrap(), u64::MAX - 1);

    assert_eq!(prefs.get_type("u16").unwrap(), PreferenceType::U16);
    assert_eq!(prefs.get_type("i64").unwrap(), PreferenceType::I64);
}

#[test]
fn test_bool_round_trip() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    assert_eq!(prefs.put("enabled", true).unwrap(), 1);
    assert!(prefs.get("enabled", false).unwrap());
    assert_eq!(prefs.get_type("enabled").unwrap(), PreferenceType::U8);
}

#[test]
fn test_float_round_trip() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    assert_eq!(prefs.put("ratio", 0.75f32).unwrap(), 4);
    assert_eq!(prefs.put("pi", std::f64::consts::PI).unwrap(), 8);

    assert_eq!(prefs.get("ratio", 0.0f32).unwrap(), 0.75);
    assert_eq!(prefs.get("pi", 0.0f64).unwrap(), std::f64::consts::PI);
    assert_eq!(prefs.get_type("pi").unwrap(), PreferenceType::Blob);
    assert_eq!(prefs.bytes_length("pi").unwrap(), 8);
}

#[test]
fn test_overwrite_scalar() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    prefs.put("boots", 1u32).unwrap();
    prefs.put("boots", 2u32).unwrap();
    assert_eq!(prefs.get("boots", 0u32).unwrap(), 2);
}

// =============================================================================
// Absent Key Tests
// =============================================================================

#[test]
fn test_absent_key_returns_default_without_fetch() {
    let (chip, driver) = setup();
    let prefs = open(&driver, "app");
    chip.clear_log();

    assert_eq!(prefs.get("missing", 42u32).unwrap(), 42);
    assert_eq!(prefs.get_string("missing", "fallback").unwrap(), "fallback");

    assert!(!opcodes(&chip).contains(&Some(Opcode::PrefGet)));
    assert!(!opcodes(&chip).contains(&Some(Opcode::PrefLen)));
    assert!(!prefs.is_key("missing").unwrap());
}

#[test]
fn test_absent_key_keeps_previous_error() {
    let (chip, driver) = setup();
    let prefs = open(&driver, "app");

    let first = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    first.bind(80).unwrap();
    let second = driver.socket(Type::Stream, Protocol::TCP).unwrap();
    assert!(second.bind(80).is_err());

    assert_eq!(prefs.get("missing", 7u8).unwrap(), 7);

    chip.clear_log();
    assert_eq!(driver.last_error(), errno::EADDRINUSE);
    assert_eq!(chip.transaction_count(), 0);
}

// =============================================================================
// String Tests
// =============================================================================

#[test]
fn test_string_round_trip() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "wifi");

    assert_eq!(prefs.put_str("ssid", "home-network").unwrap(), 12);
    assert_eq!(prefs.bytes_length("ssid").unwrap(), 13);
    assert_eq!(prefs.get_string("ssid", "").unwrap(), "home-network");
    assert_eq!(prefs.get_type("ssid").unwrap(), PreferenceType::Str);
}

#[test]
fn test_empty_string() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    assert_eq!(prefs.put_str("empty", "").unwrap(), 0);
    assert_eq!(prefs.bytes_length("empty").unwrap(), 1);
    assert_eq!(prefs.get_string("empty", "default").unwrap(), "");
}

#[test]
fn test_string_stops_at_embedded_nul() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    assert_eq!(prefs.put_str("name", "abc\0def").unwrap(), 3);
    assert_eq!(prefs.get_string("name", "").unwrap(), "abc");
}

#[test]
fn test_get_str_into() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");
    prefs.put_str("host", "example.org").unwrap();

    let mut buf = vec![0u8; prefs.bytes_length("host").unwrap()];
    let got = prefs.get_str_into("host", &mut buf).unwrap();

    assert_eq!(got, 12);
    assert_eq!(&buf, b"example.org\0");
}

// =============================================================================
// Blob Tests
// =============================================================================

#[test]
fn test_blob_with_embedded_zeros() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    let blob = [0x00, 0x01, 0x00, 0xFF, 0x00];
    assert_eq!(prefs.put_bytes("key", &blob).unwrap(), 5);
    assert_eq!(prefs.bytes_length("key").unwrap(), 5);

    let mut buf = [0xAAu8; 5];
    assert_eq!(prefs.get_bytes("key", &mut buf).unwrap(), 5);
    assert_eq!(buf, blob);
}

#[test]
fn test_blob_into_small_buffer() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");
    prefs.put_bytes("cert", &[7u8; 64]).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(prefs.get_bytes("cert", &mut buf).unwrap(), 16);
    assert_eq!(buf, [7u8; 16]);
}

#[test]
fn test_large_blob() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    let blob: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(prefs.put_bytes("big", &blob).unwrap(), 2000);

    let mut buf = vec![0u8; prefs.bytes_length("big").unwrap()];
    assert_eq!(prefs.get_bytes("big", &mut buf).unwrap(), 2000);
    assert_eq!(buf, blob);
}

// =============================================================================
// Entry Management Tests
// =============================================================================

#[test]
fn test_remove() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");
    prefs.put("a", 1u8).unwrap();
    prefs.put("b", 2u8).unwrap();

    assert!(prefs.remove("a").unwrap());
    assert!(!prefs.is_key("a").unwrap());
    assert!(!prefs.remove("a").unwrap());

    // Other entries untouched
    assert_eq!(prefs.get("b", 0u8).unwrap(), 2);
}

#[test]
fn test_clear() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");
    prefs.put("a", 1u8).unwrap();
    prefs.put_str("b", "two").unwrap();

    assert!(prefs.clear().unwrap());
    assert!(!prefs.is_key("a").unwrap());
    assert!(!prefs.is_key("b").unwrap());
}

#[test]
fn test_free_entries() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");
    assert_eq!(prefs.free_entries().unwrap(), DEFAULT_CAPACITY);

    prefs.put("n", 1u32).unwrap();
    assert_eq!(prefs.free_entries().unwrap(), DEFAULT_CAPACITY - 1);

    // Header slot plus two 32-byte data slots
    prefs.put_str("s", &"x".repeat(40)).unwrap();
    assert_eq!(prefs.free_entries().unwrap(), DEFAULT_CAPACITY - 4);

    prefs.clear().unwrap();
    assert_eq!(prefs.free_entries().unwrap(), DEFAULT_CAPACITY);
}

#[test]
fn test_key_too_long() {
    let (_chip, driver) = setup();
    let prefs = open(&driver, "app");

    assert_eq!(prefs.put("a-key-that-is-too-long", 1u8).unwrap(), 0);
    assert!(!prefs.is_key("a-key-that-is-too-long").unwrap());
}

#[test]
fn test_operations_without_namespace() {
    let (_chip, driver) = setup();
    let prefs = driver.preferences();

    assert_eq!(prefs.put("n", 1u32).unwrap(), 0);
    assert_eq!(prefs.get_type("n").unwrap(), PreferenceType::Invalid);
    assert_eq!(prefs.get("n", 3u32).unwrap(), 3);
}
