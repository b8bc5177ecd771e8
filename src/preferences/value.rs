//! Preference value types
//!
//! Every entry carries a one-byte type tag. Scalars travel as their
//! little-endian byte image; floats have no tag of their own and travel as
//! blobs of their exact width.

use std::mem::size_of;

/// Stored type of a preference entry
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceType {
    I8 = 0,
    U8 = 1,
    I16 = 2,
    U16 = 3,
    I32 = 4,
    U32 = 5,
    I64 = 6,
    U64 = 7,
    Str = 8,
    Blob = 9,
    /// No such entry
    Invalid = 10,
}

impl PreferenceType {
    /// Decode a type tag; unknown tags read as `Invalid`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PreferenceType::I8,
            1 => PreferenceType::U8,
            2 => PreferenceType::I16,
            3 => PreferenceType::U16,
            4 => PreferenceType::I32,
            5 => PreferenceType::U32,
            6 => PreferenceType::I64,
            7 => PreferenceType::U64,
            8 => PreferenceType::Str,
            9 => PreferenceType::Blob,
            _ => PreferenceType::Invalid,
        }
    }

    /// Width of fixed-size types, `None` for strings and blobs
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            PreferenceType::I8 | PreferenceType::U8 => Some(1),
            PreferenceType::I16 | PreferenceType::U16 => Some(2),
            PreferenceType::I32 | PreferenceType::U32 => Some(4),
            PreferenceType::I64 | PreferenceType::U64 => Some(8),
            _ => None,
        }
    }

    pub fn exists(self) -> bool {
        self != PreferenceType::Invalid
    }
}

/// A fixed-width value that can be stored as a preference
pub trait PrefValue: Copy {
    /// Tag the value is stored under
    const TYPE: PreferenceType;

    /// Bytes on the wire
    const SIZE: usize;

    fn to_bytes(&self) -> Vec<u8>;

    /// Rebuild from `SIZE` bytes (shorter input is zero-extended)
    fn from_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_pref_value {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl PrefValue for $ty {
                const TYPE: PreferenceType = PreferenceType::$tag;
                const SIZE: usize = size_of::<$ty>();

                fn to_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn from_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; size_of::<$ty>()];
                    let len = bytes.len().min(raw.len());
                    raw[..len].copy_from_slice(&bytes[..len]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_pref_value! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => Blob,
    f64 => Blob,
}

impl PrefValue for bool {
    const TYPE: PreferenceType = PreferenceType::U8;
    const SIZE: usize = 1;

    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        bytes.first().copied().unwrap_or(0) != 0
    }
}

