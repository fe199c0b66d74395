//! Typed tag values and their 16-bit word layout.
//!
//! The tag layer works over a closed union of value kinds instead of an
//! open type family, so the wire encoding is one exhaustively tested
//! table. All multi-word numerics are laid out high word first; floats
//! serialize through their IEEE bit patterns; strings pack two ASCII
//! characters per word with the first character in the high byte.

use crate::bcd;
use crate::error::{FinsError, Result};

/// Default character length for string tags registered without a length
/// bracket.
pub const DEFAULT_STRING_LENGTH: u16 = 16;

/// Discriminant for the closed set of tag value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Boolean; a single bit when the address carries a bit index,
    /// otherwise a whole word compared against zero.
    Bool,
    /// Unsigned 8-bit value in the low byte of one word.
    Byte,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer, two words.
    Int32,
    /// Unsigned 32-bit integer, two words.
    UInt32,
    /// IEEE 754 single-precision float, two words.
    Float32,
    /// IEEE 754 double-precision float, four words.
    Float64,
    /// ASCII string, two characters per word.
    Text,
    /// Signed 16-bit value stored as packed BCD in one word.
    Bcd16,
    /// Unsigned 16-bit value stored as packed BCD in one word.
    UBcd16,
    /// Signed 32-bit value stored as packed BCD in two words.
    Bcd32,
    /// Unsigned 32-bit value stored as packed BCD in two words.
    UBcd32,
}

impl ValueKind {
    /// Number of 16-bit words a value of this kind occupies.
    ///
    /// `length` is the declared character count for string tags; other
    /// kinds ignore it.
    pub fn word_count(self, length: Option<u16>) -> u16 {
        match self {
            ValueKind::Bool
            | ValueKind::Byte
            | ValueKind::Int16
            | ValueKind::UInt16
            | ValueKind::Bcd16
            | ValueKind::UBcd16 => 1,
            ValueKind::Int32
            | ValueKind::UInt32
            | ValueKind::Float32
            | ValueKind::Bcd32
            | ValueKind::UBcd32 => 2,
            ValueKind::Float64 => 4,
            ValueKind::Text => length.unwrap_or(DEFAULT_STRING_LENGTH).div_ceil(2),
        }
    }
}

/// A typed tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Boolean value.
    Bool(bool),
    /// Byte value.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Single-precision float.
    Float32(f32),
    /// Double-precision float.
    Float64(f64),
    /// ASCII string.
    Text(String),
    /// Signed 16-bit BCD value.
    Bcd16(i16),
    /// Unsigned 16-bit BCD value.
    UBcd16(u16),
    /// Signed 32-bit BCD value.
    Bcd32(i32),
    /// Unsigned 32-bit BCD value.
    UBcd32(u32),
}

impl TagValue {
    /// Returns the kind discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            TagValue::Bool(_) => ValueKind::Bool,
            TagValue::Byte(_) => ValueKind::Byte,
            TagValue::Int16(_) => ValueKind::Int16,
            TagValue::UInt16(_) => ValueKind::UInt16,
            TagValue::Int32(_) => ValueKind::Int32,
            TagValue::UInt32(_) => ValueKind::UInt32,
            TagValue::Float32(_) => ValueKind::Float32,
            TagValue::Float64(_) => ValueKind::Float64,
            TagValue::Text(_) => ValueKind::Text,
            TagValue::Bcd16(_) => ValueKind::Bcd16,
            TagValue::UBcd16(_) => ValueKind::UBcd16,
            TagValue::Bcd32(_) => ValueKind::Bcd32,
            TagValue::UBcd32(_) => ValueKind::UBcd32,
        }
    }

    /// Serializes the value into its word layout.
    ///
    /// `length` is the declared character count for string tags, which
    /// fixes the word count regardless of the actual string length:
    /// shorter strings are NUL-padded, longer ones truncated.
    pub fn encode_words(&self, length: Option<u16>) -> Vec<u16> {
        match self {
            TagValue::Bool(v) => vec![u16::from(*v)],
            TagValue::Byte(v) => vec![u16::from(*v)],
            TagValue::Int16(v) => vec![*v as u16],
            TagValue::UInt16(v) => vec![*v],
            TagValue::Int32(v) => split_u32(*v as u32),
            TagValue::UInt32(v) => split_u32(*v),
            TagValue::Float32(v) => split_u32(v.to_bits()),
            TagValue::Float64(v) => split_u64(v.to_bits()),
            TagValue::Text(s) => encode_text(s, length.unwrap_or(DEFAULT_STRING_LENGTH)),
            TagValue::Bcd16(v) => vec![u16::from_be_bytes(bcd::i16_to_bcd(*v))],
            TagValue::UBcd16(v) => vec![u16::from_be_bytes(bcd::u16_to_bcd(*v))],
            TagValue::Bcd32(v) => bcd_words(bcd::i32_to_bcd(*v)),
            TagValue::UBcd32(v) => bcd_words(bcd::u32_to_bcd(*v)),
        }
    }

    /// Deserializes a value of `kind` from its word layout.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::ProtocolFraming` if `words` is shorter than the
    /// kind's layout requires.
    pub fn decode_words(kind: ValueKind, words: &[u16], length: Option<u16>) -> Result<Self> {
        let needed = usize::from(kind.word_count(length));
        if words.len() < needed {
            return Err(FinsError::framing(format!(
                "value needs {} words, got {}",
                needed,
                words.len()
            )));
        }
        Ok(match kind {
            ValueKind::Bool => TagValue::Bool(words[0] != 0),
            ValueKind::Byte => TagValue::Byte((words[0] & 0x00FF) as u8),
            ValueKind::Int16 => TagValue::Int16(words[0] as i16),
            ValueKind::UInt16 => TagValue::UInt16(words[0]),
            ValueKind::Int32 => TagValue::Int32(join_u32(words[0], words[1]) as i32),
            ValueKind::UInt32 => TagValue::UInt32(join_u32(words[0], words[1])),
            ValueKind::Float32 => TagValue::Float32(f32::from_bits(join_u32(words[0], words[1]))),
            ValueKind::Float64 => TagValue::Float64(f64::from_bits(
                (u64::from(join_u32(words[0], words[1])) << 32)
                    | u64::from(join_u32(words[2], words[3])),
            )),
            ValueKind::Text => TagValue::Text(decode_text(
                &words[..needed],
                length.unwrap_or(DEFAULT_STRING_LENGTH),
            )),
            ValueKind::Bcd16 => TagValue::Bcd16(bcd::bcd_to_i16(&words[0].to_be_bytes())?),
            ValueKind::UBcd16 => TagValue::UBcd16(bcd::bcd_to_u16(&words[0].to_be_bytes())?),
            ValueKind::Bcd32 => TagValue::Bcd32(bcd::bcd_to_i32(&join_bcd_bytes(words))?),
            ValueKind::UBcd32 => TagValue::UBcd32(bcd::bcd_to_u32(&join_bcd_bytes(words))?),
        })
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{}", v),
            TagValue::Byte(v) => write!(f, "{}", v),
            TagValue::Int16(v) => write!(f, "{}", v),
            TagValue::UInt16(v) => write!(f, "{}", v),
            TagValue::Int32(v) => write!(f, "{}", v),
            TagValue::UInt32(v) => write!(f, "{}", v),
            TagValue::Float32(v) => write!(f, "{}", v),
            TagValue::Float64(v) => write!(f, "{}", v),
            TagValue::Text(v) => write!(f, "{}", v),
            TagValue::Bcd16(v) => write!(f, "{}", v),
            TagValue::UBcd16(v) => write!(f, "{}", v),
            TagValue::Bcd32(v) => write!(f, "{}", v),
            TagValue::UBcd32(v) => write!(f, "{}", v),
        }
    }
}

fn split_u32(value: u32) -> Vec<u16> {
    vec![(value >> 16) as u16, value as u16]
}

fn split_u64(value: u64) -> Vec<u16> {
    vec![
        (value >> 48) as u16,
        (value >> 32) as u16,
        (value >> 16) as u16,
        value as u16,
    ]
}

fn join_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn bcd_words(bytes: [u8; 4]) -> Vec<u16> {
    vec![
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

fn join_bcd_bytes(words: &[u16]) -> [u8; 4] {
    let high = words[0].to_be_bytes();
    let low = words[1].to_be_bytes();
    [high[0], high[1], low[0], low[1]]
}

fn encode_text(text: &str, length: u16) -> Vec<u16> {
    let mut bytes: Vec<u8> = text.bytes().take(usize::from(length)).collect();
    bytes.resize(usize::from(length.div_ceil(2)) * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn decode_text(words: &[u16], length: u16) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes.truncate(usize::from(length));
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Rust types that can be registered as tag values.
///
/// Sealed: the set of kinds is closed, so the trait is only implemented
/// inside this crate.
pub trait PlcTagValue: sealed::Sealed + Clone + Send + Sync + 'static {
    /// The kind this type maps onto.
    const KIND: ValueKind;

    /// Wraps the value into the union.
    fn into_tag_value(self) -> TagValue;

    /// Extracts the value from the union; `None` on kind mismatch.
    fn from_tag_value(value: &TagValue) -> Option<Self>;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! impl_tag_value {
    ($ty:ty, $kind:ident, $pattern:pat => $extract:expr, $wrap:expr) => {
        impl sealed::Sealed for $ty {}
        impl PlcTagValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn into_tag_value(self) -> TagValue {
                $wrap(self)
            }

            fn from_tag_value(value: &TagValue) -> Option<Self> {
                match value {
                    $pattern => Some($extract),
                    _ => None,
                }
            }
        }
    };
}

impl_tag_value!(bool, Bool, TagValue::Bool(v) => *v, TagValue::Bool);
impl_tag_value!(u8, Byte, TagValue::Byte(v) => *v, TagValue::Byte);
impl_tag_value!(i16, Int16, TagValue::Int16(v) => *v, TagValue::Int16);
impl_tag_value!(u16, UInt16, TagValue::UInt16(v) => *v, TagValue::UInt16);
impl_tag_value!(i32, Int32, TagValue::Int32(v) => *v, TagValue::Int32);
impl_tag_value!(u32, UInt32, TagValue::UInt32(v) => *v, TagValue::UInt32);
impl_tag_value!(f32, Float32, TagValue::Float32(v) => *v, TagValue::Float32);
impl_tag_value!(f64, Float64, TagValue::Float64(v) => *v, TagValue::Float64);
impl_tag_value!(String, Text, TagValue::Text(v) => v.clone(), TagValue::Text);

/// Signed 16-bit value held as packed BCD on the PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bcd16(pub i16);

/// Unsigned 16-bit value held as packed BCD on the PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UBcd16(pub u16);

/// Signed 32-bit value held as packed BCD on the PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bcd32(pub i32);

/// Unsigned 32-bit value held as packed BCD on the PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UBcd32(pub u32);

impl_tag_value!(Bcd16, Bcd16, TagValue::Bcd16(v) => Bcd16(*v), |v: Bcd16| TagValue::Bcd16(v.0));
impl_tag_value!(UBcd16, UBcd16, TagValue::UBcd16(v) => UBcd16(*v), |v: UBcd16| TagValue::UBcd16(v.0));
impl_tag_value!(Bcd32, Bcd32, TagValue::Bcd32(v) => Bcd32(*v), |v: Bcd32| TagValue::Bcd32(v.0));
impl_tag_value!(UBcd32, UBcd32, TagValue::UBcd32(v) => UBcd32(*v), |v: UBcd32| TagValue::UBcd32(v.0));
