//! Tagged values exchanged with the module.

use crate::error::{WireError, WireResult};
use crate::kind::ValueKind;
use crate::slot::{PAYLOAD_SIZE, Slot};

/// A value that can cross the module/host boundary.
///
/// Every variant names its kind explicitly; there is no inference from the
/// shape of a number.
#[derive(Debug, Clone, PartialEq)]
pub enum JsniValue {
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Boolean.
    Bool(bool),
    /// A single UTF-16 code unit.
    Char(u16),
    /// UTF-8 text.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Explicit absence of a value.
    Null,
}

impl JsniValue {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            JsniValue::I8(_) => ValueKind::I8,
            JsniValue::I16(_) => ValueKind::I16,
            JsniValue::I32(_) => ValueKind::I32,
            JsniValue::I64(_) => ValueKind::I64,
            JsniValue::U8(_) => ValueKind::U8,
            JsniValue::U16(_) => ValueKind::U16,
            JsniValue::U32(_) => ValueKind::U32,
            JsniValue::U64(_) => ValueKind::U64,
            JsniValue::F32(_) => ValueKind::F32,
            JsniValue::F64(_) => ValueKind::F64,
            JsniValue::Bool(_) => ValueKind::Bool,
            JsniValue::Char(_) => ValueKind::Char,
            JsniValue::String(_) => ValueKind::String,
            JsniValue::Bytes(_) => ValueKind::Bytes,
            JsniValue::Null => ValueKind::Null,
        }
    }

    /// Encode a value whose payload lives inline in the slot.
    ///
    /// Signed integers are sign-extended to 64 bits, matching how the module
    /// side widens them.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::NotScalar`] for strings and bytes, which need
    /// memory outside the slot.
    pub fn to_scalar_slot(&self) -> WireResult<Slot> {
        let kind = self.kind();
        let word = match *self {
            JsniValue::I8(v) => v as i64 as u64,
            JsniValue::I16(v) => v as i64 as u64,
            JsniValue::I32(v) => v as i64 as u64,
            JsniValue::I64(v) => v as u64,
            JsniValue::U8(v) => v as u64,
            JsniValue::U16(v) => v as u64,
            JsniValue::U32(v) => v as u64,
            JsniValue::U64(v) => v,
            JsniValue::F32(v) => v.to_bits() as u64,
            JsniValue::F64(v) => v.to_bits(),
            JsniValue::Bool(v) => v as u64,
            JsniValue::Char(v) => v as u64,
            JsniValue::Null => 0,
            JsniValue::String(_) | JsniValue::Bytes(_) => return Err(WireError::NotScalar(kind)),
        };
        Ok(Slot::from_word(kind, word))
    }

    /// Decode an inline scalar payload of the given kind.
    ///
    /// Only the kind's natural width is read.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::NotScalar`] for strings and bytes.
    pub fn from_scalar_payload(kind: ValueKind, payload: &[u8; PAYLOAD_SIZE]) -> WireResult<Self> {
        let p = payload;
        Ok(match kind {
            ValueKind::I8 => JsniValue::I8(p[0] as i8),
            ValueKind::I16 => JsniValue::I16(i16::from_le_bytes([p[0], p[1]])),
            ValueKind::I32 => JsniValue::I32(i32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            ValueKind::I64 => JsniValue::I64(i64::from_le_bytes(*p)),
            ValueKind::U8 => JsniValue::U8(p[0]),
            ValueKind::U16 => JsniValue::U16(u16::from_le_bytes([p[0], p[1]])),
            ValueKind::U32 => JsniValue::U32(u32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            ValueKind::U64 => JsniValue::U64(u64::from_le_bytes(*p)),
            ValueKind::F32 => JsniValue::F32(f32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            ValueKind::F64 => JsniValue::F64(f64::from_le_bytes(*p)),
            ValueKind::Bool => JsniValue::Bool(p[0] != 0),
            ValueKind::Char => JsniValue::Char(u16::from_le_bytes([p[0], p[1]])),
            ValueKind::Null => JsniValue::Null,
            ValueKind::String | ValueKind::Bytes => return Err(WireError::NotScalar(kind)),
        })
    }

    /// Decode a scalar slot, validating its tag.
    pub fn from_scalar_slot(slot: &Slot) -> WireResult<Self> {
        Self::from_scalar_payload(slot.kind()?, slot.payload())
    }

    /// Whether this is [`JsniValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, JsniValue::Null)
    }

    /// Any integer kind widened to `i64`, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            JsniValue::I8(v) => Some(v as i64),
            JsniValue::I16(v) => Some(v as i64),
            JsniValue::I32(v) => Some(v as i64),
            JsniValue::I64(v) => Some(v),
            JsniValue::U8(v) => Some(v as i64),
            JsniValue::U16(v) => Some(v as i64),
            JsniValue::U32(v) => Some(v as i64),
            JsniValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Any numeric kind as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            JsniValue::F32(v) => Some(v as f64),
            JsniValue::F64(v) => Some(v),
            JsniValue::U64(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// The boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            JsniValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// The code unit as a `char`, if it is not a lone surrogate.
    pub fn as_char(&self) -> Option<char> {
        match *self {
            JsniValue::Char(unit) => char::from_u32(unit as u32),
            _ => None,
        }
    }

    /// The text payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsniValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The byte payload; strings expose their UTF-8 bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            JsniValue::Bytes(b) => Some(b),
            JsniValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

macro_rules! impl_from_primitive {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for JsniValue {
            fn from(value: $ty) -> Self {
                JsniValue::$variant(value)
            }
        }
    };
}

impl_from_primitive!(i8, I8);
impl_from_primitive!(i16, I16);
impl_from_primitive!(i32, I32);
impl_from_primitive!(i64, I64);
impl_from_primitive!(u8, U8);
impl_from_primitive!(u16, U16);
impl_from_primitive!(u32, U32);
impl_from_primitive!(u64, U64);
impl_from_primitive!(f32, F32);
impl_from_primitive!(f64, F64);
impl_from_primitive!(bool, Bool);
impl_from_primitive!(String, String);
impl_from_primitive!(Vec<u8>, Bytes);

impl From<&str> for JsniValue {
    fn from(value: &str) -> Self {
        JsniValue::String(value.to_string())
    }
}

impl From<&[u8]> for JsniValue {
    fn from(value: &[u8]) -> Self {
        JsniValue::Bytes(value.to_vec())
    }
}

impl<T: Into<JsniValue>> From<Option<T>> for JsniValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(JsniValue::Null, Into::into)
    }
}

impl std::fmt::Display for JsniValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsniValue::I8(v) => write!(f, "{v}i8"),
            JsniValue::I16(v) => write!(f, "{v}i16"),
            JsniValue::I32(v) => write!(f, "{v}i32"),
            JsniValue::I64(v) => write!(f, "{v}i64"),
            JsniValue::U8(v) => write!(f, "{v}u8"),
            JsniValue::U16(v) => write!(f, "{v}u16"),
            JsniValue::U32(v) => write!(f, "{v}u32"),
            JsniValue::U64(v) => write!(f, "{v}u64"),
            JsniValue::F32(v) => write!(f, "{v}f32"),
            JsniValue::F64(v) => write!(f, "{v}f64"),
            JsniValue::Bool(v) => write!(f, "{v}"),
            JsniValue::Char(v) => write!(f, "char({v:#06x})"),
            JsniValue::String(s) => write!(f, "{s:?}"),
            JsniValue::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            JsniValue::Null => f.write_str("null"),
        }
    }
}
