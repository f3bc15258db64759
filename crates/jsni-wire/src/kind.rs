//! Value kinds and their numeric tags.
//!
//! The tag numbers are shared with the module side and must never change.

use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};

/// The closed set of values that can cross the boundary.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Signed 8-bit integer.
    I8 = 0,
    /// Signed 16-bit integer.
    I16 = 1,
    /// Signed 32-bit integer.
    I32 = 2,
    /// Signed 64-bit integer.
    I64 = 3,
    /// Unsigned 8-bit integer.
    U8 = 4,
    /// Unsigned 16-bit integer.
    U16 = 5,
    /// Unsigned 32-bit integer.
    U32 = 6,
    /// Unsigned 64-bit integer.
    U64 = 7,
    /// 32-bit float.
    F32 = 8,
    /// 64-bit float.
    F64 = 9,
    /// Boolean.
    Bool = 10,
    /// A single UTF-16 code unit.
    Char = 11,
    /// UTF-8 text stored out of line.
    String = 12,
    /// Opaque bytes stored out of line.
    Bytes = 13,
    /// Explicit absence of a value.
    Null = 14,
}

impl ValueKind {
    /// Every kind, ordered by tag.
    pub const ALL: [ValueKind; 15] = [
        ValueKind::I8,
        ValueKind::I16,
        ValueKind::I32,
        ValueKind::I64,
        ValueKind::U8,
        ValueKind::U16,
        ValueKind::U32,
        ValueKind::U64,
        ValueKind::F32,
        ValueKind::F64,
        ValueKind::Bool,
        ValueKind::Char,
        ValueKind::String,
        ValueKind::Bytes,
        ValueKind::Null,
    ];

    /// The wire tag for this kind.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Look up the kind for a wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownTag`] for tags outside `0..=14`.
    pub fn from_tag(tag: u8) -> WireResult<Self> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(WireError::UnknownTag(tag))
    }

    /// Lowercase name used in logs and events.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::I8 => "i8",
            ValueKind::I16 => "i16",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::U8 => "u8",
            ValueKind::U16 => "u16",
            ValueKind::U32 => "u32",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Bool => "bool",
            ValueKind::Char => "char",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Null => "null",
        }
    }

    /// Whether the payload is an (offset, length) pair into linear memory.
    pub const fn is_region(self) -> bool {
        matches!(self, ValueKind::String | ValueKind::Bytes)
    }

    /// Number of payload bytes that carry data for this kind.
    pub const fn payload_width(self) -> usize {
        match self {
            ValueKind::I8 | ValueKind::U8 | ValueKind::Bool => 1,
            ValueKind::I16 | ValueKind::U16 | ValueKind::Char => 2,
            ValueKind::I32 | ValueKind::U32 | ValueKind::F32 => 4,
            ValueKind::I64
            | ValueKind::U64
            | ValueKind::F64
            | ValueKind::String
            | ValueKind::Bytes => 8,
            ValueKind::Null => 0,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for ValueKind {
    type Error = WireError;

    fn try_from(tag: u8) -> WireResult<Self> {
        Self::from_tag(tag)
    }
}

impl From<ValueKind> for u8 {
    fn from(kind: ValueKind) -> Self {
        kind.tag()
    }
}
