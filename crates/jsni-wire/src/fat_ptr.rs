//! The fat pointer convention.
//!
//! A fat pointer packs a 32-bit linear memory offset (low word) and a 32-bit
//! length, count or handle (high word) into one `u64`, so functions limited
//! to a single scalar return can hand back both.

use serde::{Deserialize, Serialize};

/// A packed (offset, length) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FatPtr(u64);

impl FatPtr {
    /// Sentinel returned to the module when a call produced no values.
    pub const NO_RETURN: i32 = -1;

    /// Pack an offset and a length.
    pub const fn pack(offset: u32, length: u32) -> Self {
        Self(((length as u64) << 32) | offset as u64)
    }

    /// Wrap a raw 64-bit value received from the module.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The low word: a linear memory offset.
    pub const fn offset(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// The high word: a length, count or handle.
    pub const fn length(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Both halves as `(offset, length)`.
    pub const fn unpack(self) -> (u32, u32) {
        (self.offset(), self.length())
    }

    /// The high word reinterpreted as `i32`.
    ///
    /// This is what the dispatch entry point returns to the module: only the
    /// length word survives the trip back.
    pub const fn length_word_i32(self) -> i32 {
        self.length() as i32
    }
}

impl From<u64> for FatPtr {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<FatPtr> for u64 {
    fn from(ptr: FatPtr) -> Self {
        ptr.raw()
    }
}

impl std::fmt::Display for FatPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}+{}", self.offset(), self.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_boundaries() {
        let values = [0u32, 1, u32::MAX];
        for &offset in &values {
            for &length in &values {
                let ptr = FatPtr::pack(offset, length);
                assert_eq!(ptr.unpack(), (offset, length));
            }
        }
    }

    #[test]
    fn test_layout() {
        let ptr = FatPtr::pack(0x1000, 3);
        assert_eq!(ptr.raw(), 0x0000_0003_0000_1000);
        assert_eq!(FatPtr::from_raw(0xDEAD_BEEF_0000_0010).offset(), 0x10);
        assert_eq!(FatPtr::from_raw(0xDEAD_BEEF_0000_0010).length(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_length_word_i32() {
        assert_eq!(FatPtr::pack(8, 0x200).length_word_i32(), 0x200);
        assert_eq!(FatPtr::pack(0, u32::MAX).length_word_i32(), -1);
    }
}
