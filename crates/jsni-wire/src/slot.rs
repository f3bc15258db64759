//! The fixed-size slot every wire value occupies.
//!
//! ```text
//!  0               8    9              16
//! +----------------+----+---------------+
//! |    payload     |tag |   reserved    |
//! +----------------+----+---------------+
//! ```
//!
//! All multi-byte fields are little-endian.

use crate::error::WireResult;
use crate::fat_ptr::FatPtr;
use crate::kind::ValueKind;

/// Size of one slot in bytes.
pub const SLOT_SIZE: usize = 16;

/// Offset of the tag byte within a slot.
pub const TAG_OFFSET: usize = 8;

/// Size of the payload region in bytes.
pub const PAYLOAD_SIZE: usize = 8;

/// One decoded slot: raw payload plus its tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
    payload: [u8; PAYLOAD_SIZE],
    tag: u8,
}

impl Slot {
    /// Build a slot from a kind and a raw payload.
    pub fn new(kind: ValueKind, payload: [u8; PAYLOAD_SIZE]) -> Self {
        Self {
            payload,
            tag: kind.tag(),
        }
    }

    /// Build a slot whose payload is a little-endian 64-bit word.
    pub fn from_word(kind: ValueKind, word: u64) -> Self {
        Self::new(kind, word.to_le_bytes())
    }

    /// Build a string or bytes slot pointing at `(offset, length)`.
    pub fn region(kind: ValueKind, offset: u32, length: u32) -> Self {
        Self::from_word(kind, FatPtr::pack(offset, length).raw())
    }

    /// Build a null slot.
    pub fn null() -> Self {
        Self::new(ValueKind::Null, [0; PAYLOAD_SIZE])
    }

    /// Parse a slot from its 16-byte wire form.
    ///
    /// The tag is not validated here; see [`Slot::kind`].
    pub fn from_bytes(bytes: &[u8; SLOT_SIZE]) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[..PAYLOAD_SIZE]);
        Self {
            payload,
            tag: bytes[TAG_OFFSET],
        }
    }

    /// Serialize to the 16-byte wire form. Reserved bytes are zero.
    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[..PAYLOAD_SIZE].copy_from_slice(&self.payload);
        bytes[TAG_OFFSET] = self.tag;
        bytes
    }

    /// The raw tag byte.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// The kind named by the tag byte.
    pub fn kind(&self) -> WireResult<ValueKind> {
        ValueKind::from_tag(self.tag)
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &[u8; PAYLOAD_SIZE] {
        &self.payload
    }

    /// The payload as a little-endian 64-bit word.
    pub fn word(&self) -> u64 {
        u64::from_le_bytes(self.payload)
    }

    /// The payload read as an `(offset, length)` pair.
    pub fn region_parts(&self) -> (u32, u32) {
        FatPtr::from_raw(self.word()).unpack()
    }
}

/// Byte offset of slot `index` in an array starting at `base`.
///
/// Returns `None` if the address does not fit in 32 bits.
pub fn slot_address(base: u32, index: usize) -> Option<u32> {
    let offset = index.checked_mul(SLOT_SIZE)?;
    u32::try_from(offset).ok()?.checked_add(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let slot = Slot::from_word(ValueKind::I32, 0x0102_0304);
        let bytes = slot.to_bytes();
        assert_eq!(&bytes[..8], &[4, 3, 2, 1, 0, 0, 0, 0]);
        assert_eq!(bytes[8], ValueKind::I32.tag());
        assert!(bytes[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reserved_bytes_ignored() {
        let mut bytes = Slot::from_word(ValueKind::U8, 7).to_bytes();
        bytes[9..].fill(0xAA);
        let slot = Slot::from_bytes(&bytes);
        assert_eq!(slot.kind().unwrap(), ValueKind::U8);
        assert_eq!(slot.word(), 7);
    }

    #[test]
    fn test_region_slot() {
        let slot = Slot::region(ValueKind::String, 0x40, 2);
        assert_eq!(slot.region_parts(), (0x40, 2));
        assert_eq!(&slot.to_bytes()[..8], &[0x40, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_slot_address() {
        assert_eq!(slot_address(100, 0), Some(100));
        assert_eq!(slot_address(100, 3), Some(148));
        assert_eq!(slot_address(u32::MAX, 1), None);
    }
}
