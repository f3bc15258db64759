//! The module's half of a call.
//!
//! A module reaches the host through one import taking a name slot, an
//! argument slot array and a count. [`CallFrame`] lays all three out, with
//! the bytes of any string or byte arguments, in one contiguous block the
//! module copies into its memory and releases once the call returns.
//!
//! The host answers with the high word of the result array's fat pointer, or
//! `-1` when there is nothing to read. That word is whatever handle the
//! module's `alloc_jsni_value` put there, so the module remembers each slot
//! array it hands out in [`SlotAllocations`] and reads results back with
//! [`SlotAllocations::read_return`].
//!
//! # Example
//!
//! ```
//! use jsni_wire::guest::{CallFrame, SlotAllocations};
//! use jsni_wire::{FatPtr, JsniValue};
//!
//! let frame = CallFrame::build(64, "greet", &[JsniValue::from("hi")]).unwrap();
//! assert_eq!(frame.args_ptr(), 64);
//! assert_eq!(frame.name_ptr(), 80);
//!
//! // Nothing to read back when the host returns the sentinel.
//! let mut slots = SlotAllocations::new();
//! assert!(slots.read_return(&[], FatPtr::NO_RETURN).unwrap().is_empty());
//! ```

use std::collections::HashMap;

use crate::error::{WireError, WireResult};
use crate::fat_ptr::FatPtr;
use crate::kind::ValueKind;
use crate::slot::{SLOT_SIZE, Slot};
use crate::value::JsniValue;

/// Name slot, argument slots and argument data for one outgoing call.
///
/// Layout, starting at `base`:
///
/// ```text
/// args_ptr   argument slots, 16 * count bytes
/// name_ptr   name slot, 16 bytes
///            name bytes, then each string/bytes argument in order
/// ```
///
/// String arguments are copied without a terminator; the slot carries their
/// length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    base: u32,
    bytes: Vec<u8>,
    name_ptr: u32,
    args_count: u32,
}

impl CallFrame {
    /// Lay out a call to `name` with `args` for placement at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Unencodable`] if the frame would not fit below
    /// the 4 GiB address limit.
    pub fn build(base: u32, name: &str, args: &[JsniValue]) -> WireResult<Self> {
        let too_large =
            || WireError::Unencodable("call frame exceeds the 32-bit address space".to_string());

        let args_count = u32::try_from(args.len()).map_err(|_| too_large())?;
        let slots_len = (args.len() + 1) * SLOT_SIZE;
        let mut bytes = vec![0u8; slots_len];

        let place = |bytes: &mut Vec<u8>, data: &[u8]| -> WireResult<Slot> {
            let offset = u32::try_from(bytes.len())
                .ok()
                .and_then(|rel| base.checked_add(rel))
                .ok_or_else(too_large)?;
            let len = u32::try_from(data.len()).map_err(|_| too_large())?;
            bytes.extend_from_slice(data);
            Ok(Slot::region(ValueKind::String, offset, len))
        };

        let name_slot = place(&mut bytes, name.as_bytes())?;
        let name_at = args.len() * SLOT_SIZE;
        bytes[name_at..name_at + SLOT_SIZE].copy_from_slice(&name_slot.to_bytes());

        for (index, arg) in args.iter().enumerate() {
            let slot = match arg {
                JsniValue::String(s) => place(&mut bytes, s.as_bytes())?,
                JsniValue::Bytes(b) => {
                    let (offset, len) = place(&mut bytes, b)?.region_parts();
                    Slot::region(ValueKind::Bytes, offset, len)
                }
                scalar => scalar.to_scalar_slot()?,
            };
            let at = index * SLOT_SIZE;
            bytes[at..at + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
        }

        let end = u32::try_from(bytes.len())
            .ok()
            .and_then(|len| base.checked_add(len));
        if end.is_none() {
            return Err(too_large());
        }

        Ok(Self {
            base,
            bytes,
            name_ptr: base + name_at as u32,
            args_count,
        })
    }

    /// Where the frame is meant to be placed.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// The bytes to copy to [`base`](Self::base).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the frame in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a frame holds at least the name slot.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First address past the frame.
    pub fn end(&self) -> u32 {
        self.base + self.bytes.len() as u32
    }

    /// First argument for the entry point.
    pub fn name_ptr(&self) -> u32 {
        self.name_ptr
    }

    /// Second argument for the entry point.
    pub fn args_ptr(&self) -> u32 {
        self.base
    }

    /// Third argument for the entry point.
    pub fn args_count(&self) -> u32 {
        self.args_count
    }
}

/// Slot arrays handed to the host, keyed by handle.
#[derive(Debug, Default, Clone)]
pub struct SlotAllocations {
    arrays: HashMap<u32, (u32, u32)>,
}

impl SlotAllocations {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an array of `count` slots returned by `alloc_jsni_value`.
    ///
    /// A handle that is recorded again replaces the earlier entry.
    pub fn record(&mut self, ptr: FatPtr, count: u32) {
        self.arrays.insert(ptr.length(), (ptr.offset(), count));
    }

    /// Forget a handle, returning the array's address and slot count.
    pub fn release(&mut self, handle: u32) -> Option<(u32, u32)> {
        self.arrays.remove(&handle)
    }

    /// Number of arrays not yet read back.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Whether every array has been read back.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Decode what the entry point returned.
    ///
    /// [`FatPtr::NO_RETURN`] means the callback produced no values. Any
    /// other word is a handle; its array is decoded from `memory` and the
    /// handle is released.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownHandle`] for a handle that was never
    /// recorded, or any error from [`read_slots`].
    pub fn read_return(&mut self, memory: &[u8], returned: i32) -> WireResult<Vec<JsniValue>> {
        if returned == FatPtr::NO_RETURN {
            return Ok(Vec::new());
        }
        let handle = returned as u32;
        let (base, count) = self
            .release(handle)
            .ok_or(WireError::UnknownHandle(handle))?;
        read_slots(memory, base, count)
    }
}

/// Decode `count` slots at `base`, copying string and bytes regions out of
/// `memory`.
///
/// # Errors
///
/// Fails on an unknown tag, invalid UTF-8, or a slot or region that runs
/// past the end of `memory`.
pub fn read_slots(memory: &[u8], base: u32, count: u32) -> WireResult<Vec<JsniValue>> {
    (0..count as usize)
        .map(|index| {
            let at = base as usize + index * SLOT_SIZE;
            let raw: &[u8; SLOT_SIZE] = region(memory, at, SLOT_SIZE)?
                .try_into()
                .map_err(|_| out_of_bounds(at, SLOT_SIZE, memory.len()))?;
            let slot = Slot::from_bytes(raw);
            match slot.kind()? {
                ValueKind::String => {
                    let (offset, len) = slot.region_parts();
                    let data = region(memory, offset as usize, len as usize)?;
                    String::from_utf8(data.to_vec())
                        .map(JsniValue::String)
                        .map_err(|e| WireError::InvalidUtf8(e.to_string()))
                }
                ValueKind::Bytes => {
                    let (offset, len) = slot.region_parts();
                    Ok(JsniValue::Bytes(region(memory, offset as usize, len as usize)?.to_vec()))
                }
                _ => JsniValue::from_scalar_slot(&slot),
            }
        })
        .collect()
}

fn region(memory: &[u8], offset: usize, len: usize) -> WireResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| memory.get(offset..end))
        .ok_or_else(|| out_of_bounds(offset, len, memory.len()))
}

fn out_of_bounds(offset: usize, len: usize, size: usize) -> WireError {
    WireError::OutOfBounds {
        offset: offset as u64,
        len: len as u64,
        size: size as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let args = [JsniValue::I32(-2), JsniValue::from("ab"), JsniValue::Bytes(vec![9])];
        let frame = CallFrame::build(100, "f", &args).unwrap();

        assert_eq!(frame.args_ptr(), 100);
        assert_eq!(frame.args_count(), 3);
        assert_eq!(frame.name_ptr(), 148);
        // 3 argument slots, the name slot, then "f", "ab" and [9].
        assert_eq!(frame.len(), 64 + 4);
        assert_eq!(frame.end(), 168);

        let name = Slot::from_bytes(frame.bytes()[48..64].try_into().unwrap());
        assert_eq!(name.kind().unwrap(), ValueKind::String);
        assert_eq!(name.region_parts(), (164, 1));

        let text = Slot::from_bytes(frame.bytes()[16..32].try_into().unwrap());
        assert_eq!(text.region_parts(), (165, 2));
        let bytes = Slot::from_bytes(frame.bytes()[32..48].try_into().unwrap());
        assert_eq!(bytes.kind().unwrap(), ValueKind::Bytes);
        assert_eq!(bytes.region_parts(), (167, 1));
        assert_eq!(&frame.bytes()[64..], b"fab\x09");
    }

    #[test]
    fn test_frame_reads_back_at_its_base() {
        let args = [
            JsniValue::U64(u64::MAX),
            JsniValue::from("héllo"),
            JsniValue::Null,
            JsniValue::F64(0.25),
        ];
        let frame = CallFrame::build(32, "echo", &args).unwrap();

        let mut memory = vec![0u8; 32];
        memory.extend_from_slice(frame.bytes());

        assert_eq!(read_slots(&memory, frame.args_ptr(), frame.args_count()).unwrap(), args);
        assert_eq!(
            read_slots(&memory, frame.name_ptr(), 1).unwrap(),
            vec![JsniValue::from("echo")]
        );
    }

    #[test]
    fn test_frame_without_arguments() {
        let frame = CallFrame::build(8, "noop", &[]).unwrap();

        assert_eq!(frame.args_count(), 0);
        assert_eq!(frame.name_ptr(), frame.args_ptr());
        assert_eq!(frame.len(), SLOT_SIZE + 4);
    }

    #[test]
    fn test_frame_past_address_limit() {
        assert!(matches!(
            CallFrame::build(u32::MAX - 8, "f", &[]),
            Err(WireError::Unencodable(_))
        ));
    }

    #[test]
    fn test_sentinel_reads_nothing() {
        let mut slots = SlotAllocations::new();
        slots.record(FatPtr::pack(16, 16), 1);

        assert!(slots.read_return(&[], -1).unwrap().is_empty());
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_read_return_by_handle() {
        let mut memory = vec![0u8; 64];
        memory[16..32].copy_from_slice(&JsniValue::I64(12).to_scalar_slot().unwrap().to_bytes());

        let mut slots = SlotAllocations::new();
        // Handle 3 is unrelated to the array's address.
        slots.record(FatPtr::pack(16, 3), 1);

        assert_eq!(slots.read_return(&memory, 3).unwrap(), vec![JsniValue::I64(12)]);
        assert!(slots.is_empty());
        assert_eq!(slots.read_return(&memory, 3), Err(WireError::UnknownHandle(3)));
    }

    #[test]
    fn test_read_slots_bounds() {
        let mut memory = vec![0u8; 32];
        memory[0..16].copy_from_slice(&Slot::region(ValueKind::Bytes, 30, 8).to_bytes());

        assert!(matches!(
            read_slots(&memory, 0, 1),
            Err(WireError::OutOfBounds { offset: 30, len: 8, size: 32 })
        ));
        assert!(matches!(
            read_slots(&memory, 24, 1),
            Err(WireError::OutOfBounds { offset: 24, .. })
        ));
    }
}
