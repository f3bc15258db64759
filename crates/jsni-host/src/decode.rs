//! Reading tagged argument slots out of linear memory.

use jsni_wire::{JsniValue, SLOT_SIZE, Slot, ValueKind, WireError, slot_address};
use tracing::trace;

use crate::error::{HostError, HostResult};
use crate::memory::GuestMemory;

/// Arguments decoded from one slot array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedArgs {
    /// The values, in slot order.
    pub values: Vec<JsniValue>,
    /// String and byte payload bytes copied out of memory.
    pub bytes_copied: usize,
}

/// Decode `count` consecutive slots starting at `base`.
///
/// Every slot must carry a known tag; the first unknown tag fails the whole
/// decode. A `count` of zero returns without touching memory.
///
/// # Errors
///
/// Returns [`HostError::Wire`] for an unknown tag or invalid UTF-8, and
/// [`HostError::MemoryAccessOutOfBounds`] if a slot or region lies outside
/// the memory.
pub fn decode_args<M>(memory: &M, base: u32, count: u32) -> HostResult<Vec<JsniValue>>
where
    M: GuestMemory + ?Sized,
{
    decode_args_counted(memory, base, count).map(|decoded| decoded.values)
}

/// Like [`decode_args`], also reporting how many payload bytes were copied.
pub fn decode_args_counted<M>(memory: &M, base: u32, count: u32) -> HostResult<DecodedArgs>
where
    M: GuestMemory + ?Sized,
{
    let mut decoded = DecodedArgs {
        values: Vec::with_capacity((count as usize).min(memory.size() / SLOT_SIZE)),
        bytes_copied: 0,
    };

    for index in 0..count as usize {
        let address = slot_address(base, index)
            .ok_or_else(|| HostError::out_of_bounds(base, (index + 1) * SLOT_SIZE, memory.size()))?;
        let slot = memory.read_slot(address)?;
        let value = decode_slot(memory, &slot)?;

        if let JsniValue::String(s) = &value {
            decoded.bytes_copied += s.len();
        } else if let JsniValue::Bytes(b) = &value {
            decoded.bytes_copied += b.len();
        }

        trace!(index, kind = %value.kind(), "Decoded argument");
        decoded.values.push(value);
    }

    Ok(decoded)
}

/// Decode a single slot, copying string and byte payloads out of memory.
pub fn decode_slot<M>(memory: &M, slot: &Slot) -> HostResult<JsniValue>
where
    M: GuestMemory + ?Sized,
{
    let kind = slot.kind()?;
    match kind {
        ValueKind::String => {
            let (offset, len) = slot.region_parts();
            let bytes = memory.read(offset, len)?;
            Ok(JsniValue::String(utf8(bytes)?))
        }
        ValueKind::Bytes => {
            let (offset, len) = slot.region_parts();
            Ok(JsniValue::Bytes(memory.read(offset, len)?.to_vec()))
        }
        scalar => Ok(JsniValue::from_scalar_payload(scalar, slot.payload())?),
    }
}

/// Decode the function name referenced by the slot at `name_ptr`.
///
/// Only the slot's (offset, length) payload is used; its tag is not
/// inspected.
pub fn decode_name<M>(memory: &M, name_ptr: u32) -> HostResult<String>
where
    M: GuestMemory + ?Sized,
{
    let (offset, len) = memory.read_slot(name_ptr)?.region_parts();
    utf8(memory.read(offset, len)?)
}

fn utf8(bytes: &[u8]) -> HostResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| HostError::Wire(WireError::InvalidUtf8(e.to_string())))
}
