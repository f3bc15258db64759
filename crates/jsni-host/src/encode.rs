//! Writing callback results back into linear memory.
//!
//! The slot array is reserved first through the module's slot allocator.
//! Each string or byte value then gets its own region from the byte
//! allocator, and its slot records that region's (offset, length).

use jsni_wire::{FatPtr, JsniValue, SLOT_SIZE, Slot, ValueKind, slot_address};
use tracing::trace;

use crate::error::{HostError, HostResult};
use crate::memory::{GuestAllocator, GuestMemory};

/// The outcome of writing a result list into the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedResults {
    /// Fat pointer returned by the slot allocator.
    pub ptr: FatPtr,
    /// Slots written.
    pub slots: usize,
    /// String and byte payload bytes copied in.
    pub bytes_copied: usize,
    /// Allocator calls made.
    pub allocations: usize,
    /// Bytes requested from the allocators.
    pub bytes_allocated: u64,
}

/// Encode `values` into freshly allocated module memory.
///
/// Returns the slot array's fat pointer; the dispatcher hands only its high
/// word back to the module. Slots written before a failure are not rolled
/// back.
///
/// # Errors
///
/// Returns [`HostError::UnencodableValue`] if a value's byte length does not
/// fit in 32 bits, and [`HostError::AllocationFailed`] if an allocator hands
/// back a region that does not fit in memory.
pub async fn encode_results<H>(heap: &mut H, values: &[JsniValue]) -> HostResult<FatPtr>
where
    H: GuestAllocator + Send,
{
    encode_results_counted(heap, values).await.map(|encoded| encoded.ptr)
}

/// Like [`encode_results`], also reporting what was written.
pub async fn encode_results_counted<H>(heap: &mut H, values: &[JsniValue]) -> HostResult<EncodedResults>
where
    H: GuestAllocator + Send,
{
    let count = u32::try_from(values.len()).map_err(|_| HostError::UnencodableValue {
        index: 0,
        reason: format!("{} results exceed the 32-bit slot count", values.len()),
    })?;

    let ptr = heap.alloc_slots(count).await?;
    let array_bytes = values.len() as u64 * SLOT_SIZE as u64;
    ensure_region(&*heap, ptr.offset(), array_bytes)?;

    let mut encoded = EncodedResults {
        ptr,
        slots: values.len(),
        bytes_copied: 0,
        allocations: 1,
        bytes_allocated: array_bytes,
    };

    for (index, value) in values.iter().enumerate() {
        let slot = match value {
            JsniValue::String(s) => {
                let region = write_region(heap, index, s.as_bytes(), true).await?;
                encoded.bytes_copied += s.len();
                encoded.allocations += 1;
                encoded.bytes_allocated += s.len() as u64 + 1;
                Slot::region(ValueKind::String, region, s.len() as u32)
            }
            JsniValue::Bytes(b) => {
                let region = write_region(heap, index, b, false).await?;
                encoded.bytes_copied += b.len();
                encoded.allocations += 1;
                encoded.bytes_allocated += b.len() as u64;
                Slot::region(ValueKind::Bytes, region, b.len() as u32)
            }
            scalar => scalar.to_scalar_slot()?,
        };

        let address = slot_address(ptr.offset(), index).ok_or_else(|| {
            HostError::out_of_bounds(ptr.offset(), (index + 1) * SLOT_SIZE, heap.size())
        })?;
        heap.write_slot(address, &slot)?;
        trace!(index, kind = %value.kind(), address, "Encoded result");
    }

    Ok(encoded)
}

/// Allocate a region for `bytes`, copy them in and return its address.
///
/// Strings get one extra zero byte after their contents.
async fn write_region<H>(heap: &mut H, index: usize, bytes: &[u8], terminate: bool) -> HostResult<u32>
where
    H: GuestAllocator + Send,
{
    let size = bytes.len() + usize::from(terminate);
    let size = u32::try_from(size).map_err(|_| HostError::UnencodableValue {
        index,
        reason: format!("{} bytes exceed the 32-bit length word", bytes.len()),
    })?;

    let offset = heap.alloc(size).await?.offset();
    ensure_region(&*heap, offset, size as u64)?;

    heap.write(offset, bytes)?;
    if terminate {
        heap.write(offset + bytes.len() as u32, &[0])?;
    }
    Ok(offset)
}

fn ensure_region<M: GuestMemory + ?Sized>(memory: &M, offset: u32, len: u64) -> HostResult<()> {
    let size = memory.size() as u64;
    if offset as u64 + len > size {
        return Err(HostError::AllocationFailed {
            requested: len,
            reason: format!("allocator returned offset {offset}, beyond memory size {size}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_args;
    use crate::memory::BufferHeap;

    #[tokio::test]
    async fn test_encode_scalar() {
        let mut heap = BufferHeap::default();
        let ptr = encode_results(&mut heap, &[JsniValue::I64(12)]).await.unwrap();

        let slot = heap.read_slot(ptr.offset()).unwrap();
        assert_eq!(slot.kind().unwrap(), ValueKind::I64);
        assert_eq!(slot.word(), 12);
        assert!(heap.read(ptr.offset() + 9, 7).unwrap().iter().all(|&b| b == 0));
        assert_eq!(heap.allocation_count(), 1);
    }

    #[tokio::test]
    async fn test_encode_string_is_terminated() {
        let mut heap = BufferHeap::default();
        let encoded = encode_results_counted(&mut heap, &[JsniValue::from("ok")])
            .await
            .unwrap();

        let slot = heap.read_slot(encoded.ptr.offset()).unwrap();
        assert_eq!(slot.kind().unwrap(), ValueKind::String);

        let (offset, len) = slot.region_parts();
        assert_eq!(len, 2);
        assert_eq!(heap.read(offset, 3).unwrap(), &[0x6F, 0x6B, 0x00]);
        assert_eq!(encoded.allocations, 2);
        assert_eq!(encoded.bytes_allocated, 16 + 3);
    }

    #[tokio::test]
    async fn test_encode_bytes_unterminated() {
        let mut heap = BufferHeap::default();
        let ptr = encode_results(&mut heap, &[JsniValue::Bytes(vec![9, 8, 7])])
            .await
            .unwrap();

        let (offset, len) = heap.read_slot(ptr.offset()).unwrap().region_parts();
        assert_eq!(heap.read(offset, len).unwrap(), &[9, 8, 7]);
    }

    #[tokio::test]
    async fn test_encode_mixed_decodes_back() {
        let mut heap = BufferHeap::default();
        let values = vec![
            JsniValue::I8(-128),
            JsniValue::String("héllo".to_string()),
            JsniValue::Null,
            JsniValue::F32(f32::INFINITY),
            JsniValue::Bytes(Vec::new()),
        ];

        let ptr = encode_results(&mut heap, &values).await.unwrap();
        let decoded = decode_args(&heap, ptr.offset(), values.len() as u32).unwrap();
        assert_eq!(decoded, values);
    }

    #[tokio::test]
    async fn test_sign_extension() {
        let mut heap = BufferHeap::default();
        let ptr = encode_results(&mut heap, &[JsniValue::I16(-1)]).await.unwrap();
        assert_eq!(heap.read_slot(ptr.offset()).unwrap().word(), u64::MAX);
    }

    #[tokio::test]
    async fn test_memory_growth_during_encode() {
        let mut heap = BufferHeap::new(1);
        let big = "x".repeat(3 * BufferHeap::PAGE_SIZE);

        let ptr = encode_results(&mut heap, &[JsniValue::I32(1), JsniValue::String(big.clone())])
            .await
            .unwrap();

        assert!(heap.size() > 3 * BufferHeap::PAGE_SIZE);
        let decoded = decode_args(&heap, ptr.offset(), 2).unwrap();
        assert_eq!(decoded[1], JsniValue::String(big));
    }

    #[tokio::test]
    async fn test_allocation_failure() {
        let mut heap = BufferHeap::new(1).with_max_size(BufferHeap::PAGE_SIZE);
        let big = vec![0u8; BufferHeap::PAGE_SIZE];

        let err = encode_results(&mut heap, &[JsniValue::Bytes(big)])
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::AllocationFailed { .. }));
    }

    struct LyingAllocator(BufferHeap);

    impl GuestMemory for LyingAllocator {
        fn size(&self) -> usize {
            self.0.size()
        }

        fn read(&self, offset: u32, len: u32) -> HostResult<&[u8]> {
            self.0.read(offset, len)
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> HostResult<()> {
            self.0.write(offset, bytes)
        }
    }

    impl GuestAllocator for LyingAllocator {
        async fn alloc(&mut self, _size: u32) -> HostResult<FatPtr> {
            Ok(FatPtr::pack(u32::MAX - 4, 0))
        }

        async fn alloc_slots(&mut self, count: u32) -> HostResult<FatPtr> {
            self.0.alloc_slots(count).await
        }
    }

    #[tokio::test]
    async fn test_region_outside_memory_rejected() {
        let mut heap = LyingAllocator(BufferHeap::default());

        let err = encode_results(&mut heap, &[JsniValue::from("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::AllocationFailed { .. }));
        // Only the slot array was touched; no slot written.
        assert_eq!(heap.0.write_count(), 0);
    }
}
