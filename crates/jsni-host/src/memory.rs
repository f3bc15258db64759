//! Access to the module's linear memory and allocators.
//!
//! The decoder only needs [`GuestMemory`]; the encoder additionally needs
//! [`GuestAllocator`] to reserve space for results. Both are implemented by
//! [`CallerHeap`](crate::caller::CallerHeap) over a live Wasmtime caller and
//! by [`BufferHeap`] over a plain byte vector.

use std::future::Future;
use std::ops::Range;

use jsni_wire::{FatPtr, SLOT_SIZE, Slot};

use crate::error::{HostError, HostResult};

/// Bounds-checked view of a linear memory.
///
/// Every call observes the memory as it is now. Implementations must not
/// cache a byte slice across calls, since an allocator may grow the memory.
pub trait GuestMemory {
    /// Current size in bytes.
    fn size(&self) -> usize;

    /// Borrow `len` bytes starting at `offset`.
    fn read(&self, offset: u32, len: u32) -> HostResult<&[u8]>;

    /// Copy `bytes` into memory at `offset`.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> HostResult<()>;

    /// Read the 16-byte slot at `address`.
    fn read_slot(&self, address: u32) -> HostResult<Slot> {
        let bytes = self.read(address, SLOT_SIZE as u32)?;
        let mut raw = [0u8; SLOT_SIZE];
        raw.copy_from_slice(bytes);
        Ok(Slot::from_bytes(&raw))
    }

    /// Write a slot at `address`.
    fn write_slot(&mut self, address: u32, slot: &Slot) -> HostResult<()> {
        self.write(address, &slot.to_bytes())
    }
}

/// A memory whose owner can hand out fresh regions.
pub trait GuestAllocator: GuestMemory {
    /// Reserve `size` bytes. The low word of the result is the address.
    fn alloc(&mut self, size: u32) -> impl Future<Output = HostResult<FatPtr>> + Send;

    /// Reserve an array of `count` slots. The low word of the result is the
    /// base address; the high word is the handle given back to the module.
    fn alloc_slots(&mut self, count: u32) -> impl Future<Output = HostResult<FatPtr>> + Send;
}

/// Validate `offset..offset + len` against a memory of `size` bytes.
pub(crate) fn checked_range(offset: u32, len: usize, size: usize) -> HostResult<Range<usize>> {
    let start = offset as usize;
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(start..end),
        _ => Err(HostError::out_of_bounds(offset, len, size)),
    }
}

/// An in-process heap backed by a `Vec<u8>`.
///
/// Allocation is a bump pointer aligned to 8 bytes. When a request does not
/// fit, the buffer grows in 64 KiB pages the way a module's memory would.
/// Returned fat pointers carry the address in both words, so the handle the
/// dispatcher returns for a slot array is the array's address.
///
/// Counters record how often the heap was allocated from and written to,
/// which lets tests assert that a call touched nothing.
#[derive(Debug, Clone)]
pub struct BufferHeap {
    data: Vec<u8>,
    next: u32,
    max_size: usize,
    allocations: usize,
    writes: usize,
}

impl BufferHeap {
    /// Page size used when growing.
    pub const PAGE_SIZE: usize = 64 * 1024;

    /// Create a heap with `pages` zeroed pages and no growth limit beyond 4 GiB.
    pub fn new(pages: usize) -> Self {
        Self {
            data: vec![0; pages * Self::PAGE_SIZE],
            // Address 0 is never handed out.
            next: 8,
            max_size: u32::MAX as usize,
            allocations: 0,
            writes: 0,
        }
    }

    /// Cap the size the heap may grow to.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of allocator calls served.
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Number of writes performed.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Copy `bytes` into a fresh region and return its address.
    ///
    /// Used to stage module-side data; does not count as an allocation or a
    /// write.
    pub fn place(&mut self, bytes: &[u8]) -> HostResult<u32> {
        let offset = self.bump(bytes.len())?;
        let range = checked_range(offset, bytes.len(), self.data.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(offset)
    }

    /// Stage a slot array and return its base address.
    pub fn place_slots(&mut self, slots: &[Slot]) -> HostResult<u32> {
        let bytes: Vec<u8> = slots.iter().flat_map(|slot| slot.to_bytes()).collect();
        self.place(&bytes)
    }

    /// Stage a string and a slot pointing at it. Returns the slot's address.
    pub fn place_name(&mut self, name: &str) -> HostResult<u32> {
        let offset = self.place(name.as_bytes())?;
        let slot = Slot::region(jsni_wire::ValueKind::String, offset, name.len() as u32);
        self.place_slots(&[slot])
    }

    fn bump(&mut self, size: usize) -> HostResult<u32> {
        let start = (self.next as usize + 7) & !7;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.max_size)
            .ok_or_else(|| HostError::AllocationFailed {
                requested: size as u64,
                reason: format!("heap limit of {} bytes reached", self.max_size),
            })?;

        if end > self.data.len() {
            let pages = (end - self.data.len()).div_ceil(Self::PAGE_SIZE);
            let grown = (self.data.len() + pages * Self::PAGE_SIZE).min(self.max_size);
            self.data.resize(grown, 0);
        }

        self.next = end as u32;
        Ok(start as u32)
    }
}

impl Default for BufferHeap {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GuestMemory for BufferHeap {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: u32, len: u32) -> HostResult<&[u8]> {
        let range = checked_range(offset, len as usize, self.data.len())?;
        Ok(&self.data[range])
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> HostResult<()> {
        let range = checked_range(offset, bytes.len(), self.data.len())?;
        self.data[range].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

impl GuestAllocator for BufferHeap {
    fn alloc(&mut self, size: u32) -> impl Future<Output = HostResult<FatPtr>> + Send {
        self.allocations += 1;
        let result = self
            .bump(size as usize)
            .map(|offset| FatPtr::pack(offset, offset));
        std::future::ready(result)
    }

    fn alloc_slots(&mut self, count: u32) -> impl Future<Output = HostResult<FatPtr>> + Send {
        let result = match count.checked_mul(SLOT_SIZE as u32) {
            Some(size) => {
                self.allocations += 1;
                self.bump(size as usize)
                    .map(|offset| FatPtr::pack(offset, offset))
            }
            None => Err(HostError::AllocationFailed {
                requested: count as u64 * SLOT_SIZE as u64,
                reason: "slot array exceeds 32-bit address space".to_string(),
            }),
        };
        std::future::ready(result)
    }
}
