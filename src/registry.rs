// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{BridgeError, Result},
    pool::RecyclableBufferPool,
};
use std::{fmt, ptr::NonNull, slice::from_raw_parts, sync::Arc};

/// Opaque identifier handed to the native layer with each allocation and
/// given back on free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationToken(usize);

impl AllocationToken {
    pub(crate) fn new(id: usize) -> Self {
        Self(id)
    }

    /// Raw form stored in the native context slot.
    pub fn into_raw(self) -> usize {
        self.0
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AllocationToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pool buffer whose address is fixed while it is alive.
///
/// The boxed slice is leaked into a raw pointer so that native code may
/// write through the address while Rust holds views into it, and is handed
/// back to the pool on drop.
pub(crate) struct PinnedBuffer {
    ptr: NonNull<[u8]>,
    pool: Option<Arc<RecyclableBufferPool>>,
}

// The buffer is plain bytes with no thread affinity. Concurrent writes from
// the native layer are the caller's responsibility, as with mapped DMA memory.
unsafe impl Send for PinnedBuffer {}
unsafe impl Sync for PinnedBuffer {}

impl PinnedBuffer {
    pub(crate) fn pin(buffer: Box<[u8]>, pool: Arc<RecyclableBufferPool>) -> Self {
        Self {
            ptr: NonNull::from(Box::leak(buffer)),
            pool: Some(pool),
        }
    }

    /// Pins a buffer that is freed on drop instead of going back to a pool.
    pub(crate) fn unpooled(buffer: Box<[u8]>) -> Self {
        Self {
            ptr: NonNull::from(Box::leak(buffer)),
            pool: None,
        }
    }

    pub(crate) fn address(&self) -> usize {
        self.ptr.as_ptr().cast::<u8>() as usize
    }

    pub(crate) fn capacity(&self) -> usize {
        self.ptr.len()
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed [`PinnedBuffer::capacity`].
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        from_raw_parts(self.ptr.as_ptr().cast::<u8>().add(offset), len)
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        let buffer = unsafe { Box::from_raw(self.ptr.as_ptr()) };
        if let Some(pool) = &self.pool {
            pool.return_buffer(buffer);
        }
    }
}

/// One buffer handed to native code through the allocation callback.
pub struct AllocationContext {
    token: AllocationToken,
    buffer: Arc<PinnedBuffer>,
    len: usize,
}

impl AllocationContext {
    pub(crate) fn new(token: AllocationToken, buffer: PinnedBuffer, len: usize) -> Self {
        debug_assert!(len <= buffer.capacity());
        Self {
            token,
            buffer: Arc::new(buffer),
            len,
        }
    }

    pub fn token(&self) -> AllocationToken {
        self.token
    }

    /// Base address given to the native layer.
    pub fn base(&self) -> usize {
        self.buffer.address()
    }

    /// Number of bytes the native layer asked for.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of `[address, address + size)` within this allocation, if the
    /// whole range lies inside it.
    pub fn offset_of(&self, address: usize, size: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base())?;
        if offset >= self.len {
            return None;
        }
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Some(offset),
            _ => None,
        }
    }

    pub(crate) fn buffer(&self) -> &Arc<PinnedBuffer> {
        &self.buffer
    }
}

impl fmt::Debug for AllocationContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AllocationContext")
            .field("token", &self.token)
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len)
            .finish()
    }
}

/// Allocations ordered by base address.
///
/// Native code hands back interior pointers ("37 bytes into image N"), so
/// lookups are range queries: a binary search finds the nearest base at or
/// below the address and the candidate is then checked for containment.
#[derive(Debug, Default)]
pub struct AddressRangeRegistry {
    entries: Vec<AllocationContext>,
}

impl AddressRangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationContext> {
        self.entries.iter()
    }

    fn search(&self, address: usize) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by_key(&address, |ctx| ctx.base())
    }

    /// Tracks a new allocation. Live ranges must not share a base address or
    /// overlap.
    pub fn insert(&mut self, ctx: AllocationContext) -> Result<()> {
        let base = ctx.base();
        let idx = match self.search(base) {
            Ok(_) => return Err(BridgeError::DuplicateAddress(base)),
            Err(idx) => idx,
        };

        if let Some(prev) = idx.checked_sub(1).map(|i| &self.entries[i]) {
            if prev.base() + prev.len() > base {
                return Err(BridgeError::OverlappingRange {
                    address: base,
                    len: ctx.len(),
                    existing: prev.base(),
                });
            }
        }
        if let Some(next) = self.entries.get(idx) {
            if base + ctx.len() > next.base() {
                return Err(BridgeError::OverlappingRange {
                    address: base,
                    len: ctx.len(),
                    existing: next.base(),
                });
            }
        }

        self.entries.insert(idx, ctx);
        Ok(())
    }

    /// Allocation whose base is exactly `base`.
    pub fn get(&self, base: usize) -> Option<&AllocationContext> {
        self.search(base).ok().map(|idx| &self.entries[idx])
    }

    pub fn remove(&mut self, base: usize) -> Option<AllocationContext> {
        self.search(base).ok().map(|idx| self.entries.remove(idx))
    }

    /// Finds the allocation containing `[address, address + size)` and the
    /// offset of `address` within it.
    ///
    /// `None` means the memory is not owned by this bridge. A range that
    /// starts inside an allocation but runs past its end is also `None`.
    pub fn resolve(&self, address: usize, size: usize) -> Option<(&AllocationContext, usize)> {
        let idx = match self.search(address) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let ctx = &self.entries[idx];
        ctx.offset_of(address, size).map(|offset| (ctx, offset))
    }
}
