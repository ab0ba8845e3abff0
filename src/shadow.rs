// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{BridgeError, Result},
    pool::RecyclableBufferPool,
};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    ops::Deref,
    ptr::copy_nonoverlapping,
    sync::Arc,
};
use tracing::{debug, error, trace};

/// Rust-side copy of a foreign native buffer, shared by every holder of
/// that address.
///
/// The copy is taken once, by whichever holder reaches it first. It is not
/// kept in sync with the native side: a holder that knows the native memory
/// changed calls [`ShadowBuffer::refresh`], and one that edited the copy
/// calls [`ShadowBuffer::flush`].
pub struct ShadowBuffer {
    address: usize,
    size: usize,
    data: RwLock<Box<[u8]>>,
    populated: Mutex<bool>,
    pool: Arc<RecyclableBufferPool>,
}

impl ShadowBuffer {
    /// Native address this buffer shadows.
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_populated(&self) -> bool {
        *self.populated.lock()
    }

    /// Copies the native contents in, unless another holder already did.
    ///
    /// # Safety
    ///
    /// The native address must be valid for reads of `size` bytes.
    unsafe fn populate(&self) {
        let mut populated = self.populated.lock();
        if *populated {
            return;
        }
        let mut data = self.data.write();
        copy_nonoverlapping(self.address as *const u8, data.as_mut_ptr(), self.size);
        *populated = true;
        trace!(address = format_args!("{:#x}", self.address), size = self.size, "shadow populated");
    }

    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let size = self.size;
        RwLockReadGuard::map(self.data.read(), |data| &data[..size])
    }

    /// Mutable access to the copy. Changes reach native memory only through
    /// [`ShadowBuffer::flush`].
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        let size = self.size;
        RwLockWriteGuard::map(self.data.write(), |data| &mut data[..size])
    }

    /// Re-reads the native buffer into the copy.
    ///
    /// # Safety
    ///
    /// The native address must still be valid for reads of `size` bytes.
    pub unsafe fn refresh(&self) {
        let mut data = self.data.write();
        copy_nonoverlapping(self.address as *const u8, data.as_mut_ptr(), self.size);
    }

    /// Writes the copy back to the native buffer.
    ///
    /// # Safety
    ///
    /// The native address must be valid for writes of `size` bytes and must
    /// not be concurrently accessed by the native layer.
    pub unsafe fn flush(&self) {
        let data = self.data.read();
        copy_nonoverlapping(data.as_ptr(), self.address as *mut u8, self.size);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read().to_vec()
    }
}

impl Drop for ShadowBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(self.data.get_mut());
        self.pool.return_buffer(data);
    }
}

impl fmt::Debug for ShadowBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ShadowBuffer")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size)
            .finish()
    }
}

struct CacheEntry {
    buffer: Arc<ShadowBuffer>,
    refs: usize,
}

/// Deduplicated, reference counted copies of foreign native buffers.
///
/// Several wrappers may point at the same native buffer (reading a capture's
/// image twice yields two wrappers over one handle). They share one copy
/// here instead of each making their own.
///
/// The map lock only covers lookup and reference counting. Population takes
/// a per-buffer lock, so a thread copying a large new buffer does not stall
/// lookups of other addresses.
pub struct BufferShadowCache {
    pool: Arc<RecyclableBufferPool>,
    entries: Mutex<HashMap<usize, CacheEntry>>,
}

impl BufferShadowCache {
    pub fn new(pool: Arc<RecyclableBufferPool>) -> Self {
        Self {
            pool,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Takes a reference to the shared copy of `size` bytes at `address`,
    /// populating it on first use.
    ///
    /// Every successful call must be balanced by one
    /// [`BufferShadowCache::return_buffer_cache`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::CacheSizeMismatch`] if the address is already cached
    /// with a different size, which means two unrelated buffers claim the
    /// same address.
    ///
    /// # Safety
    ///
    /// `address` must be valid for reads of `size` bytes.
    pub unsafe fn get_buffer_cache(
        &self,
        address: *const u8,
        size: usize,
    ) -> Result<Arc<ShadowBuffer>> {
        if address.is_null() {
            return Err(BridgeError::NullAddress);
        }
        let key = address as usize;

        let buffer = {
            let mut entries = self.entries.lock();
            match entries.entry(key) {
                Entry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    if entry.buffer.size != size {
                        return Err(BridgeError::CacheSizeMismatch {
                            address: key,
                            cached: entry.buffer.size,
                            requested: size,
                        });
                    }
                    entry.refs += 1;
                    entry.buffer.clone()
                }
                Entry::Vacant(vacant) => {
                    let buffer = Arc::new(ShadowBuffer {
                        address: key,
                        size,
                        data: RwLock::new(self.pool.rent(size)),
                        populated: Mutex::new(false),
                        pool: self.pool.clone(),
                    });
                    vacant.insert(CacheEntry {
                        buffer: buffer.clone(),
                        refs: 1,
                    });
                    debug!(address = format_args!("{key:#x}"), size, "shadow created");
                    buffer
                }
            }
        };

        buffer.populate();
        Ok(buffer)
    }

    /// Drops one reference to the copy at `address`. The last reference
    /// removes the entry, and its storage goes back to the pool once every
    /// outstanding handle is dropped.
    pub fn return_buffer_cache(&self, address: usize) -> Result<()> {
        let released = {
            let mut entries = self.entries.lock();
            let remaining = {
                let entry = entries
                    .get_mut(&address)
                    .ok_or(BridgeError::CacheEntryNotFound(address))?;
                entry.refs -= 1;
                entry.refs
            };
            if remaining == 0 {
                entries.remove(&address)
            } else {
                None
            }
        };

        if released.is_some() {
            debug!(address = format_args!("{address:#x}"), "shadow released");
        }
        Ok(())
    }

    /// Takes a reference wrapped in a guard that returns it on drop.
    ///
    /// # Safety
    ///
    /// See [`BufferShadowCache::get_buffer_cache`].
    pub unsafe fn lease(self: &Arc<Self>, address: *const u8, size: usize) -> Result<ShadowLease> {
        let buffer = self.get_buffer_cache(address, size)?;
        Ok(ShadowLease {
            cache: self.clone(),
            buffer,
        })
    }

    /// Current reference count for `address`, if cached.
    pub fn ref_count(&self, address: usize) -> Option<usize> {
        self.entries.lock().get(&address).map(|entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Counted reference to a [`ShadowBuffer`], returned to the cache on drop.
pub struct ShadowLease {
    cache: Arc<BufferShadowCache>,
    buffer: Arc<ShadowBuffer>,
}

impl ShadowLease {
    pub fn buffer(&self) -> &Arc<ShadowBuffer> {
        &self.buffer
    }
}

impl Deref for ShadowLease {
    type Target = ShadowBuffer;

    fn deref(&self) -> &ShadowBuffer {
        &self.buffer
    }
}

impl Drop for ShadowLease {
    fn drop(&mut self) {
        if let Err(err) = self.cache.return_buffer_cache(self.buffer.address) {
            error!("shadow lease release failed: {err}");
        }
    }
}

impl fmt::Debug for ShadowLease {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ShadowLease").field(&self.buffer).finish()
    }
}
