// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    config::UnknownFreePolicy,
    error::{BridgeError, Result},
    pool::RecyclableBufferPool,
    registry::{AddressRangeRegistry, AllocationContext, AllocationToken, PinnedBuffer},
};
use parking_lot::Mutex;
use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, warn};

/// Memory supplier for the native layer.
///
/// Every buffer the SDK asks for is rented from the pool, pinned, and
/// tracked in an [`AddressRangeRegistry`] so that pointers the SDK later
/// hands back can be mapped to a [`BufferView`] instead of being copied.
///
/// # Thread Safety
///
/// The SDK calls back on its own threads. The registry sits behind a single
/// lock held for each insert, removal and lookup, so a `free` can never race
/// a `resolve` of the same address.
pub struct AllocationBridge {
    pool: Arc<RecyclableBufferPool>,
    registry: Mutex<AddressRangeRegistry>,
    next_token: AtomicUsize,
    unknown_free: UnknownFreePolicy,
}

impl AllocationBridge {
    pub fn new(pool: Arc<RecyclableBufferPool>, unknown_free: UnknownFreePolicy) -> Self {
        Self {
            pool,
            registry: Mutex::new(AddressRangeRegistry::new()),
            next_token: AtomicUsize::new(1),
            unknown_free,
        }
    }

    /// Provides `size` bytes to the native layer.
    ///
    /// Returns the pinned base address and the token the native layer must
    /// present to [`AllocationBridge::free`].
    pub fn allocate(&self, size: usize) -> Result<(usize, AllocationToken)> {
        // A zero-length rental has no unique address, so back it with a byte
        // of its own rather than the first pooled frame.
        let buffer = if size == 0 {
            PinnedBuffer::unpooled(vec![0u8; 1].into_boxed_slice())
        } else {
            PinnedBuffer::pin(self.pool.rent(size), self.pool.clone())
        };
        let token = AllocationToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
        let ctx = AllocationContext::new(token, buffer, size);
        let address = ctx.base();

        self.registry.lock().insert(ctx)?;
        debug!(address = format_args!("{address:#x}"), size, %token, "allocate");
        Ok((address, token))
    }

    /// Releases a buffer obtained from [`AllocationBridge::allocate`].
    ///
    /// The buffer goes back to the pool once the last [`BufferView`] into it
    /// is dropped.
    pub fn free(&self, address: usize, token: AllocationToken) -> Result<()> {
        let ctx = {
            let mut registry = self.registry.lock();
            match registry.get(address).map(|ctx| ctx.token()) {
                Some(tracked) if tracked == token => registry.remove(address),
                Some(tracked) => {
                    return Err(BridgeError::ContextMismatch {
                        address,
                        tracked: tracked.into_raw(),
                        given: token.into_raw(),
                    })
                }
                None => None,
            }
        };

        match ctx {
            Some(ctx) => {
                debug!(address = format_args!("{address:#x}"), size = ctx.len(), %token, "free");
                Ok(())
            }
            None => match self.unknown_free {
                UnknownFreePolicy::Fail => Err(BridgeError::UnknownAddress(address)),
                UnknownFreePolicy::Ignore => {
                    warn!(address = format_args!("{address:#x}"), %token, "ignoring free of untracked address");
                    Ok(())
                }
            },
        }
    }

    /// Maps `[address, address + size)` to a view of the bridge-owned buffer
    /// containing it.
    ///
    /// `None` means the memory is foreign and must be shadowed instead.
    pub fn resolve(&self, address: usize, size: usize) -> Option<BufferView> {
        let registry = self.registry.lock();
        registry
            .resolve(address, size)
            .map(|(ctx, offset)| BufferView {
                buffer: ctx.buffer().clone(),
                token: ctx.token(),
                offset,
                len: size,
            })
    }

    /// Returns true if `[address, address + size)` is bridge-owned.
    pub fn contains(&self, address: usize, size: usize) -> bool {
        self.registry.lock().resolve(address, size).is_some()
    }

    /// Number of live native allocations.
    pub fn outstanding(&self) -> usize {
        self.registry.lock().len()
    }

    /// Total bytes currently lent to the native layer.
    pub fn outstanding_bytes(&self) -> usize {
        self.registry.lock().iter().map(|ctx| ctx.len()).sum()
    }
}

/// Safe view into a bridge-owned buffer.
///
/// The view keeps the underlying buffer alive, so it stays valid even if the
/// native layer frees the allocation in the meantime; the memory is only
/// recycled once every view is gone.
///
/// While the API is safe, the native layer may still be writing into the
/// buffer. Callers must order their reads after the SDK has finished with
/// it, as they would with a mapped DMA buffer.
pub struct BufferView {
    buffer: Arc<PinnedBuffer>,
    token: AllocationToken,
    offset: usize,
    len: usize,
}

impl BufferView {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { self.buffer.slice(self.offset, self.len) }
    }

    /// Base address of the allocation this view points into.
    pub fn base(&self) -> usize {
        self.buffer.address()
    }

    /// Address of the first byte of the view.
    pub fn address(&self) -> usize {
        self.base() + self.offset
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn token(&self) -> AllocationToken {
        self.token
    }
}

impl Deref for BufferView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("token", &self.token)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
