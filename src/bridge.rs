// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    allocator::{AllocationBridge, BufferView},
    config::BridgeConfig,
    disposal::{Disposable, DisposalRegistry},
    error::{BridgeError, Result},
    hook::{self, AllocatorHost},
    pool::RecyclableBufferPool,
    shadow::{BufferShadowCache, ShadowLease},
};
use parking_lot::Mutex;
use std::{
    sync::{Arc, Weak},
    thread,
};
use tracing::{error, info, instrument, warn};

struct Lifecycle {
    hooked: bool,
    wrappers: DisposalRegistry,
}

/// Outcome of [`MemoryBridge::force_dispose_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisposalReport {
    /// Wrappers that were still alive and were disposed by the sweep.
    pub disposed: usize,
    /// Registrations dropped because the wrapper was already gone.
    pub pruned: usize,
}

/// Native memory reached through [`MemoryBridge::access`].
#[derive(Debug)]
pub enum NativeMemory {
    /// The range lies in a buffer the bridge lent to the native layer and is
    /// read in place.
    Owned(BufferView),
    /// The range is foreign and is read through a shared copy.
    Shadow(ShadowLease),
}

impl NativeMemory {
    pub fn is_owned(&self) -> bool {
        matches!(self, NativeMemory::Owned(_))
    }

    pub fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            NativeMemory::Owned(view) => f(view.as_slice()),
            NativeMemory::Shadow(lease) => f(&*lease.read()),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with_slice(<[u8]>::to_vec)
    }
}

/// Memory bridge between the sensor SDK and Rust wrappers.
///
/// A `MemoryBridge` owns the buffer pool, the allocation registry, the shadow
/// cache and the set of wrappers to dispose at shutdown. Wrapper types hold
/// an `Arc<MemoryBridge>` and go through it for every native buffer they
/// touch.
///
/// # Example
///
/// ```
/// use sensor_bridge::{BridgeConfig, MemoryBridge};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bridge = MemoryBridge::new(BridgeConfig::default());
///
/// // What the SDK does through the allocate callback
/// let (address, token) = bridge.allocator().allocate(1024)?;
///
/// // A pointer 100 bytes into that buffer maps back to it without a copy
/// let memory = unsafe { bridge.access((address + 100) as *const u8, 50)? };
/// assert!(memory.is_owned());
/// drop(memory);
///
/// bridge.allocator().free(address, token)?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryBridge {
    config: BridgeConfig,
    pool: Arc<RecyclableBufferPool>,
    allocator: AllocationBridge,
    shadows: Arc<BufferShadowCache>,
    lifecycle: Mutex<Lifecycle>,
}

impl MemoryBridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let pool = Arc::new(RecyclableBufferPool::new(
            config.pool_retain_bytes,
            config.pool_retain_buffers,
        ));
        Arc::new(Self {
            allocator: AllocationBridge::new(pool.clone(), config.unknown_free),
            shadows: Arc::new(BufferShadowCache::new(pool.clone())),
            pool,
            config,
            lifecycle: Mutex::new(Lifecycle {
                hooked: false,
                wrappers: DisposalRegistry::new(),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<RecyclableBufferPool> {
        &self.pool
    }

    pub fn allocator(&self) -> &AllocationBridge {
        &self.allocator
    }

    pub fn shadow_cache(&self) -> &Arc<BufferShadowCache> {
        &self.shadows
    }

    /// Gives safe access to `size` bytes at a pointer returned by the SDK.
    ///
    /// Bridge-owned memory is viewed in place; anything else goes through
    /// the shadow cache.
    ///
    /// # Safety
    ///
    /// If the range is not bridge-owned, `address` must be valid for reads of
    /// `size` bytes.
    pub unsafe fn access(&self, address: *const u8, size: usize) -> Result<NativeMemory> {
        if address.is_null() {
            return Err(BridgeError::NullAddress);
        }
        if let Some(view) = self.allocator.resolve(address as usize, size) {
            return Ok(NativeMemory::Owned(view));
        }
        Ok(NativeMemory::Shadow(self.shadows.lease(address, size)?))
    }

    /// Tracks a wrapper for forced disposal. Only a weak reference is kept.
    pub fn register<W: Disposable + 'static>(&self, wrapper: &Arc<W>) {
        let weak: Weak<W> = Arc::downgrade(wrapper);
        self.lifecycle.lock().wrappers.register(weak);
    }

    pub fn unregister(&self, wrapper: &dyn Disposable) {
        self.lifecycle.lock().wrappers.unregister(wrapper);
    }

    /// Number of registered wrappers still alive.
    pub fn tracked(&self) -> usize {
        self.lifecycle.lock().wrappers.live()
    }

    pub fn is_hooked(&self) -> bool {
        self.lifecycle.lock().hooked
    }

    /// Installs this bridge as the SDK's allocator, if not done already, and
    /// registers `wrapper` for forced disposal.
    ///
    /// Only the first call installs the callbacks; every call registers its
    /// wrapper. The callbacks are process-wide, so a second bridge trying to
    /// hook fails with [`BridgeError::AlreadyHooked`].
    #[instrument(skip_all)]
    pub fn hook<W: Disposable + 'static>(
        self: &Arc<Self>,
        host: &dyn AllocatorHost,
        wrapper: &Arc<W>,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.hooked {
            hook::install(self, host)?;
            lifecycle.hooked = true;
            info!("sensor allocator hooks installed");
        }
        let weak: Weak<W> = Arc::downgrade(wrapper);
        lifecycle.wrappers.register(weak);
        Ok(())
    }

    /// Disposes every registered wrapper that is still alive, then checks
    /// that no native allocation survived.
    ///
    /// # Errors
    ///
    /// [`BridgeError::OutstandingAllocations`] if the SDK still holds bridge
    /// memory once every wrapper is gone. This must not be ignored: the SDK
    /// would be left with callbacks into a process that is unloading.
    #[instrument(skip(self))]
    pub fn force_dispose_all(&self) -> Result<DisposalReport> {
        let (live, pruned) = self.lifecycle.lock().wrappers.drain_live();

        let mut disposed = 0;
        for wrapper in &live {
            if !wrapper.is_disposed() {
                wrapper.dispose();
                disposed += 1;
            }
        }
        drop(live);

        let outstanding = self.allocator.outstanding();
        if outstanding > 0 {
            error!(
                outstanding,
                bytes = self.allocator.outstanding_bytes(),
                "native allocations outlived every wrapper"
            );
            return Err(BridgeError::OutstandingAllocations(outstanding));
        }
        if !self.shadows.is_empty() {
            warn!(
                entries = self.shadows.len(),
                "shadow buffers still referenced after forced disposal"
            );
        }

        info!(disposed, pruned, "forced disposal complete");
        Ok(DisposalReport { disposed, pruned })
    }

    /// Guard that runs [`MemoryBridge::force_dispose_all`] when dropped.
    ///
    /// Declare it after the SDK handle so it drops first: the sweep must
    /// finish before the SDK library is unloaded.
    pub fn shutdown_guard(self: &Arc<Self>) -> ShutdownGuard {
        ShutdownGuard {
            bridge: Some(self.clone()),
        }
    }
}

/// Runs forced disposal on drop and fails loudly if allocations remain.
pub struct ShutdownGuard {
    bridge: Option<Arc<MemoryBridge>>,
}

impl ShutdownGuard {
    /// Runs the sweep now and reports the result instead of panicking.
    pub fn finish(mut self) -> Result<DisposalReport> {
        match self.bridge.take() {
            Some(bridge) => bridge.force_dispose_all(),
            None => Ok(DisposalReport::default()),
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let Some(bridge) = self.bridge.take() else {
            return;
        };
        if let Err(err) = bridge.force_dispose_all() {
            if thread::panicking() {
                error!("shutdown sweep failed during unwind: {err}");
            } else {
                panic!("shutdown sweep failed: {err}");
            }
        }
    }
}
