// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use sensor_bridge::{
    AllocationToken, BridgeConfig, BridgeError, Disposable, DisposalReport, DisposalState,
    MemoryBridge, UnknownFreePolicy,
};
use std::{
    error::Error,
    ptr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

/// Wrapper owning one bridge allocation, released on dispose or drop.
struct Frame {
    bridge: Arc<MemoryBridge>,
    address: usize,
    token: AllocationToken,
    state: DisposalState,
}

impl Frame {
    fn new(bridge: &Arc<MemoryBridge>, size: usize) -> Result<Arc<Self>, BridgeError> {
        let (address, token) = bridge.allocator().allocate(size)?;
        let frame = Arc::new(Self {
            bridge: bridge.clone(),
            address,
            token,
            state: DisposalState::new(),
        });
        bridge.register(&frame);
        Ok(frame)
    }

    fn first_byte(&self) -> Result<u8, BridgeError> {
        self.state.check()?;
        let view = self
            .bridge
            .allocator()
            .resolve(self.address, 1)
            .ok_or(BridgeError::UnknownAddress(self.address))?;
        Ok(view[0])
    }
}

impl Disposable for Frame {
    fn dispose(&self) {
        if self.state.begin_dispose() {
            self.bridge
                .allocator()
                .free(self.address, self.token)
                .expect("frame allocation tracked");
            self.bridge.unregister(self);
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Wrapper with no native resource that records when it is dropped.
struct Watched {
    dropped: Arc<AtomicBool>,
    state: DisposalState,
}

impl Disposable for Watched {
    fn dispose(&self) {
        self.state.begin_dispose();
    }

    fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }
}

impl Drop for Watched {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_allocate_resolve_free() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let allocator = bridge.allocator();

    let (x, token) = allocator.allocate(1024)?;
    assert_ne!(x, 0);
    assert_eq!(allocator.outstanding(), 1);

    let view = allocator.resolve(x + 100, 50).expect("interior range resolves");
    assert_eq!(view.offset(), 100);
    assert_eq!(view.base(), x);
    assert_eq!(view.token(), token);
    assert_eq!(view.len(), 50);
    drop(view);

    allocator.free(x, token)?;
    assert!(allocator.resolve(x + 100, 50).is_none());
    assert_eq!(allocator.outstanding(), 0);

    Ok(())
}

#[test]
fn test_range_past_end_is_foreign() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let allocator = bridge.allocator();
    let (x, token) = allocator.allocate(256)?;

    assert!(allocator.contains(x, 256));
    assert!(allocator.contains(x + 255, 1));
    assert!(!allocator.contains(x + 200, 57));
    assert!(!allocator.contains(x + 256, 0));
    assert!(!allocator.contains(x - 1, 1));

    allocator.free(x, token)?;
    Ok(())
}

#[test]
fn test_zero_size_allocation() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let allocator = bridge.allocator();

    let (a, ta) = allocator.allocate(0)?;
    let (b, tb) = allocator.allocate(0)?;
    assert_ne!(a, b);
    assert!(allocator.resolve(a, 0).is_none());

    allocator.free(a, ta)?;
    allocator.free(b, tb)?;
    assert_eq!(allocator.outstanding(), 0);
    Ok(())
}

#[test]
fn test_zero_size_allocation_leaves_pool_alone() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let allocator = bridge.allocator();

    let (frame, token) = allocator.allocate(1 << 20)?;
    allocator.free(frame, token)?;
    assert_eq!(bridge.pool().pooled_count(), 1);
    let stats = bridge.pool().stats();

    let (empty, token) = allocator.allocate(0)?;
    assert_ne!(empty, frame);
    assert_eq!(bridge.pool().pooled_count(), 1);

    allocator.free(empty, token)?;
    assert_eq!(bridge.pool().pooled_count(), 1);
    assert_eq!(bridge.pool().pooled_bytes(), 1 << 20);
    assert_eq!(bridge.pool().stats(), stats);
    Ok(())
}

#[test]
fn test_free_contract_violations() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let allocator = bridge.allocator();

    let (a, ta) = allocator.allocate(64)?;
    let (b, tb) = allocator.allocate(64)?;

    assert_eq!(
        allocator.free(a, tb),
        Err(BridgeError::ContextMismatch {
            address: a,
            tracked: ta.into_raw(),
            given: tb.into_raw(),
        })
    );
    assert_eq!(allocator.outstanding(), 2);

    allocator.free(a, ta)?;
    assert_eq!(allocator.free(a, ta), Err(BridgeError::UnknownAddress(a)));

    allocator.free(b, tb)?;
    Ok(())
}

#[test]
fn test_unknown_free_ignored_by_policy() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig {
        unknown_free: UnknownFreePolicy::Ignore,
        ..Default::default()
    });
    let allocator = bridge.allocator();

    let (a, ta) = allocator.allocate(64)?;
    allocator.free(a, ta)?;
    allocator.free(a, ta)?;
    allocator.free(0xdead_0000, AllocationToken::from_raw(42))?;
    Ok(())
}

#[test]
fn test_view_outlives_native_free() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let allocator = bridge.allocator();

    let (x, token) = allocator.allocate(256)?;
    // What the SDK would do with the address it was given.
    unsafe { ptr::write_bytes(x as *mut u8, 0xab, 256) };

    let view = allocator.resolve(x + 16, 32).expect("range is bridge-owned");
    allocator.free(x, token)?;
    assert!(allocator.resolve(x + 16, 32).is_none());
    assert_eq!(bridge.pool().pooled_count(), 0);

    assert!(view.iter().all(|&b| b == 0xab));
    drop(view);
    assert_eq!(bridge.pool().pooled_count(), 1);

    // The recycled buffer comes straight back, contents untouched.
    let (y, token) = allocator.allocate(128)?;
    assert_eq!(y, x);
    assert_eq!(allocator.resolve(y, 1).expect("owned")[0], 0xab);
    allocator.free(y, token)?;

    Ok(())
}

#[test]
fn test_access_chooses_view_or_shadow() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let (x, token) = bridge.allocator().allocate(512)?;
    unsafe { ptr::write_bytes(x as *mut u8, 3, 512) };

    let owned = unsafe { bridge.access((x + 37) as *const u8, 100)? };
    assert!(owned.is_owned());
    assert_eq!(owned.to_vec(), vec![3u8; 100]);
    assert!(bridge.shadow_cache().is_empty());

    let foreign = vec![9u8; 128];
    let shadow = unsafe { bridge.access(foreign.as_ptr(), foreign.len())? };
    assert!(!shadow.is_owned());
    assert_eq!(shadow.to_vec(), foreign);
    assert_eq!(
        bridge.shadow_cache().ref_count(foreign.as_ptr() as usize),
        Some(1)
    );

    drop(shadow);
    assert!(bridge.shadow_cache().is_empty());

    drop(owned);
    bridge.allocator().free(x, token)?;

    assert_eq!(
        unsafe { bridge.access(ptr::null(), 8) }.unwrap_err(),
        BridgeError::NullAddress
    );
    Ok(())
}

#[test]
fn test_concurrent_allocate_resolve_free() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());

    thread::scope(|scope| {
        for t in 0..8usize {
            let bridge = &bridge;
            scope.spawn(move || {
                let allocator = bridge.allocator();
                let mut live = Vec::new();
                for i in 0..200usize {
                    let size = 64 + (t * 131 + i * 17) % 4096;
                    let (address, token) = allocator.allocate(size).expect("allocate");
                    let offset = (i * 7) % size;
                    let view = allocator
                        .resolve(address + offset, size - offset)
                        .expect("fresh allocation resolves");
                    assert_eq!(view.offset(), offset);
                    assert_eq!(view.token(), token);
                    live.push((address, token));

                    if i % 3 == 0 {
                        let (address, token) = live.remove(0);
                        allocator.free(address, token).expect("free");
                    }
                }
                for (address, token) in live {
                    allocator.free(address, token).expect("free");
                }
            });
        }
    });

    assert_eq!(bridge.allocator().outstanding(), 0);
    Ok(())
}

#[test]
fn test_force_dispose_all() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let frames = (0..8)
        .map(|i| Frame::new(&bridge, 1024 * (i + 1)))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(bridge.tracked(), 8);
    assert_eq!(bridge.allocator().outstanding(), 8);
    assert_eq!(frames[0].first_byte().map(|_| ()), Ok(()));

    let report = bridge.force_dispose_all()?;
    assert_eq!(
        report,
        DisposalReport {
            disposed: 8,
            pruned: 0
        }
    );
    assert!(frames.iter().all(|f| f.is_disposed()));
    assert_eq!(bridge.allocator().outstanding(), 0);
    assert_eq!(bridge.tracked(), 0);
    assert_eq!(frames[0].first_byte(), Err(BridgeError::AlreadyDisposed));

    // A second sweep has nothing left to do.
    assert_eq!(bridge.force_dispose_all()?, DisposalReport::default());
    Ok(())
}

#[test]
fn test_explicit_dispose_unregisters() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let kept = Frame::new(&bridge, 128)?;
    let released = Frame::new(&bridge, 128)?;

    released.dispose();
    assert_eq!(bridge.tracked(), 1);
    assert_eq!(bridge.allocator().outstanding(), 1);

    drop(Frame::new(&bridge, 128)?);
    assert_eq!(bridge.tracked(), 1);

    let report = bridge.force_dispose_all()?;
    assert_eq!(report.disposed, 1);
    assert!(kept.is_disposed());
    Ok(())
}

#[test]
fn test_registration_does_not_extend_lifetime() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let dropped = Arc::new(AtomicBool::new(false));

    let watched = Arc::new(Watched {
        dropped: dropped.clone(),
        state: DisposalState::new(),
    });
    bridge.register(&watched);
    assert_eq!(bridge.tracked(), 1);

    let weak = Arc::downgrade(&watched);
    drop(watched);
    assert!(dropped.load(Ordering::SeqCst));
    assert!(weak.upgrade().is_none());
    assert_eq!(bridge.tracked(), 0);

    let report = bridge.force_dispose_all()?;
    assert_eq!(
        report,
        DisposalReport {
            disposed: 0,
            pruned: 1
        }
    );
    Ok(())
}

#[test]
fn test_outstanding_allocations_fail_sweep() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let (x, token) = bridge.allocator().allocate(64)?;

    assert_eq!(
        bridge.force_dispose_all(),
        Err(BridgeError::OutstandingAllocations(1))
    );

    bridge.allocator().free(x, token)?;
    bridge.force_dispose_all()?;
    Ok(())
}

#[test]
fn test_shutdown_guard_finish() -> Result<(), Box<dyn Error>> {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let frame = Frame::new(&bridge, 4096)?;

    let report = bridge.shutdown_guard().finish()?;
    assert_eq!(report.disposed, 1);
    assert!(frame.is_disposed());
    Ok(())
}

#[test]
#[should_panic(expected = "shutdown sweep failed")]
fn test_shutdown_guard_panics_on_leak() {
    let bridge = MemoryBridge::new(BridgeConfig::default());
    let _guard = bridge.shutdown_guard();
    bridge.allocator().allocate(64).expect("allocate");
}
