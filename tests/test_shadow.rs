// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use sensor_bridge::{BridgeError, BufferShadowCache, RecyclableBufferPool};
use std::{
    error::Error,
    sync::{Arc, Barrier},
    thread,
};

fn cache() -> Arc<BufferShadowCache> {
    let pool = Arc::new(RecyclableBufferPool::new(64 << 20, 16));
    Arc::new(BufferShadowCache::new(pool))
}

#[test]
fn test_shared_copy_is_refcounted() -> Result<(), Box<dyn Error>> {
    let cache = cache();
    let native: Vec<u8> = (0..=255).collect();
    let address = native.as_ptr() as usize;

    let first = unsafe { cache.get_buffer_cache(native.as_ptr(), native.len())? };
    let second = unsafe { cache.get_buffer_cache(native.as_ptr(), native.len())? };
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.ref_count(address), Some(2));
    assert_eq!(first.to_vec(), native);

    cache.return_buffer_cache(address)?;
    assert_eq!(cache.ref_count(address), Some(1));
    cache.return_buffer_cache(address)?;
    assert_eq!(cache.ref_count(address), None);
    assert!(cache.is_empty());

    assert_eq!(
        cache.return_buffer_cache(address),
        Err(BridgeError::CacheEntryNotFound(address))
    );

    // Handles already taken stay readable after the entry is gone.
    assert_eq!(second.read()[255], 255);
    Ok(())
}

#[test]
fn test_size_mismatch_is_rejected() -> Result<(), Box<dyn Error>> {
    let cache = cache();
    let native = vec![1u8; 200];
    let address = native.as_ptr() as usize;

    let _shadow = unsafe { cache.get_buffer_cache(native.as_ptr(), 100)? };
    let err = unsafe { cache.get_buffer_cache(native.as_ptr(), 200) }.unwrap_err();
    assert_eq!(
        err,
        BridgeError::CacheSizeMismatch {
            address,
            cached: 100,
            requested: 200,
        }
    );
    assert_eq!(cache.ref_count(address), Some(1));

    cache.return_buffer_cache(address)?;
    Ok(())
}

#[test]
fn test_null_address_is_rejected() {
    let cache = cache();
    let err = unsafe { cache.get_buffer_cache(std::ptr::null(), 16) }.unwrap_err();
    assert_eq!(err, BridgeError::NullAddress);
    assert!(cache.is_empty());
}

#[test]
fn test_copy_is_taken_once() -> Result<(), Box<dyn Error>> {
    let cache = cache();
    let mut native = vec![5u8; 64];
    let address = native.as_ptr() as usize;

    let first = unsafe { cache.get_buffer_cache(native.as_ptr(), 64)? };
    assert!(first.is_populated());

    native.fill(6);
    let second = unsafe { cache.get_buffer_cache(native.as_ptr(), 64)? };
    assert_eq!(second.read()[0], 5);

    unsafe { second.refresh() };
    assert_eq!(first.read()[0], 6);

    cache.return_buffer_cache(address)?;
    cache.return_buffer_cache(address)?;
    Ok(())
}

#[test]
fn test_flush_writes_back() -> Result<(), Box<dyn Error>> {
    let cache = cache();
    let mut native = vec![0u8; 32];
    let ptr = native.as_mut_ptr();

    let lease = unsafe { cache.lease(ptr, 32)? };
    lease.write()[..4].copy_from_slice(b"RUST");
    assert_eq!(native[0], 0);

    unsafe { lease.flush() };
    drop(lease);
    assert_eq!(&native[..4], b"RUST");
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn test_concurrent_readers_share_one_copy() -> Result<(), Box<dyn Error>> {
    const READERS: usize = 8;

    let cache = cache();
    let native: Vec<u8> = (0..1 << 20).map(|i| (i % 251) as u8).collect();
    let address = native.as_ptr() as usize;
    let barrier = Barrier::new(READERS);

    let buffers = thread::scope(|scope| {
        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let (cache, native, barrier) = (&cache, &native, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    let shadow = unsafe { cache.get_buffer_cache(native.as_ptr(), native.len()) }
                        .expect("shadow");
                    assert_eq!(&*shadow.read(), native.as_slice());
                    shadow
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("reader thread"))
            .collect::<Vec<_>>()
    });

    assert!(buffers.iter().all(|b| Arc::ptr_eq(b, &buffers[0])));
    assert_eq!(cache.ref_count(address), Some(READERS));

    for _ in 0..READERS {
        cache.return_buffer_cache(address)?;
    }
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn test_storage_returns_to_pool() -> Result<(), Box<dyn Error>> {
    let pool = Arc::new(RecyclableBufferPool::new(1 << 20, 4));
    let cache = Arc::new(BufferShadowCache::new(pool.clone()));
    let native = vec![7u8; 4096];

    let lease = unsafe { cache.lease(native.as_ptr(), native.len())? };
    let handle = lease.buffer().clone();
    drop(lease);
    assert!(cache.is_empty());
    assert_eq!(pool.pooled_count(), 0);

    drop(handle);
    assert_eq!(pool.pooled_count(), 1);
    assert_eq!(pool.pooled_bytes(), 4096);
    Ok(())
}

#[test]
fn test_zero_size_shadow_leaves_pool_alone() -> Result<(), Box<dyn Error>> {
    let pool = Arc::new(RecyclableBufferPool::new(64 << 20, 4));
    let cache = Arc::new(BufferShadowCache::new(pool.clone()));
    pool.return_buffer(pool.rent(1 << 20));
    let stats = pool.stats();

    let native = [0u8; 1];
    let lease = unsafe { cache.lease(native.as_ptr(), 0)? };
    assert!(lease.read().is_empty());
    assert_eq!(pool.pooled_count(), 1);

    drop(lease);
    assert_eq!(pool.pooled_count(), 1);
    assert_eq!(pool.stats(), stats);
    Ok(())
}
