// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Counters describing how well the pool is absorbing allocation churn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total calls to [`RecyclableBufferPool::rent`].
    pub rents: u64,
    /// Rentals satisfied by a previously returned buffer.
    pub hits: u64,
    /// Rentals that had to allocate a fresh buffer.
    pub allocations: u64,
    /// Buffers handed back through [`RecyclableBufferPool::return_buffer`].
    pub returns: u64,
    /// Returned buffers dropped to stay within the retention budget.
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    rents: AtomicU64,
    hits: AtomicU64,
    allocations: AtomicU64,
    returns: AtomicU64,
    evictions: AtomicU64,
}

struct Retained {
    buffers: Vec<Box<[u8]>>,
    bytes: usize,
}

/// Pool of reusable byte buffers keyed by minimum length.
///
/// Large frame buffers are expensive to allocate and zero, so buffers handed
/// back to the pool are kept and given to the next caller whose request
/// fits. Contents are never cleared between rentals; callers must not rely
/// on zeroed memory.
///
/// The pool only keeps what it is given. A rented buffer that is dropped
/// instead of returned is freed normally and costs the pool nothing, and the
/// retained set is capped by a byte and count budget so the pool cannot pin
/// memory indefinitely.
///
/// # Example
///
/// ```
/// use sensor_bridge::RecyclableBufferPool;
///
/// let pool = RecyclableBufferPool::new(1 << 20, 8);
/// let buf = pool.rent(4096);
/// let addr = buf.as_ptr();
/// pool.return_buffer(buf);
///
/// let again = pool.rent(1024);
/// assert_eq!(again.as_ptr(), addr);
/// assert_eq!(again.len(), 4096);
/// ```
pub struct RecyclableBufferPool {
    retained: Mutex<Retained>,
    max_bytes: usize,
    max_buffers: usize,
    counters: Counters,
}

impl RecyclableBufferPool {
    pub fn new(max_bytes: usize, max_buffers: usize) -> Self {
        Self {
            retained: Mutex::new(Retained {
                buffers: Vec::new(),
                bytes: 0,
            }),
            max_bytes,
            max_buffers,
            counters: Counters::default(),
        }
    }

    /// Returns a buffer of at least `min_len` bytes.
    ///
    /// The first retained buffer that is large enough is handed out;
    /// otherwise a fresh buffer of exactly `min_len` bytes is allocated.
    ///
    /// A zero-length request never takes a pooled buffer.
    pub fn rent(&self, min_len: usize) -> Box<[u8]> {
        if min_len == 0 {
            return Box::default();
        }
        self.counters.rents.fetch_add(1, Ordering::Relaxed);

        let reused = {
            let mut retained = self.retained.lock();
            match retained.buffers.iter().position(|b| b.len() >= min_len) {
                Some(idx) => {
                    let buf = retained.buffers.remove(idx);
                    retained.bytes -= buf.len();
                    Some(buf)
                }
                None => None,
            }
        };

        match reused {
            Some(buf) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(requested = min_len, len = buf.len(), "pool hit");
                buf
            }
            None => {
                self.counters.allocations.fetch_add(1, Ordering::Relaxed);
                debug!(len = min_len, "pool miss, allocating");
                vec![0u8; min_len].into_boxed_slice()
            }
        }
    }

    /// Hands a buffer back for reuse.
    ///
    /// Oldest buffers are evicted once the pool exceeds its byte or count
    /// budget. Buffers larger than the whole byte budget are dropped outright.
    pub fn return_buffer(&self, buf: Box<[u8]>) {
        if buf.is_empty() {
            return;
        }
        self.counters.returns.fetch_add(1, Ordering::Relaxed);
        if buf.len() > self.max_bytes || self.max_buffers == 0 {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let evicted = {
            let mut retained = self.retained.lock();
            retained.bytes += buf.len();
            retained.buffers.push(buf);

            let mut evicted = Vec::new();
            while retained.bytes > self.max_bytes || retained.buffers.len() > self.max_buffers {
                let old = retained.buffers.remove(0);
                retained.bytes -= old.len();
                evicted.push(old);
            }
            evicted
        };

        if !evicted.is_empty() {
            self.counters
                .evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            debug!(count = evicted.len(), "pool over budget, evicted buffers");
        }
    }

    /// Drops every retained buffer.
    pub fn trim(&self) {
        let dropped = {
            let mut retained = self.retained.lock();
            retained.bytes = 0;
            std::mem::take(&mut retained.buffers)
        };
        debug!(count = dropped.len(), "pool trimmed");
    }

    /// Number of buffers currently available for reuse.
    pub fn pooled_count(&self) -> usize {
        self.retained.lock().buffers.len()
    }

    /// Total length of the buffers currently available for reuse.
    pub fn pooled_bytes(&self) -> usize {
        self.retained.lock().bytes
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rents: self.counters.rents.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            returns: self.counters.returns.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
