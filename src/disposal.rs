// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::error::{BridgeError, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

/// A wrapper object that owns a native resource.
///
/// `dispose` must release the native resource (free the allocation, return
/// the shadow lease, close the handle) and must tolerate being called more
/// than once. Implementations normally call it from `Drop` as well, so the
/// resource is released whether the owner drops the wrapper or the bridge
/// forces it at shutdown.
pub trait Disposable: Send + Sync {
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Release flag for [`Disposable`] implementations.
///
/// # Example
///
/// ```
/// use sensor_bridge::{BridgeError, DisposalState};
///
/// let state = DisposalState::new();
/// assert!(state.check().is_ok());
/// assert!(state.begin_dispose());
/// assert!(!state.begin_dispose());
/// assert_eq!(state.check(), Err(BridgeError::AlreadyDisposed));
/// ```
#[derive(Debug, Default)]
pub struct DisposalState(AtomicBool);

impl DisposalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the resource released. Returns true only for the first caller,
    /// which is the one that must perform the release.
    pub fn begin_dispose(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_disposed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fails with [`BridgeError::AlreadyDisposed`] once released.
    pub fn check(&self) -> Result<()> {
        if self.is_disposed() {
            Err(BridgeError::AlreadyDisposed)
        } else {
            Ok(())
        }
    }
}

/// Weak set of every live wrapper holding a native resource.
///
/// Registration never keeps a wrapper alive; only its owners do. Dead
/// entries are pruned on unregister, on drain, and periodically on register.
#[derive(Default)]
pub struct DisposalRegistry {
    tracked: Vec<Weak<dyn Disposable>>,
    prune_at: usize,
}

const PRUNE_FLOOR: usize = 32;

fn same_object(weak: &Weak<dyn Disposable>, wrapper: *const ()) -> bool {
    weak.as_ptr() as *const () == wrapper
}

impl DisposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `wrapper`. Dead entries are swept once the set has doubled
    /// since the last sweep.
    pub fn register(&mut self, wrapper: Weak<dyn Disposable>) {
        if self.tracked.len() >= self.prune_at {
            self.tracked.retain(|weak| weak.strong_count() > 0);
            self.prune_at = (self.tracked.len() * 2).max(PRUNE_FLOOR);
        }
        self.tracked.push(wrapper);
    }

    /// Removes `wrapper` along with any entry whose target is gone.
    pub fn unregister(&mut self, wrapper: &dyn Disposable) {
        let target = wrapper as *const dyn Disposable as *const ();
        self.tracked
            .retain(|weak| weak.strong_count() > 0 && !same_object(weak, target));
    }

    /// Number of entries, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Number of entries whose wrapper is still alive.
    pub fn live(&self) -> usize {
        self.tracked
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Empties the set, returning strong references to every wrapper still
    /// alive and the number of dead entries dropped.
    ///
    /// The returned references may be the last ones, so they must be dropped
    /// after the registry lock is released: a wrapper's `Drop` usually
    /// unregisters itself.
    pub fn drain_live(&mut self) -> (Vec<Arc<dyn Disposable>>, usize) {
        let tracked = std::mem::take(&mut self.tracked);
        let total = tracked.len();
        let live: Vec<_> = tracked.iter().filter_map(Weak::upgrade).collect();
        let pruned = total - live.len();
        (live, pruned)
    }
}
