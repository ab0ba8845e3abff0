// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

/// How `free` treats an address the bridge has no record of.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownFreePolicy {
    /// Report [`BridgeError::UnknownAddress`](crate::BridgeError::UnknownAddress).
    /// Inside a native callback this aborts the process.
    #[default]
    Fail,
    /// Log a warning and carry on.
    Ignore,
}

/// Tunables for a [`MemoryBridge`](crate::MemoryBridge).
///
/// # Example
///
/// ```
/// use sensor_bridge::{BridgeConfig, UnknownFreePolicy};
///
/// let config = BridgeConfig {
///     pool_retain_bytes: 64 * 1024 * 1024,
///     unknown_free: UnknownFreePolicy::Ignore,
///     ..Default::default()
/// };
/// assert_eq!(config.pool_retain_buffers, 64);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Upper bound on the bytes kept by the buffer pool between rentals.
    pub pool_retain_bytes: usize,
    /// Upper bound on the number of buffers kept by the pool.
    pub pool_retain_buffers: usize,
    /// Behaviour of `free` for untracked addresses.
    pub unknown_free: UnknownFreePolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pool_retain_bytes: 256 * 1024 * 1024,
            pool_retain_buffers: 64,
            unknown_free: UnknownFreePolicy::default(),
        }
    }
}
