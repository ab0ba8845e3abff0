// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use thiserror::Error;

/// Result type alias using the bridge's error.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Contract violations detected by the memory bridge.
///
/// None of these are transient. When one surfaces inside a native callback
/// the process is aborted, since continuing would leave the SDK holding a
/// dangling or leaked buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The native layer requested a negative or unrepresentable size.
    #[error("invalid allocation size: {0}")]
    InvalidSize(i64),

    /// A null address was passed where a native buffer was expected.
    #[error("null native address")]
    NullAddress,

    /// `free` was called for an address the bridge is not tracking.
    #[error("free of untracked address {0:#x}")]
    UnknownAddress(usize),

    /// The token handed to `free` does not belong to the allocation tracked
    /// at that address.
    #[error("allocation at {address:#x} is tracked as #{tracked} but free was given #{given}")]
    ContextMismatch {
        address: usize,
        tracked: usize,
        given: usize,
    },

    /// A second allocation was registered at a live base address.
    #[error("address {0:#x} is already tracked")]
    DuplicateAddress(usize),

    /// A new allocation overlaps a live one.
    #[error("range {address:#x}+{len} overlaps allocation at {existing:#x}")]
    OverlappingRange {
        address: usize,
        len: usize,
        existing: usize,
    },

    /// Two callers shared a shadow address with different sizes.
    #[error("shadow buffer at {address:#x} holds {cached} bytes, {requested} requested")]
    CacheSizeMismatch {
        address: usize,
        cached: usize,
        requested: usize,
    },

    /// A shadow buffer was returned more often than it was taken.
    #[error("no shadow buffer cached for {0:#x}")]
    CacheEntryNotFound(usize),

    /// Native allocations outlived every wrapper during forced disposal.
    #[error("{0} native allocation(s) still outstanding after forced disposal")]
    OutstandingAllocations(usize),

    /// The wrapper's native resource has already been released.
    #[error("native resource already released")]
    AlreadyDisposed,

    /// The native allocator hooks are owned by a different bridge.
    #[error("allocator hooks are already installed for another bridge")]
    AlreadyHooked,

    /// The SDK rejected the allocator callbacks.
    #[error("sensor SDK refused allocator hooks: result {0}")]
    HookFailed(i32),
}
