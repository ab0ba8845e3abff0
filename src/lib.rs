// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # Sensor SDK Memory Bridge
//!
//! This library lets Rust supply and track the memory the sensor SDK uses for
//! its capture and image buffers, so that buffers handed back by the SDK can
//! be read in place instead of copied, and so that every native resource is
//! released before the process tears the SDK down.
//!
//! ## Features
//!
//! - **Allocator Hooks**: The SDK's allocate/free callbacks are served from a
//!   [`RecyclableBufferPool`], and each lent buffer is pinned and tracked.
//! - **Range Lookup**: Any pointer the SDK returns, including interior
//!   pointers, is resolved to the bridge-owned buffer containing it through
//!   an [`AddressRangeRegistry`].
//! - **Shadow Copies**: Memory the SDK allocated itself is copied once into a
//!   shared, reference counted [`ShadowBuffer`].
//! - **Forced Disposal**: Wrappers register weakly with the bridge and are
//!   disposed by [`MemoryBridge::force_dispose_all`] at shutdown if their
//!   owners never released them.
//!
//! ## Example
//!
//! ```no_run
//! use sensor_bridge::{BridgeConfig, Disposable, DisposalState, MemoryBridge};
//! use sensor_sys::{SensorSdk, SENSOR_SDK_LIBRARY};
//! use std::sync::Arc;
//!
//! struct Device {
//!     state: DisposalState,
//! }
//!
//! impl Disposable for Device {
//!     fn dispose(&self) {
//!         if self.state.begin_dispose() {
//!             // close the native device handle
//!         }
//!     }
//!
//!     fn is_disposed(&self) -> bool {
//!         self.state.is_disposed()
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sdk = unsafe { SensorSdk::new(SENSOR_SDK_LIBRARY)? };
//! let bridge = MemoryBridge::new(BridgeConfig::default());
//! let _shutdown = bridge.shutdown_guard();
//!
//! let device = Arc::new(Device {
//!     state: DisposalState::new(),
//! });
//! bridge.hook(&sdk, &device)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! This library uses `unsafe` code to hand raw buffer addresses to the SDK
//! and to read foreign native memory. All unsafe operations are isolated in
//! the registry, shadow cache and hook modules and wrapped with safe APIs
//! where the bridge can vouch for the memory.

mod allocator;
mod bridge;
mod config;
mod disposal;
mod error;
mod hook;
mod pool;
mod registry;
mod shadow;

pub use allocator::{AllocationBridge, BufferView};
pub use bridge::{DisposalReport, MemoryBridge, NativeMemory, ShutdownGuard};
pub use config::{BridgeConfig, UnknownFreePolicy};
pub use disposal::{Disposable, DisposalRegistry, DisposalState};
pub use error::{BridgeError, Result};
pub use hook::{hooked_bridge, AllocatorHost};
pub use pool::{PoolStats, RecyclableBufferPool};
pub use registry::{AddressRangeRegistry, AllocationContext, AllocationToken};
pub use shadow::{BufferShadowCache, ShadowBuffer, ShadowLease};
