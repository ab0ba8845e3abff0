// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Low-level bindings for the sensor SDK memory allocator hook.
//!
//! The SDK lets the host application supply the memory backing its capture
//! and image buffers through a pair of callbacks. Only the pieces of the C
//! API needed to install those callbacks are declared here; the library is
//! loaded at runtime so that consumers build without the SDK present.

#![allow(non_camel_case_types)]

use libc::{c_int, c_void};
use libloading::Library;
use std::ffi::OsStr;

/// Default soname of the sensor SDK runtime library.
pub const SENSOR_SDK_LIBRARY: &str = "libsensorsdk.so.1";

pub type sensor_result_t = c_int;

pub const SENSOR_RESULT_SUCCEEDED: sensor_result_t = 0;
pub const SENSOR_RESULT_FAILED: sensor_result_t = 1;

/// Called by the SDK when it needs `size` bytes. The callee may store an
/// opaque value in `*context` which is handed back to the matching destroy
/// callback.
pub type sensor_memory_allocate_cb_t =
    unsafe extern "C" fn(size: c_int, context: *mut *mut c_void) -> *mut u8;

/// Called by the SDK when it is done with a buffer previously obtained from
/// the allocate callback.
pub type sensor_memory_destroy_cb_t =
    unsafe extern "C" fn(buffer: *mut c_void, context: *mut c_void);

type sensor_set_allocator_fn = unsafe extern "C" fn(
    allocate: Option<sensor_memory_allocate_cb_t>,
    free: Option<sensor_memory_destroy_cb_t>,
) -> sensor_result_t;

/// Dynamically loaded handle to the sensor SDK.
pub struct SensorSdk {
    __library: Library,
    sensor_set_allocator: sensor_set_allocator_fn,
}

impl SensorSdk {
    /// Loads the SDK from `path` and resolves the allocator hook symbol.
    ///
    /// # Safety
    ///
    /// Loading a shared library runs its initialisers. The caller must ensure
    /// the library at `path` is a genuine sensor SDK build whose
    /// `sensor_set_allocator` matches the declared signature.
    pub unsafe fn new<P>(path: P) -> Result<Self, libloading::Error>
    where
        P: AsRef<OsStr>,
    {
        let library = Library::new(path)?;
        Self::from_library(library)
    }

    /// # Safety
    ///
    /// See [`SensorSdk::new`].
    pub unsafe fn from_library<L>(library: L) -> Result<Self, libloading::Error>
    where
        L: Into<Library>,
    {
        let __library = library.into();
        let sensor_set_allocator = *__library.get::<sensor_set_allocator_fn>(b"sensor_set_allocator\0")?;
        Ok(SensorSdk {
            __library,
            sensor_set_allocator,
        })
    }

    /// Installs (or, with `None`, removes) the allocator callback pair.
    ///
    /// # Safety
    ///
    /// The callbacks must remain valid until they are removed or the library
    /// is unloaded, and they may be invoked from any SDK thread.
    pub unsafe fn sensor_set_allocator(
        &self,
        allocate: Option<sensor_memory_allocate_cb_t>,
        free: Option<sensor_memory_destroy_cb_t>,
    ) -> sensor_result_t {
        (self.sensor_set_allocator)(allocate, free)
    }
}
