// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Process-wide installation of the bridge as the SDK's allocator.
//!
//! The SDK's callbacks carry no user data pointer, so the bridge they serve
//! is held in a process-wide slot owned by the first bridge whose hooks the
//! SDK accepts. Nothing here may unwind into native frames: contract
//! violations inside a callback are logged and the process is aborted.

use crate::{
    bridge::MemoryBridge,
    error::{BridgeError, Result},
    registry::AllocationToken,
};
use libc::{c_int, c_void};
use parking_lot::{const_rwlock, RwLock};
use sensor_sys::{
    sensor_memory_allocate_cb_t, sensor_memory_destroy_cb_t, SensorSdk, SENSOR_RESULT_SUCCEEDED,
};
use std::{
    process,
    ptr::null_mut,
    sync::{Arc, Once},
};
use tracing::{error, warn};

static HOOKED: RwLock<Option<Arc<MemoryBridge>>> = const_rwlock(None);
static EXIT_HANDLER: Once = Once::new();

/// Something that accepts the allocator callback pair, normally the SDK.
pub trait AllocatorHost {
    fn install_allocator(
        &self,
        allocate: sensor_memory_allocate_cb_t,
        free: sensor_memory_destroy_cb_t,
    ) -> Result<()>;
}

impl AllocatorHost for SensorSdk {
    fn install_allocator(
        &self,
        allocate: sensor_memory_allocate_cb_t,
        free: sensor_memory_destroy_cb_t,
    ) -> Result<()> {
        let res = unsafe { self.sensor_set_allocator(Some(allocate), Some(free)) };
        if res != SENSOR_RESULT_SUCCEEDED {
            return Err(BridgeError::HookFailed(res));
        }
        Ok(())
    }
}

/// The bridge serving the native callbacks, once installed.
pub fn hooked_bridge() -> Option<Arc<MemoryBridge>> {
    HOOKED.read().clone()
}

pub(crate) fn install(bridge: &Arc<MemoryBridge>, host: &dyn AllocatorHost) -> Result<()> {
    // The slot is claimed before the host sees the callbacks, which may fire
    // as soon as they are installed.
    let claimed = {
        let mut slot = HOOKED.write();
        match slot.as_ref() {
            Some(current) if !Arc::ptr_eq(current, bridge) => {
                return Err(BridgeError::AlreadyHooked)
            }
            Some(_) => false,
            None => {
                *slot = Some(bridge.clone());
                true
            }
        }
    };

    if let Err(err) = host.install_allocator(allocate_callback, free_callback) {
        if claimed {
            HOOKED.write().take();
        }
        return Err(err);
    }

    EXIT_HANDLER.call_once(|| {
        if unsafe { libc::atexit(dispose_at_exit) } != 0 {
            warn!("unable to register exit-time disposal");
        }
    });
    Ok(())
}

unsafe extern "C" fn allocate_callback(size: c_int, context: *mut *mut c_void) -> *mut u8 {
    let Some(bridge) = hooked_bridge() else {
        error!("allocate callback invoked with no bridge installed");
        return null_mut();
    };
    let Ok(size) = usize::try_from(size) else {
        error!("{}", BridgeError::InvalidSize(size.into()));
        return null_mut();
    };
    // Without a slot for the token the matching free could never be honoured.
    if context.is_null() {
        error!(size, "sdk supplied no context slot, refusing allocation");
        return null_mut();
    }

    match bridge.allocator().allocate(size) {
        Ok((address, token)) => {
            *context = token.into_raw() as *mut c_void;
            address as *mut u8
        }
        Err(err) => {
            error!(size, "native allocation failed: {err}");
            null_mut()
        }
    }
}

unsafe extern "C" fn free_callback(buffer: *mut c_void, context: *mut c_void) {
    let Some(bridge) = hooked_bridge() else {
        error!("free callback invoked with no bridge installed");
        process::abort();
    };
    let token = AllocationToken::from_raw(context as usize);
    if let Err(err) = bridge.allocator().free(buffer as usize, token) {
        error!("native free broke the allocator contract: {err}");
        process::abort();
    }
}

extern "C" fn dispose_at_exit() {
    let Some(bridge) = hooked_bridge() else {
        return;
    };
    if let Err(err) = bridge.force_dispose_all() {
        error!("exit-time disposal failed: {err}");
        process::abort();
    }
}
