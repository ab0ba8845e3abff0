// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Runs in its own process so the hook slot starts out empty.

use sensor_bridge::{
    hooked_bridge, AllocatorHost, BridgeConfig, BridgeError, Disposable, DisposalState,
    MemoryBridge,
};
use sensor_sys::{sensor_memory_allocate_cb_t, sensor_memory_destroy_cb_t, SENSOR_RESULT_FAILED};
use serial_test::serial;
use std::{error::Error, sync::Arc};

/// Host that refuses the callbacks, or accepts them without ever calling.
struct Host {
    accept: bool,
}

impl AllocatorHost for Host {
    fn install_allocator(
        &self,
        _allocate: sensor_memory_allocate_cb_t,
        _free: sensor_memory_destroy_cb_t,
    ) -> sensor_bridge::Result<()> {
        if self.accept {
            Ok(())
        } else {
            Err(BridgeError::HookFailed(SENSOR_RESULT_FAILED))
        }
    }
}

#[derive(Default)]
struct Session {
    state: DisposalState,
}

impl Disposable for Session {
    fn dispose(&self) {
        self.state.begin_dispose();
    }

    fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }
}

#[test]
#[serial]
fn test_rejected_hook_leaves_slot_free() -> Result<(), Box<dyn Error>> {
    let refused = MemoryBridge::new(BridgeConfig::default());
    let session = Arc::new(Session::default());

    assert_eq!(
        refused.hook(&Host { accept: false }, &session),
        Err(BridgeError::HookFailed(SENSOR_RESULT_FAILED))
    );
    assert!(!refused.is_hooked());
    assert_eq!(refused.tracked(), 0);
    assert!(hooked_bridge().is_none());

    let accepted = MemoryBridge::new(BridgeConfig::default());
    accepted.hook(&Host { accept: true }, &session)?;
    assert!(accepted.is_hooked());
    assert!(Arc::ptr_eq(&hooked_bridge().expect("installed"), &accepted));

    assert_eq!(
        refused.hook(&Host { accept: true }, &session),
        Err(BridgeError::AlreadyHooked)
    );
    Ok(())
}
