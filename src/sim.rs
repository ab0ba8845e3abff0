// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use libc::{c_int, c_void};
use sensor_bridge::{AllocatorHost, BridgeError};
use sensor_sys::{sensor_memory_allocate_cb_t, sensor_memory_destroy_cb_t, SENSOR_RESULT_FAILED};
use std::{
    error::Error,
    ptr::null_mut,
    slice::from_raw_parts_mut,
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
};
use tracing::debug;

pub type SoakResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// A frame buffer the simulated SDK obtained through the allocate callback.
#[derive(Debug)]
pub struct NativeFrame {
    pub address: usize,
    pub context: usize,
    pub len: usize,
}

/// Stand-in for the sensor SDK.
///
/// Frames are allocated through whatever callbacks were installed, exactly
/// as the real SDK does, while a handful of internal buffers are allocated
/// by the "SDK" itself and are therefore foreign to the bridge.
pub struct SimulatedSensor {
    callbacks: OnceLock<(sensor_memory_allocate_cb_t, sensor_memory_destroy_cb_t)>,
    frame_bytes: usize,
    foreign: Vec<Box<[u8]>>,
    running: AtomicBool,
}

impl SimulatedSensor {
    pub fn new(frame_bytes: usize, foreign_buffers: usize) -> Self {
        let foreign = (0..foreign_buffers)
            .map(|idx| vec![idx as u8; 64 * 1024].into_boxed_slice())
            .collect();
        Self {
            callbacks: OnceLock::new(),
            frame_bytes,
            foreign,
            running: AtomicBool::new(true),
        }
    }

    /// Captures one frame into a buffer from the allocate callback and
    /// stamps it with `sequence`.
    pub fn capture(&self, sequence: u64) -> SoakResult<NativeFrame> {
        if !self.is_running() {
            return Err("sensor stopped".into());
        }
        let &(allocate, _) = self.callbacks.get().ok_or("allocator hooks not installed")?;
        let size = c_int::try_from(self.frame_bytes)?;

        let mut context: *mut c_void = null_mut();
        let ptr = unsafe { allocate(size, &mut context) };
        if ptr.is_null() {
            return Err(format!("allocate callback failed for {} bytes", self.frame_bytes).into());
        }

        let frame = unsafe { from_raw_parts_mut(ptr, self.frame_bytes) };
        frame.fill(sequence as u8);
        let stamp = sequence.to_le_bytes();
        let n = stamp.len().min(frame.len());
        frame[..n].copy_from_slice(&stamp[..n]);

        Ok(NativeFrame {
            address: ptr as usize,
            context: context as usize,
            len: self.frame_bytes,
        })
    }

    /// Hands a frame back through the free callback.
    pub fn release(&self, frame: NativeFrame) {
        if let Some(&(_, free)) = self.callbacks.get() {
            unsafe { free(frame.address as *mut c_void, frame.context as *mut c_void) };
        }
    }

    /// Pointer and length of an SDK-internal buffer.
    pub fn foreign_buffer(&self, index: usize) -> (*const u8, usize) {
        let buf = &self.foreign[index % self.foreign.len()];
        (buf.as_ptr(), buf.len())
    }

    pub fn foreign_count(&self) -> usize {
        self.foreign.len()
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("simulated sensor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl AllocatorHost for SimulatedSensor {
    fn install_allocator(
        &self,
        allocate: sensor_memory_allocate_cb_t,
        free: sensor_memory_destroy_cb_t,
    ) -> sensor_bridge::Result<()> {
        self.callbacks
            .set((allocate, free))
            .map_err(|_| BridgeError::HookFailed(SENSOR_RESULT_FAILED))
    }
}
