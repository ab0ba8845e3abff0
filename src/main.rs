// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::Args;
use clap::Parser;
use parking_lot::Mutex;
use sensor_bridge::{BridgeConfig, Disposable, DisposalState, MemoryBridge};
use sim::{NativeFrame, SimulatedSensor, SoakResult};
use std::{sync::Arc, thread, time::Instant};
use tracing::{debug, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Registry};

mod args;
mod sim;

/// Wrapper over one captured frame, the way the SDK bindings wrap an image.
struct Capture {
    bridge: Arc<MemoryBridge>,
    sensor: Arc<SimulatedSensor>,
    frame: Mutex<Option<NativeFrame>>,
    state: DisposalState,
}

impl Capture {
    fn new(bridge: &Arc<MemoryBridge>, sensor: &Arc<SimulatedSensor>, frame: NativeFrame) -> Arc<Self> {
        let capture = Arc::new(Self {
            bridge: bridge.clone(),
            sensor: sensor.clone(),
            frame: Mutex::new(Some(frame)),
            state: DisposalState::new(),
        });
        bridge.register(&capture);
        capture
    }

    /// Sums `len` bytes at `offset` into the frame, read in place.
    fn checksum(&self, offset: usize, len: usize) -> SoakResult<u64> {
        self.state.check()?;
        let frame = self.frame.lock();
        let frame = frame.as_ref().ok_or("capture already released")?;
        if offset + len > frame.len {
            return Err(format!("window {offset}+{len} exceeds frame of {} bytes", frame.len).into());
        }

        let memory = unsafe { self.bridge.access((frame.address + offset) as *const u8, len)? };
        if !memory.is_owned() {
            warn!(address = frame.address, "frame buffer was not bridge-owned");
        }
        Ok(memory.with_slice(|bytes| bytes.iter().map(|&b| b as u64).sum()))
    }
}

impl Disposable for Capture {
    fn dispose(&self) {
        if !self.state.begin_dispose() {
            return;
        }
        if let Some(frame) = self.frame.lock().take() {
            self.sensor.release(frame);
        }
        self.bridge.unregister(self);
    }

    fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Wrapper over the sensor session; hooking the allocator registers it.
struct Session {
    sensor: Arc<SimulatedSensor>,
    state: DisposalState,
}

impl Disposable for Session {
    fn dispose(&self) {
        if self.state.begin_dispose() {
            self.sensor.stop();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }
}

fn init_tracing(args: &Args) -> SoakResult<Option<tracy_client::Client>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("journald unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let (tracy, client) = if args.tracy {
        let client = tracy_client::Client::start();
        (Some(tracing_tracy::TracyLayer::default()), Some(client))
    } else {
        (None, None)
    };

    let subscriber = Registry::default()
        .with(level)
        .with(tracing_subscriber::fmt::layer())
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(client)
}

fn worker(
    id: usize,
    bridge: &Arc<MemoryBridge>,
    sensor: &Arc<SimulatedSensor>,
    args: &Args,
) -> SoakResult<Vec<Arc<Capture>>> {
    let frame_bytes = args.frame_bytes();
    let window = frame_bytes.min(4096);
    let mut kept = Vec::new();
    let mut checksum = 0u64;

    for i in 0..args.iterations {
        let sequence = (id * args.iterations + i) as u64;
        let capture = Capture::new(bridge, sensor, sensor.capture(sequence)?);

        let offset = (i * 7919) % (frame_bytes - window + 1);
        checksum = checksum.wrapping_add(capture.checksum(offset, window)?);

        if sensor.foreign_count() > 0 {
            let (ptr, len) = sensor.foreign_buffer(sequence as usize);
            let memory = unsafe { bridge.access(ptr, len)? };
            if memory.is_owned() {
                return Err("sdk-internal buffer resolved as bridge-owned".into());
            }
            checksum = checksum.wrapping_add(memory.with_slice(|b| b[0] as u64));
        }

        if args.leak_every > 0 && i % args.leak_every == args.leak_every - 1 {
            kept.push(capture);
        }
    }

    debug!(worker = id, checksum, kept = kept.len(), "worker finished");
    Ok(kept)
}

fn main() -> SoakResult<()> {
    let args = Args::parse();
    let _tracy = init_tracing(&args)?;

    if args.frame_bytes() == 0 {
        return Err("frame size must be non-zero".into());
    }

    let bridge = MemoryBridge::new(BridgeConfig::from(&args));
    let sensor = Arc::new(SimulatedSensor::new(args.frame_bytes(), args.foreign_buffers));
    let session = Arc::new(Session {
        sensor: sensor.clone(),
        state: DisposalState::new(),
    });
    bridge.hook(sensor.as_ref(), &session)?;

    info!(
        threads = args.threads,
        iterations = args.iterations,
        frame_bytes = args.frame_bytes(),
        "starting soak"
    );
    let now = Instant::now();

    let leaked = thread::scope(|scope| -> SoakResult<Vec<Arc<Capture>>> {
        let handles: Vec<_> = (0..args.threads)
            .map(|id| {
                let (bridge, sensor, args) = (&bridge, &sensor, &args);
                scope.spawn(move || worker(id, bridge, sensor, args))
            })
            .collect();

        let mut leaked = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(result) => leaked.extend(result?),
                Err(_) => return Err("capture worker panicked".into()),
            }
        }
        Ok(leaked)
    })?;
    let elapsed = now.elapsed();

    let stats = bridge.pool().stats();
    info!(
        outstanding = bridge.allocator().outstanding(),
        tracked = bridge.tracked(),
        shadows = bridge.shadow_cache().len(),
        "captures complete"
    );

    let report = bridge.shutdown_guard().finish()?;
    let undisposed = leaked.iter().filter(|c| !c.is_disposed()).count();
    if undisposed > 0 || !session.is_disposed() {
        return Err(format!("{undisposed} capture(s) survived forced disposal").into());
    }

    println!(
        "soak {} frames in {:.2?}: pool rents {} hits {} allocations {} evictions {}, forced disposal {} pruned {}",
        args.threads * args.iterations,
        elapsed,
        stats.rents,
        stats.hits,
        stats.allocations,
        stats.evictions,
        report.disposed,
        report.pruned,
    );

    Ok(())
}
