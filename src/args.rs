// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use sensor_bridge::{BridgeConfig, UnknownFreePolicy};

/// Handling of frees for addresses the bridge never lent out.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum UnknownFree {
    /// Abort the process
    Fail,
    /// Log a warning and continue
    Ignore,
}

impl From<UnknownFree> for UnknownFreePolicy {
    fn from(value: UnknownFree) -> Self {
        match value {
            UnknownFree::Fail => UnknownFreePolicy::Fail,
            UnknownFree::Ignore => UnknownFreePolicy::Ignore,
        }
    }
}

/// Command-line arguments for the memory bridge soak test.
///
/// The soak test stands up a simulated sensor that allocates its frames
/// through the bridge's allocator hooks and keeps a few buffers of its own,
/// then hammers both paths from several threads. Arguments can be specified
/// via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// sensor-bridge-soak --threads 8 --iterations 10000 --verbose
///
/// # Via environment variables
/// export SOAK_THREADS=8
/// export FRAME_SIZE="3840 2160"
/// sensor-bridge-soak
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of capture threads
    #[arg(long, env = "SOAK_THREADS", default_value = "4")]
    pub threads: usize,

    /// Frames captured per thread
    #[arg(long, env = "SOAK_ITERATIONS", default_value = "1000")]
    pub iterations: usize,

    /// Simulated YUYV frame resolution in pixels (width height)
    #[arg(
        long,
        env = "FRAME_SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub frame_size: Vec<u32>,

    /// Buffers the simulated SDK allocates itself (read through shadow
    /// copies)
    #[arg(long, env = "FOREIGN_BUFFERS", default_value = "8")]
    pub foreign_buffers: usize,

    /// Keep every Nth capture alive until shutdown so the forced disposal
    /// sweep has work to do (0 disables)
    #[arg(long, env = "LEAK_EVERY", default_value = "64")]
    pub leak_every: usize,

    /// Bytes retained by the buffer pool between rentals, in MiB
    #[arg(long, env = "POOL_RETAIN_MB", default_value = "256")]
    pub pool_retain_mb: usize,

    /// Buffers retained by the buffer pool between rentals
    #[arg(long, env = "POOL_RETAIN_BUFFERS", default_value = "64")]
    pub pool_retain_buffers: usize,

    /// Handling of frees for untracked addresses
    #[arg(long, env = "UNKNOWN_FREE", default_value = "fail", value_enum)]
    pub unknown_free: UnknownFree,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Forward logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    /// Size in bytes of one simulated YUYV frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_size[0] as usize * self.frame_size[1] as usize * 2
    }
}

impl From<&Args> for BridgeConfig {
    fn from(args: &Args) -> Self {
        BridgeConfig {
            pool_retain_bytes: args.pool_retain_mb * 1024 * 1024,
            pool_retain_buffers: args.pool_retain_buffers,
            unknown_free: args.unknown_free.into(),
        }
    }
}
