//! Bus latency measurements taken once at bring-up, before serving.

use log::{info, warn};
use std::time::{Duration, Instant};

use crate::mmio::RegisterWindow;
use crate::transport::{REG_CONSUMER, REG_PRODUCER};

/// Value written during the write benchmark.
pub const BENCH_PATTERN: u32 = 0xdeadbeef;

/// Benchmark settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub enabled: bool,
    /// Number of stores to the buffer window.
    pub write_iterations: u32,
    /// Number of passes over the two queue registers.
    pub read_iterations: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            enabled: true,
            write_iterations: 100_000,
            read_iterations: 1_000_000,
        }
    }
}

/// The outcome of one benchmark loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BenchReport {
    pub accesses: u64,
    pub elapsed: Duration,
}

/// Time repeated 32-bit stores to the first word of `window`.
pub fn bench_register_writes(window: &RegisterWindow, iterations: u32) -> Option<BenchReport> {
    if window.check(0, 4, 4).is_err() {
        warn!("Window too small to benchmark writes.");
        return None;
    }
    let start = Instant::now();
    for _ in 0..iterations {
        window.store::<u32>(0, BENCH_PATTERN);
    }
    let report = BenchReport {
        accesses: iterations as u64,
        elapsed: start.elapsed(),
    };
    info!("Benchmarked buffer window: {} usec for {} writes.",
          report.elapsed.as_micros(), report.accesses);
    Some(report)
}

/// Time repeated 32-bit loads of the producer and consumer registers.
pub fn bench_queue_registers(window: &RegisterWindow, iterations: u32) -> Option<BenchReport> {
    if window.check(REG_PRODUCER, 8, 4).is_err() {
        warn!("Window too small to benchmark queue registers.");
        return None;
    }
    let start = Instant::now();
    for _ in 0..iterations {
        window.load::<u32>(REG_PRODUCER);
        window.load::<u32>(REG_CONSUMER);
    }
    let report = BenchReport {
        accesses: iterations as u64 * 2,
        elapsed: start.elapsed(),
    };
    info!("Benchmarked queue registers: {} usec for {} reads.",
          report.elapsed.as_micros(), report.accesses);
    Some(report)
}

/// Run both benchmarks as configured.
pub fn run(buffer: &RegisterWindow, control: &RegisterWindow,
           config: &BenchConfig) -> Vec<BenchReport> {
    if !config.enabled {
        info!("Skipping bus benchmarks.");
        return Vec::new();
    }
    bench_register_writes(buffer, config.write_iterations)
        .into_iter()
        .chain(bench_queue_registers(control, config.read_iterations))
        .collect()
}
