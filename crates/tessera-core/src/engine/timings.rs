//! Per-block timing telemetry
//!
//! The audio thread records how long each block took into plain atomics;
//! the worker reads and resets them on its reporting cadence. A block that
//! overruns its period is a deadline miss; it is counted and reported, but
//! the engine makes no recovery attempt of its own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ProcessTimings {
    blocks: AtomicU64,
    total_ns: AtomicU64,
    peak_ns: AtomicU64,
    deadline_misses: AtomicU64,
}

impl ProcessTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed block
    pub fn record(&self, elapsed: Duration, budget: Duration) {
        let ns = elapsed.as_nanos() as u64;
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.peak_ns.fetch_max(ns, Ordering::Relaxed);
        if elapsed > budget {
            self.deadline_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and reset the accumulated numbers
    pub fn take_report(&self) -> TimingReport {
        let blocks = self.blocks.swap(0, Ordering::Relaxed);
        let total_ns = self.total_ns.swap(0, Ordering::Relaxed);
        let peak_ns = self.peak_ns.swap(0, Ordering::Relaxed);
        let deadline_misses = self.deadline_misses.swap(0, Ordering::Relaxed);
        TimingReport {
            blocks,
            average_us: if blocks > 0 {
                total_ns as f64 / blocks as f64 / 1_000.0
            } else {
                0.0
            },
            peak_us: peak_ns as f64 / 1_000.0,
            deadline_misses,
        }
    }
}

/// One telemetry window, produced by [`ProcessTimings::take_report`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingReport {
    pub blocks: u64,
    pub average_us: f64,
    pub peak_us: f64,
    pub deadline_misses: u64,
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks, avg {:.1} us, peak {:.1} us, {} deadline misses",
            self.blocks, self.average_us, self.peak_us, self.deadline_misses
        )
    }
}
