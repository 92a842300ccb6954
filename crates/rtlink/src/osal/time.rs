// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic time helpers and latency accounting.

use std::time::{Duration, Instant};

/// Monotonic now. Single call site for the clock so tests and future
/// platforms can swap it in one place.
#[inline]
pub fn now() -> Instant {
    Instant::now()
}

/// Running min/max/sum latency statistics.
///
/// Updated on every consumption by firm and hard endpoints and exposed
/// through the profiling snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    /// Smallest observed latency, `None` before the first sample.
    pub min: Option<Duration>,
    /// Largest observed latency, `None` before the first sample.
    pub max: Option<Duration>,
    /// Sum of all observed latencies.
    pub sum: Duration,
    /// Number of samples.
    pub count: u64,
}

impl LatencyStats {
    /// Fold one latency sample into the statistics.
    pub fn record(&mut self, latency: Duration) {
        self.min = Some(match self.min {
            Some(min) if min <= latency => min,
            _ => latency,
        });
        self.max = Some(match self.max {
            Some(max) if max >= latency => max,
            _ => latency,
        });
        self.sum += latency;
        self.count += 1;
    }

    /// Mean latency, `None` before the first sample.
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.sum / self.count as u32)
    }
}
