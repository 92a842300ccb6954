// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thin OS abstraction consumed by the core: event flags, one-shot timers
//! and monotonic time.
//!
//! The core never touches `std::thread` synchronization directly; everything
//! goes through this layer so the primitives stay swappable and testable in
//! isolation.

pub mod event;
pub mod time;
pub mod timer;

pub use event::{EventFlags, EventListener, EventSource, WaitMode};
pub use time::LatencyStats;
pub use timer::{TimerHandle, TimerService};
