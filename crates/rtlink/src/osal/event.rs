// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event flag broadcast between producers and waiting consumers.
//!
//! An [`EventSource`] fans a flag set out to every registered
//! [`EventListener`] whose registration mask overlaps it. Listeners
//! accumulate flags until the owner clears them, so a wake is never lost
//! even if the consumer was busy when the broadcast happened.
//!
//! # Architecture
//! - Per-listener flag word under a small parking_lot mutex
//! - Condvar wake only for listeners that are actually asleep
//! - Sources hold `Weak` registrations; dropped listeners are pruned on the
//!   next broadcast

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Bit set of event flags. The upper byte is reserved for kernel control
/// events; application masks must stay below [`RESERVED_FLAGS`].
pub type EventFlags = u32;

/// Flags reserved for kernel control broadcasts.
pub const RESERVED_FLAGS: EventFlags = 0xFF00_0000;

/// How a wait is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Return when any flag of the wait mask is set.
    Any,
    /// Return only when every flag of the wait mask is set.
    All,
}

#[derive(Debug)]
struct ListenerInner {
    flags: Mutex<EventFlags>,
    cond: Condvar,
}

/// Receiving side of event broadcasts.
///
/// One listener may be registered with any number of sources (a node
/// listens to all its topics and services through a single listener).
#[derive(Debug, Clone)]
pub struct EventListener {
    inner: Arc<ListenerInner>,
}

impl EventListener {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                flags: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    /// Pending flags without consuming them.
    pub fn peek(&self) -> EventFlags {
        *self.inner.flags.lock()
    }

    /// Clear the given flags, returning the subset that was actually set.
    pub fn clear(&self, mask: EventFlags) -> EventFlags {
        let mut flags = self.inner.flags.lock();
        let taken = *flags & mask;
        *flags &= !mask;
        taken
    }

    /// Block until the wait mask is satisfied, then consume and return the
    /// matching flags. Returns 0 on timeout. `None` waits indefinitely.
    pub fn wait(
        &self,
        mask: EventFlags,
        mode: WaitMode,
        timeout: Option<Duration>,
    ) -> EventFlags {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        let mut flags = self.inner.flags.lock();
        loop {
            let hit = *flags & mask;
            let satisfied = match mode {
                WaitMode::Any => hit != 0,
                WaitMode::All => hit == mask,
            };
            if satisfied {
                *flags &= !hit;
                return hit;
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut flags, deadline).timed_out() {
                        let hit = *flags & mask;
                        let satisfied = match mode {
                            WaitMode::Any => hit != 0,
                            WaitMode::All => hit == mask,
                        };
                        if satisfied {
                            *flags &= !hit;
                            return hit;
                        }
                        return 0;
                    }
                }
                None => self.inner.cond.wait(&mut flags),
            }
        }
    }

    fn downgrade(&self) -> Weak<ListenerInner> {
        Arc::downgrade(&self.inner)
    }

    fn is(&self, weak: &Weak<ListenerInner>) -> bool {
        weak.upgrade()
            .is_some_and(|inner| Arc::ptr_eq(&inner, &self.inner))
    }
}

impl Default for EventListener {
    fn default() -> Self {
        Self::new()
    }
}

struct Registration {
    listener: Weak<ListenerInner>,
    mask: EventFlags,
}

/// Broadcasting side. Topics, services, sync groups and the kernel each own
/// one source.
#[derive(Default)]
pub struct EventSource {
    registrations: Mutex<Vec<Registration>>,
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for the flags in `mask`. Re-registering the same
    /// listener replaces its mask.
    pub fn register(&self, listener: &EventListener, mask: EventFlags) {
        let mut regs = self.registrations.lock();
        if let Some(reg) = regs.iter_mut().find(|reg| listener.is(&reg.listener)) {
            reg.mask = mask;
            return;
        }
        regs.push(Registration {
            listener: listener.downgrade(),
            mask,
        });
    }

    /// Remove a listener. Unknown listeners are ignored.
    pub fn unregister(&self, listener: &EventListener) {
        self.registrations
            .lock()
            .retain(|reg| !listener.is(&reg.listener));
    }

    /// Deliver `flags` to every listener whose mask overlaps them.
    pub fn broadcast(&self, flags: EventFlags) {
        let mut regs = self.registrations.lock();
        regs.retain(|reg| {
            let Some(inner) = reg.listener.upgrade() else {
                return false;
            };
            let hit = reg.mask & flags;
            if hit != 0 {
                let mut pending = inner.flags.lock();
                *pending |= hit;
                inner.cond.notify_all();
            }
            true
        });
    }

    /// Number of live registrations.
    pub fn listener_count(&self) -> usize {
        let mut regs = self.registrations.lock();
        regs.retain(|reg| reg.listener.strong_count() > 0);
        regs.len()
    }
}
