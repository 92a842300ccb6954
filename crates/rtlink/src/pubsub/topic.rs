// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic message pool.
//!
//! # Architecture
//! - Fixed ring of slots, allocated once, never resized
//! - Monotonic message counter; id 0 marks a never-used slot
//! - `hard_left` credits per slot gate reuse; a condvar wakes blocked
//!   publishers when a hard consumer (or its supervising timer) releases one
//! - One event source per topic; subscribers register their node listener
//!   with the flags they chose
//!
//! Lock order is always topic state first, then any hard link state. Recovery
//! callbacks are collected under the lock and invoked after it is released.

use crate::config::{OverflowPolicy, TopicConfig};
use crate::osal::event::{EventSource, RESERVED_FLAGS};
use crate::osal::{time, TimerService};
use crate::pubsub::subscriber::HardLink;
use crate::status::{Result, Status};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Topic identifier, unique within one kernel.
pub type TopicId = u32;

pub(crate) struct Slot<T> {
    /// Message counter value, 0 while the slot has never been written.
    pub(crate) id: u64,
    pub(crate) origin: Instant,
    pub(crate) payload: Option<T>,
    /// Hard subscribers that have not yet consumed or timed out this message.
    pub(crate) hard_left: usize,
    /// Subscribers of any class that have not consumed this message.
    pub(crate) unread: usize,
}

pub(crate) struct TopicState<T> {
    pub(crate) slots: Vec<Slot<T>>,
    /// Ring index written by the next publish.
    pub(crate) next: usize,
    /// Last assigned message id.
    pub(crate) counter: u64,
    pub(crate) last_origin: Option<Instant>,
    pub(crate) sub_counts: [usize; 4],
    pub(crate) hard_links: Vec<Arc<HardLink>>,
}

impl<T> TopicState<T> {
    pub(crate) fn total_subscribers(&self) -> usize {
        self.sub_counts.iter().sum()
    }

    /// Slot holding message `id`, if it is still in the ring.
    pub(crate) fn slot_by_id(&mut self, id: u64) -> Option<&mut Slot<T>> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }

    /// Smallest live message id greater than `after`.
    pub(crate) fn oldest_after(&self, after: u64) -> Option<u64> {
        self.slots
            .iter()
            .filter(|slot| slot.id > after && slot.payload.is_some())
            .map(|slot| slot.id)
            .min()
    }

    /// Largest live message id greater than `after`.
    pub(crate) fn newest_after(&self, after: u64) -> Option<u64> {
        self.slots
            .iter()
            .filter(|slot| slot.id > after && slot.payload.is_some())
            .map(|slot| slot.id)
            .max()
    }
}

pub(crate) struct TopicShared<T> {
    pub(crate) id: TopicId,
    pub(crate) overflow: OverflowPolicy,
    pub(crate) state: Mutex<TopicState<T>>,
    /// Signalled whenever a hard credit is released.
    pub(crate) slot_released: Condvar,
    pub(crate) events: EventSource,
    pub(crate) timers: Arc<TimerService>,
    pub(crate) published: AtomicU64,
    pub(crate) discarded: AtomicU64,
}

/// Typed message channel with a bounded in-place history.
///
/// Cloning shares the underlying pool.
pub struct Topic<T> {
    pub(crate) shared: Arc<TopicShared<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> core::fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.shared.id)
            .field("capacity", &self.shared.state.lock().slots.len())
            .finish_non_exhaustive()
    }
}

/// Profiling snapshot of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicProfile {
    /// Messages accepted by publish.
    pub published: u64,
    /// Messages overwritten while at least one subscriber had not read them.
    pub discarded: u64,
    /// Currently registered subscribers, all classes.
    pub subscribers: usize,
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a topic with its own slot pool.
    ///
    /// The timer service supervises hard subscribers; a kernel passes its
    /// shared instance here.
    pub fn new(id: TopicId, config: TopicConfig, timers: Arc<TimerService>) -> Self {
        let capacity = config.capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Slot {
                id: 0,
                origin: time::now(),
                payload: None,
                hard_left: 0,
                unread: 0,
            })
            .collect();
        log::debug!("[topic {}] created, capacity {}", id, capacity);
        Self {
            shared: Arc::new(TopicShared {
                id,
                overflow: config.overflow,
                state: Mutex::new(TopicState {
                    slots,
                    next: 0,
                    counter: 0,
                    last_origin: None,
                    sub_counts: [0; 4],
                    hard_links: Vec::new(),
                }),
                slot_released: Condvar::new(),
                events: EventSource::new(),
                timers,
                published: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Topic identifier.
    pub fn id(&self) -> TopicId {
        self.shared.id
    }

    /// Id of the newest message ever published, 0 if none.
    pub fn latest_message_id(&self) -> u64 {
        self.shared.state.lock().counter
    }

    /// Profiling counters.
    pub fn profile(&self) -> TopicProfile {
        TopicProfile {
            published: self.shared.published.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            subscribers: self.shared.state.lock().total_subscribers(),
        }
    }
}

/// Outcome of the blocking phase of a publish, used by `TopicShared::publish`.
enum SlotClearance {
    Ready,
    Fail(Status),
}

impl<T: Clone + Send + 'static> TopicShared<T> {
    /// Core publish path shared by all policies.
    ///
    /// `try_only` maps to the lazy policy (no lock wait, no credit wait),
    /// `force` to the enforcing policy (preempt outstanding hard credits).
    pub(crate) fn publish(
        &self,
        payload: T,
        try_only: bool,
        force: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut state = if try_only {
            match self.state.try_lock() {
                Some(guard) => guard,
                None => return Err(Status::PublishLocked),
            }
        } else {
            self.state.lock()
        };

        let mut recoveries: Vec<(Arc<HardLink>, Status)> = Vec::new();
        match self.clear_next_slot(&mut state, try_only, force, timeout, &mut recoveries) {
            SlotClearance::Ready => {}
            SlotClearance::Fail(status) => {
                drop(state);
                Self::run_recoveries(recoveries);
                return Err(status);
            }
        }

        let idx = state.next;
        let origin = time::now();
        let id = state.counter + 1;
        state.counter = id;
        state.last_origin = Some(origin);

        if state.slots[idx].id != 0 && state.slots[idx].unread > 0 {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }

        let hard_count = state.hard_links.len();
        let unread = state.total_subscribers();
        {
            let slot = &mut state.slots[idx];
            slot.id = id;
            slot.origin = origin;
            slot.payload = Some(payload);
            slot.hard_left = hard_count;
            slot.unread = unread;
        }
        state.next = (idx + 1) % state.slots.len();

        // Supervision: arm each idle hard link for the new message, refresh
        // rate supervision on the rest.
        let links: Vec<Arc<HardLink>> = state.hard_links.clone();
        for link in &links {
            link.on_publish(id, origin);
        }
        drop(state);

        self.published.fetch_add(1, Ordering::Relaxed);
        self.events.broadcast(!RESERVED_FLAGS);
        Self::run_recoveries(recoveries);
        Ok(())
    }

    /// Wait for (or force) the next slot to become reusable.
    fn clear_next_slot(
        &self,
        state: &mut MutexGuard<'_, TopicState<T>>,
        try_only: bool,
        force: bool,
        timeout: Option<Duration>,
        recoveries: &mut Vec<(Arc<HardLink>, Status)>,
    ) -> SlotClearance {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let idx = state.next;
            let blocked_id = state.slots[idx].id;
            if state.slots[idx].hard_left == 0 {
                break;
            }
            if force {
                // Preempt: every hard link that still holds a credit on the
                // oldest message forfeits it and is told about the loss.
                let links: Vec<Arc<HardLink>> = state.hard_links.clone();
                for link in links {
                    if link.force_release(&mut **state, blocked_id) {
                        recoveries.push((link, Status::DeadlineViolation));
                    }
                }
                state.slots[idx].hard_left = 0;
                self.slot_released.notify_all();
                break;
            }
            if try_only {
                return SlotClearance::Fail(Status::PublishBlocked);
            }
            match deadline {
                Some(deadline) => {
                    if self.slot_released.wait_until(state, deadline).timed_out()
                        && state.slots[state.next].hard_left > 0
                    {
                        return SlotClearance::Fail(Status::PublishTimeout);
                    }
                }
                None => self.slot_released.wait(state),
            }
        }

        let idx = state.next;
        if self.overflow == OverflowPolicy::Reject
            && !force
            && state.slots[idx].id != 0
            && state.slots[idx].unread > 0
        {
            return SlotClearance::Fail(Status::PublishBlocked);
        }
        SlotClearance::Ready
    }

    pub(crate) fn run_recoveries(recoveries: Vec<(Arc<HardLink>, Status)>) {
        for (link, status) in recoveries {
            link.invoke_recovery(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicConfig;

    fn topic(capacity: usize) -> Topic<u32> {
        Topic::new(7, TopicConfig::with_capacity(capacity), TimerService::new())
    }

    #[test]
    fn counter_is_monotonic_from_one() {
        let topic = topic(2);
        assert_eq!(topic.latest_message_id(), 0);
        topic.shared.publish(10, false, false, None).unwrap();
        topic.shared.publish(20, false, false, None).unwrap();
        topic.shared.publish(30, false, false, None).unwrap();
        assert_eq!(topic.latest_message_id(), 3);
    }

    #[test]
    fn ring_wraps_without_heap_growth() {
        let topic = topic(3);
        for value in 0..10 {
            topic.shared.publish(value, false, false, None).unwrap();
        }
        let state = topic.shared.state.lock();
        assert_eq!(state.slots.len(), 3);
        let mut ids: Vec<u64> = state.slots.iter().map(|slot| slot.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![8, 9, 10]);
    }

    #[test]
    fn profile_counts_published() {
        let topic = topic(2);
        topic.shared.publish(1, false, false, None).unwrap();
        topic.shared.publish(2, false, false, None).unwrap();
        let profile = topic.profile();
        assert_eq!(profile.published, 2);
        assert_eq!(profile.discarded, 0);
        assert_eq!(profile.subscribers, 0);
    }

    #[test]
    fn debug_output_names_the_topic() {
        let topic = topic(2);
        let rendered = format!("{topic:?}");
        assert!(rendered.contains("Topic"));
        assert!(rendered.contains("id: 7"));
    }

    #[test]
    fn oldest_and_newest_lookups() {
        let topic = topic(3);
        for value in 0..5u32 {
            topic.shared.publish(value, false, false, None).unwrap();
        }
        let state = topic.shared.state.lock();
        // Live ids are 3, 4, 5.
        assert_eq!(state.oldest_after(0), Some(3));
        assert_eq!(state.oldest_after(3), Some(4));
        assert_eq!(state.newest_after(0), Some(5));
        assert_eq!(state.newest_after(5), None);
    }
}
