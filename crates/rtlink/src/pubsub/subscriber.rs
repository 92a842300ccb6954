// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber class variants.
//!
//! All four classes share the same fetch walk over the topic ring: consume
//! the oldest message newer than the last one seen (`fetch_next`) or skip to
//! the newest (`fetch_latest`). They differ only in the timing contract
//! applied on top:
//!
//! - best-effort: none
//! - soft: a usefulness function of message age decides whether the sample
//!   still counts
//! - firm: deadline/jitter/rate are checked at fetch and reported through a
//!   recovery callback
//! - hard: a timer armed at publish supervises the deadline independently of
//!   the consumer and releases the slot credit on expiry
//!
//! Violations latch: the recovery callback fires once per episode until the
//! application clears the latch.

use crate::config::QosSpec;
use crate::osal::event::{EventFlags, EventListener, RESERVED_FLAGS};
use crate::osal::time::{self, LatencyStats};
use crate::pubsub::topic::{Topic, TopicShared, TopicState};
use crate::status::{Result, RtClass, Status};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// One consumed message with its measured age.
#[derive(Debug, Clone)]
pub struct Sample<T> {
    pub payload: T,
    /// Age of the message at consumption time.
    pub latency: Duration,
    /// Timing violation detected while consuming this sample, if any.
    pub violation: Option<Status>,
}

/// State shared by every subscriber class.
struct SubscriberCore<T> {
    topic: Arc<TopicShared<T>>,
    listener: EventListener,
    class: RtClass,
    /// Id of the last consumed message; only newer messages are visible.
    last_id: u64,
    stats: LatencyStats,
}

impl<T: Clone + Send + 'static> SubscriberCore<T> {
    fn new(
        topic: &Topic<T>,
        listener: &EventListener,
        mask: EventFlags,
        class: RtClass,
    ) -> Result<Self> {
        if mask & RESERVED_FLAGS != 0 {
            return Err(Status::InvalidEventMask);
        }
        let last_id = {
            let mut state = topic.shared.state.lock();
            state.sub_counts[class as usize] += 1;
            // New subscribers only see messages published after they joined.
            state.counter
        };
        topic.shared.events.register(listener, mask);
        log::debug!("[topic {}] {} subscriber joined", topic.shared.id, class);
        Ok(Self {
            topic: Arc::clone(&topic.shared),
            listener: listener.clone(),
            class,
            last_id,
            stats: LatencyStats::default(),
        })
    }

    /// Consume the oldest (or newest) unseen message.
    fn take(&mut self, latest: bool) -> Option<(T, u64, Instant)> {
        let mut state = self.topic.state.lock();
        let id = if latest {
            state.newest_after(self.last_id)
        } else {
            state.oldest_after(self.last_id)
        }?;
        let slot = state.slot_by_id(id)?;
        let payload = slot.payload.clone()?;
        let origin = slot.origin;
        slot.unread = slot.unread.saturating_sub(1);
        self.last_id = id;
        Some((payload, id, origin))
    }

}

// Drop glue must not depend on the payload bounds.
impl<T> SubscriberCore<T> {
    fn record(&mut self, origin: Instant) -> Duration {
        let latency = time::now().saturating_duration_since(origin);
        self.stats.record(latency);
        latency
    }

    fn deregister(&mut self) {
        let mut state = self.topic.state.lock();
        let idx = self.class as usize;
        state.sub_counts[idx] = state.sub_counts[idx].saturating_sub(1);
        drop(state);
        self.topic.events.unregister(&self.listener);
    }
}

/// Fetch-time QoS bookkeeping shared by firm and hard subscribers.
///
/// The jitter window is anchored at the first valid latency and may only
/// widen within `max_jitter`; samples outside the window are violations and
/// do not widen it further.
struct QosMonitor {
    qos: QosSpec,
    window_min: Option<Duration>,
    window_max: Option<Duration>,
    prev_origin: Option<Instant>,
}

impl QosMonitor {
    fn new(qos: QosSpec) -> Self {
        Self {
            qos,
            window_min: None,
            window_max: None,
            prev_origin: None,
        }
    }

    fn check(&mut self, origin: Instant, latency: Duration) -> Option<Status> {
        if let Some(rate) = self.qos.expected_rate {
            let prev = self.prev_origin.replace(origin);
            if let Some(prev) = prev {
                if origin.saturating_duration_since(prev) > rate {
                    return Some(Status::RateViolation);
                }
            }
        }
        if let Some(deadline) = self.qos.deadline {
            if latency > deadline {
                return Some(Status::DeadlineViolation);
            }
        }
        if let Some(jitter) = self.qos.max_jitter {
            if let (Some(min), Some(max)) = (self.window_min, self.window_max) {
                if latency > min + jitter || latency + jitter < max {
                    return Some(Status::JitterViolation);
                }
                self.window_min = Some(min.min(latency));
                self.window_max = Some(max.max(latency));
            } else {
                self.window_min = Some(latency);
                self.window_max = Some(latency);
            }
        }
        None
    }
}

// ============================================================================
// Best-effort
// ============================================================================

/// Subscriber without any timing contract.
pub struct BestEffortSubscriber<T> {
    core: SubscriberCore<T>,
}

impl<T: Clone + Send + 'static> BestEffortSubscriber<T> {
    /// Oldest unseen message, `NoMessage` when caught up. Never blocks.
    pub fn fetch_next(&mut self) -> Result<Sample<T>> {
        let (payload, _, origin) = self.core.take(false).ok_or(Status::NoMessage)?;
        let latency = self.core.record(origin);
        Ok(Sample {
            payload,
            latency,
            violation: None,
        })
    }

    /// Newest unseen message, skipping anything older.
    pub fn fetch_latest(&mut self) -> Result<Sample<T>> {
        let (payload, _, origin) = self.core.take(true).ok_or(Status::NoMessage)?;
        let latency = self.core.record(origin);
        Ok(Sample {
            payload,
            latency,
            violation: None,
        })
    }

    /// Latency profile over all consumed samples.
    pub fn stats(&self) -> LatencyStats {
        self.core.stats
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for BestEffortSubscriber<T> {
    fn drop(&mut self) {
        self.core.deregister();
    }
}

impl<T> fmt::Debug for BestEffortSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BestEffortSubscriber")
            .field("topic", &self.core.topic.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Soft real-time
// ============================================================================

/// Subscriber whose samples lose value with age.
///
/// The usefulness function maps message age to a value; samples scoring
/// below the threshold are consumed but reported as misses.
pub struct SoftSubscriber<T> {
    core: SubscriberCore<T>,
    usefulness: Box<dyn Fn(Duration) -> f32 + Send>,
    threshold: f32,
}

impl<T: Clone + Send + 'static> SoftSubscriber<T> {
    /// Oldest unseen message if it is still useful.
    ///
    /// A stale message is consumed (it will not be offered again) and
    /// `NoMessage` is returned.
    pub fn fetch_next(&mut self) -> Result<Sample<T>> {
        self.fetch(false)
    }

    /// Newest unseen message if it is still useful.
    pub fn fetch_latest(&mut self) -> Result<Sample<T>> {
        self.fetch(true)
    }

    fn fetch(&mut self, latest: bool) -> Result<Sample<T>> {
        let (payload, _, origin) = self.core.take(latest).ok_or(Status::NoMessage)?;
        let latency = self.core.record(origin);
        if (self.usefulness)(latency) < self.threshold {
            return Err(Status::NoMessage);
        }
        Ok(Sample {
            payload,
            latency,
            violation: None,
        })
    }

    pub fn stats(&self) -> LatencyStats {
        self.core.stats
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for SoftSubscriber<T> {
    fn drop(&mut self) {
        self.core.deregister();
    }
}

impl<T> fmt::Debug for SoftSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftSubscriber")
            .field("topic", &self.core.topic.id)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Firm real-time
// ============================================================================

/// Subscriber with explicit timing bounds checked at fetch time.
///
/// Violations never abort anything: they are returned on the sample, latched,
/// and reported once per episode through the recovery callback.
pub struct FirmSubscriber<T> {
    core: SubscriberCore<T>,
    monitor: QosMonitor,
    violation: Option<Status>,
    recovery: Box<dyn FnMut(Status) + Send>,
}

impl<T: Clone + Send + 'static> FirmSubscriber<T> {
    pub fn fetch_next(&mut self) -> Result<Sample<T>> {
        self.fetch(false)
    }

    pub fn fetch_latest(&mut self) -> Result<Sample<T>> {
        self.fetch(true)
    }

    fn fetch(&mut self, latest: bool) -> Result<Sample<T>> {
        let (payload, _, origin) = self.core.take(latest).ok_or(Status::NoMessage)?;
        let latency = self.core.record(origin);
        let violation = self.monitor.check(origin, latency);
        if let Some(status) = violation {
            if self.violation.is_none() {
                self.violation = Some(status);
                (self.recovery)(status);
            }
        }
        Ok(Sample {
            payload,
            latency,
            violation,
        })
    }

    /// Clear and return the latched violation, re-enabling the recovery
    /// callback for the next episode.
    pub fn clear_violation(&mut self) -> Option<Status> {
        self.violation.take()
    }

    pub fn stats(&self) -> LatencyStats {
        self.core.stats
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for FirmSubscriber<T> {
    fn drop(&mut self) {
        self.core.deregister();
    }
}

impl<T> fmt::Debug for FirmSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmSubscriber")
            .field("topic", &self.core.topic.id)
            .field("violation", &self.violation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Hard real-time
// ============================================================================

enum Armed {
    /// Supervising the deadline of message id.
    Deadline(u64),
    /// No message pending; supervising the publish rate.
    Rate,
}

pub(crate) struct HardLinkState {
    /// Credits for ids up to and including this have been released, either
    /// by fetch, by timer expiry or by an enforcing publisher.
    released_up_to: u64,
    armed: Option<Armed>,
    violation: Option<Status>,
    timer: Option<crate::osal::TimerHandle>,
    active: bool,
}

/// Shared connection between a topic and one hard subscriber.
///
/// Referenced from the topic (to arm timers at publish), from the timer
/// thread (to release credits on expiry) and from the subscriber itself.
pub(crate) struct HardLink {
    qos: QosSpec,
    state: Mutex<HardLinkState>,
    recovery: Mutex<Box<dyn FnMut(Status) + Send>>,
}

impl HardLink {
    /// Called by publish for every registered hard link, link lock only.
    pub(crate) fn on_publish(&self, id: u64, origin: Instant) {
        let mut ls = self.state.lock();
        if !ls.active {
            return;
        }
        match ls.armed {
            // Timer already supervising an older pending message.
            Some(Armed::Deadline(_)) => {}
            _ => {
                if let Some(deadline) = self.qos.deadline {
                    ls.armed = Some(Armed::Deadline(id));
                    if let Some(timer) = &ls.timer {
                        timer.arm_at(origin + deadline);
                    }
                } else if let Some(rate) = self.qos.expected_rate {
                    ls.armed = Some(Armed::Rate);
                    if let Some(timer) = &ls.timer {
                        timer.arm_at(origin + rate);
                    }
                }
            }
        }
    }

    /// An enforcing publisher preempts the credit this link holds on the
    /// oldest message. Returns true when the recovery callback should fire.
    pub(crate) fn force_release<T>(&self, state: &mut TopicState<T>, blocked: u64) -> bool {
        let mut ls = self.state.lock();
        if !ls.active || ls.released_up_to >= blocked {
            return false;
        }
        ls.released_up_to = blocked;
        let fire = ls.violation.is_none();
        if fire {
            ls.violation = Some(Status::DeadlineViolation);
        }
        self.retime(state, &mut ls);
        fire
    }

    pub(crate) fn invoke_recovery(&self, status: Status) {
        (self.recovery.lock())(status);
    }

    /// Point the timer at the oldest still-pending message, fall back to
    /// rate supervision, or disarm. Both locks held by the caller.
    fn retime<T>(&self, state: &TopicState<T>, ls: &mut HardLinkState) {
        if let Some(deadline) = self.qos.deadline {
            if let Some(next) = state.oldest_after(ls.released_up_to) {
                if let Some(slot) = state.slots.iter().find(|slot| slot.id == next) {
                    ls.armed = Some(Armed::Deadline(next));
                    if let Some(timer) = &ls.timer {
                        timer.arm_at(slot.origin + deadline);
                    }
                    return;
                }
            }
        }
        if let Some(rate) = self.qos.expected_rate {
            if let Some(last) = state.last_origin {
                ls.armed = Some(Armed::Rate);
                if let Some(timer) = &ls.timer {
                    timer.arm_at(last + rate);
                }
                return;
            }
        }
        ls.armed = None;
        if let Some(timer) = &ls.timer {
            timer.cancel();
        }
    }

    /// Timer expiry path. Runs on the timer thread.
    fn on_timer<T: Clone + Send + 'static>(topic: &Arc<TopicShared<T>>, link: &Arc<HardLink>) {
        let fired = {
            let mut state = topic.state.lock();
            let mut ls = link.state.lock();
            if !ls.active {
                return;
            }
            match ls.armed.take() {
                Some(Armed::Deadline(mid)) => {
                    if ls.released_up_to < mid {
                        if let Some(slot) = state.slot_by_id(mid) {
                            slot.hard_left = slot.hard_left.saturating_sub(1);
                        }
                        ls.released_up_to = mid;
                        topic.slot_released.notify_all();
                    }
                    let fire = ls.violation.is_none();
                    if fire {
                        ls.violation = Some(Status::DeadlineViolation);
                    }
                    link.retime(&state, &mut ls);
                    fire.then_some(Status::DeadlineViolation)
                }
                Some(Armed::Rate) => {
                    let fire = ls.violation.is_none();
                    if fire {
                        ls.violation = Some(Status::RateViolation);
                    }
                    if let Some(rate) = link.qos.expected_rate {
                        ls.armed = Some(Armed::Rate);
                        if let Some(timer) = &ls.timer {
                            timer.arm_in(rate);
                        }
                    }
                    fire.then_some(Status::RateViolation)
                }
                None => None,
            }
        };
        if let Some(status) = fired {
            log::warn!("[topic {}] hard subscriber {}", topic.id, status);
            link.invoke_recovery(status);
        }
    }
}

/// Subscriber supervised by an armed timer independent of the consumer.
///
/// When the timer expires before the message is fetched, the recovery
/// callback fires (once per episode) and the message's pool credit is
/// released so publishers never block on a dead consumer.
pub struct HardSubscriber<T> {
    core: SubscriberCore<T>,
    link: Arc<HardLink>,
    monitor: QosMonitor,
}

impl<T: Clone + Send + 'static> HardSubscriber<T> {
    pub fn fetch_next(&mut self) -> Result<Sample<T>> {
        self.fetch(false)
    }

    pub fn fetch_latest(&mut self) -> Result<Sample<T>> {
        self.fetch(true)
    }

    fn fetch(&mut self, latest: bool) -> Result<Sample<T>> {
        let (payload, origin, latency) = {
            let mut state = self.core.topic.state.lock();
            let id = if latest {
                state.newest_after(self.core.last_id)
            } else {
                state.oldest_after(self.core.last_id)
            }
            .ok_or(Status::NoMessage)?;

            let (payload, origin) = {
                let slot = state.slot_by_id(id).ok_or(Status::NoMessage)?;
                let payload = slot.payload.clone().ok_or(Status::NoMessage)?;
                let origin = slot.origin;
                slot.unread = slot.unread.saturating_sub(1);
                (payload, origin)
            };

            let mut ls = self.link.state.lock();
            // Release credits for everything consumed or skipped, each
            // exactly once.
            if ls.released_up_to < id {
                let floor = ls.released_up_to;
                for slot in &mut state.slots {
                    if slot.id > floor && slot.id <= id && slot.payload.is_some() {
                        slot.hard_left = slot.hard_left.saturating_sub(1);
                    }
                }
                ls.released_up_to = id;
                self.core.topic.slot_released.notify_all();
            }
            if matches!(ls.armed, Some(Armed::Deadline(mid)) if mid <= id) {
                self.link.retime(&state, &mut ls);
            }
            drop(ls);
            self.core.last_id = id;

            let latency = time::now().saturating_duration_since(origin);
            (payload, origin, latency)
        };

        self.core.stats.record(latency);
        let violation = self.monitor.check(origin, latency);
        if let Some(status) = violation {
            let fire = {
                let mut ls = self.link.state.lock();
                let fire = ls.violation.is_none();
                if fire {
                    ls.violation = Some(status);
                }
                fire
            };
            if fire {
                self.link.invoke_recovery(status);
            }
        }
        Ok(Sample {
            payload,
            latency,
            violation,
        })
    }

    /// Clear and return the latched violation, re-enabling the recovery
    /// callback for the next episode.
    pub fn clear_violation(&mut self) -> Option<Status> {
        self.link.state.lock().violation.take()
    }

    /// Latched violation without clearing it.
    pub fn violation(&self) -> Option<Status> {
        self.link.state.lock().violation
    }

    pub fn stats(&self) -> LatencyStats {
        self.core.stats
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for HardSubscriber<T> {
    fn drop(&mut self) {
        let mut state = self.core.topic.state.lock();
        let mut ls = self.link.state.lock();
        ls.active = false;
        // Hand back every credit this subscriber still holds so the pool
        // cannot deadlock on a departed consumer.
        let floor = ls.released_up_to;
        for slot in &mut state.slots {
            if slot.id > floor && slot.payload.is_some() {
                slot.hard_left = slot.hard_left.saturating_sub(1);
            }
        }
        ls.armed = None;
        if let Some(timer) = ls.timer.take() {
            timer.cancel();
        }
        drop(ls);
        state
            .hard_links
            .retain(|link| !Arc::ptr_eq(link, &self.link));
        let idx = self.core.class as usize;
        state.sub_counts[idx] = state.sub_counts[idx].saturating_sub(1);
        drop(state);
        self.core.topic.slot_released.notify_all();
        self.core.topic.events.unregister(&self.core.listener);
    }
}

impl<T> fmt::Debug for HardSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardSubscriber")
            .field("topic", &self.core.topic.id)
            .field("violation", &self.link.state.lock().violation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Subscription constructors
// ============================================================================

impl<T: Clone + Send + 'static> Topic<T> {
    /// Subscribe without a timing contract.
    pub fn subscribe(
        &self,
        listener: &EventListener,
        mask: EventFlags,
    ) -> Result<BestEffortSubscriber<T>> {
        Ok(BestEffortSubscriber {
            core: SubscriberCore::new(self, listener, mask, RtClass::BestEffort)?,
        })
    }

    /// Subscribe with a usefulness function over message age.
    pub fn subscribe_soft(
        &self,
        listener: &EventListener,
        mask: EventFlags,
        usefulness: impl Fn(Duration) -> f32 + Send + 'static,
        threshold: f32,
    ) -> Result<SoftSubscriber<T>> {
        Ok(SoftSubscriber {
            core: SubscriberCore::new(self, listener, mask, RtClass::Soft)?,
            usefulness: Box::new(usefulness),
            threshold,
        })
    }

    /// Subscribe with timing bounds checked at fetch time.
    pub fn subscribe_firm(
        &self,
        listener: &EventListener,
        mask: EventFlags,
        qos: QosSpec,
        recovery: impl FnMut(Status) + Send + 'static,
    ) -> Result<FirmSubscriber<T>> {
        Ok(FirmSubscriber {
            core: SubscriberCore::new(self, listener, mask, RtClass::Firm)?,
            monitor: QosMonitor::new(qos),
            violation: None,
            recovery: Box::new(recovery),
        })
    }

    /// Subscribe with timer-supervised timing bounds.
    pub fn subscribe_hard(
        &self,
        listener: &EventListener,
        mask: EventFlags,
        qos: QosSpec,
        recovery: impl FnMut(Status) + Send + 'static,
    ) -> Result<HardSubscriber<T>> {
        if mask & RESERVED_FLAGS != 0 {
            return Err(Status::InvalidEventMask);
        }
        let link = Arc::new(HardLink {
            qos,
            state: Mutex::new(HardLinkState {
                released_up_to: 0,
                armed: None,
                violation: None,
                timer: None,
                active: true,
            }),
            recovery: Mutex::new(Box::new(recovery)),
        });

        // Attach the timer before the link becomes visible to publishers, so
        // every message counted against this subscriber is also supervised.
        let weak_topic: Weak<TopicShared<T>> = Arc::downgrade(&self.shared);
        let weak_link = Arc::downgrade(&link);
        let timer = self.shared.timers.create(move || {
            if let (Some(topic), Some(link)) = (weak_topic.upgrade(), weak_link.upgrade()) {
                HardLink::on_timer(&topic, &link);
            }
        });
        link.state.lock().timer = Some(timer);

        // Count and link under one guard: a publish sees either neither or
        // both, so unread accounting and credit allocation cannot diverge.
        let last_id = {
            let mut state = self.shared.state.lock();
            state.sub_counts[RtClass::Hard as usize] += 1;
            link.state.lock().released_up_to = state.counter;
            state.hard_links.push(Arc::clone(&link));
            state.counter
        };
        self.shared.events.register(listener, mask);
        log::debug!(
            "[topic {}] {} subscriber joined",
            self.shared.id,
            RtClass::Hard
        );

        Ok(HardSubscriber {
            core: SubscriberCore {
                topic: Arc::clone(&self.shared),
                listener: listener.clone(),
                class: RtClass::Hard,
                last_id,
                stats: LatencyStats::default(),
            },
            link,
            monitor: QosMonitor::new(qos),
        })
    }
}
