// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Requester-side handle over one arena slot.
//!
//! The handle is the ownership token: while it exists, no other requester
//! can touch the slot. Submitting queues the slot at the service; retrieving
//! takes the response back and returns the slot to the `Acquired` state for
//! reuse. Dropping the handle returns the slot to the free-list (or flags it
//! orphaned when the worker is still processing it).

use crate::config::QosSpec;
use crate::osal::event::RESERVED_FLAGS;
use crate::osal::time;
use crate::rpc::service::{queue_of, Owner, Q_HARD, Service, ServiceShared};
use crate::status::{Result, RtClass, Status};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// How a requester waits for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievePolicy {
    /// Block until the response arrives.
    Lazy,
    /// Block until the submitted request's deadline; `RequestPending` on
    /// expiry, leaving the request in flight.
    Determined,
    /// Fail immediately with `RequestPending` unless the response is already
    /// available. A still-queued request is cancelled; an in-service request
    /// is reclaimed, making the worker's eventual response obsolete.
    Enforcing,
}

/// A retrieved response with its measured round-trip latency.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub payload: T,
    /// Time from submission to retrieval.
    pub latency: Duration,
    /// Timing violation latched for this request, if any.
    pub violation: Option<Status>,
}

/// Exclusive ownership of one request slot.
pub struct RequestHandle<T: Send + 'static> {
    shared: Arc<ServiceShared<T>>,
    index: usize,
    live: bool,
}

impl<T: Send + 'static> core::fmt::Debug for RequestHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("service", &self.shared.id)
            .field("slot", &self.index)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Service<T> {
    /// Acquire a free request slot, blocking until one is available.
    /// `timeout` bounds the wait; expiry yields `RequestLocked`.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<RequestHandle<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(index) = state.free.pop() {
                state.slots[index].owner = Owner::Acquired;
                return Ok(RequestHandle {
                    shared: Arc::clone(&self.shared),
                    index,
                    live: true,
                });
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.freed.wait_until(&mut state, deadline).timed_out()
                        && state.free.is_empty()
                    {
                        return Err(Status::RequestLocked);
                    }
                }
                None => self.shared.freed.wait(&mut state),
            }
        }
    }

    /// Acquire a free request slot or fail immediately with `RequestLocked`.
    pub fn try_acquire(&self) -> Result<RequestHandle<T>> {
        let mut state = self.shared.state.lock();
        let Some(index) = state.free.pop() else {
            return Err(Status::RequestLocked);
        };
        state.slots[index].owner = Owner::Acquired;
        Ok(RequestHandle {
            shared: Arc::clone(&self.shared),
            index,
            live: true,
        })
    }
}

impl<T: Send + 'static> RequestHandle<T> {
    /// Queue the request at the service.
    pub fn submit(&mut self, payload: T, class: RtClass, qos: QosSpec) -> Result<()> {
        self.submit_inner(payload, class, qos, None, false)
    }

    /// Queue the request with a recovery callback for timing violations.
    /// Hard requests arm a deadline timer that fires the callback even if
    /// the requester never retrieves.
    pub fn submit_with_recovery(
        &mut self,
        payload: T,
        class: RtClass,
        qos: QosSpec,
        recovery: impl FnMut(Status) + Send + 'static,
    ) -> Result<()> {
        self.submit_inner(payload, class, qos, Some(Box::new(recovery)), false)
    }

    /// Queue the request and give up the slot: the service reclaims it
    /// right after responding, no retrieval happens.
    pub fn submit_fire_and_forget(mut self, payload: T, class: RtClass, qos: QosSpec) -> Result<()> {
        self.submit_inner(payload, class, qos, None, true)?;
        // The slot now frees itself through respond; drop must not touch it.
        self.live = false;
        Ok(())
    }

    fn submit_inner(
        &mut self,
        payload: T,
        class: RtClass,
        qos: QosSpec,
        recovery: Option<Box<dyn FnMut(Status) + Send>>,
        fire_and_forget: bool,
    ) -> Result<()> {
        let seq = {
            let mut state = self.shared.state.lock();
            if state.slots[self.index].owner != Owner::Acquired {
                return Err(Status::RequestBadOwner);
            }
            if class == RtClass::Hard {
                if let Some(bound) = self.shared.max_pending_hard {
                    if state.queues[Q_HARD].len() >= bound {
                        return Err(Status::RequestLocked);
                    }
                }
            }
            state.submit_seq += 1;
            let seq = state.submit_seq;
            let submitted = time::now();

            let slot = &mut state.slots[self.index];
            slot.owner = Owner::Pending;
            slot.class = class;
            slot.qos = qos;
            slot.payload = Some(payload);
            slot.submitted = Some(submitted);
            slot.seq = seq;
            slot.fire_and_forget = fire_and_forget;
            slot.violation = None;
            slot.recovery = recovery;

            if class == RtClass::Hard {
                if let Some(deadline) = qos.deadline {
                    let weak: Weak<ServiceShared<T>> = Arc::downgrade(&self.shared);
                    let index = self.index;
                    let timer = self.shared.timers.create(move || {
                        if let Some(shared) = weak.upgrade() {
                            on_request_deadline(&shared, index, seq);
                        }
                    });
                    timer.arm_at(submitted + deadline);
                    slot.timer = Some(timer);
                }
            }
            let queue = queue_of(class);
            state.queues[queue].push_back(self.index);
            seq
        };
        log::debug!(
            "[service {}] request {} submitted ({})",
            self.shared.id,
            seq,
            class
        );
        self.shared.events.broadcast(!RESERVED_FLAGS);
        Ok(())
    }

    /// Wait for and take the response according to `policy`.
    ///
    /// On success the slot returns to the acquired state and can be
    /// submitted again.
    pub fn retrieve(&mut self, policy: RetrievePolicy) -> Result<Reply<T>> {
        let mut state = self.shared.state.lock();
        loop {
            match state.slots[self.index].owner {
                Owner::PendingResponse => break,
                Owner::Acquired | Owner::Free => return Err(Status::RequestBadOwner),
                Owner::Pending | Owner::InService => match policy {
                    RetrievePolicy::Enforcing => {
                        let index = self.index;
                        if state.slots[index].owner == Owner::Pending {
                            for queue in &mut state.queues {
                                if let Some(pos) = queue.iter().position(|&i| i == index) {
                                    queue.remove(pos);
                                    break;
                                }
                            }
                        }
                        let slot = &mut state.slots[index];
                        slot.owner = Owner::Acquired;
                        slot.payload = None;
                        if let Some(timer) = slot.timer.take() {
                            timer.cancel();
                        }
                        return Err(Status::RequestPending);
                    }
                    RetrievePolicy::Determined => {
                        let wait_until = {
                            let slot = &state.slots[self.index];
                            match (slot.submitted, slot.qos.deadline) {
                                (Some(submitted), Some(deadline)) => Some(submitted + deadline),
                                _ => None,
                            }
                        };
                        match wait_until {
                            Some(at) => {
                                if self.shared.responded.wait_until(&mut state, at).timed_out()
                                    && state.slots[self.index].owner != Owner::PendingResponse
                                {
                                    return Err(Status::RequestPending);
                                }
                            }
                            None => self.shared.responded.wait(&mut state),
                        }
                    }
                    RetrievePolicy::Lazy => self.shared.responded.wait(&mut state),
                },
            }
        }

        let slot = &mut state.slots[self.index];
        let payload = slot.payload.take().ok_or(Status::RequestBadOwner)?;
        slot.owner = Owner::Acquired;
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }
        let latency = slot
            .submitted
            .map(|submitted| time::now().saturating_duration_since(submitted))
            .unwrap_or_default();

        // Firm and hard requests check the deadline at retrieval as well;
        // the latch keeps recovery at one invocation per episode.
        let mut fresh = None;
        if slot.class.has_qos_bounds() {
            if let Some(deadline) = slot.qos.deadline {
                if latency > deadline {
                    fresh = Some(Status::DeadlineViolation);
                }
            }
        }
        let mut callback = None;
        if let Some(status) = fresh {
            if slot.violation.is_none() {
                slot.violation = Some(status);
                callback = slot.recovery.take().map(|cb| (cb, status));
            }
        }
        let violation = fresh.or(slot.violation);
        drop(state);

        if let Some((mut cb, status)) = callback {
            cb(status);
            let mut state = self.shared.state.lock();
            let slot = &mut state.slots[self.index];
            if slot.recovery.is_none() {
                slot.recovery = Some(cb);
            }
        }

        Ok(Reply {
            payload,
            latency,
            violation,
        })
    }

    /// Clear and return the latched timing violation.
    pub fn clear_violation(&mut self) -> Option<Status> {
        self.shared.state.lock().slots[self.index].violation.take()
    }

    /// Latched timing violation without clearing it.
    pub fn violation(&self) -> Option<Status> {
        self.shared.state.lock().slots[self.index].violation
    }

    /// Return the slot to the free-list.
    pub fn release(self) {}
}

/// Hard request deadline expired before retrieval.
fn on_request_deadline<T: Send + 'static>(shared: &Arc<ServiceShared<T>>, index: usize, seq: u64) {
    let callback = {
        let mut state = shared.state.lock();
        let slot = &mut state.slots[index];
        if slot.seq != seq {
            return;
        }
        if !matches!(
            slot.owner,
            Owner::Pending | Owner::InService | Owner::PendingResponse
        ) {
            return;
        }
        if slot.violation.is_some() {
            return;
        }
        slot.violation = Some(Status::DeadlineViolation);
        slot.recovery.take()
    };
    log::warn!("[service {}] hard request {} missed its deadline", shared.id, seq);
    if let Some(mut cb) = callback {
        cb(Status::DeadlineViolation);
        let mut state = shared.state.lock();
        let slot = &mut state.slots[index];
        if slot.seq == seq && slot.recovery.is_none() {
            slot.recovery = Some(cb);
        }
    }
}

impl<T: Send + 'static> Drop for RequestHandle<T> {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        let mut state = self.shared.state.lock();
        let index = self.index;
        match state.slots[index].owner {
            Owner::Acquired | Owner::PendingResponse => {
                state.slots[index].clear();
                state.free.push(index);
                drop(state);
                self.shared.freed.notify_all();
            }
            Owner::Pending => {
                for queue in &mut state.queues {
                    if let Some(pos) = queue.iter().position(|&i| i == index) {
                        queue.remove(pos);
                        break;
                    }
                }
                state.slots[index].clear();
                state.free.push(index);
                drop(state);
                self.shared.freed.notify_all();
            }
            // The worker holds it; respond reclaims the slot.
            Owner::InService => state.slots[index].orphaned = true,
            Owner::Free => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::osal::TimerService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn service(slots: usize) -> Service<u32> {
        Service::new(
            1,
            ServiceConfig::with_request_slots(slots),
            TimerService::new(),
        )
    }

    #[test]
    fn acquire_is_exclusive() {
        let service = service(2);
        let _a = service.try_acquire().unwrap();
        let _b = service.try_acquire().unwrap();
        assert_eq!(service.try_acquire().unwrap_err(), Status::RequestLocked);
    }

    #[test]
    fn release_recycles_slot() {
        let service = service(1);
        let handle = service.try_acquire().unwrap();
        assert_eq!(service.try_acquire().unwrap_err(), Status::RequestLocked);
        handle.release();
        assert!(service.try_acquire().is_ok());
    }

    #[test]
    fn blocking_acquire_wakes_on_release() {
        let service = service(1);
        let held = service.try_acquire().unwrap();

        let waiter = {
            let service = service.clone();
            thread::spawn(move || service.acquire(Some(Duration::from_secs(2))))
        };
        thread::sleep(Duration::from_millis(20));
        held.release();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn acquire_times_out() {
        let service = service(1);
        let _held = service.try_acquire().unwrap();
        let err = service.acquire(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err, Status::RequestLocked);
    }

    #[test]
    fn lazy_retrieve_round_trip() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        req.submit(21, RtClass::BestEffort, QosSpec::default()).unwrap();

        let worker = {
            let service = service.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                let token = service.dispatch().unwrap();
                let doubled = token.payload * 2;
                service.respond(token, doubled).unwrap();
            })
        };

        let reply = req.retrieve(RetrievePolicy::Lazy).unwrap();
        assert_eq!(reply.payload, 42);
        assert_eq!(reply.violation, None);
        worker.join().unwrap();
    }

    #[test]
    fn slot_is_reusable_after_retrieve() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        for round in 0..3u32 {
            req.submit(round, RtClass::BestEffort, QosSpec::default())
                .unwrap();
            let token = service.dispatch().unwrap();
            service.respond(token, round + 100).unwrap();
            assert_eq!(req.retrieve(RetrievePolicy::Lazy).unwrap().payload, round + 100);
        }
    }

    #[test]
    fn double_submit_is_bad_owner() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        req.submit(1, RtClass::BestEffort, QosSpec::default()).unwrap();
        let err = req
            .submit(2, RtClass::BestEffort, QosSpec::default())
            .unwrap_err();
        assert_eq!(err, Status::RequestBadOwner);
    }

    #[test]
    fn retrieve_without_submit_is_bad_owner() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        let err = req.retrieve(RetrievePolicy::Lazy).unwrap_err();
        assert_eq!(err, Status::RequestBadOwner);
    }

    #[test]
    fn enforcing_retrieve_cancels_queued_request() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        req.submit(7, RtClass::BestEffort, QosSpec::default()).unwrap();

        let err = req.retrieve(RetrievePolicy::Enforcing).unwrap_err();
        assert_eq!(err, Status::RequestPending);
        // Cancelled: nothing left for the worker.
        assert!(service.dispatch().is_none());
        // The slot is back in the acquired state and reusable.
        req.submit(8, RtClass::BestEffort, QosSpec::default()).unwrap();
        assert_eq!(service.dispatch().unwrap().payload, 8);
    }

    #[test]
    fn determined_retrieve_times_out_at_deadline() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        req.submit(
            1,
            RtClass::Firm,
            QosSpec::deadline(Duration::from_millis(20)),
        )
        .unwrap();

        let start = Instant::now();
        let err = req.retrieve(RetrievePolicy::Determined).unwrap_err();
        assert_eq!(err, Status::RequestPending);
        assert!(start.elapsed() >= Duration::from_millis(15));
        // Still queued for the worker.
        assert_eq!(service.queue_lengths().firm_soft, 1);
    }

    #[test]
    fn fire_and_forget_frees_slot_after_respond() {
        let service = service(1);
        let req = service.try_acquire().unwrap();
        req.submit_fire_and_forget(9, RtClass::BestEffort, QosSpec::default())
            .unwrap();

        let token = service.dispatch().unwrap();
        assert_eq!(token.payload, 9);
        service.respond(token, 0).unwrap();

        // Slot went straight back to the free-list.
        assert!(service.try_acquire().is_ok());
    }

    #[test]
    fn orphaned_request_counts_ownership_loss() {
        let service = service(1);
        let mut req = service.try_acquire().unwrap();
        req.submit(3, RtClass::BestEffort, QosSpec::default()).unwrap();
        let token = service.dispatch().unwrap();
        drop(req);

        service.respond(token, 4).unwrap();
        assert_eq!(service.profile().ownership_lost, 1);
        // Slot was reclaimed.
        assert!(service.try_acquire().is_ok());
    }

    #[test]
    fn firm_late_reply_latches_violation_and_fires_recovery_once() {
        let service = service(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let mut req = service.try_acquire().unwrap();
        req.submit_with_recovery(
            1,
            RtClass::Firm,
            QosSpec::deadline(Duration::from_millis(5)),
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        let token = service.dispatch().unwrap();
        thread::sleep(Duration::from_millis(20));
        service.respond(token, 2).unwrap();

        let reply = req.retrieve(RetrievePolicy::Lazy).unwrap();
        assert_eq!(reply.violation, Some(Status::DeadlineViolation));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(req.clear_violation(), Some(Status::DeadlineViolation));
    }

    #[test]
    fn hard_deadline_timer_fires_recovery_without_retrieve() {
        let service = service(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let mut req = service.try_acquire().unwrap();
        req.submit_with_recovery(
            1,
            RtClass::Hard,
            QosSpec::deadline(Duration::from_millis(10)),
            move |status| {
                assert_eq!(status, Status::DeadlineViolation);
                count.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        // Nobody dispatches, nobody retrieves: the timer alone reports.
        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(req.violation(), Some(Status::DeadlineViolation));
    }

    #[test]
    fn hard_retrieve_in_time_cancels_timer() {
        let service = service(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let mut req = service.try_acquire().unwrap();
        req.submit_with_recovery(
            5,
            RtClass::Hard,
            QosSpec::deadline(Duration::from_millis(100)),
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        let token = service.dispatch().unwrap();
        service.respond(token, 6).unwrap();
        let reply = req.retrieve(RetrievePolicy::Lazy).unwrap();
        assert_eq!(reply.payload, 6);
        assert_eq!(reply.violation, None);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hard_queue_bound_rejects_excess() {
        let service: Service<u32> = Service::new(
            2,
            ServiceConfig::with_request_slots(4).max_pending_hard(1),
            TimerService::new(),
        );
        let mut first = service.try_acquire().unwrap();
        let mut second = service.try_acquire().unwrap();
        first
            .submit(1, RtClass::Hard, QosSpec::deadline(Duration::from_secs(1)))
            .unwrap();
        let err = second
            .submit(2, RtClass::Hard, QosSpec::deadline(Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err, Status::RequestLocked);
    }
}
