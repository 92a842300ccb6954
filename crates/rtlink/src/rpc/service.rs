// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service-side request queue and dispatch.
//!
//! # Architecture
//! - One mutex over the whole service state, two condvars (slot freed,
//!   response written)
//! - Request slots live in a fixed arena with an explicit free-list; queues
//!   hold arena indices, never pointers
//! - Three queue segments drained in strict priority order: hard, then
//!   firm/soft, then best-effort
//! - Obsoleteness is detected by a per-service submission sequence carried
//!   on the dispatch token

use crate::config::ServiceConfig;
use crate::osal::event::{EventFlags, EventListener, EventSource, RESERVED_FLAGS};
use crate::osal::{TimerHandle, TimerService};
use crate::status::{Result, RtClass, Status};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Service identifier, unique within one kernel.
pub type ServiceId = u32;

/// Queue segment indices.
pub(crate) const Q_HARD: usize = 0;
pub(crate) const Q_FIRM_SOFT: usize = 1;
pub(crate) const Q_BEST: usize = 2;

pub(crate) fn queue_of(class: RtClass) -> usize {
    match class {
        RtClass::Hard => Q_HARD,
        RtClass::Firm | RtClass::Soft => Q_FIRM_SOFT,
        RtClass::BestEffort => Q_BEST,
    }
}

/// Request slot ownership states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    /// On the free-list.
    Free,
    /// Held by a requester, not submitted.
    Acquired,
    /// Queued at the service.
    Pending,
    /// Taken by the worker, being processed.
    InService,
    /// Response written, waiting for retrieval.
    PendingResponse,
}

pub(crate) struct ReqSlot<T> {
    pub(crate) owner: Owner,
    pub(crate) class: RtClass,
    pub(crate) qos: crate::config::QosSpec,
    /// Request payload on the way in, response payload on the way out.
    pub(crate) payload: Option<T>,
    pub(crate) submitted: Option<Instant>,
    /// Submission sequence, the obsoleteness token.
    pub(crate) seq: u64,
    pub(crate) fire_and_forget: bool,
    /// Requester vanished while the worker held the request.
    pub(crate) orphaned: bool,
    pub(crate) violation: Option<Status>,
    pub(crate) recovery: Option<Box<dyn FnMut(Status) + Send>>,
    pub(crate) timer: Option<TimerHandle>,
}

impl<T> ReqSlot<T> {
    fn empty() -> Self {
        Self {
            owner: Owner::Free,
            class: RtClass::BestEffort,
            qos: crate::config::QosSpec::default(),
            payload: None,
            submitted: None,
            seq: 0,
            fire_and_forget: false,
            orphaned: false,
            violation: None,
            recovery: None,
            timer: None,
        }
    }

    /// Reset to the free state. The caller pushes the index on the free-list.
    pub(crate) fn clear(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.owner = Owner::Free;
        self.class = RtClass::BestEffort;
        self.qos = crate::config::QosSpec::default();
        self.payload = None;
        self.submitted = None;
        self.fire_and_forget = false;
        self.orphaned = false;
        self.violation = None;
        self.recovery = None;
    }
}

pub(crate) struct ServiceState<T> {
    pub(crate) slots: Vec<ReqSlot<T>>,
    pub(crate) free: Vec<usize>,
    pub(crate) queues: [VecDeque<usize>; 3],
    pub(crate) submit_seq: u64,
    /// Dispatched requests (profiling).
    pub(crate) calls: u64,
    /// Responses whose requester was gone (profiling).
    pub(crate) ownership_lost: u64,
}

pub(crate) struct ServiceShared<T> {
    pub(crate) id: ServiceId,
    pub(crate) max_pending_hard: Option<usize>,
    pub(crate) state: Mutex<ServiceState<T>>,
    /// A slot returned to the free-list.
    pub(crate) freed: Condvar,
    /// A response was written.
    pub(crate) responded: Condvar,
    pub(crate) events: EventSource,
    pub(crate) timers: Arc<TimerService>,
}

/// Remote procedure endpoint with a class-priority request queue.
///
/// Cloning shares the underlying arena.
pub struct Service<T> {
    pub(crate) shared: Arc<ServiceShared<T>>,
}

impl<T> Clone for Service<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> core::fmt::Debug for Service<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.shared.id)
            .field("slots", &self.shared.state.lock().slots.len())
            .finish_non_exhaustive()
    }
}

/// A request taken off the queue by the worker.
///
/// Every dispatched request must be answered with [`Service::respond`];
/// the token carries the payload and the correlation data for the reply.
pub struct Dispatched<T> {
    pub payload: T,
    pub class: RtClass,
    /// When the requester submitted.
    pub submitted: Instant,
    pub(crate) index: usize,
    pub(crate) seq: u64,
}

/// Per-segment queue depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLengths {
    pub hard: usize,
    pub firm_soft: usize,
    pub best_effort: usize,
}

impl QueueLengths {
    pub fn total(&self) -> usize {
        self.hard + self.firm_soft + self.best_effort
    }
}

/// Profiling snapshot of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    /// Requests dispatched to the worker.
    pub calls: u64,
    /// Responses that found their requester gone.
    pub ownership_lost: u64,
}

impl<T: Send + 'static> Service<T> {
    /// Create a service with its own request arena.
    pub fn new(id: ServiceId, config: ServiceConfig, timers: Arc<TimerService>) -> Self {
        let slots = config.request_slots.max(1);
        log::debug!("[service {}] created, {} request slots", id, slots);
        Self {
            shared: Arc::new(ServiceShared {
                id,
                max_pending_hard: config.max_pending_hard,
                state: Mutex::new(ServiceState {
                    slots: (0..slots).map(|_| ReqSlot::empty()).collect(),
                    free: (0..slots).rev().collect(),
                    queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                    submit_seq: 0,
                    calls: 0,
                    ownership_lost: 0,
                }),
                freed: Condvar::new(),
                responded: Condvar::new(),
                events: EventSource::new(),
                timers,
            }),
        }
    }

    /// Service identifier.
    pub fn id(&self) -> ServiceId {
        self.shared.id
    }

    /// Register the serving node's listener; `mask` is broadcast on every
    /// submission.
    pub fn register_worker(&self, listener: &EventListener, mask: EventFlags) -> Result<()> {
        if mask & RESERVED_FLAGS != 0 {
            return Err(Status::InvalidEventMask);
        }
        self.shared.events.register(listener, mask);
        Ok(())
    }

    /// Take the highest-priority queued request. Non-blocking; the worker
    /// waits on its event listener between calls.
    pub fn dispatch(&self) -> Option<Dispatched<T>> {
        let mut state = self.shared.state.lock();
        let index = state
            .queues
            .iter_mut()
            .find_map(|queue| queue.pop_front())?;
        let slot = &mut state.slots[index];
        slot.owner = Owner::InService;
        let payload = slot.payload.take()?;
        let token = Dispatched {
            payload,
            class: slot.class,
            submitted: slot.submitted.unwrap_or_else(Instant::now),
            index,
            seq: slot.seq,
        };
        state.calls += 1;
        Some(token)
    }

    /// Write the response for a dispatched request and wake its requester.
    ///
    /// Returns `RequestObsolete` when the slot was re-submitted since this
    /// token was dispatched, `RequestBadOwner` when it is not in service.
    pub fn respond(&self, token: Dispatched<T>, response: T) -> Result<()> {
        let mut state = self.shared.state.lock();
        let slot = &mut state.slots[token.index];
        if slot.seq != token.seq {
            return Err(Status::RequestObsolete);
        }
        if slot.owner != Owner::InService {
            return Err(Status::RequestBadOwner);
        }
        if slot.orphaned {
            // Requester vanished mid-call; reclaim the slot.
            slot.clear();
            state.free.push(token.index);
            state.ownership_lost += 1;
            drop(state);
            self.shared.freed.notify_all();
            return Ok(());
        }
        if slot.fire_and_forget {
            slot.clear();
            state.free.push(token.index);
            drop(state);
            self.shared.freed.notify_all();
            return Ok(());
        }
        slot.payload = Some(response);
        slot.owner = Owner::PendingResponse;
        drop(state);
        self.shared.responded.notify_all();
        Ok(())
    }

    /// Current queue depths per class segment.
    pub fn queue_lengths(&self) -> QueueLengths {
        let state = self.shared.state.lock();
        QueueLengths {
            hard: state.queues[Q_HARD].len(),
            firm_soft: state.queues[Q_FIRM_SOFT].len(),
            best_effort: state.queues[Q_BEST].len(),
        }
    }

    /// Profiling counters.
    pub fn profile(&self) -> ServiceProfile {
        let state = self.shared.state.lock();
        ServiceProfile {
            calls: state.calls,
            ownership_lost: state.ownership_lost,
        }
    }
}
