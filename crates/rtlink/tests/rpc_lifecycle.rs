// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Test code
#![allow(clippy::shadow_unrelated)] // Test scoping

//! Remote-call integration tests
//!
//! Drives the full requester/worker round trip through the public API,
//! including class-priority dispatch, fire-and-forget submissions and
//! ownership hand-back when one side gives up.

use rtlink::{
    EventListener, Kernel, QosSpec, RetrievePolicy, RtClass, Service, ServiceConfig, Status,
    WaitMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn service(kernel: &Kernel, id: u32, slots: usize) -> Service<u32> {
    kernel
        .create_service(id, ServiceConfig::with_request_slots(slots))
        .unwrap()
}

/// Worker thread that serves `count` requests by doubling the payload.
fn spawn_doubler(service: &Service<u32>, count: usize) -> thread::JoinHandle<()> {
    let service = service.clone();
    let listener = EventListener::new();
    service.register_worker(&listener, 0b1).unwrap();
    thread::spawn(move || {
        let mut served = 0;
        while served < count {
            listener.wait(0b1, WaitMode::Any, Some(Duration::from_secs(2)));
            while let Some(token) = service.dispatch() {
                let doubled = token.payload * 2;
                service.respond(token, doubled).unwrap();
                served += 1;
            }
        }
    })
}

#[test]
fn round_trip_through_worker_thread() {
    let kernel = Kernel::new();
    let service = service(&kernel, 1, 2);
    let worker = spawn_doubler(&service, 3);

    let mut req = service.acquire(Some(Duration::from_secs(1))).unwrap();
    for value in [3u32, 5, 8] {
        req.submit(value, RtClass::BestEffort, QosSpec::default())
            .unwrap();
        let reply = req.retrieve(RetrievePolicy::Lazy).unwrap();
        assert_eq!(reply.payload, value * 2);
        assert_eq!(reply.violation, None);
    }
    worker.join().unwrap();
    assert_eq!(service.profile().calls, 3);
}

#[test]
fn hard_requests_jump_the_queue() {
    let kernel = Kernel::new();
    let service = service(&kernel, 2, 4);

    let mut best = service.try_acquire().unwrap();
    let mut firm = service.try_acquire().unwrap();
    let mut hard = service.try_acquire().unwrap();

    best.submit(1, RtClass::BestEffort, QosSpec::default())
        .unwrap();
    firm.submit(2, RtClass::Firm, QosSpec::deadline(Duration::from_secs(1)))
        .unwrap();
    hard.submit(3, RtClass::Hard, QosSpec::deadline(Duration::from_secs(1)))
        .unwrap();

    let lengths = service.queue_lengths();
    assert_eq!(lengths.hard, 1);
    assert_eq!(lengths.firm_soft, 1);
    assert_eq!(lengths.best_effort, 1);
    assert_eq!(lengths.total(), 3);

    // Strict priority regardless of submission order.
    assert_eq!(service.dispatch().unwrap().payload, 3);
    assert_eq!(service.dispatch().unwrap().payload, 2);
    assert_eq!(service.dispatch().unwrap().payload, 1);
}

#[test]
fn fire_and_forget_returns_slot_to_pool() {
    let kernel = Kernel::new();
    let service = service(&kernel, 3, 1);
    let worker = spawn_doubler(&service, 1);

    let req = service.try_acquire().unwrap();
    req.submit_fire_and_forget(9, RtClass::BestEffort, QosSpec::default())
        .unwrap();

    worker.join().unwrap();
    // The response was discarded and the slot is free again.
    let fresh = service.acquire(Some(Duration::from_secs(1))).unwrap();
    drop(fresh);
    assert_eq!(service.profile().calls, 1);
}

#[test]
fn enforcing_retrieve_obsoletes_in_flight_work() {
    let kernel = Kernel::new();
    let service = service(&kernel, 4, 1);

    let mut req = service.try_acquire().unwrap();
    req.submit(10, RtClass::BestEffort, QosSpec::default())
        .unwrap();
    let stale = service.dispatch().unwrap();

    // The requester gives up and resubmits while the worker still computes.
    assert_eq!(
        req.retrieve(RetrievePolicy::Enforcing).unwrap_err(),
        Status::RequestPending
    );
    req.submit(20, RtClass::BestEffort, QosSpec::default())
        .unwrap();

    // The slow answer must not be matched to the new request.
    assert_eq!(
        service.respond(stale, 999).unwrap_err(),
        Status::RequestObsolete
    );
    let fresh = service.dispatch().unwrap();
    assert_eq!(fresh.payload, 20);
    service.respond(fresh, 40).unwrap();
    assert_eq!(req.retrieve(RetrievePolicy::Lazy).unwrap().payload, 40);
}

#[test]
fn dropped_requester_hands_slot_back_through_respond() {
    let kernel = Kernel::new();
    let service = service(&kernel, 5, 1);

    let mut req = service.try_acquire().unwrap();
    req.submit(1, RtClass::BestEffort, QosSpec::default())
        .unwrap();
    let token = service.dispatch().unwrap();
    drop(req);

    // Responding to an orphaned request succeeds and recycles the slot.
    service.respond(token, 2).unwrap();
    assert_eq!(service.profile().ownership_lost, 1);
    assert!(service.try_acquire().is_ok());
}

#[test]
fn hard_request_deadline_reports_without_any_worker() {
    let kernel = Kernel::new();
    let service = service(&kernel, 6, 1);
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

    thread::sleep(Duration::from_millis(60));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(req.violation(), Some(Status::DeadlineViolation));

    // The episode ends only when the application clears the latch.
    assert_eq!(req.clear_violation(), Some(Status::DeadlineViolation));
    assert_eq!(req.violation(), None);
}

#[test]
fn determined_retrieve_gives_up_at_the_deadline() {
    let kernel = Kernel::new();
    let service = service(&kernel, 7, 1);

    let mut req = service.try_acquire().unwrap();
    req.submit(
        1,
        RtClass::Firm,
        QosSpec::deadline(Duration::from_millis(20)),
    )
    .unwrap();

    assert_eq!(
        req.retrieve(RetrievePolicy::Determined).unwrap_err(),
        Status::RequestPending
    );
    // Unlike enforcing, the request stays queued for the worker.
    assert_eq!(service.queue_lengths().firm_soft, 1);
}

#[test]
fn many_requesters_share_a_small_arena() {
    let kernel = Kernel::new();
    let service = service(&kernel, 8, 2);
    let worker = spawn_doubler(&service, 8);

    let mut clients = Vec::new();
    for value in 0..8u32 {
        let service = service.clone();
        clients.push(thread::spawn(move || {
            // Jitter the arrivals so acquisition order is not deterministic.
            thread::sleep(Duration::from_millis(u64::from(fastrand::u8(..20))));
            let mut req = service.acquire(Some(Duration::from_secs(2))).unwrap();
            req.submit(value, RtClass::BestEffort, QosSpec::default())
                .unwrap();
            req.retrieve(RetrievePolicy::Lazy).unwrap().payload
        }));
    }

    let mut replies: Vec<u32> = clients
        .into_iter()
        .map(|client| client.join().unwrap())
        .collect();
    replies.sort_unstable();
    assert_eq!(replies, (0..8u32).map(|v| v * 2).collect::<Vec<_>>());
    worker.join().unwrap();
    assert_eq!(service.profile().calls, 8);
}
