// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::shadow_unrelated)] // Test scoping

//! Synchronization group integration tests
//!
//! Covers the two-stage barrier protocol across threads: stage advancement,
//! failure propagation and barrier reuse after reset.

use rtlink::{Status, SyncGroup, SyncStage};
use std::thread;
use std::time::Duration;

#[test]
fn two_members_meet_at_the_barrier() {
    let group = SyncGroup::new("pair");
    let a = group.join();
    let b = group.join();

    // A arrives first and is left pending.
    assert_eq!(a.synchronize().unwrap_err(), Status::SyncPending);
    assert_eq!(group.stage(), SyncStage::Initial);
    assert!(!group.is_synchronized());

    // B completes the initial stage; both confirm in the final stage.
    b.synchronize().unwrap();
    assert_eq!(group.stage(), SyncStage::Final);

    assert_eq!(a.synchronize().unwrap_err(), Status::SyncPending);
    b.synchronize().unwrap();
    assert!(group.is_synchronized());
}

#[test]
fn threads_rendezvous_through_both_stages() {
    let group = SyncGroup::new("workers");
    let mut handles = Vec::new();
    for _ in 0..4 {
        let member = group.join();
        handles.push(thread::spawn(move || {
            for _stage in 0..2 {
                match member.synchronize() {
                    Ok(()) => {}
                    Err(Status::SyncPending) => {
                        member.wait(Some(Duration::from_secs(2))).unwrap();
                    }
                    Err(other) => panic!("unexpected status: {}", other),
                }
            }
            member
        }));
    }
    // Keep the members alive until everyone finished both stages.
    let members: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert!(group.is_synchronized());
    drop(members);
}

#[test]
fn one_failure_wakes_every_waiter() {
    let group = SyncGroup::new("fallible");
    let a = group.join();
    let b = group.join();
    let c = group.join();

    let waiter = thread::spawn(move || {
        let _ = a.synchronize();
        a.wait(Some(Duration::from_secs(2)))
    });
    thread::sleep(Duration::from_millis(20));

    b.fail();
    assert_eq!(waiter.join().unwrap().unwrap_err(), Status::SyncError);
    assert_eq!(c.synchronize().unwrap_err(), Status::SyncError);
    assert!(!group.is_synchronized());
}

#[test]
fn reset_makes_the_barrier_reusable() {
    let group = SyncGroup::new("cyclic");
    let a = group.join();
    let b = group.join();

    for _cycle in 0..3 {
        let _ = a.synchronize();
        b.synchronize().unwrap();
        let _ = a.synchronize();
        b.synchronize().unwrap();
        assert!(group.is_synchronized());
        group.reset();
        assert_eq!(group.stage(), SyncStage::Initial);
        assert!(!group.is_synchronized());
    }
}

#[test]
fn reset_clears_a_failed_group() {
    let group = SyncGroup::new("recovering");
    let a = group.join();
    let b = group.join();

    a.fail();
    assert_eq!(b.synchronize().unwrap_err(), Status::SyncError);

    group.reset();
    let _ = a.synchronize();
    b.synchronize().unwrap();
    assert_eq!(group.stage(), SyncStage::Final);
}

#[test]
fn departure_does_not_strand_the_rest() {
    let group = SyncGroup::new("shrinking");
    let a = group.join();
    let b = group.join();
    let c = group.join();

    let _ = a.synchronize();
    let _ = b.synchronize();
    // C leaves without ever synchronizing; A and B alone complete the stage.
    c.leave();
    assert_eq!(group.stage(), SyncStage::Final);
    assert_eq!(group.member_count(), 2);
}
