// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Leaderless synchronization groups.
//!
//! A [`SyncGroup`] is a reusable two-stage barrier. Members mark themselves
//! synchronized; whoever completes the membership triggers the stage
//! transition, so there is no coordinator. A single failed member aborts the
//! whole group: the failure is latched and broadcast so nobody waits
//! forever.

use crate::osal::event::{EventFlags, EventListener, EventSource, WaitMode};
use crate::status::{Result, Status};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Event flag delivered to members when a stage completes.
pub const SYNC_PROCEED: EventFlags = 0x0001_0000;
/// Event flag delivered to members when the group fails.
pub const SYNC_FAILED: EventFlags = 0x0002_0000;

/// Barrier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Initial,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberState {
    Pending,
    Synced,
    Failed,
}

struct Member {
    id: u64,
    state: MemberState,
}

struct GroupState {
    stage: SyncStage,
    failed: bool,
    next_id: u64,
    members: Vec<Member>,
}

struct GroupShared {
    name: String,
    state: Mutex<GroupState>,
    events: EventSource,
}

/// Named two-stage barrier. Cloning shares the group.
pub struct SyncGroup {
    shared: Arc<GroupShared>,
}

impl Clone for SyncGroup {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl SyncGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(GroupShared {
                name: name.into(),
                state: Mutex::new(GroupState {
                    stage: SyncStage::Initial,
                    failed: false,
                    next_id: 1,
                    members: Vec::new(),
                }),
                events: EventSource::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stage(&self) -> SyncStage {
        self.shared.state.lock().stage
    }

    /// Join the group. A member joining mid-stage starts pending, so the
    /// current stage cannot complete without it.
    pub fn join(&self) -> SyncMember {
        let listener = EventListener::new();
        self.shared
            .events
            .register(&listener, SYNC_PROCEED | SYNC_FAILED);
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.members.push(Member {
            id,
            state: MemberState::Pending,
        });
        SyncMember {
            shared: Arc::clone(&self.shared),
            listener,
            id,
            left: false,
        }
    }

    /// True when the group completed its final stage without failure and no
    /// member is pending.
    pub fn is_synchronized(&self) -> bool {
        let state = self.shared.state.lock();
        !state.failed
            && state.stage == SyncStage::Final
            && !state.members.is_empty()
            && state
                .members
                .iter()
                .all(|member| member.state == MemberState::Synced)
    }

    /// Number of current members.
    pub fn member_count(&self) -> usize {
        self.shared.state.lock().members.len()
    }

    /// Return a completed (or aborted) group to a fresh initial stage.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.stage = SyncStage::Initial;
        state.failed = false;
        for member in &mut state.members {
            member.state = MemberState::Pending;
        }
    }
}

impl GroupState {
    fn all_synced(&self) -> bool {
        !self.members.is_empty()
            && self
                .members
                .iter()
                .all(|member| member.state == MemberState::Synced)
    }

    /// Stage transition once every member is synchronized. Returns the flag
    /// to broadcast.
    fn complete_stage(&mut self) -> EventFlags {
        match self.stage {
            SyncStage::Initial => {
                self.stage = SyncStage::Final;
                for member in &mut self.members {
                    member.state = MemberState::Pending;
                }
            }
            // Final stage completed: members stay synced until reset.
            SyncStage::Final => {}
        }
        SYNC_PROCEED
    }
}

/// One participant of a [`SyncGroup`].
pub struct SyncMember {
    shared: Arc<GroupShared>,
    listener: EventListener,
    id: u64,
    left: bool,
}

impl SyncMember {
    /// Mark this member synchronized for the current stage.
    ///
    /// Returns `Ok` when this call completed the stage (the transition was
    /// broadcast to everyone else), `SyncPending` while other members are
    /// still pending, `SyncError` once the group has failed.
    pub fn synchronize(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.failed {
            return Err(Status::SyncError);
        }
        if let Some(member) = state.members.iter_mut().find(|m| m.id == self.id) {
            member.state = MemberState::Synced;
        }
        if state.all_synced() {
            let flag = state.complete_stage();
            let stage = state.stage;
            drop(state);
            log::debug!(
                "[sync {}] stage completed, now {:?}",
                self.shared.name,
                stage
            );
            self.shared.events.broadcast(flag);
            return Ok(());
        }
        // Still pending for this stage: a PROCEED latched from the previous
        // stage must not satisfy the upcoming wait. Cleared under the group
        // lock, so a completion broadcast for this stage cannot be lost.
        self.listener.clear(SYNC_PROCEED);
        Err(Status::SyncPending)
    }

    /// Mark this member failed and abort the whole group.
    pub fn fail(&self) {
        let mut state = self.shared.state.lock();
        if let Some(member) = state.members.iter_mut().find(|m| m.id == self.id) {
            member.state = MemberState::Failed;
        }
        state.failed = true;
        drop(state);
        log::warn!("[sync {}] member failed, aborting group", self.shared.name);
        self.shared.events.broadcast(SYNC_FAILED);
    }

    /// Block until the current stage completes or the group fails.
    ///
    /// `SyncPending` on timeout, `SyncError` on group failure.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        // Latched failure may predate this member's wait.
        if self.shared.state.lock().failed {
            return Err(Status::SyncError);
        }
        let flags = self
            .listener
            .wait(SYNC_PROCEED | SYNC_FAILED, WaitMode::Any, timeout);
        if flags & SYNC_FAILED != 0 {
            return Err(Status::SyncError);
        }
        if flags == 0 {
            return Err(Status::SyncPending);
        }
        Ok(())
    }

    /// Leave the group. If everyone remaining is synchronized, the departure
    /// completes the current stage.
    pub fn leave(mut self) {
        self.depart();
    }

    fn depart(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        let mut state = self.shared.state.lock();
        state.members.retain(|member| member.id != self.id);
        let completes = !state.failed && state.all_synced();
        let flag = if completes {
            Some(state.complete_stage())
        } else {
            None
        };
        drop(state);
        self.shared.events.unregister(&self.listener);
        if let Some(flag) = flag {
            self.shared.events.broadcast(flag);
        }
    }
}

impl Drop for SyncMember {
    fn drop(&mut self) {
        self.depart();
    }
}
