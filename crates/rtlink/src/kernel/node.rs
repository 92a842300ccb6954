// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node lifecycle.
//!
//! A node is one thread running a fixed shape of loop:
//!
//! 1. `setup` wires subscriptions and returns the event mask the loop
//!    waits on
//! 2. the node joins the kernel-wide startup barrier
//! 3. the loop blocks on the node's listener and calls `step` per wake
//! 4. TERMINATE or EMERGENCY breaks the loop; `shutdown` runs last
//!
//! Termination is cooperative: a `step` that never returns can not be
//! stopped, so long-running work belongs in bounded slices.

use crate::kernel::registry::{control, KernelShared};
use crate::osal::event::{EventFlags, EventListener, WaitMode, RESERVED_FLAGS};
use crate::status::Status;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Application callbacks of one node.
pub trait NodeHooks: Send + 'static {
    /// Wire subscriptions and return the event mask the loop waits on.
    /// Reserved (control) flags are stripped from the returned mask.
    fn setup(&mut self, _ctx: &NodeContext) -> EventFlags {
        0
    }

    /// Handle one wake. `events` holds the consumed flags. Returning an
    /// error records it as the system failure and terminates all nodes.
    fn step(&mut self, ctx: &NodeContext, events: EventFlags) -> crate::status::Result<()>;

    /// Last call before the thread exits. `reason` is the system failure
    /// at that point, if any.
    fn shutdown(&mut self, _ctx: &NodeContext, _reason: Option<Status>) {}
}

/// Per-node handle passed to every hook.
pub struct NodeContext {
    /// The node's listener; registered for control events, and the handle
    /// to register with topics and services during `setup`.
    pub listener: EventListener,
    kernel: Arc<KernelShared>,
}

impl NodeContext {
    /// Arrive at the kernel-wide barrier and block until every node has.
    ///
    /// Returns `SyncError` when the system terminates while waiting.
    pub fn barrier(&self) -> crate::status::Result<()> {
        // A stale PROCEED from an earlier cycle must not satisfy this wait.
        self.listener.clear(control::PROCEED);
        if self.kernel.arrive() {
            return Ok(());
        }
        let flags = self.listener.wait(
            control::PROCEED | control::SHUTDOWN_MASK,
            WaitMode::Any,
            None,
        );
        if flags & control::SHUTDOWN_MASK != 0 {
            return Err(Status::SyncError);
        }
        Ok(())
    }

    /// Record `reason` and trigger an emergency shutdown of all nodes.
    pub fn emergency(&self, reason: Status) {
        self.kernel.record_failure(reason);
        self.kernel.control.broadcast(control::EMERGENCY);
    }

    /// True once TERMINATE or EMERGENCY has been broadcast to this node.
    pub fn terminate_requested(&self) -> bool {
        self.listener.peek() & control::SHUTDOWN_MASK != 0
    }
}

/// Profiling snapshot of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProfile {
    pub name: String,
    /// Completed loop iterations.
    pub loops: u64,
}

pub(crate) struct NodeDef {
    name: String,
    hooks: Box<dyn NodeHooks>,
}

impl NodeDef {
    pub(crate) fn new(name: String, hooks: impl NodeHooks) -> Self {
        Self {
            name,
            hooks: Box::new(hooks),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn spawn(self, kernel: Arc<KernelShared>) -> Node {
        let loops = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&loops);
        let name = self.name.clone();
        let mut hooks = self.hooks;

        let listener = EventListener::new();
        kernel
            .control
            .register(&listener, control::PROCEED | control::SHUTDOWN_MASK);
        let ctx = NodeContext {
            listener,
            kernel: Arc::clone(&kernel),
        };

        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rtlink-node-{}", thread_name))
            .spawn(move || run(&mut *hooks, &ctx, &thread_name, &counter))
            .ok();
        if handle.is_none() {
            log::error!("[node {}] failed to spawn thread", name);
        }

        Node {
            name,
            handle,
            loops,
        }
    }
}

fn run(hooks: &mut dyn NodeHooks, ctx: &NodeContext, name: &str, loops: &AtomicU64) {
    let mask = hooks.setup(ctx) & !RESERVED_FLAGS;

    if ctx.barrier().is_err() {
        log::debug!("[node {}] terminated during startup barrier", name);
        hooks.shutdown(ctx, *ctx.kernel.failure.lock());
        return;
    }
    log::debug!("[node {}] entering event loop", name);

    loop {
        let flags = ctx
            .listener
            .wait(mask | control::SHUTDOWN_MASK, WaitMode::Any, None);
        if flags & control::SHUTDOWN_MASK != 0 {
            break;
        }
        if let Err(status) = hooks.step(ctx, flags) {
            log::warn!("[node {}] step failed: {}", name, status);
            ctx.kernel.record_failure(status);
            ctx.kernel.control.broadcast(control::TERMINATE);
            break;
        }
        loops.fetch_add(1, Ordering::Relaxed);
    }

    let reason = *ctx.kernel.failure.lock();
    hooks.shutdown(ctx, reason);
    log::debug!("[node {}] stopped", name);
}

/// A spawned node thread.
pub struct Node {
    name: String,
    handle: Option<JoinHandle<()>>,
    loops: Arc<AtomicU64>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> NodeProfile {
        NodeProfile {
            name: self.name.clone(),
            loops: self.loops.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
