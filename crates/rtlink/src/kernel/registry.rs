// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kernel context and entity registries.
//!
//! Topics and services are created through the kernel so duplicate ids are
//! caught at assembly time, before any node runs. The kernel also carries
//! the system-wide failure status (first reason wins) and the control event
//! source used for termination, emergency broadcast and the node barrier.

use crate::config::{ServiceConfig, TopicConfig};
use crate::kernel::node::{Node, NodeDef, NodeHooks, NodeProfile};
use crate::osal::event::EventSource;
use crate::osal::TimerService;
use crate::pubsub::topic::{Topic, TopicId};
use crate::rpc::service::{Service, ServiceId};
use crate::status::{Result, Status};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Control event flags, reserved for kernel broadcasts (upper byte of the
/// flag word; application masks must not use them).
pub mod control {
    use crate::osal::event::EventFlags;

    /// Barrier completed, blocked nodes proceed.
    pub const PROCEED: EventFlags = 0x0100_0000;
    /// Cooperative shutdown requested.
    pub const TERMINATE: EventFlags = 0x0200_0000;
    /// Emergency shutdown, highest urgency.
    pub const EMERGENCY: EventFlags = 0x0400_0000;

    /// All flags a node loop must always watch.
    pub const SHUTDOWN_MASK: EventFlags = TERMINATE | EMERGENCY;
}

pub(crate) struct BarrierState {
    pub(crate) registered: usize,
    pub(crate) arrived: usize,
}

pub(crate) struct KernelShared {
    pub(crate) control: EventSource,
    /// First recorded failure reason; `None` while the system is healthy.
    pub(crate) failure: Mutex<Option<Status>>,
    pub(crate) barrier: Mutex<BarrierState>,
    pub(crate) timers: Arc<TimerService>,
}

impl KernelShared {
    pub(crate) fn record_failure(&self, reason: Status) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            log::warn!("[kernel] failure recorded: {}", reason);
            *failure = Some(reason);
        }
    }

    /// Arrive at the barrier; true when this arrival completed it and
    /// PROCEED was broadcast to the waiting nodes.
    pub(crate) fn arrive(&self) -> bool {
        let mut barrier = self.barrier.lock();
        barrier.arrived += 1;
        if barrier.arrived >= barrier.registered {
            barrier.arrived = 0;
            drop(barrier);
            self.control.broadcast(control::PROCEED);
            true
        } else {
            false
        }
    }
}

struct Registry {
    topics: BTreeSet<TopicId>,
    services: BTreeSet<ServiceId>,
}

/// Middleware context: entity factory, node supervisor and failure sink.
pub struct Kernel {
    shared: Arc<KernelShared>,
    registry: Mutex<Registry>,
    pending: Mutex<Vec<NodeDef>>,
    nodes: Mutex<Vec<Node>>,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(KernelShared {
                control: EventSource::new(),
                failure: Mutex::new(None),
                barrier: Mutex::new(BarrierState {
                    registered: 0,
                    arrived: 0,
                }),
                timers: TimerService::new(),
            }),
            registry: Mutex::new(Registry {
                topics: BTreeSet::new(),
                services: BTreeSet::new(),
            }),
            pending: Mutex::new(Vec::new()),
            nodes: Mutex::new(Vec::new()),
        }
    }

    /// The shared timer service, for entities created outside the kernel.
    pub fn timers(&self) -> Arc<TimerService> {
        Arc::clone(&self.shared.timers)
    }

    /// Create and register a topic. Duplicate ids fail at assembly time.
    pub fn create_topic<T: Clone + Send + 'static>(
        &self,
        id: TopicId,
        config: TopicConfig,
    ) -> Result<Topic<T>> {
        if !self.registry.lock().topics.insert(id) {
            return Err(Status::TopicDuplicate);
        }
        Ok(Topic::new(id, config, self.timers()))
    }

    /// Create and register a service. Duplicate ids fail at assembly time.
    pub fn create_service<T: Send + 'static>(
        &self,
        id: ServiceId,
        config: ServiceConfig,
    ) -> Result<Service<T>> {
        if !self.registry.lock().services.insert(id) {
            return Err(Status::ServiceDuplicate);
        }
        Ok(Service::new(id, config, self.timers()))
    }

    /// Register a node for the next `start`.
    pub fn add_node(&self, name: impl Into<String>, hooks: impl NodeHooks) {
        self.pending.lock().push(NodeDef::new(name.into(), hooks));
    }

    /// Spawn every registered node. Each node runs setup, joins the startup
    /// barrier and then enters its event loop.
    pub fn start(&self) {
        let defs: Vec<NodeDef> = self.pending.lock().drain(..).collect();
        self.shared.barrier.lock().registered += defs.len();
        let mut nodes = self.nodes.lock();
        for def in defs {
            log::info!("[kernel] starting node '{}'", def.name());
            nodes.push(def.spawn(Arc::clone(&self.shared)));
        }
    }

    /// Cooperative shutdown: record `reason`, broadcast TERMINATE, join all
    /// node threads. Returns the first failure recorded system-wide.
    pub fn stop(&self, reason: Option<Status>) -> Option<Status> {
        if let Some(reason) = reason {
            self.shared.record_failure(reason);
        }
        self.shared.control.broadcast(control::TERMINATE);
        for mut node in self.nodes.lock().drain(..) {
            node.join();
        }
        self.status()
    }

    /// Emergency shutdown: record the reason and broadcast EMERGENCY. Nodes
    /// terminate at the next wake; call `stop` afterwards to join them.
    pub fn panic(&self, reason: Status) {
        log::error!("[kernel] emergency shutdown: {}", reason);
        self.shared.record_failure(reason);
        self.shared.control.broadcast(control::EMERGENCY);
    }

    /// First recorded failure, `None` while healthy.
    pub fn status(&self) -> Option<Status> {
        *self.shared.failure.lock()
    }

    /// Per-node loop counters.
    pub fn node_profiles(&self) -> Vec<NodeProfile> {
        self.nodes.lock().iter().map(Node::profile).collect()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        // Nodes must not outlive the kernel context.
        self.shared.control.broadcast(control::TERMINATE);
        for mut node in self.nodes.lock().drain(..) {
            node.join();
        }
    }
}
