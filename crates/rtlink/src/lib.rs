// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rtlink - real-time middleware for cooperating compute nodes
//!
//! In-process publish/subscribe, remote procedure calls and barrier
//! synchronization for systems built from small cooperating nodes, with
//! per-endpoint real-time contracts (best-effort, soft, firm, hard).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtlink::{Kernel, PublishPolicy, TopicConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let kernel = Kernel::new();
//!
//!     let topic = kernel.create_topic::<f64>(1, TopicConfig::with_capacity(4))?;
//!     let publisher = topic.publisher(PublishPolicy::Determined);
//!
//!     publisher.publish(21.5, None)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Application Nodes                            |
//! |        NodeHooks (setup / step / shutdown) on one thread each       |
//! +---------------------------------------------------------------------+
//! |                         Middleware Layer                            |
//! |  Topics (ring pools) | Services (request arenas) | Sync Groups      |
//! +---------------------------------------------------------------------+
//! |                           Kernel Layer                              |
//! |  Registries | Control Events | Startup Barrier | Failure Status     |
//! +---------------------------------------------------------------------+
//! |                            OSAL Layer                               |
//! |  Event Flags | One-shot Timer Service | Monotonic Time              |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Kernel`] | Context object: entity factory, node supervisor, failure sink |
//! | [`Topic`] | Typed message channel with a fixed circular slot pool |
//! | [`Publisher`] | Writing endpoint with lazy/determined/enforcing policies |
//! | [`HardSubscriber`] | Consumer supervised by an independent deadline timer |
//! | [`Service`] | RPC endpoint with a class-priority request queue |
//! | [`SyncGroup`] | Leaderless reusable two-stage barrier |
//!
//! ## Real-time classes
//!
//! Every consuming endpoint carries a class deciding how timing constraints
//! are handled: best-effort (none), soft (usefulness decays with age), firm
//! (detect at consumption, recover via callback) and hard (an armed timer
//! detects the violation even if the consumer never shows up, and releases
//! the message's pool credit so the system keeps flowing). Timing
//! violations are always reported, never escalated by the library.
//!
//! ## Modules Overview
//!
//! - [`kernel`] - context object, node lifecycle, sync groups (start here)
//! - [`pubsub`] - topics, publishers, the four subscriber classes
//! - [`rpc`] - services, request arenas, dispatch and replies
//! - [`osal`] - event flags, timer service, monotonic time
//! - [`config`] - pool sizing, overflow policy, QoS bounds
//! - [`status`] - the flat status/error taxonomy

/// Assembly-time configuration (pool sizes, overflow policy, QoS bounds).
pub mod config;
/// Kernel context, node lifecycle and barrier synchronization.
pub mod kernel;
/// OS abstraction: event flags, one-shot timers, monotonic time.
pub mod osal;
/// Topic-based publish/subscribe with per-class timing contracts.
pub mod pubsub;
/// Remote procedure calls with class-priority dispatch.
pub mod rpc;
/// Status and error taxonomy.
pub mod status;

pub use config::{OverflowPolicy, QosSpec, ServiceConfig, TopicConfig};
pub use kernel::{control, Kernel, Node, NodeContext, NodeHooks, NodeProfile};
pub use kernel::{SyncGroup, SyncMember, SyncStage};
pub use osal::{EventFlags, EventListener, EventSource, WaitMode};
pub use pubsub::{
    BestEffortSubscriber, FirmSubscriber, HardSubscriber, PublishPolicy, Publisher, Sample,
    SoftSubscriber, Topic, TopicId, TopicProfile,
};
pub use rpc::{
    Dispatched, QueueLengths, Reply, RequestHandle, RetrievePolicy, Service, ServiceId,
    ServiceProfile,
};
pub use status::{Result, RtClass, Status};
