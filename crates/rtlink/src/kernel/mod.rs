// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kernel context, node lifecycle and barrier synchronization.
//!
//! The [`Kernel`] is an explicit context object: it owns the timer service,
//! the topic/service id registries, the control event source and the node
//! threads. There is no global state; everything reachable at runtime was
//! wired up at assembly time.

pub mod node;
pub mod registry;
pub mod sync;

pub use node::{Node, NodeContext, NodeHooks, NodeProfile};
pub use registry::{control, Kernel};
pub use sync::{SyncGroup, SyncMember, SyncStage};
