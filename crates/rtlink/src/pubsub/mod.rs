// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic-based publish/subscribe with per-class timing contracts.
//!
//! A [`Topic`] owns a fixed circular pool of message slots. [`Publisher`]s
//! copy payloads into the pool; subscribers of four real-time classes read
//! them out under the contract their class implies. Slot reuse is gated by
//! hard-real-time credits so a hard subscriber never silently loses data.

pub mod publisher;
pub mod subscriber;
pub mod topic;

pub use publisher::{PublishPolicy, Publisher};
pub use subscriber::{
    BestEffortSubscriber, FirmSubscriber, HardSubscriber, Sample, SoftSubscriber,
};
pub use topic::{Topic, TopicId, TopicProfile};
