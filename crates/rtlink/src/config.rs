// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Assembly-time configuration for topics, services and QoS bounds.
//!
//! All pools are sized here, once, before any node starts. The steady state
//! performs no allocation: topic rings and request arenas are `Vec`s filled
//! at construction and never resized.

use std::time::Duration;

/// Behavior when a publish wraps the ring onto a slot that still holds an
/// unread message.
///
/// Hard-real-time credits gate slot reuse in both modes; the policy only
/// decides what happens to messages no hard consumer is protecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Recycle the oldest slot and count a discard. Slow best-effort readers
    /// skip ahead.
    #[default]
    Overwrite,
    /// Refuse the publish (`PublishBlocked`) while any unread message would
    /// be lost. Enforcing publishers override this.
    Reject,
}

/// Topic pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct TopicConfig {
    /// Number of message slots in the circular pool. Bounds both memory and
    /// the backlog a slow subscriber can observe.
    pub capacity: usize,
    /// What to do when the ring wraps onto unread data.
    pub overflow: OverflowPolicy,
}

impl TopicConfig {
    /// Pool with the given slot count and the default overwrite policy.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            overflow: OverflowPolicy::default(),
        }
    }

    /// Select the overflow policy.
    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::with_capacity(4)
    }
}

/// Service configuration.
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    /// Number of request slots in the service's arena.
    pub request_slots: usize,
    /// Optional bound on queued hard-real-time requests. `None` allows the
    /// hard segment to grow to the arena size.
    pub max_pending_hard: Option<usize>,
}

impl ServiceConfig {
    /// Arena with the given slot count and no hard-segment bound.
    pub fn with_request_slots(request_slots: usize) -> Self {
        Self {
            request_slots,
            max_pending_hard: None,
        }
    }

    /// Bound the hard-real-time queue segment.
    pub fn max_pending_hard(mut self, bound: usize) -> Self {
        self.max_pending_hard = Some(bound);
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::with_request_slots(8)
    }
}

/// Timing bounds for firm and hard real-time endpoints.
///
/// All fields are optional; an unset field is an unconstrained dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct QosSpec {
    /// Maximum tolerated latency between origin and consumption.
    pub deadline: Option<Duration>,
    /// Maximum tolerated spread of observed latencies.
    pub max_jitter: Option<Duration>,
    /// Maximum tolerated gap between consecutive messages.
    pub expected_rate: Option<Duration>,
}

impl QosSpec {
    /// Spec with only a deadline bound.
    pub fn deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// Add a jitter bound.
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = Some(jitter);
        self
    }

    /// Add a rate bound.
    pub fn with_expected_rate(mut self, rate: Duration) -> Self {
        self.expected_rate = Some(rate);
        self
    }

    /// True when no dimension is constrained.
    pub fn is_unconstrained(&self) -> bool {
        self.deadline.is_none() && self.max_jitter.is_none() && self.expected_rate.is_none()
    }
}
