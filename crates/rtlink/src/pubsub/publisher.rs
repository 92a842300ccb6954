// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishers and publish policies.

use crate::pubsub::topic::{Topic, TopicShared};
use crate::status::Result;
use std::sync::Arc;
use std::time::Duration;

/// How far a publisher goes to place a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// Give up immediately on a contended lock (`PublishLocked`) or a
    /// blocked slot (`PublishBlocked`). Never waits.
    Lazy,
    /// Wait for the slot credit to be released, bounded by the timeout
    /// passed to publish (`PublishTimeout` on expiry).
    #[default]
    Determined,
    /// Never wait: preempt outstanding hard credits on the oldest message.
    /// The affected hard subscribers are notified through their recovery
    /// callbacks.
    Enforcing,
}

/// Writing endpoint of a topic.
pub struct Publisher<T> {
    shared: Arc<TopicShared<T>>,
    policy: PublishPolicy,
}

impl<T> core::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.shared.id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a publisher with the given policy.
    pub fn publisher(&self, policy: PublishPolicy) -> Publisher<T> {
        Publisher {
            shared: Arc::clone(&self.shared),
            policy,
        }
    }
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Copy `payload` into the next pool slot and notify subscribers.
    ///
    /// `timeout` bounds the wait of a determined publisher; lazy and
    /// enforcing publishers ignore it.
    pub fn publish(&self, payload: T, timeout: Option<Duration>) -> Result<()> {
        match self.policy {
            PublishPolicy::Lazy => self.shared.publish(payload, true, false, None),
            PublishPolicy::Determined => self.shared.publish(payload, false, false, timeout),
            PublishPolicy::Enforcing => self.shared.publish(payload, false, true, None),
        }
    }

    /// The policy this publisher was created with.
    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }
}
