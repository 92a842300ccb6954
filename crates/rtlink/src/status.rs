// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status and error taxonomy shared across the middleware.
//!
//! Every fallible operation returns [`Status`] through the crate-wide
//! [`Result`] alias. The taxonomy is flat: timing violations, barrier
//! conditions and ownership conflicts are ordinary values an application
//! inspects and reacts to, not panics.

use core::fmt;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Status>;

/// Non-`Ok` outcome of a middleware operation.
///
/// Timing violations (`DeadlineViolation`, `JitterViolation`,
/// `RateViolation`) are recoverable by design: they are reported to the
/// affected endpoint and its recovery callback, never escalated by the
/// library itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    // ========================================================================
    // Timing violations
    // ========================================================================
    /// Message or response latency exceeded the configured deadline.
    DeadlineViolation,
    /// Latency left the jitter window established by prior samples.
    JitterViolation,
    /// Expected publish rate was not met.
    RateViolation,

    // ========================================================================
    // Synchronization
    // ========================================================================
    /// Barrier not complete yet; other members are still pending.
    SyncPending,
    /// A barrier member failed; the whole group is aborted.
    SyncError,
    /// Event mask contains flags reserved for kernel control events.
    InvalidEventMask,

    // ========================================================================
    // Publish/subscribe
    // ========================================================================
    /// Topic identifier already registered.
    TopicDuplicate,
    /// Lazy publish found the topic lock contended.
    PublishLocked,
    /// Next pool slot still holds unconsumed hard-real-time credits.
    PublishBlocked,
    /// Blocking publish gave up before a slot credit was released.
    PublishTimeout,
    /// Subscriber has consumed everything the topic holds.
    NoMessage,

    // ========================================================================
    // Remote procedure calls
    // ========================================================================
    /// Service identifier already registered.
    ServiceDuplicate,
    /// Caller does not own the request slot in its current state.
    RequestBadOwner,
    /// Request slot is held by another party.
    RequestLocked,
    /// Response not available yet.
    RequestPending,
    /// Request was re-submitted after the worker took the earlier submission.
    RequestObsolete,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlineViolation => write!(f, "deadline violated"),
            Self::JitterViolation => write!(f, "jitter window violated"),
            Self::RateViolation => write!(f, "expected rate violated"),
            Self::SyncPending => write!(f, "synchronization pending"),
            Self::SyncError => write!(f, "synchronization failed"),
            Self::InvalidEventMask => write!(f, "event mask overlaps reserved control flags"),
            Self::TopicDuplicate => write!(f, "topic id already registered"),
            Self::PublishLocked => write!(f, "topic lock contended"),
            Self::PublishBlocked => write!(f, "pool slot blocked by hard-real-time consumer"),
            Self::PublishTimeout => write!(f, "publish timed out waiting for a pool slot"),
            Self::NoMessage => write!(f, "no unconsumed message available"),
            Self::ServiceDuplicate => write!(f, "service id already registered"),
            Self::RequestBadOwner => write!(f, "request not owned by caller"),
            Self::RequestLocked => write!(f, "request held by another owner"),
            Self::RequestPending => write!(f, "response not available yet"),
            Self::RequestObsolete => write!(f, "request was superseded by a newer submission"),
        }
    }
}

impl std::error::Error for Status {}

impl Status {
    /// True for the three timing-violation statuses.
    pub fn is_timing_violation(self) -> bool {
        matches!(
            self,
            Self::DeadlineViolation | Self::JitterViolation | Self::RateViolation
        )
    }
}

/// Real-time class of an endpoint, in increasing order of strength.
///
/// The class decides how timing constraints are checked and enforced:
///
/// | Class | Contract |
/// |-------|----------|
/// | `BestEffort` | none; data may be arbitrarily stale or skipped |
/// | `Soft` | usefulness degrades with age, misses are tolerated |
/// | `Firm` | violations are detected at consumption and reported |
/// | `Hard` | violations are detected by an independent timer |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RtClass {
    /// No timing contract.
    BestEffort,
    /// Soft real-time: value decays with message age.
    Soft,
    /// Firm real-time: detect and recover at consumption time.
    Firm,
    /// Hard real-time: supervised by an armed timer.
    Hard,
}

impl RtClass {
    /// True for classes that carry explicit deadline/jitter/rate bounds.
    pub fn has_qos_bounds(self) -> bool {
        matches!(self, Self::Firm | Self::Hard)
    }
}

impl fmt::Display for RtClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestEffort => write!(f, "best-effort"),
            Self::Soft => write!(f, "soft"),
            Self::Firm => write!(f, "firm"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ordering_matches_strength() {
        assert!(RtClass::BestEffort < RtClass::Soft);
        assert!(RtClass::Soft < RtClass::Firm);
        assert!(RtClass::Firm < RtClass::Hard);
    }

    #[test]
    fn timing_violation_predicate() {
        assert!(Status::DeadlineViolation.is_timing_violation());
        assert!(Status::JitterViolation.is_timing_violation());
        assert!(Status::RateViolation.is_timing_violation());
        assert!(!Status::NoMessage.is_timing_violation());
        assert!(!Status::SyncPending.is_timing_violation());
    }

    #[test]
    fn qos_bounds_only_on_firm_and_hard() {
        assert!(!RtClass::BestEffort.has_qos_bounds());
        assert!(!RtClass::Soft.has_qos_bounds());
        assert!(RtClass::Firm.has_qos_bounds());
        assert!(RtClass::Hard.has_qos_bounds());
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(Status::NoMessage.to_string(), "no unconsumed message available");
        assert_eq!(RtClass::Hard.to_string(), "hard");
    }
}
