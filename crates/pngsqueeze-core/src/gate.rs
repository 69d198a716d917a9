//! Concurrency gate bounding simultaneous tool invocations.
//!
//! The gate is an owned counting semaphore handed to the pipeline at construction.
//! A [`ConcurrencySlot`] is an RAII lease: dropping it (on success, failure, timeout,
//! or task cancellation) returns the permit.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{CompressionFailure, CompressionResult};

const REJECT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Behaviour when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Wait up to the deadline for a slot, then fail with overload.
    QueueWithDeadline(Duration),
    /// Fail with overload immediately.
    RejectImmediately,
}

impl AdmissionPolicy {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueWithDeadline(_) => "queue",
            Self::RejectImmediately => "reject",
        }
    }

    const fn retry_after(self) -> Duration {
        match self {
            Self::QueueWithDeadline(deadline) => deadline,
            Self::RejectImmediately => REJECT_RETRY_AFTER,
        }
    }
}

/// Bounded pool of subprocess slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    capacity: usize,
    policy: AdmissionPolicy,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize, policy: AdmissionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: Arc::new(AtomicUsize::new(0)),
            capacity,
            policy,
        }
    }

    /// Total slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured admission policy.
    #[must_use]
    pub const fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Slots currently leased.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Callers currently queued for a slot.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Lease a slot according to the admission policy.
    ///
    /// # Errors
    ///
    /// Returns [`CompressionFailure::Overload`] when no slot is free (reject policy) or none
    /// frees up before the deadline (queue policy).
    pub async fn admit(&self) -> CompressionResult<ConcurrencySlot> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(ConcurrencySlot { _permit: permit });
        }

        let deadline = match self.policy {
            AdmissionPolicy::RejectImmediately => return Err(self.overload()),
            AdmissionPolicy::QueueWithDeadline(deadline) => deadline,
        };

        let _waiting = WaitingGuard::enter(&self.waiting);
        debug!(
            waiting = self.waiting(),
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "queued for compression slot"
        );
        match tokio::time::timeout(deadline, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(ConcurrencySlot { _permit: permit }),
            Ok(Err(_)) | Err(_) => Err(self.overload()),
        }
    }

    fn overload(&self) -> CompressionFailure {
        CompressionFailure::Overload {
            policy: self.policy,
            retry_after: self.policy.retry_after(),
        }
    }
}

/// Exclusive lease permitting one subprocess invocation.
#[must_use]
#[derive(Debug)]
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencySlot {
    /// Return the slot to the gate.
    pub fn release(self) {
        drop(self);
    }
}

struct WaitingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
