//! Per-id in-flight tracking for record mutations.
//!
//! # Responsibility
//! - Linearize mutations that target the same record id.
//! - Let mutations on distinct ids run concurrently.
//!
//! # Invariants
//! - At most one `InFlightPermit` exists per id at any time.
//! - Dropping a permit releases its id, including on error and unwind paths.

use crate::model::todo::TodoId;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// What a call does when its id is already in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Fail immediately with `Busy`.
    #[default]
    Reject,
    /// Queue until the id is released, failing with `Busy` after `timeout`.
    Wait { timeout: Duration },
}

/// Replay guard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayError {
    /// Another mutation on this id is in flight.
    Busy(TodoId),
}

impl Display for ReplayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy(id) => write!(f, "todo {id} has a mutation in flight"),
        }
    }
}

impl Error for ReplayError {}

/// Shared in-flight registry. Wrap in `Arc` to share across dispatchers.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    in_flight: Mutex<HashSet<TodoId>>,
    released: Condvar,
    policy: ContentionPolicy,
}

impl ReplayGuard {
    pub fn new(policy: ContentionPolicy) -> Self {
        Self {
            in_flight: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ContentionPolicy {
        self.policy
    }

    /// Claims `id` according to the configured contention policy.
    pub fn acquire(&self, id: TodoId) -> Result<InFlightPermit<'_>, ReplayError> {
        match self.policy {
            ContentionPolicy::Reject => self.try_acquire(id),
            ContentionPolicy::Wait { timeout } => self.acquire_within(id, timeout),
        }
    }

    /// Claims `id` without waiting.
    pub fn try_acquire(&self, id: TodoId) -> Result<InFlightPermit<'_>, ReplayError> {
        let mut in_flight = self.lock();
        if !in_flight.insert(id) {
            return Err(ReplayError::Busy(id));
        }
        Ok(InFlightPermit { guard: self, id })
    }

    fn acquire_within(
        &self,
        id: TodoId,
        timeout: Duration,
    ) -> Result<InFlightPermit<'_>, ReplayError> {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.lock();
        while in_flight.contains(&id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReplayError::Busy(id));
            }
            in_flight = self
                .released
                .wait_timeout(in_flight, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        in_flight.insert(id);
        Ok(InFlightPermit { guard: self, id })
    }

    pub fn is_in_flight(&self, id: TodoId) -> bool {
        self.lock().contains(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    // A panic while holding the set cannot leave it half-updated: every
    // critical section is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, HashSet<TodoId>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: TodoId) {
        self.lock().remove(&id);
        self.released.notify_all();
    }
}

/// Exclusive claim on one record id; released on drop.
#[derive(Debug)]
#[must_use = "the id is released as soon as the permit is dropped"]
pub struct InFlightPermit<'a> {
    guard: &'a ReplayGuard,
    id: TodoId,
}

impl InFlightPermit<'_> {
    pub fn id(&self) -> TodoId {
        self.id
    }
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::{ContentionPolicy, ReplayError, ReplayGuard};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_id_is_rejected_while_in_flight() {
        let guard = ReplayGuard::new(ContentionPolicy::Reject);
        let permit = guard.acquire(1).expect("first claim succeeds");
        assert_eq!(guard.acquire(1).unwrap_err(), ReplayError::Busy(1));
        assert!(guard.is_in_flight(1));

        drop(permit);
        assert!(!guard.is_in_flight(1));
        assert!(guard.acquire(1).is_ok());
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let guard = ReplayGuard::default();
        let _first = guard.acquire(1).expect("id 1");
        let _second = guard.acquire(2).expect("id 2");
        assert_eq!(guard.in_flight_count(), 2);
    }

    #[test]
    fn wait_policy_times_out_with_busy() {
        let guard = ReplayGuard::new(ContentionPolicy::Wait {
            timeout: Duration::from_millis(20),
        });
        let _held = guard.acquire(9).expect("first claim succeeds");
        assert_eq!(guard.acquire(9).unwrap_err(), ReplayError::Busy(9));
    }

    #[test]
    fn wait_policy_proceeds_once_released() {
        let guard = Arc::new(ReplayGuard::new(ContentionPolicy::Wait {
            timeout: Duration::from_secs(5),
        }));
        let held = guard.acquire(3).expect("first claim succeeds");

        let waiter = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || guard.acquire(3).map(|permit| permit.id()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().expect("waiter thread"), Ok(3));
        assert_eq!(guard.in_flight_count(), 0);
    }

    #[test]
    fn permit_is_released_on_unwind() {
        let guard = Arc::new(ReplayGuard::default());
        let panicking = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let _permit = guard.acquire(4).expect("claim");
                panic!("mutation failed mid-flight");
            })
        };
        assert!(panicking.join().is_err());
        assert!(!guard.is_in_flight(4));
    }
}
