//! [`HostRegistry`]: the collection discovery results are published into.
//!
//! # How the hand-off works (for beginners)
//!
//! Discovery runs on a background thread and finds hosts at network speed.
//! The UI (or any other consumer) wants to react to each host as it arrives,
//! but at its own pace.  The registry sits between them:
//!
//! ```text
//!  discovery thread                      consumer thread
//!  ────────────────                      ───────────────
//!  publish(A) ──► [ slot: A ] ──► consume_latest() = A
//!  publish(B) ──► [ slot: B ] ──► consume_latest() = B
//!  mark_producer_stopped() ─────► consume_latest() = None  (stop polling)
//! ```
//!
//! The slot holds at most one unconsumed record.  A second `publish` waits
//! until the consumer has taken the first one, so no record is ever skipped.
//! [`HostRegistry::publish_until`] bounds that wait for producers that run
//! against a deadline.
//! Every published record is also appended to an ordered list that can be
//! inspected at any time with [`HostRegistry::get`], [`HostRegistry::snapshot`],
//! and friends, whether or not anybody is consuming.
//!
//! All state lives behind one `Mutex` with one `Condvar`.  Waiters are woken
//! with `notify_all` because producer and consumer wait on the same condition
//! variable for different predicates.

use std::net::IpAddr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::host::HostRecord;

#[derive(Debug, Default)]
struct RegistryState {
    hosts: Vec<HostRecord>,
    /// Index into `hosts` of the record waiting in the hand-off slot.
    pending: Option<usize>,
    producer_active: bool,
    /// Number of `mark_producer_stopped` calls since the last reset.
    stop_signals: usize,
}

impl RegistryState {
    fn position(&self, address: IpAddr) -> Option<usize> {
        self.hosts.iter().position(|h| h.key() == address)
    }
}

/// Result of [`HostRegistry::publish_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The record was appended (and placed in the slot if a producer is active).
    Added,
    /// A host with the same address is already present.
    Duplicate,
    /// The slot stayed full until the deadline.  Nothing was appended.
    TimedOut,
}

/// Ordered, duplicate-free list of discovered hosts with a capacity-1
/// blocking relay from one producer to one consumer.
///
/// Duplicate detection uses [`HostRecord::key`] (the host address).
/// The registry never panics: a poisoned lock is recovered, since every
/// mutation leaves the state consistent before any code that could unwind.
#[derive(Debug, Default)]
pub struct HostRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl HostRegistry {
    /// Creates an empty registry with no active producer.
    ///
    /// Until [`reset`](Self::reset) is called, [`consume_latest`](Self::consume_latest)
    /// returns `None` immediately.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, RegistryState>) -> MutexGuard<'a, RegistryState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for<'a>(
        &self,
        guard: MutexGuard<'a, RegistryState>,
        timeout: Duration,
    ) -> MutexGuard<'a, RegistryState> {
        match self.changed.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    // ── Round lifecycle ───────────────────────────────────────────────────────

    /// Starts a new discovery round: clears all records, empties the slot,
    /// and marks the producer active.  Wakes every waiter.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.hosts.clear();
        state.pending = None;
        state.producer_active = true;
        state.stop_signals = 0;
        self.changed.notify_all();
    }

    /// Empties the registry without starting a new round.
    ///
    /// Any producer is treated as stopped, so blocked callers on both sides
    /// return.  The stop-signal counter is left alone.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.hosts.clear();
        state.pending = None;
        state.producer_active = false;
        self.changed.notify_all();
    }

    /// Signals that the producer has finished.
    ///
    /// Empties the slot and wakes all waiters: a blocked
    /// [`consume_latest`](Self::consume_latest) returns `None`, and a blocked
    /// [`publish`](Self::publish) appends its record without refilling the
    /// slot.  Records stay in the list.
    pub fn mark_producer_stopped(&self) {
        let mut state = self.lock();
        state.producer_active = false;
        state.pending = None;
        state.stop_signals += 1;
        self.changed.notify_all();
    }

    /// Returns `true` between [`reset`](Self::reset) and
    /// [`mark_producer_stopped`](Self::mark_producer_stopped).
    pub fn is_producer_active(&self) -> bool {
        self.lock().producer_active
    }

    /// How many times the producer has been marked stopped since the last
    /// reset.  A well-behaved discovery run leaves this at exactly 1.
    pub fn stop_signal_count(&self) -> usize {
        self.lock().stop_signals
    }

    // ── Hand-off ─────────────────────────────────────────────────────────────

    /// Publishes a newly discovered host (producer side).
    ///
    /// Returns `false` without blocking if a host with the same address is
    /// already present.  Otherwise waits until the slot is free (or the
    /// producer is stopped), appends the record, and returns `true`.
    pub fn publish(&self, record: HostRecord) -> bool {
        self.publish_inner(record, None) == PublishOutcome::Added
    }

    /// Like [`publish`](Self::publish), but gives up once `deadline` passes
    /// with the slot still full.
    ///
    /// A duplicate is reported as [`PublishOutcome::Duplicate`] without
    /// waiting.  On [`PublishOutcome::TimedOut`] the record is dropped.
    pub fn publish_until(&self, record: HostRecord, deadline: Instant) -> PublishOutcome {
        self.publish_inner(record, Some(deadline))
    }

    fn publish_inner(&self, record: HostRecord, deadline: Option<Instant>) -> PublishOutcome {
        let mut state = self.lock();
        if state.position(record.key()).is_some() {
            debug!(host = %record, "dropping duplicate discovery result");
            return PublishOutcome::Duplicate;
        }

        while state.pending.is_some() && state.producer_active {
            state = match deadline {
                None => self.wait(state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(host = %record, "hand-off slot still full at deadline");
                        return PublishOutcome::TimedOut;
                    }
                    self.wait_for(state, deadline - now)
                }
            };
        }

        // Someone may have added the same host while we were waiting.
        if state.position(record.key()).is_some() {
            debug!(host = %record, "dropping duplicate discovery result");
            return PublishOutcome::Duplicate;
        }

        state.hosts.push(record);
        if state.producer_active {
            state.pending = Some(state.hosts.len() - 1);
        }
        self.changed.notify_all();
        PublishOutcome::Added
    }

    /// Takes the record waiting in the slot (consumer side).
    ///
    /// Blocks while the slot is empty and the producer is active.  Returns
    /// `None` once the producer has stopped; callers treat that as the end of
    /// the stream.
    pub fn consume_latest(&self) -> Option<HostRecord> {
        let mut state = self.lock();
        while state.pending.is_none() && state.producer_active {
            state = self.wait(state);
        }

        let index = state.pending.take()?;
        self.changed.notify_all();
        state.hosts.get(index).cloned()
    }

    // ── Non-blocking access ──────────────────────────────────────────────────

    /// Appends `record` without touching the hand-off slot.
    ///
    /// Returns `false` if a host with the same address is already present.
    pub fn bulk_add(&self, record: HostRecord) -> bool {
        let mut state = self.lock();
        if state.position(record.key()).is_some() {
            return false;
        }
        state.hosts.push(record);
        true
    }

    pub fn get(&self, index: usize) -> Option<HostRecord> {
        self.lock().hosts.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().hosts.is_empty()
    }

    /// Returns `true` if a host with the same identity key is present.
    pub fn contains(&self, record: &HostRecord) -> bool {
        self.contains_address(record.key())
    }

    pub fn contains_address(&self, address: IpAddr) -> bool {
        self.lock().position(address).is_some()
    }

    /// Looks a host up by address.
    pub fn find(&self, address: IpAddr) -> Option<HostRecord> {
        let state = self.lock();
        state.position(address).map(|i| state.hosts[i].clone())
    }

    /// Updates the pairing flag of the host at `address` in place.
    ///
    /// Returns `false` if no such host is known.
    pub fn set_paired(&self, address: IpAddr, paired: bool) -> bool {
        let mut state = self.lock();
        match state.position(address) {
            Some(i) => {
                let updated = state.hosts[i].with_paired(paired);
                state.hosts[i] = updated;
                true
            }
            None => false,
        }
    }

    /// Copy of every record, in insertion order.
    pub fn snapshot(&self) -> Vec<HostRecord> {
        self.lock().hosts.clone()
    }

    /// Copy of every record whose `paired` flag is set.
    pub fn paired_hosts(&self) -> Vec<HostRecord> {
        self.lock()
            .hosts
            .iter()
            .filter(|h| h.paired)
            .cloned()
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
