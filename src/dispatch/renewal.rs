//! Single-flight renewal bookkeeping.
//!
//! `RenewalState` lives behind a mutex owned by one dispatcher. The
//! check-then-set in [`RenewalState::admit`] and the flush in
//! [`RenewalState::settle`] each run under that lock with no `.await` in
//! between, which is what keeps a single renewal in flight on a
//! multi-threaded runtime.

use crate::errors::RenewalError;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

pub(crate) type RenewalResult = Result<SecretString, RenewalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalPhase {
    /// No renewal in progress.
    Idle,
    /// One renewal call in flight; other 401s wait in the queue.
    Renewing,
}

/// How a request that received a 401 proceeds.
#[derive(Debug)]
pub(crate) enum Admission {
    /// Starts the renewal and must settle it.
    Leader,
    /// Waits for the in-flight renewal.
    Queued {
        ticket: u64,
        resume: oneshot::Receiver<RenewalResult>,
    },
    /// The store already holds a newer token than the one that was rejected.
    Current(SecretString),
    /// The session was cleared after the request was sent.
    SessionEnded,
}

/// A request parked until the in-flight renewal settles.
#[derive(Debug)]
struct PendingRenewal {
    ticket: u64,
    resume: oneshot::Sender<RenewalResult>,
}

#[derive(Debug, Default)]
pub(crate) struct RenewalState {
    refreshing: bool,
    queue: VecDeque<PendingRenewal>,
    next_ticket: u64,
    renewals_started: u64,
}

impl RenewalState {
    pub fn phase(&self) -> RenewalPhase {
        if self.refreshing {
            RenewalPhase::Renewing
        } else {
            RenewalPhase::Idle
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn renewals_started(&self) -> u64 {
        self.renewals_started
    }

    /// Idle becomes Renewing with the caller as leader; otherwise the caller is queued.
    pub fn admit(&mut self) -> Admission {
        if self.refreshing {
            let (resume_tx, resume_rx) = oneshot::channel();
            let ticket = self.next_ticket;
            self.next_ticket += 1;
            self.queue.push_back(PendingRenewal {
                ticket,
                resume: resume_tx,
            });
            Admission::Queued {
                ticket,
                resume: resume_rx,
            }
        } else {
            self.refreshing = true;
            self.renewals_started += 1;
            Admission::Leader
        }
    }

    /// Back to Idle, resuming every queued request in FIFO order with the
    /// same outcome. Returns the tickets in the order they were resumed.
    pub fn settle(&mut self, outcome: &RenewalResult) -> Vec<u64> {
        self.refreshing = false;
        self.queue
            .drain(..)
            .map(|pending| {
                if pending.resume.send(outcome.clone()).is_err() {
                    tracing::debug!(
                        ticket = pending.ticket,
                        "Queued request was dropped before the renewal settled"
                    );
                }
                pending.ticket
            })
            .collect()
    }
}

pub(crate) fn lock_state(state: &Mutex<RenewalState>) -> MutexGuard<'_, RenewalState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held by the renewal leader while the refresh call is in flight.
///
/// If the leader's future is dropped before it settles, the queue is
/// rejected with [`RenewalError::Abandoned`] and the state returns to Idle.
pub(crate) struct LeaderGuard<'a> {
    state: &'a Mutex<RenewalState>,
    settled: bool,
}

impl<'a> LeaderGuard<'a> {
    pub fn new(state: &'a Mutex<RenewalState>) -> Self {
        Self {
            state,
            settled: false,
        }
    }

    /// Hands the locked state to the leader for settling.
    pub fn finish(mut self) -> MutexGuard<'a, RenewalState> {
        self.settled = true;
        lock_state(self.state)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let rejected = lock_state(self.state).settle(&Err(RenewalError::Abandoned));
        tracing::warn!(
            queued = rejected.len(),
            "Token renewal abandoned before completion"
        );
    }
}
