// ============================================================================
// Fairness Controller
// ============================================================================
//
// Starvation avoidance in front of the commit protocol.
//
// Per writer:
// ```text
// Running ──N consecutive conflicts──> Starving ──acquire indicator──>
//     CommittingWhileStarving ──commit──> Running (indicator released)
// ```
//
// While the starve indicator is held, other writers park right before taking
// their locks. Releasing the indicator hands it to the oldest waiting starving
// writer, or, with none queued, wakes every parked writer.
//
// The indicator is read with relaxed loads: it only shapes scheduling. Data
// correctness comes from the commit protocol alone.
//
// ============================================================================

use crate::config::StmConfig;
use crate::stats::Counters;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct StarveState {
    /// Ticket of the thread holding the indicator
    holder: Option<u64>,

    /// Starving threads waiting for a handoff, oldest first
    queue: VecDeque<u64>,

    next_ticket: u64,
}

/// What a writer should do right before locking its write set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,

    /// The writer parked behind a starving thread and must restart with a
    /// fresh snapshot.
    Parked,
}

pub struct FairnessController {
    starving: AtomicBool,
    state: Mutex<StarveState>,
    wakeup: Condvar,
    starvation_threshold: u32,
    starvation_warn_attempts: u32,
    backoff_spin_limit: u32,
    park_timeout: Duration,
    counters: Arc<Counters>,
}

impl FairnessController {
    pub(crate) fn new(config: &StmConfig, counters: Arc<Counters>) -> Self {
        Self {
            starving: AtomicBool::new(false),
            state: Mutex::new(StarveState::default()),
            wakeup: Condvar::new(),
            starvation_threshold: config.starvation_threshold,
            starvation_warn_attempts: config.starvation_warn_attempts,
            backoff_spin_limit: config.backoff_spin_limit,
            park_timeout: config.park_timeout,
            counters,
        }
    }

    /// True while some thread holds the starve indicator.
    pub fn is_starving(&self) -> bool {
        self.starving.load(Ordering::Relaxed)
    }

    /// Number of starving threads queued behind the current holder.
    pub fn queued(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Fresh per-invocation accounting for one `read_write` call.
    pub fn attempts(&self) -> Attempts<'_> {
        Attempts {
            controller: self,
            consecutive_conflicts: 0,
            total_conflicts: 0,
            read_conflicts: 0,
            indicator: None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StarveState> {
        // The state is updated in single assignments; a panic elsewhere
        // cannot leave it half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the starve indicator, queueing FIFO behind the current holder.
    ///
    /// Blocks until the indicator is handed over.
    pub fn acquire_indicator(&self) -> StarveGuard<'_> {
        let mut state = self.lock_state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        if state.holder.is_none() && state.queue.is_empty() {
            state.holder = Some(ticket);
            self.starving.store(true, Ordering::Relaxed);
            return StarveGuard {
                controller: self,
                ticket,
            };
        }

        state.queue.push_back(ticket);
        log::debug!(
            "starving writer {} queued behind {:?} ({} waiting)",
            ticket,
            state.holder,
            state.queue.len()
        );
        while state.holder != Some(ticket) {
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        StarveGuard {
            controller: self,
            ticket,
        }
    }

    fn release(&self, ticket: u64) {
        let mut state = self.lock_state();
        debug_assert_eq!(state.holder, Some(ticket));

        match state.queue.pop_front() {
            Some(next) => {
                log::debug!("starve indicator handed from {} to {}", ticket, next);
                state.holder = Some(next);
            }
            None => {
                state.holder = None;
                self.starving.store(false, Ordering::Relaxed);
            }
        }

        drop(state);
        self.wakeup.notify_all();
    }

    /// Gate run by a writer right before lock acquisition.
    pub fn admit(&self, attempts: &Attempts<'_>) -> Admission {
        if attempts.indicator.is_some() || !self.is_starving() {
            return Admission::Proceed;
        }

        Counters::bump(&self.counters.parks);
        let state = self.lock_state();
        let (_state, timeout) = self
            .wakeup
            .wait_timeout_while(state, self.park_timeout, |state| state.holder.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timeout.timed_out() {
            log::trace!("parked writer timed out after {:?}", self.park_timeout);
        }

        Admission::Parked
    }

    fn backoff(&self, consecutive: u32) {
        if self.backoff_spin_limit == 0 {
            return;
        }

        let spins = 1u32
            .checked_shl(consecutive.min(31))
            .unwrap_or(u32::MAX)
            .min(self.backoff_spin_limit);
        for _ in 0..spins {
            std::hint::spin_loop();
        }
        if spins == self.backoff_spin_limit {
            std::thread::yield_now();
        }
    }
}

/// Starvation bookkeeping for one `read_write` invocation across its retries.
///
/// Dropping it releases the starve indicator if it is held.
pub struct Attempts<'c> {
    controller: &'c FairnessController,
    consecutive_conflicts: u32,
    total_conflicts: u32,
    /// Failed validations of attempts that wrote nothing
    read_conflicts: u32,
    indicator: Option<StarveGuard<'c>>,
}

impl<'c> Attempts<'c> {
    pub fn is_starving(&self) -> bool {
        self.indicator.is_some()
    }

    pub fn consecutive_conflicts(&self) -> u32 {
        self.consecutive_conflicts
    }

    /// Account for an attempt that conflicted in its body or its commit,
    /// then back off.
    ///
    /// The write set of an attempt cut short in its body is unknown, so it
    /// counts whether or not it had written yet. Crossing the threshold makes
    /// this invocation starving; that may block until the indicator is
    /// handed over.
    pub fn record_conflict(&mut self) {
        let controller = self.controller;
        self.consecutive_conflicts = self.consecutive_conflicts.saturating_add(1);
        self.total_conflicts = self.total_conflicts.saturating_add(1);

        if self.total_conflicts == controller.starvation_warn_attempts {
            log::warn!(
                "writer has failed {} attempts (starving: {})",
                self.total_conflicts,
                self.indicator.is_some()
            );
        }

        if self.indicator.is_some() {
            std::hint::spin_loop();
            return;
        }

        if self.consecutive_conflicts >= controller.starvation_threshold {
            Counters::bump(&controller.counters.starvation_episodes);
            log::debug!(
                "writer starving after {} consecutive conflicts",
                self.consecutive_conflicts
            );
            self.indicator = Some(controller.acquire_indicator());
            return;
        }

        controller.backoff(self.consecutive_conflicts);
    }

    /// Back off after a completed attempt with an empty write set failed
    /// validation. Stays out of starvation accounting.
    pub fn record_read_conflict(&mut self) {
        self.read_conflicts = self.read_conflicts.saturating_add(1);
        self.controller.backoff(self.read_conflicts);
    }

    /// Leave the starving state after a successful commit.
    pub fn finish(&mut self) {
        if let Some(guard) = self.indicator.take() {
            log::debug!(
                "starving writer committed after {} conflicts",
                self.total_conflicts
            );
            drop(guard);
        }
        self.consecutive_conflicts = 0;
        self.read_conflicts = 0;
    }
}

/// Exclusive hold on the starve indicator, released on drop.
pub struct StarveGuard<'c> {
    controller: &'c FairnessController,
    ticket: u64,
}

impl StarveGuard<'_> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for StarveGuard<'_> {
    fn drop(&mut self) {
        self.controller.release(self.ticket);
    }
}
