//! Sequential, precondition-checked plan execution.
//!
//! The foreign application is slow to react to programmatic input and is
//! order-sensitive, so execution is deliberately blocking: one action, a
//! settle wait, a verification read, then the next action. A failed action
//! never aborts the remaining plan; partial automation is acceptable,
//! acting on stale state is not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::plan::{ActionPlan, PlannedAction};
use crate::platforms::NativeBackend;
use crate::report::EntryOutcome;

/// Timing knobs for plan execution. Foreign-application responsiveness
/// varies by host load, so none of these are hard-coded.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wait after dispatching a toggle before trusting a re-read.
    pub settle_delay: Duration,
    /// Retries per action after the first attempt.
    pub max_retries: u32,
    /// Base backoff before a retry; grows linearly with each attempt.
    pub retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(150),
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Cooperative cancellation flag, checked between actions only. An
/// in-flight dispatch always finishes its settle/verify sequence so no
/// control is left in an unknown state.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Applies an [`ActionPlan`] one action at a time.
pub struct SafeExecutor<'a> {
    backend: &'a dyn NativeBackend,
    config: &'a ExecutorConfig,
}

impl<'a> SafeExecutor<'a> {
    pub fn new(backend: &'a dyn NativeBackend, config: &'a ExecutorConfig) -> Self {
        Self { backend, config }
    }

    /// Attempt every planned action and return `(entry_index, outcome)` for
    /// each, in plan order. Never returns early: per-action failures are
    /// accumulated, and cancellation marks the remaining actions failed
    /// rather than dropping them from the report.
    #[instrument(skip_all, fields(actions = plan.len()))]
    pub fn execute(&self, plan: &ActionPlan, cancel: &CancelToken) -> Vec<(usize, EntryOutcome)> {
        let mut outcomes = Vec::with_capacity(plan.len());

        for action in plan.actions() {
            if cancel.is_cancelled() {
                info!(entry = action.entry_index, "cycle cancelled, leaving action unattempted");
                outcomes.push((action.entry_index, EntryOutcome::ActionFailed));
                continue;
            }
            let outcome = self.apply_one(action);
            outcomes.push((action.entry_index, outcome));
        }

        outcomes
    }

    /// One action: precondition read, toggle, settle, verify, bounded
    /// retries with growing backoff.
    fn apply_one(&self, action: &PlannedAction) -> EntryOutcome {
        let target = action.target;
        let expected = action.expected_prior_state;
        let desired = !expected;
        let mut dispatched = false;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * attempt;
                debug!(
                    entry = action.entry_index,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying action"
                );
                thread::sleep(backoff);
            }

            let state = match self.backend.read_check_state(target) {
                Ok(state) => state,
                Err(e) => {
                    debug!(
                        entry = action.entry_index,
                        error = %e,
                        "control unreadable before dispatch"
                    );
                    continue;
                }
            };

            if state == desired {
                if dispatched {
                    return EntryOutcome::Applied;
                }
                // Live state moved since the plan was built. Skipping beats
                // toggling a box an operator just set by hand.
                warn!(
                    entry = action.entry_index,
                    expected, live = state, "precondition no longer holds, skipping"
                );
                return EntryOutcome::StalePrecondition;
            }

            if self.backend.toggle(target).is_err() {
                continue;
            }
            dispatched = true;

            thread::sleep(self.config.settle_delay);
            match self.backend.read_check_state(target) {
                Ok(state) if state == desired => return EntryOutcome::Applied,
                Ok(_) => {
                    debug!(entry = action.entry_index, "state did not settle to target");
                }
                Err(e) => {
                    debug!(entry = action.entry_index, error = %e, "verification read failed");
                }
            }
        }

        warn!(
            entry = action.entry_index,
            retries = self.config.max_retries,
            "action did not take effect within retry budget"
        );
        EntryOutcome::ActionFailed
    }
}
