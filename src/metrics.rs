use metrics::{Counter, Gauge, Histogram};
use std::time::Duration;

use crate::config::LookupResult;

/// Handles for the run's performance counters. Backed by whatever recorder
/// the embedding process installs; without one these are no-ops.
pub struct Metrics {
    pub lookups_succeeded: Counter,
    pub lookups_failed: Counter,
    pub lookup_duration: Histogram,
    pub challenge_retries: Counter,
    pub solver_submissions: Counter,
    pub solver_timeouts: Counter,
    pub session_startup_failures: Counter,
    pub active_tasks: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            lookups_succeeded: Counter::noop(),
            lookups_failed: Counter::noop(),
            lookup_duration: Histogram::noop(),
            challenge_retries: Counter::noop(),
            solver_submissions: Counter::noop(),
            solver_timeouts: Counter::noop(),
            session_startup_failures: Counter::noop(),
            active_tasks: Gauge::noop(),
        }
    }

    pub fn record_lookup(&self, result: &LookupResult) {
        if result.is_success() {
            self.lookups_succeeded.increment(1);
        } else {
            self.lookups_failed.increment(1);
        }
        self.record_duration(result.elapsed);
    }

    pub fn record_duration(&self, elapsed: Duration) {
        self.lookup_duration.record(elapsed.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.challenge_retries.increment(1);
    }

    pub fn record_solver_submission(&self) {
        self.solver_submissions.increment(1);
    }

    pub fn record_solver_timeout(&self) {
        self.solver_timeouts.increment(1);
    }

    pub fn record_session_startup_failure(&self) {
        self.session_startup_failures.increment(1);
    }

    pub fn task_started(&self) {
        self.active_tasks.increment(1.0);
    }

    pub fn task_finished(&self) {
        self.active_tasks.decrement(1.0);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
