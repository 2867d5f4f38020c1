//! Retry controller
//!
//! Drives one identifier through the end-to-end query and decides whether a
//! failed attempt is worth repeating. Only challenge-service flakiness is
//! retried; page and site failures are terminal on first occurrence. The
//! controller never touches shared result storage.

use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{LookupResult, RegistryFields, RunConfig, Task};
use crate::error::LookupError;
use crate::metrics::Metrics;
use crate::session::Session;
use crate::solver::SolverClient;

pub struct RetryController {
    config: Arc<RunConfig>,
    solver: Arc<SolverClient>,
    metrics: Arc<Metrics>,
}

impl RetryController {
    pub fn new(config: Arc<RunConfig>, solver: Arc<SolverClient>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            solver,
            metrics,
        }
    }

    /// Process one identifier to a terminal [`LookupResult`].
    ///
    /// Attempts run strictly sequentially, separated by `retry_delay`. The
    /// whole call is bounded by `per_task_timeout`; expiry terminates the
    /// current attempt and is never retried.
    pub async fn process<S: Session>(
        &self,
        session: &mut S,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> LookupResult {
        let start = Instant::now();
        let deadline = start + self.config.per_task_timeout;
        let mut task = Task::first(identifier);

        loop {
            if cancel.is_cancelled() {
                return LookupResult::failure(
                    identifier,
                    LookupError::Cancelled,
                    task.attempt,
                    start.elapsed(),
                );
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = if remaining.is_zero() {
                Err(LookupError::TaskTimeout(self.config.per_task_timeout))
            } else {
                tokio::select! {
                    attempt = timeout(remaining, self.run_attempt(session, &task, cancel)) => {
                        attempt.unwrap_or(Err(LookupError::TaskTimeout(
                            self.config.per_task_timeout,
                        )))
                    }
                    _ = cancel.cancelled() => Err(LookupError::Cancelled),
                }
            };

            match outcome {
                Ok(fields) => {
                    debug!(identifier, attempt = task.attempt, "lookup succeeded");
                    return LookupResult::success(identifier, fields, task.attempt, start.elapsed());
                }
                Err(error) if error.is_retryable() && task.attempt < self.config.max_retries => {
                    warn!(
                        identifier,
                        attempt = task.attempt,
                        error = %error,
                        "transient challenge failure, retrying"
                    );
                    self.metrics.record_retry();
                    if matches!(error, LookupError::CaptchaPollTimeout { .. }) {
                        self.metrics.record_solver_timeout();
                    }
                    tokio::select! {
                        _ = sleep(self.config.retry_delay) => {}
                        _ = cancel.cancelled() => {
                            return LookupResult::failure(
                                identifier,
                                LookupError::Cancelled,
                                task.attempt,
                                start.elapsed(),
                            );
                        }
                    }
                    task = task.next();
                }
                Err(error) if error.is_retryable() => {
                    // Still transient after the last allowed attempt.
                    if matches!(error, LookupError::CaptchaPollTimeout { .. }) {
                        self.metrics.record_solver_timeout();
                    }
                    return LookupResult::failure(
                        identifier,
                        LookupError::CaptchaExhausted {
                            attempts: task.attempt,
                        },
                        task.attempt,
                        start.elapsed(),
                    );
                }
                Err(error) => {
                    return LookupResult::failure(identifier, error, task.attempt, start.elapsed());
                }
            }
        }
    }

    /// One end-to-end query attempt, delegating page work to the session and
    /// challenge solving to the client.
    async fn run_attempt<S: Session>(
        &self,
        session: &mut S,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<RegistryFields, LookupError> {
        let selectors = &self.config.selectors;

        session
            .navigate(&self.config.base_url, self.config.navigation_timeout)
            .await?;
        session
            .wait_visible(&selectors.identifier_input, self.config.selector_timeout)
            .await?;
        session
            .set_value(&selectors.identifier_input, &task.identifier)
            .await?;

        if let Some(artifact) = session.capture_challenge(&selectors.challenge).await? {
            debug!(
                identifier = %task.identifier,
                attempt = task.attempt,
                "challenge detected, delegating to solver"
            );
            self.metrics.record_solver_submission();
            let token = self.solver.solve(&artifact, cancel).await?;
            session.set_value(&selectors.challenge.input, &token).await?;
        }

        session.click(&selectors.submit_button).await?;

        if let Some(message) = session.extract_text(&selectors.error_summary).await? {
            return Err(LookupError::SiteValidation(message));
        }

        session
            .extract_fields(&selectors.fields)
            .await?
            .ok_or_else(|| LookupError::Extraction("result fields not present".into()))
    }
}
