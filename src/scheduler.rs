//! Scheduler and worker pool
//!
//! Owns a fixed number of persistent browser sessions, one per worker, and
//! drives the whole run: identifiers are de-duplicated (preserving first
//! occurrence), split into contiguous shards, and each shard is processed
//! sequentially by its worker through the retry controller. A global
//! admission semaphore bounds how many tasks execute their expensive step at
//! once, independent of the session count.
//!
//! A worker whose session fails to start records a terminal error for every
//! identifier in its shard and stops; the rest of the pool proceeds. The run
//! always returns one result per input position.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::ResultCollector;
use crate::config::{LookupResult, RunConfig};
use crate::error::LookupError;
use crate::metrics::Metrics;
use crate::retry::RetryController;
use crate::session::{Session, SessionFactory};
use crate::solver::SolverClient;

pub struct Scheduler<F: SessionFactory> {
    config: Arc<RunConfig>,
    factory: Arc<F>,
    controller: Arc<RetryController>,
    admission: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl<F> Scheduler<F>
where
    F: SessionFactory + 'static,
{
    /// Construct the scheduler, validating the configuration first. An
    /// invalid configuration is a hard failure surfaced to the caller before
    /// any task starts.
    pub fn new(
        config: RunConfig,
        factory: F,
        solver: SolverClient,
        metrics: Arc<Metrics>,
    ) -> Result<Self, LookupError> {
        config.validate()?;
        let config = Arc::new(config);
        let controller = Arc::new(RetryController::new(
            config.clone(),
            Arc::new(solver),
            metrics.clone(),
        ));
        let admission = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Ok(Self {
            config,
            factory: Arc::new(factory),
            controller,
            admission,
            metrics,
        })
    }

    /// Process every identifier and return one result per input position, in
    /// input order. Returns only after all workers have drained (or the run
    /// was cancelled, in which case unfinished positions carry a terminal
    /// error).
    pub async fn run(
        &self,
        identifiers: Vec<String>,
        cancel: CancellationToken,
    ) -> Vec<LookupResult> {
        let collector = Arc::new(ResultCollector::new(&identifiers));
        let unique = dedup_preserving_order(&identifiers);
        if unique.is_empty() {
            return collector.finalize();
        }

        let worker_count = self.config.worker_count.min(unique.len());
        let shard_size = unique.len().div_ceil(worker_count);
        info!(
            total = identifiers.len(),
            unique = unique.len(),
            workers = worker_count,
            shard_size,
            "starting run"
        );

        let progress = Arc::new(ProgressTracker::new(identifiers.len()));
        let reporter = self.config.progress_interval.map(|interval| {
            let progress = progress.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let snapshot = progress.snapshot();
                    info!(
                        completed = snapshot.completed,
                        total = snapshot.total,
                        errors = snapshot.errors,
                        rate = format!("{:.1}/s", snapshot.rate),
                        "run progress"
                    );
                }
            })
        });

        let deadline_guard = self.config.run_deadline.map(|budget| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(budget) => {
                        warn!(?budget, "run deadline reached, cancelling");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        });

        let mut handles = Vec::with_capacity(worker_count);
        for (worker_id, shard) in unique.chunks(shard_size).enumerate() {
            handles.push(tokio::spawn(run_worker(
                worker_id,
                shard.to_vec(),
                self.factory.clone(),
                self.controller.clone(),
                self.admission.clone(),
                collector.clone(),
                progress.clone(),
                self.metrics.clone(),
                cancel.clone(),
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(guard) = deadline_guard {
            guard.abort();
        }
        if let Some(task) = reporter {
            task.abort();
        }

        info!(
            completed = collector.completed(),
            total = collector.total(),
            "all workers drained"
        );
        collector.finalize()
    }
}

/// One worker: create its session, then drain its shard sequentially,
/// acquiring an admission permit around each task's expensive step.
#[allow(clippy::too_many_arguments)]
async fn run_worker<F>(
    worker_id: usize,
    shard: Vec<String>,
    factory: Arc<F>,
    controller: Arc<RetryController>,
    admission: Arc<Semaphore>,
    collector: Arc<ResultCollector>,
    progress: Arc<ProgressTracker>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) where
    F: SessionFactory,
{
    info!(worker_id, shard_len = shard.len(), "worker started");

    let mut session = match factory.create(worker_id).await {
        Ok(session) => session,
        Err(err) => {
            error!(worker_id, error = %err, "session startup failed, failing whole shard");
            metrics.record_session_startup_failure();
            for identifier in &shard {
                let result = LookupResult::failure(
                    identifier.clone(),
                    LookupError::SessionStartup(err.to_string()),
                    1,
                    Duration::ZERO,
                );
                progress.record(&result);
                collector.record(result);
            }
            return;
        }
    };

    for identifier in &shard {
        if cancel.is_cancelled() {
            debug!(worker_id, "cancelled, skipping remaining shard");
            break;
        }

        let permit = tokio::select! {
            permit = admission.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };

        metrics.task_started();
        let result = controller.process(&mut session, identifier, &cancel).await;
        metrics.task_finished();
        drop(permit);

        metrics.record_lookup(&result);
        progress.record(&result);
        collector.record(result);
    }

    session.shutdown().await;
    info!(worker_id, "worker drained");
}

/// De-duplicate while preserving first-occurrence order. Processing each
/// identifier once is what keeps a single task per identifier in flight; the
/// collector fans the result out to duplicate positions.
pub fn dedup_preserving_order(identifiers: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(identifiers.len());
    identifiers
        .iter()
        .filter(|identifier| seen.insert(identifier.as_str()))
        .cloned()
        .collect()
}

/// Lock-free progress counters shared between workers and the reporter task.
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub rate: f64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, result: &LookupResult) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !result.is_success() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        ProgressSnapshot {
            total: self.total,
            completed,
            errors,
            elapsed,
            rate,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryFields;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let input: Vec<String> = ["b", "a", "b", "c", "a"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(dedup_preserving_order(&input), vec!["b", "a", "c"]);
    }

    #[test]
    fn progress_tracker_counts_completions_and_errors() {
        let tracker = ProgressTracker::new(3);
        assert!(!tracker.is_complete());

        tracker.record(&LookupResult::success(
            "100",
            RegistryFields::default(),
            1,
            Duration::from_millis(5),
        ));
        tracker.record(&LookupResult::failure(
            "200",
            LookupError::CaptchaUnsolvable,
            1,
            Duration::from_millis(5),
        ));
        tracker.record(&LookupResult::success(
            "300",
            RegistryFields::default(),
            1,
            Duration::from_millis(5),
        ));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.errors, 1);
        assert!(tracker.is_complete());
    }
}
