//! Integration tests for the scheduler and retry controller using a
//! scripted in-memory session. Challenge capture always reports no
//! challenge, so the solver client is never exercised here.

use async_trait::async_trait;
use registry_lookup::{
    ChallengeArtifact, ChallengeProbe, FieldSchema, LookupError, LookupResult, Metrics,
    RegistryFields, RunConfig, Scheduler, Session, SessionFactory, SolverClient, SolverConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared script: per identifier, one outcome per attempt, consumed in order.
#[derive(Default)]
struct Script {
    outcomes: Mutex<HashMap<String, VecDeque<Result<RegistryFields, LookupError>>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    navigate_delay: Duration,
}

impl Script {
    fn with_outcomes(
        entries: Vec<(&str, Vec<Result<RegistryFields, LookupError>>)>,
    ) -> Arc<Self> {
        let mut outcomes = HashMap::new();
        for (identifier, attempts) in entries {
            outcomes.insert(identifier.to_string(), attempts.into_iter().collect());
        }
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            ..Default::default()
        })
    }
}

fn fields(status: &str) -> RegistryFields {
    RegistryFields {
        first_surname: "GOMEZ".into(),
        second_surname: "PEREZ".into(),
        first_name: "ANA".into(),
        other_names: String::new(),
        status: status.into(),
    }
}

struct MockSession {
    script: Arc<Script>,
    current: Option<String>,
}

#[async_trait]
impl Session for MockSession {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), LookupError> {
        let active = self.script.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.script.navigate_delay.is_zero() {
            tokio::time::sleep(self.script.navigate_delay).await;
        }
        Ok(())
    }

    async fn wait_visible(
        &mut self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), LookupError> {
        Ok(())
    }

    async fn set_value(&mut self, _selector: &str, text: &str) -> Result<(), LookupError> {
        self.current = Some(text.to_string());
        Ok(())
    }

    async fn click(&mut self, _selector: &str) -> Result<(), LookupError> {
        Ok(())
    }

    async fn extract_text(&mut self, _selector: &str) -> Result<Option<String>, LookupError> {
        Ok(None)
    }

    async fn extract_fields(
        &mut self,
        _schema: &FieldSchema,
    ) -> Result<Option<RegistryFields>, LookupError> {
        self.script.active.fetch_sub(1, Ordering::SeqCst);
        let identifier = self.current.clone().expect("set_value not called");
        let outcome = self
            .script
            .outcomes
            .lock()
            .unwrap()
            .get_mut(&identifier)
            .and_then(|attempts| attempts.pop_front())
            .unwrap_or_else(|| panic!("no scripted outcome left for {identifier}"));
        outcome.map(Some)
    }

    async fn capture_challenge(
        &mut self,
        _probe: &ChallengeProbe,
    ) -> Result<Option<ChallengeArtifact>, LookupError> {
        Ok(None)
    }
}

struct MockFactory {
    script: Arc<Script>,
    fail_worker: Option<usize>,
}

#[async_trait]
impl SessionFactory for MockFactory {
    type Session = MockSession;

    async fn create(&self, worker_id: usize) -> Result<MockSession, LookupError> {
        if self.fail_worker == Some(worker_id) {
            return Err(LookupError::SessionStartup("launch failed".into()));
        }
        Ok(MockSession {
            script: self.script.clone(),
            current: None,
        })
    }
}

fn test_config(workers: usize) -> RunConfig {
    let mut config = RunConfig::default();
    config.worker_count = workers;
    config.max_concurrent_tasks = workers.max(1) * 2;
    config.retry_delay = Duration::from_millis(10);
    config
}

fn build_scheduler(config: RunConfig, script: Arc<Script>) -> Scheduler<MockFactory> {
    build_scheduler_with(config, script, None)
}

fn build_scheduler_with(
    config: RunConfig,
    script: Arc<Script>,
    fail_worker: Option<usize>,
) -> Scheduler<MockFactory> {
    let factory = MockFactory {
        script,
        fail_worker,
    };
    let solver = SolverClient::new(SolverConfig::default());
    Scheduler::new(config, factory, solver, Arc::new(Metrics::new())).unwrap()
}

fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn results_come_back_in_input_order() {
    let script = Script::with_outcomes(vec![
        ("100", vec![Ok(fields("REGISTRO ACTIVO"))]),
        ("200", vec![Err(LookupError::CaptchaUnsolvable)]),
        ("300", vec![Ok(fields("CANCELADO"))]),
    ]);
    let scheduler = build_scheduler(test_config(2), script);

    let results = scheduler
        .run(ids(&["100", "200", "300"]), CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].identifier, "100");
    assert!(results[0].is_success());
    assert_eq!(results[1].identifier, "200");
    assert_eq!(results[1].error, Some(LookupError::CaptchaUnsolvable));
    assert_eq!(results[2].identifier, "300");
    assert_eq!(
        results[2].fields.as_ref().unwrap().status,
        "CANCELADO"
    );
}

#[tokio::test]
async fn duplicate_identifiers_share_one_lookup() {
    // Only one scripted attempt exists for "100"; a second lookup would
    // panic on an exhausted script.
    let script = Script::with_outcomes(vec![
        ("100", vec![Ok(fields("REGISTRO ACTIVO"))]),
        ("200", vec![Ok(fields("REGISTRO ACTIVO"))]),
    ]);
    let scheduler = build_scheduler(test_config(2), script);

    let results = scheduler
        .run(ids(&["100", "200", "100"]), CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].identifier, "100");
    assert_eq!(results[2].identifier, "100");
    assert_eq!(results[0], results[2]);
}

#[tokio::test]
async fn mixed_batch_retries_only_the_flaky_identifier() {
    let mut config = test_config(2);
    config.max_retries = 2;
    let script = Script::with_outcomes(vec![
        ("100", vec![Ok(fields("REGISTRO ACTIVO"))]),
        (
            "200",
            vec![
                Err(LookupError::CaptchaSubmit("service busy".into())),
                Ok(fields("REGISTRO ACTIVO")),
            ],
        ),
        ("300", vec![Ok(fields("REGISTRO ACTIVO"))]),
    ]);
    let scheduler = build_scheduler(config, script);

    let results = scheduler
        .run(ids(&["100", "200", "300"]), CancellationToken::new())
        .await;

    let summary: Vec<(bool, u32)> = results
        .iter()
        .map(|r| (r.is_success(), r.attempts))
        .collect();
    assert_eq!(summary, vec![(true, 1), (true, 2), (true, 1)]);
}

#[tokio::test]
async fn transient_challenge_failure_is_retried() {
    let script = Script::with_outcomes(vec![(
        "100",
        vec![
            Err(LookupError::CaptchaSubmit("service busy".into())),
            Ok(fields("REGISTRO ACTIVO")),
        ],
    )]);
    let scheduler = build_scheduler(test_config(1), script);

    let results = scheduler
        .run(ids(&["100"]), CancellationToken::new())
        .await;

    assert!(results[0].is_success());
    assert_eq!(results[0].attempts, 2);
}

#[tokio::test]
async fn page_failures_are_terminal_on_first_attempt() {
    let script = Script::with_outcomes(vec![(
        "100",
        vec![Err(LookupError::SelectorTimeout {
            selector: "#numNit".into(),
            timeout: Duration::from_secs(30),
        })],
    )]);
    let scheduler = build_scheduler(test_config(1), script);

    let results = scheduler
        .run(ids(&["100"]), CancellationToken::new())
        .await;

    assert_eq!(results[0].attempts, 1);
    assert!(matches!(
        results[0].error,
        Some(LookupError::SelectorTimeout { .. })
    ));
}

#[tokio::test]
async fn attempts_exhaust_into_a_terminal_error() {
    let mut config = test_config(1);
    config.max_retries = 2;
    let script = Script::with_outcomes(vec![(
        "100",
        vec![
            Err(LookupError::CaptchaSubmit("busy".into())),
            Err(LookupError::CaptchaPollTimeout { polls: 30 }),
        ],
    )]);
    let scheduler = build_scheduler(config, script);

    let results = scheduler
        .run(ids(&["100"]), CancellationToken::new())
        .await;

    assert_eq!(results[0].attempts, 2);
    assert_eq!(
        results[0].error,
        Some(LookupError::CaptchaExhausted { attempts: 2 })
    );
}

#[tokio::test]
async fn session_startup_failure_fails_only_its_shard() {
    // Two workers over four identifiers: worker 0 owns the first two.
    let script = Script::with_outcomes(vec![
        ("300", vec![Ok(fields("REGISTRO ACTIVO"))]),
        ("400", vec![Ok(fields("REGISTRO ACTIVO"))]),
    ]);
    let scheduler = build_scheduler_with(test_config(2), script, Some(0));

    let results = scheduler
        .run(ids(&["100", "200", "300", "400"]), CancellationToken::new())
        .await;

    for result in &results[..2] {
        assert!(matches!(
            result.error,
            Some(LookupError::SessionStartup(_))
        ));
        assert_eq!(result.attempts, 1);
    }
    assert!(results[2].is_success());
    assert!(results[3].is_success());
}

#[tokio::test]
async fn concurrency_stays_within_the_admission_bound() {
    let identifiers: Vec<String> = (0..12).map(|n| format!("{}", 100 + n)).collect();
    let mut outcomes = HashMap::new();
    for identifier in &identifiers {
        let mut attempts: VecDeque<Result<RegistryFields, LookupError>> = VecDeque::new();
        attempts.push_back(Ok(fields("REGISTRO ACTIVO")));
        outcomes.insert(identifier.clone(), attempts);
    }
    let script = Arc::new(Script {
        outcomes: Mutex::new(outcomes),
        navigate_delay: Duration::from_millis(20),
        ..Default::default()
    });

    let mut config = test_config(4);
    config.max_concurrent_tasks = 4;
    let scheduler = build_scheduler(config, script.clone());

    let results = scheduler.run(identifiers, CancellationToken::new()).await;

    assert!(results.iter().all(LookupResult::is_success));
    assert!(script.max_active.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn per_task_timeout_terminates_a_stuck_attempt() {
    let script = Arc::new(Script {
        outcomes: Mutex::new(HashMap::new()),
        navigate_delay: Duration::from_secs(30),
        ..Default::default()
    });

    let mut config = test_config(1);
    config.per_task_timeout = Duration::from_millis(50);
    let scheduler = build_scheduler(config, script);

    let results = scheduler
        .run(ids(&["100"]), CancellationToken::new())
        .await;

    assert_eq!(results[0].attempts, 1);
    assert!(matches!(
        results[0].error,
        Some(LookupError::TaskTimeout(_))
    ));
}

#[tokio::test]
async fn cancelled_run_fills_remaining_positions() {
    let script = Arc::new(Script {
        outcomes: Mutex::new(HashMap::new()),
        navigate_delay: Duration::from_secs(30),
        ..Default::default()
    });

    let mut config = test_config(1);
    config.run_deadline = Some(Duration::from_millis(50));
    let scheduler = build_scheduler(config, script);

    let results = scheduler
        .run(ids(&["100", "200"]), CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(!result.is_success());
        assert!(matches!(
            result.error,
            Some(LookupError::Cancelled) | Some(LookupError::TaskTimeout(_))
        ));
    }
}
