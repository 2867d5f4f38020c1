//! Challenge solver client
//!
//! Converts an anti-bot challenge into solved text/token using an external
//! two-endpoint HTTP service (2captcha-compatible wire contract). The client
//! models the submit/poll protocol as an explicit state machine and never
//! decides to retry the owning task; that is the retry controller's call.

use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SolverConfig;
use crate::error::LookupError;
use crate::session::ChallengeArtifact;

/// Sentinel the service returns while a job is still being worked on.
pub const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Sentinel for a challenge the service gave up on.
pub const UNSOLVABLE: &str = "ERROR_CAPTCHA_UNSOLVABLE";

/// Wire shape shared by the submit and poll endpoints:
/// `status=1` means `request` carries a job id (submit) or the solved text
/// (poll); `status=0` means `request` carries a sentinel or error description.
#[derive(Debug, Deserialize)]
pub struct ServiceResponse {
    pub status: i32,
    pub request: String,
}

/// States of one solving job. Transitions are monotone:
/// `Submitted → NotReady* → {Solved | Unsolvable | ServiceError}`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Submitted,
    NotReady,
    Solved(String),
    Unsolvable,
    ServiceError(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Solved(_) | JobStatus::Unsolvable | JobStatus::ServiceError(_)
        )
    }
}

/// One submitted challenge job; mutated only by poll responses and dropped
/// once terminal.
#[derive(Debug)]
pub struct ChallengeJob {
    pub id: String,
    pub status: JobStatus,
}

impl ChallengeJob {
    fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Submitted,
        }
    }

    /// Advance the state machine with one poll response. Must not be called
    /// once the job is terminal.
    pub fn apply_poll(&mut self, response: &ServiceResponse) {
        debug_assert!(!self.status.is_terminal());
        self.status = if response.status == 1 {
            JobStatus::Solved(response.request.clone())
        } else if response.request == NOT_READY {
            JobStatus::NotReady
        } else if response.request == UNSOLVABLE {
            JobStatus::Unsolvable
        } else {
            JobStatus::ServiceError(response.request.clone())
        };
    }
}

/// HTTP client for the solving service. Invoked at most once per task
/// attempt.
pub struct SolverClient {
    config: SolverConfig,
    http: reqwest::Client,
}

impl SolverClient {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Submit the artifact and poll until the service answers or the poll
    /// budget runs out.
    ///
    /// A rejected submission fails fast with no polling. An explicit
    /// unsolvable answer stops polling immediately. `max_poll_attempts`
    /// non-terminal polls yield a poll timeout.
    pub async fn solve(
        &self,
        artifact: &ChallengeArtifact,
        cancel: &CancellationToken,
    ) -> Result<String, LookupError> {
        let mut job = self.submit(artifact).await?;
        debug!(job_id = %job.id, "challenge submitted");

        let mut interval = self.config.poll_interval;
        for poll in 1..=self.config.max_poll_attempts {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Err(LookupError::Cancelled),
            }

            match self.poll(&job.id).await {
                Ok(response) => job.apply_poll(&response),
                Err(e) => {
                    // Transport hiccups count against the poll budget but do
                    // not terminate the job.
                    warn!(job_id = %job.id, poll, error = %e, "poll request failed");
                }
            }

            match &job.status {
                JobStatus::Solved(token) => {
                    debug!(job_id = %job.id, poll, "challenge solved");
                    return Ok(token.clone());
                }
                JobStatus::Unsolvable => return Err(LookupError::CaptchaUnsolvable),
                JobStatus::ServiceError(message) => {
                    return Err(LookupError::CaptchaSubmit(message.clone()));
                }
                JobStatus::Submitted | JobStatus::NotReady => {
                    interval = grow_interval(
                        interval,
                        self.config.poll_backoff,
                        self.config.max_poll_interval,
                    );
                }
            }
        }

        Err(LookupError::CaptchaPollTimeout {
            polls: self.config.max_poll_attempts,
        })
    }

    async fn submit(&self, artifact: &ChallengeArtifact) -> Result<ChallengeJob, LookupError> {
        let mut form: Vec<(&str, String)> = vec![
            ("key", self.config.api_key.clone()),
            ("json", "1".to_string()),
        ];
        match artifact {
            ChallengeArtifact::Image(bytes) => {
                form.push(("method", "base64".to_string()));
                form.push((
                    "body",
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                ));
            }
            ChallengeArtifact::SiteKey { key, page_url } => {
                form.push(("method", "userrecaptcha".to_string()));
                form.push(("googlekey", key.clone()));
                form.push(("pageurl", page_url.clone()));
            }
        }

        let response = self
            .http
            .post(&self.config.submit_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| LookupError::CaptchaSubmit(e.to_string()))?;
        let body: ServiceResponse = response
            .json()
            .await
            .map_err(|e| LookupError::CaptchaSubmit(e.to_string()))?;

        if body.status == 1 {
            Ok(ChallengeJob::new(body.request))
        } else {
            // Fail fast: a rejected submission is never worth polling.
            Err(LookupError::CaptchaSubmit(body.request))
        }
    }

    async fn poll(&self, job_id: &str) -> Result<ServiceResponse, reqwest::Error> {
        self.http
            .get(&self.config.poll_url)
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("action", "get"),
                ("id", job_id),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await
    }
}

fn grow_interval(current: Duration, backoff: f64, cap: Duration) -> Duration {
    if backoff <= 1.0 {
        return current;
    }
    current.mul_f64(backoff).min(cap)
}
