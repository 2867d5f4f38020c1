//! Configuration and shared data model
//!
//! All knobs for a run live in [`RunConfig`], constructed once before
//! scheduling starts and read-only afterwards. There are no process-wide
//! mutable globals; credentials, URLs and selectors all flow through here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LookupError;

/// Process-wide configuration for a lookup run.
///
/// Owned by the scheduler; validated with [`RunConfig::validate`] before any
/// task starts.
///
/// # Examples
///
/// ```rust
/// use registry_lookup::RunConfig;
///
/// let config = RunConfig {
///     worker_count: 4,
///     max_concurrent_tasks: 8,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Entry URL of the registry query page.
    pub base_url: String,

    /// Number of persistent browser sessions, one per worker (default: number
    /// of CPUs). Each session is exclusively owned by its worker for the
    /// whole run.
    pub worker_count: usize,

    /// Global cap on tasks executing their expensive step simultaneously.
    /// Must be >= `worker_count`.
    pub max_concurrent_tasks: usize,

    /// Upper bound on attempts per identifier. Only transient challenge
    /// failures consume additional attempts (default: 3).
    pub max_retries: u32,

    /// Fixed delay between attempts of the same identifier (default: 5s).
    pub retry_delay: Duration,

    /// Timeout for the initial page navigation of an attempt.
    pub navigation_timeout: Duration,

    /// Timeout when waiting for a page element to become visible.
    pub selector_timeout: Duration,

    /// Bound on one identifier's whole `process` call, across all of its
    /// attempts. Expiry is terminal and never retried.
    pub per_task_timeout: Duration,

    /// Optional wall-clock budget for the whole run. When it elapses the run
    /// is cancelled and unfinished identifiers are recorded as errors.
    pub run_deadline: Option<Duration>,

    /// How often to log run progress, if at all.
    pub progress_interval: Option<Duration>,

    /// Challenge-solving service settings.
    pub solver: SolverConfig,

    /// DOM selectors of the target page.
    pub selectors: SelectorConfig,

    /// Which page resource kinds the browser is allowed to load.
    pub resources: ResourcePolicy,

    /// Browser launch settings.
    pub browser: BrowserSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            base_url: "https://muisca.dian.gov.co/WebRutMuisca/DefConsultaEstadoRUT.faces"
                .to_string(),
            worker_count: cpus,
            max_concurrent_tasks: cpus * 2,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(60),
            selector_timeout: Duration::from_secs(30),
            per_task_timeout: Duration::from_secs(300),
            run_deadline: None,
            progress_interval: None,
            solver: SolverConfig::default(),
            selectors: SelectorConfig::default(),
            resources: ResourcePolicy::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl RunConfig {
    /// Reject configurations the scheduler cannot honor. A failure here is
    /// run-fatal and surfaces to the caller before any task starts.
    pub fn validate(&self) -> Result<(), LookupError> {
        if self.worker_count == 0 {
            return Err(LookupError::Configuration(
                "worker_count must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_tasks < self.worker_count {
            return Err(LookupError::Configuration(
                "max_concurrent_tasks must be at least worker_count".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(LookupError::Configuration(
                "max_retries must be greater than 0".into(),
            ));
        }
        if self.per_task_timeout.is_zero() {
            return Err(LookupError::Configuration(
                "per_task_timeout must be greater than 0".into(),
            ));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(LookupError::Configuration(format!(
                "base_url is not a valid URL: {}",
                self.base_url
            )));
        }
        if self.solver.max_poll_attempts == 0 {
            return Err(LookupError::Configuration(
                "solver.max_poll_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the external challenge-solving HTTP service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverConfig {
    /// Account credential sent with every request.
    pub api_key: String,

    /// Submission endpoint (`in.php`-shaped).
    pub submit_url: String,

    /// Status endpoint (`res.php`-shaped).
    pub poll_url: String,

    /// Initial delay before each status poll (default: 5s).
    pub poll_interval: Duration,

    /// Give up after this many polls without a terminal answer (default: 30).
    pub max_poll_attempts: u32,

    /// Growth factor applied to the poll interval after each poll, capped by
    /// `max_poll_interval`. 1.0 keeps the interval fixed.
    pub poll_backoff: f64,

    /// Upper bound for the grown poll interval.
    pub max_poll_interval: Duration,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            submit_url: "https://2captcha.com/in.php".to_string(),
            poll_url: "https://2captcha.com/res.php".to_string(),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 30,
            poll_backoff: 1.0,
            max_poll_interval: Duration::from_secs(15),
        }
    }
}

/// DOM selectors of the registry page, injected into the session so the
/// orchestration core stays free of page specifics.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    /// Input element receiving the identifier.
    pub identifier_input: String,

    /// Submit/search button.
    pub submit_button: String,

    /// Banner the site renders when it rejects a query.
    pub error_summary: String,

    /// Where and how to look for the anti-bot challenge.
    pub challenge: ChallengeProbe,

    /// Selectors of the result fields.
    pub fields: FieldSchema,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let form = "#vistaConsultaEstadoRUT\\:formConsultaEstadoRUT";
        Self {
            identifier_input: format!("{form}\\:numNit"),
            submit_button: format!("{form}\\:btnBuscar"),
            error_summary: ".ui-messages-error-summary".to_string(),
            challenge: ChallengeProbe::default(),
            fields: FieldSchema::default(),
        }
    }
}

/// Describes the challenge element. When `site_key` is set the session hands
/// the key to the solver instead of capturing a screenshot of `selector`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChallengeProbe {
    /// Element hosting the challenge, screenshotted for image solving.
    pub selector: String,

    /// Input element receiving the solved text/token.
    pub input: String,

    /// Site key for token-based challenges, when the page uses one.
    pub site_key: Option<String>,
}

impl Default for ChallengeProbe {
    fn default() -> Self {
        Self {
            selector: "#verifying".to_string(),
            input: "#verifying".to_string(),
            site_key: None,
        }
    }
}

/// Selectors of the fixed result-field set read back after a query.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldSchema {
    pub first_surname: String,
    pub second_surname: String,
    pub first_name: String,
    pub other_names: String,
    pub status: String,
}

impl Default for FieldSchema {
    fn default() -> Self {
        let form = "#vistaConsultaEstadoRUT\\:formConsultaEstadoRUT";
        Self {
            first_surname: format!("{form}\\:primerApellido"),
            second_surname: format!("{form}\\:segundoApellido"),
            first_name: format!("{form}\\:primerNombre"),
            other_names: format!("{form}\\:otrosNombres"),
            status: format!("{form}\\:estado"),
        }
    }
}

/// Resource kinds a page may request while rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResourceKind {
    Document,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Other,
}

/// Declarative load policy for page resources, supplied by configuration and
/// translated into browser switches at launch time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourcePolicy {
    pub load_images: bool,
    pub load_stylesheets: bool,
    pub load_fonts: bool,
    pub load_media: bool,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        // Images stay on: the challenge artifact is captured from the page.
        Self {
            load_images: true,
            load_stylesheets: true,
            load_fonts: true,
            load_media: true,
        }
    }
}

impl ResourcePolicy {
    pub fn should_load(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Document | ResourceKind::Script | ResourceKind::Other => true,
            ResourceKind::Image => self.load_images,
            ResourceKind::Stylesheet => self.load_stylesheets,
            ResourceKind::Font => self.load_fonts,
            ResourceKind::Media => self.load_media,
        }
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserSettings {
    /// Path to a Chrome/Chromium executable (default: auto-detect).
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for page requests.
    pub user_agent: Option<String>,

    /// Browser window width in pixels.
    pub window_width: u32,

    /// Browser window height in pixels.
    pub window_height: u32,

    /// Run without a visible window (default: true).
    pub headless: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            window_width: 1920,
            window_height: 1080,
            headless: true,
        }
    }
}

/// One unit of work: an identifier and the attempt about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub identifier: String,
    pub attempt: u32,
}

impl Task {
    pub fn first(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            attempt: 1,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// The fixed set of fields read back from the registry page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryFields {
    pub first_surname: String,
    pub second_surname: String,
    pub first_name: String,
    pub other_names: String,
    pub status: String,
}

/// Terminal outcome classification of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LookupStatus {
    Success,
    Error,
}

/// Terminal record for one input identifier, immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub identifier: String,
    pub fields: Option<RegistryFields>,
    pub status: LookupStatus,
    pub error: Option<LookupError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl LookupResult {
    pub fn success(
        identifier: impl Into<String>,
        fields: RegistryFields,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            fields: Some(fields),
            status: LookupStatus::Success,
            error: None,
            attempts,
            elapsed,
        }
    }

    pub fn failure(
        identifier: impl Into<String>,
        error: LookupError,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            fields: None,
            status: LookupStatus::Error,
            error: Some(error),
            attempts,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, LookupStatus::Success)
    }
}
