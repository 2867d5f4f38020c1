use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

/// Typed failure taxonomy for a lookup task.
///
/// Every variant is produced at the point of failure by the component that
/// observed it (session, solver, scheduler). Classification decisions are made
/// on the variant, never by inspecting message text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LookupError {
    #[error("session startup failed: {0}")]
    SessionStartup(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element {selector} not visible within {timeout:?}")]
    SelectorTimeout { selector: String, timeout: Duration },

    #[error("site rejected the identifier: {0}")]
    SiteValidation(String),

    #[error("challenge submission failed: {0}")]
    CaptchaSubmit(String),

    #[error("challenge not solved after {polls} polls")]
    CaptchaPollTimeout { polls: u32 },

    #[error("challenge service reported the artifact unsolvable")]
    CaptchaUnsolvable,

    #[error("challenge retries exhausted after {attempts} attempts")]
    CaptchaExhausted { attempts: u32 },

    #[error("field extraction failed: {0}")]
    Extraction(String),

    #[error("task deadline of {0:?} exceeded")]
    TaskTimeout(Duration),

    #[error("run cancelled before completion")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl LookupError {
    /// Whether the retry controller may re-run the whole task after this
    /// failure. Only solver-service flakiness is considered transient; page
    /// and site failures are deterministic for a given identifier.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LookupError::CaptchaSubmit(_) | LookupError::CaptchaPollTimeout { .. }
        )
    }

    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::SessionStartup(_) => "session_startup",
            LookupError::Navigation(_) => "navigation",
            LookupError::SelectorTimeout { .. } => "selector_timeout",
            LookupError::SiteValidation(_) => "site_validation",
            LookupError::CaptchaSubmit(_) => "captcha_submit",
            LookupError::CaptchaPollTimeout { .. } => "captcha_poll_timeout",
            LookupError::CaptchaUnsolvable => "captcha_unsolvable",
            LookupError::CaptchaExhausted { .. } => "captcha_exhausted",
            LookupError::Extraction(_) => "extraction",
            LookupError::TaskTimeout(_) => "task_timeout",
            LookupError::Cancelled => "cancelled",
            LookupError::Configuration(_) => "configuration",
        }
    }
}

impl From<AcquireError> for LookupError {
    fn from(_: AcquireError) -> Self {
        // The admission semaphore is only closed when the run is torn down.
        LookupError::Cancelled
    }
}
