//! Session capability and its Chrome implementation
//!
//! A [`Session`] is one exclusive, stateful browser context used to carry out
//! page interactions for a subset of tasks. The orchestration core only talks
//! to the trait; [`ChromeSession`] is the chromiumoxide-backed implementation.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{
    BrowserSettings, ChallengeProbe, FieldSchema, RegistryFields, ResourceKind, ResourcePolicy,
};
use crate::error::LookupError;

/// What the session hands the solver: either a rendered image of the
/// challenge or the page's site key for token-based challenges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeArtifact {
    Image(Vec<u8>),
    SiteKey { key: String, page_url: String },
}

/// Page-interaction capability consumed by the retry controller.
///
/// Every method reports failure with a typed [`LookupError`] produced at the
/// point of failure; callers branch on the variant, never on message text.
#[async_trait]
pub trait Session: Send {
    /// Open a fresh page state and load `url`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), LookupError>;

    /// Wait until the element is present and visible.
    async fn wait_visible(&mut self, selector: &str, timeout: Duration)
        -> Result<(), LookupError>;

    /// Type `text` into the element.
    async fn set_value(&mut self, selector: &str, text: &str) -> Result<(), LookupError>;

    async fn click(&mut self, selector: &str) -> Result<(), LookupError>;

    /// Read the element's text; `None` when the element is absent.
    async fn extract_text(&mut self, selector: &str) -> Result<Option<String>, LookupError>;

    /// Read the result-field set; `None` when the fields are not on the page.
    async fn extract_fields(
        &mut self,
        schema: &FieldSchema,
    ) -> Result<Option<RegistryFields>, LookupError>;

    /// Detect the anti-bot challenge; `None` when the page shows none.
    async fn capture_challenge(
        &mut self,
        probe: &ChallengeProbe,
    ) -> Result<Option<ChallengeArtifact>, LookupError>;

    /// Release the session's resources once its worker has drained.
    async fn shutdown(&mut self) {}
}

/// Creates one session per worker.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Session;

    async fn create(&self, worker_id: usize) -> Result<Self::Session, LookupError>;
}

/// One Chrome instance, exclusively owned by a worker for the run's duration.
/// Each attempt gets a fresh page with cleared cookies.
pub struct ChromeSession {
    browser: Browser,
    handler: Option<tokio::task::JoinHandle<()>>,
    page: Option<Page>,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, LookupError> {
        self.page
            .as_ref()
            .ok_or_else(|| LookupError::Navigation("no page open".into()))
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), LookupError> {
        if let Some(old) = self.page.take() {
            let _ = old.close().await;
        }

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| LookupError::Navigation(e.to_string()))?;
        let _ = page.execute(ClearBrowserCookiesParams::default()).await;

        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| LookupError::Navigation(format!("{url}: timed out after {timeout:?}")))?
            .map_err(|e| LookupError::Navigation(e.to_string()))?;
        let _ = page.wait_for_navigation().await;

        self.page = Some(page);
        Ok(())
    }

    async fn wait_visible(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), LookupError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page()?.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LookupError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn set_value(&mut self, selector: &str, text: &str) -> Result<(), LookupError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?;
        element
            .type_str(text)
            .await
            .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), LookupError> {
        self.page()?
            .find_element(selector)
            .await
            .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?
            .click()
            .await
            .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?;
        Ok(())
    }

    async fn extract_text(&mut self, selector: &str) -> Result<Option<String>, LookupError> {
        let element = match self.page()?.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(None),
        };
        let text = element
            .inner_text()
            .await
            .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?;
        Ok(text.filter(|t| !t.trim().is_empty()))
    }

    async fn extract_fields(
        &mut self,
        schema: &FieldSchema,
    ) -> Result<Option<RegistryFields>, LookupError> {
        let mut values = Vec::with_capacity(5);
        for selector in [
            &schema.first_surname,
            &schema.second_surname,
            &schema.first_name,
            &schema.other_names,
            &schema.status,
        ] {
            let element = match self.page()?.find_element(selector).await {
                Ok(element) => element,
                Err(_) => return Ok(None),
            };
            let text = element
                .inner_text()
                .await
                .map_err(|e| LookupError::Extraction(format!("{selector}: {e}")))?;
            values.push(text.unwrap_or_default().trim().to_string());
        }

        let mut values = values.into_iter();
        Ok(Some(RegistryFields {
            first_surname: values.next().unwrap_or_default(),
            second_surname: values.next().unwrap_or_default(),
            first_name: values.next().unwrap_or_default(),
            other_names: values.next().unwrap_or_default(),
            status: values.next().unwrap_or_default(),
        }))
    }

    async fn capture_challenge(
        &mut self,
        probe: &ChallengeProbe,
    ) -> Result<Option<ChallengeArtifact>, LookupError> {
        let element = match self.page()?.find_element(&probe.selector).await {
            Ok(element) => element,
            Err(_) => return Ok(None),
        };

        if let Some(key) = &probe.site_key {
            let page_url = self
                .page()?
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            return Ok(Some(ChallengeArtifact::SiteKey {
                key: key.clone(),
                page_url,
            }));
        }

        let image = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| LookupError::Extraction(format!("challenge capture: {e}")))?;
        Ok(Some(ChallengeArtifact::Image(image)))
    }

    async fn shutdown(&mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        let _ = self.browser.close().await;
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

/// Launches one Chrome instance per worker with the configured settings and
/// resource policy.
pub struct ChromeSessionFactory {
    settings: BrowserSettings,
    policy: ResourcePolicy,
}

impl ChromeSessionFactory {
    pub fn new(settings: BrowserSettings, policy: ResourcePolicy) -> Self {
        Self { settings, policy }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn create(&self, worker_id: usize) -> Result<ChromeSession, LookupError> {
        let config = build_browser_config(&self.settings, &self.policy, worker_id)
            .map_err(LookupError::SessionStartup)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| LookupError::SessionStartup(e.to_string()))?;

        // Drive the CDP event stream for this instance's lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            debug!("browser event stream ended");
        });

        info!(worker_id, "browser session started");
        Ok(ChromeSession {
            browser,
            handler: Some(handler_task),
            page: None,
        })
    }
}

fn build_browser_config(
    settings: &BrowserSettings,
    policy: &ResourcePolicy,
    worker_id: usize,
) -> Result<BrowserConfig, String> {
    let mut builder = BrowserConfig::builder()
        .window_size(settings.window_width, settings.window_height)
        .args(browser_args(settings, policy, worker_id));

    if !settings.headless {
        builder = builder.with_head();
    }
    if let Some(path) = &settings.chrome_path {
        builder = builder.chrome_executable(path);
    }

    builder.build()
}

/// Chrome switches for one pool instance, with unique profile directories so
/// concurrent instances do not trip over each other's singletons.
pub fn browser_args(
    settings: &BrowserSettings,
    policy: &ResourcePolicy,
    worker_id: usize,
) -> Vec<String> {
    let unique_id = format!("{}-{}", std::process::id(), worker_id);

    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--no-first-run".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-popup-blocking".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-breakpad".to_string(),
        "--disable-client-side-phishing-detection".to_string(),
        "--disable-infobars".to_string(),
        "--disable-notifications".to_string(),
        "--disable-translate".to_string(),
        "--disable-sync".to_string(),
        format!(
            "--window-size={},{}",
            settings.window_width, settings.window_height
        ),
        format!("--user-data-dir=/tmp/registry-lookup-{unique_id}"),
    ];

    if let Some(user_agent) = &settings.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    if !policy.should_load(ResourceKind::Image) {
        args.push("--blink-settings=imagesEnabled=false".to_string());
    }
    if !policy.should_load(ResourceKind::Stylesheet) {
        args.push("--disable-css".to_string());
    }
    if !policy.should_load(ResourceKind::Font) {
        args.push("--disable-remote-fonts".to_string());
    }
    if !policy.should_load(ResourceKind::Media) {
        args.push("--autoplay-policy=user-gesture-required".to_string());
        args.push("--mute-audio".to_string());
    }

    args
}
