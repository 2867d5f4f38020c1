#[cfg(test)]
mod integration_tests {
    use crate::{
        BrowserSettings, LookupError, ResourceKind, ResourcePolicy, RunConfig, Task,
    };
    use std::time::Duration;

    #[test]
    fn test_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.worker_count, num_cpus::get());
        assert_eq!(config.max_concurrent_tasks, num_cpus::get() * 2);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.per_task_timeout, Duration::from_secs(300));
        assert!(config.run_deadline.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = RunConfig::default();
        config.worker_count = 0;
        assert!(matches!(
            config.validate(),
            Err(LookupError::Configuration(_))
        ));

        let mut config = RunConfig::default();
        config.worker_count = 4;
        config.max_concurrent_tasks = 2;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.solver.max_poll_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_error_retryable() {
        assert!(LookupError::CaptchaSubmit("service down".to_string()).is_retryable());
        assert!(LookupError::CaptchaPollTimeout { polls: 30 }.is_retryable());
        assert!(!LookupError::CaptchaUnsolvable.is_retryable());
        assert!(!LookupError::Navigation("dns".to_string()).is_retryable());
        assert!(!LookupError::SiteValidation("bad identifier".to_string()).is_retryable());
        assert!(!LookupError::TaskTimeout(Duration::from_secs(300)).is_retryable());
        assert!(!LookupError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(LookupError::CaptchaUnsolvable.kind(), "captcha_unsolvable");
        assert_eq!(
            LookupError::CaptchaExhausted { attempts: 3 }.kind(),
            "captcha_exhausted"
        );
        assert_eq!(LookupError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_chrome_args_generation() {
        let settings = BrowserSettings::default();
        let policy = ResourcePolicy::default();
        let args = crate::browser_args(&settings, &policy, 3);

        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&format!(
            "--window-size={},{}",
            settings.window_width, settings.window_height
        )));
        assert!(args
            .iter()
            .any(|a| a.starts_with("--user-data-dir=") && a.ends_with("-3")));
    }

    #[test]
    fn test_resource_policy_switches() {
        let policy = ResourcePolicy {
            load_images: true,
            load_stylesheets: false,
            load_fonts: false,
            load_media: false,
        };
        assert!(policy.should_load(ResourceKind::Image));
        assert!(!policy.should_load(ResourceKind::Stylesheet));

        let args = crate::browser_args(&BrowserSettings::default(), &policy, 0);
        assert!(!args.contains(&"--blink-settings=imagesEnabled=false".to_string()));
        assert!(args.contains(&"--disable-css".to_string()));
    }

    #[test]
    fn test_task_attempt_progression() {
        let task = Task::first("800123456");
        assert_eq!(task.identifier, "800123456");
        assert_eq!(task.attempt, 1);

        let retry = task.next();
        assert_eq!(retry.identifier, "800123456");
        assert_eq!(retry.attempt, 2);
    }

    #[test]
    fn test_selector_defaults_target_registry_form() {
        let config = RunConfig::default();
        assert!(config.selectors.identifier_input.ends_with("numNit"));
        assert!(config.selectors.submit_button.ends_with("btnBuscar"));
        assert_eq!(config.selectors.error_summary, ".ui-messages-error-summary");
        assert!(config.selectors.challenge.site_key.is_none());
    }
}
