//! Retrying fetch layer.
//!
//! Wraps any single-attempt [`Fetcher`] with input validation, a rotating
//! browser `User-Agent`, a per-attempt timeout and exponential backoff.
//!
//! ```text
//! attempt 0 --fail--> sleep(base) --> attempt 1 --fail--> sleep(base * 2) --> attempt 2 ...
//! ```
//!
//! Only the calling task sleeps between attempts; concurrent fetches through
//! the same [`RetryingFetcher`] are unaffected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::AppError;
use crate::traits::Fetcher;
use crate::util::normalize_url;

/// Browser identities rotated across attempts.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// One prepared attempt. Built per call and dropped when the attempt returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, attempt: u32, user_agent: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), user_agent.to_string());
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        );
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.5".to_string());
        Self {
            url: url.into(),
            attempt,
            headers,
        }
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("User-Agent").map(String::as_str)
    }
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubled after each further failure.
    pub base_delay: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Delay between attempt `attempt` and `attempt + 1`: `base_delay * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// A [`Fetcher`] wrapper that validates input and retries transient failures.
#[derive(Clone)]
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
    /// Shared rotation cursor into [`USER_AGENTS`].
    rotation: Arc<AtomicUsize>,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            rotation: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch with the configured policy.
    pub async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.fetch_with(url, self.policy.max_retries, self.policy.base_delay)
            .await
    }

    /// Fetch with an explicit attempt budget and backoff base.
    ///
    /// Fails with [`AppError::InvalidInput`] before any network call if `url`
    /// is empty or not an absolute http(s) URL. Exhausting `max_retries`
    /// surfaces [`AppError::FetchFailed`] wrapping the last attempt's error.
    pub async fn fetch_with(
        &self,
        url: &str,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<String, AppError> {
        let url = normalize_url(url)?.to_string();
        let attempts = max_retries.max(1);
        let policy = RetryPolicy {
            max_retries: attempts,
            base_delay,
            attempt_timeout: self.policy.attempt_timeout,
        };

        let mut last_error = None;
        let mut attempts_made = 0;
        for attempt in 0..attempts {
            attempts_made += 1;
            let request = FetchRequest::new(&url, attempt, self.next_user_agent());
            tracing::debug!(url = %url, attempt, "Fetching");

            let outcome =
                match tokio::time::timeout(policy.attempt_timeout, self.inner.fetch(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(policy.attempt_timeout)),
                };

            match outcome {
                Ok(document) => {
                    if attempt > 0 {
                        tracing::info!(url = %url, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(document);
                }
                Err(e @ AppError::InvalidInput(_)) => return Err(e),
                Err(e) => {
                    let retryable = e.is_retryable();
                    tracing::warn!(url = %url, attempt, error = %e, retryable, "Fetch attempt failed");
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempt + 1 < attempts {
                        let delay = policy.delay_after(attempt);
                        tracing::debug!(url = %url, delay_ms = %delay.as_millis(), "Backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(AppError::FetchFailed {
            url,
            attempts: attempts_made,
            source: Box::new(
                last_error.unwrap_or_else(|| AppError::Generic("no attempt was made".into())),
            ),
        })
    }

    fn next_user_agent(&self) -> &'static str {
        let n = self.rotation.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[n % USER_AGENTS.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;

    const URL: &str = "https://shop.test/list";

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    fn status(code: u16) -> AppError {
        AppError::HttpStatus {
            status: code,
            url: URL.into(),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let p = policy(5);
        assert_eq!(p.delay_after(0), Duration::from_millis(100));
        assert_eq!(p.delay_after(1), Duration::from_millis(200));
        assert_eq!(p.delay_after(2), Duration::from_millis(400));
        assert_eq!(
            p.delay_after(40),
            Duration::from_millis(100).saturating_mul(u32::MAX)
        );
    }

    #[tokio::test]
    async fn empty_and_malformed_urls_never_hit_the_network() {
        let mock = MockFetcher::new();
        let fetcher = RetryingFetcher::new(mock.clone(), policy(3));

        for url in ["", "not-a-url", "mailto:someone@shop.test"] {
            let err = fetcher.fetch(url).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{url:?}: {err}");
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_with_exponential_backoff() {
        let mock = MockFetcher::new().script(
            URL,
            vec![
                Err(status(503)),
                Err(AppError::NetworkError("reset".into())),
                Ok("<html>ok</html>".into()),
            ],
        );
        let fetcher = RetryingFetcher::new(mock.clone(), policy(3));

        let start = tokio::time::Instant::now();
        let doc = fetcher.fetch(URL).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(doc, "<html>ok</html>");
        assert_eq!(mock.call_count(), 3);
        // 100ms after attempt 0, 200ms after attempt 1
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_fetch_failed_with_last_error() {
        let mock = MockFetcher::new().script(URL, vec![Err(status(500)), Err(status(502))]);
        let fetcher = RetryingFetcher::new(mock.clone(), policy(2));

        let err = fetcher.fetch(URL).await.unwrap_err();
        match err {
            AppError::FetchFailed {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, AppError::HttpStatus { status: 502, .. }));
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_counts_as_failure() {
        let mock = MockFetcher::new()
            .respond(URL, "<html>late</html>")
            .delay(URL, Duration::from_secs(5));
        let fetcher = RetryingFetcher::new(mock.clone(), policy(2));

        let err = fetcher.fetch(URL).await.unwrap_err();
        match err {
            AppError::FetchFailed { source, .. } => {
                assert!(matches!(*source, AppError::Timeout(_)));
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_budget_overrides_policy() {
        let mock = MockFetcher::new().script(URL, (0..5).map(|_| Err(status(500))).collect());
        let fetcher = RetryingFetcher::new(mock.clone(), policy(5));

        let err = fetcher
            .fetch_with(URL, 1, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::FetchFailed { attempts: 1, .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn inner_invalid_input_is_not_retried() {
        let mock = MockFetcher::new().script(
            URL,
            vec![Err(AppError::InvalidInput("blocked".into())), Ok("x".into())],
        );
        let fetcher = RetryingFetcher::new(mock.clone(), policy(3));

        let err = fetcher.fetch(URL).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_agent_rotates_between_attempts() {
        let mock = MockFetcher::new().script(URL, vec![Err(status(503)), Ok("ok".into())]);
        let fetcher = RetryingFetcher::new(mock.clone(), policy(2));

        fetcher.fetch(URL).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].attempt, 0);
        assert_eq!(calls[1].attempt, 1);
        assert_ne!(calls[0].user_agent(), calls[1].user_agent());
        assert!(USER_AGENTS.contains(&calls[0].user_agent().unwrap()));
    }
}
