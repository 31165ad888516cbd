use std::str::FromStr;
use std::time::Duration;

use crate::cache::MAX_TTL;
use crate::error::AppError;
use crate::fetch::RetryPolicy;

/// Tuning knobs for the aggregation engine.
///
/// Defaults match the reference profile: 5 concurrent detail fetches,
/// 5 minute cache TTL, 4 s per item, 5 s per request, 3 attempts with a
/// 500 ms backoff base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Maximum detail fetches running at once.
    pub concurrency: usize,
    pub cache_ttl: Duration,
    /// Optional size bound for each cache. `None` keeps the cache unbounded.
    pub cache_max_entries: Option<u64>,
    /// Deadline for one item's detail fetch + extraction, counted from admission.
    pub item_timeout: Duration,
    /// Deadline for the whole listing → merge pipeline.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Abort the detail fetch (and free its slot) when its deadline fires,
    /// instead of letting it finish in the background.
    pub cancel_on_item_timeout: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: None,
            item_timeout: Duration::from_secs(4),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            cancel_on_item_timeout: false,
        }
    }
}

impl AggregatorConfig {
    /// Read configuration from environment variables, falling back to defaults.
    ///
    /// - `SIFT_CONCURRENCY`
    /// - `SIFT_CACHE_TTL_SECS`
    /// - `SIFT_CACHE_MAX_ENTRIES`
    /// - `SIFT_ITEM_TIMEOUT_MS`
    /// - `SIFT_REQUEST_TIMEOUT_MS`
    /// - `SIFT_MAX_RETRIES`
    /// - `SIFT_BACKOFF_BASE_MS`
    /// - `SIFT_ATTEMPT_TIMEOUT_MS`
    /// - `SIFT_CANCEL_ON_ITEM_TIMEOUT` (`true`/`false`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize>(&lookup, "SIFT_CONCURRENCY")? {
            config.concurrency = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "SIFT_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "SIFT_CACHE_MAX_ENTRIES")? {
            config.cache_max_entries = Some(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "SIFT_ITEM_TIMEOUT_MS")? {
            config.item_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "SIFT_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32>(&lookup, "SIFT_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "SIFT_BACKOFF_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "SIFT_ATTEMPT_TIMEOUT_MS")? {
            config.retry.attempt_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<bool>(&lookup, "SIFT_CANCEL_ON_ITEM_TIMEOUT")? {
            config.cancel_on_item_timeout = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::ConfigError("concurrency must be at least 1".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(AppError::ConfigError("max_retries must be at least 1".into()));
        }
        if self.cache_max_entries == Some(0) {
            return Err(AppError::ConfigError(
                "cache_max_entries must be at least 1 when set".into(),
            ));
        }
        if self.cache_ttl > MAX_TTL {
            return Err(AppError::ConfigError(format!(
                "cache_ttl must be at most {} s",
                MAX_TTL.as_secs()
            )));
        }
        for (name, value) in [
            ("cache_ttl", self.cache_ttl),
            ("item_timeout", self.item_timeout),
            ("request_timeout", self.request_timeout),
            ("attempt_timeout", self.retry.attempt_timeout),
        ] {
            if value.is_zero() {
                return Err(AppError::ConfigError(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_max_entries(mut self, max_entries: u64) -> Self {
        self.cache_max_entries = Some(max_entries);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_on_item_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_item_timeout = cancel;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, AppError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {name} '{raw}'"))
        }),
    }
}
