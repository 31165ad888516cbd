use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for sift.
#[derive(Error, Debug)]
pub enum AppError {
    /// Caller supplied an empty, malformed or disallowed URL. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// All fetch attempts for a URL were exhausted.
    #[error("Fetch failed for {url} after {attempts} attempt(s): {source}")]
    FetchFailed {
        url: String,
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    /// The extractor did not find the structure it expected.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// The overall per-request deadline elapsed.
    #[error("Request timed out after {} ms", .0.as_millis())]
    RequestTimeout(Duration),

    /// The listing stage failed; no partial aggregate exists.
    #[error("Aggregation failed: {0}")]
    AggregationFailed(#[source] Box<AppError>),

    /// Upstream answered with a status outside 2xx/3xx.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error on a single attempt.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A single attempt exceeded its timeout.
    #[error("Attempt timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if a single fetch attempt that failed this way is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::HttpStatus { .. } | AppError::NetworkError(_) | AppError::Timeout(_)
        )
    }

    /// Returns true if the error was caused by the caller rather than upstream.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::InvalidInput(_))
    }

    /// Short machine-readable kind, used in logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::FetchFailed { .. } => "fetch_failed",
            AppError::MalformedDocument(_) => "malformed_document",
            AppError::RequestTimeout(_) => "request_timeout",
            AppError::AggregationFailed(_) => "aggregation_failed",
            AppError::HttpStatus { .. } => "http_status",
            AppError::NetworkError(_) => "network_error",
            AppError::Timeout(_) => "timeout",
            AppError::ConfigError(_) => "config_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::Generic(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(
            AppError::HttpStatus {
                status: 503,
                url: "https://shop.test".into()
            }
            .is_retryable()
        );
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(Duration::from_secs(3)).is_retryable());
        assert!(!AppError::InvalidInput("empty".into()).is_retryable());
        assert!(!AppError::MalformedDocument("no items".into()).is_retryable());
    }

    #[test]
    fn test_client_errors() {
        assert!(AppError::InvalidInput("bad".into()).is_client_error());
        assert!(!AppError::RequestTimeout(Duration::from_secs(5)).is_client_error());
        assert!(
            !AppError::AggregationFailed(Box::new(AppError::NetworkError("x".into())))
                .is_client_error()
        );
    }

    #[test]
    fn test_fetch_failed_message_includes_cause() {
        let err = AppError::FetchFailed {
            url: "https://shop.test/list".into(),
            attempts: 3,
            source: Box::new(AppError::HttpStatus {
                status: 502,
                url: "https://shop.test/list".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempt(s)"));
        assert!(msg.contains("HTTP 502"));
        assert_eq!(err.kind(), "fetch_failed");
    }
}
