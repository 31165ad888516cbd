//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::fetch::FetchRequest;
use crate::models::{FieldMap, ListingPage};
use crate::traits::{Extractor, Fetcher};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Route {
    /// Scripted responses, consumed front to back.
    script: Vec<Result<String, AppError>>,
    /// Returned once the script is exhausted.
    fallback: Option<String>,
    delay: Option<Duration>,
}

/// Mock fetcher with per-URL scripted responses and delays.
///
/// URLs without a route answer with HTTP 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    calls: Arc<Mutex<Vec<FetchRequest>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `url` with `body`.
    pub fn respond(self, url: &str, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .fallback = Some(body.to_string());
        self
    }

    /// Answer `url` with `responses` in order, then fall back to [`respond`](Self::respond)
    /// (or 404 if none was set).
    pub fn script(self, url: &str, responses: Vec<Result<String, AppError>>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .script = responses;
        self
    }

    /// Sleep for `delay` before answering `url`.
    pub fn delay(self, url: &str, delay: Duration) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .count()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(request.clone());

        let (delay, outcome) = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&request.url) {
                None => (
                    None,
                    Err(AppError::HttpStatus {
                        status: 404,
                        url: request.url.clone(),
                    }),
                ),
                Some(route) => {
                    let outcome = if route.script.is_empty() {
                        route.fallback.clone().ok_or_else(|| AppError::HttpStatus {
                            status: 404,
                            url: request.url.clone(),
                        })
                    } else {
                        route.script.remove(0)
                    };
                    (route.delay, outcome)
                }
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// JsonExtractor
// ---------------------------------------------------------------------------

/// Extractor for JSON test documents.
///
/// Listing documents deserialize into [`ListingPage`]; detail documents into a
/// flat string map. Anything else is a [`AppError::MalformedDocument`].
#[derive(Clone, Default)]
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn extract_listing(&self, document: &str) -> Result<ListingPage, AppError> {
        serde_json::from_str(document)
            .map_err(|e| AppError::MalformedDocument(format!("listing: {e}")))
    }

    fn extract_detail(&self, document: &str) -> Result<FieldMap, AppError> {
        serde_json::from_str(document)
            .map_err(|e| AppError::MalformedDocument(format!("detail: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Build a JSON listing document with `items` given as (reference, name) pairs.
pub fn listing_json(title: &str, items: &[(Option<&str>, &str)]) -> String {
    let items: Vec<_> = items
        .iter()
        .map(|(reference, name)| {
            serde_json::json!({
                "reference": reference,
                "summary_fields": {"name": name},
            })
        })
        .collect();
    serde_json::json!({
        "header_fields": {"title": title},
        "items": items,
    })
    .to_string()
}

/// Build a JSON detail document with a single `sku` field.
pub fn detail_json(sku: &str) -> String {
    serde_json::json!({"sku": sku}).to_string()
}
