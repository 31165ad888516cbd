use std::future::Future;

use crate::error::AppError;
use crate::fetch::FetchRequest;
use crate::models::{FieldMap, ListingPage};

/// Performs a single GET for a prepared request and returns the raw document.
///
/// Implementations make exactly one attempt; retries, backoff and header
/// rotation live in [`RetryingFetcher`](crate::fetch::RetryingFetcher).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Maps raw documents to named fields.
///
/// Pure and stateless: no I/O. Returns [`AppError::MalformedDocument`] when the
/// expected structure is absent.
pub trait Extractor: Send + Sync + Clone {
    fn extract_listing(&self, document: &str) -> Result<ListingPage, AppError>;

    fn extract_detail(&self, document: &str) -> Result<FieldMap, AppError>;
}
