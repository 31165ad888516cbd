use sift_client::{ReqwestFetcher, SelectorExtractor};
use sift_core::Aggregator;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub aggregator: Aggregator<ReqwestFetcher, SelectorExtractor>,
}
