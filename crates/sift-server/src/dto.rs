use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sift_core::models::{AggregateResult, DetailResult};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct UrlQuery {
    /// Absolute http(s) URL of the document to resolve.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ItemResponse {
    pub reference: Option<String>,
    pub summary_fields: BTreeMap<String, String>,
    pub detail_fields: BTreeMap<String, String>,
    /// `complete` or `partial`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DetailResult> for ItemResponse {
    fn from(item: DetailResult) -> Self {
        Self {
            reference: item.reference,
            summary_fields: item.summary_fields,
            detail_fields: item.detail_fields,
            status: item.status.to_string(),
            error: item.error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AggregateResponse {
    pub source_url: String,
    pub header_fields: BTreeMap<String, String>,
    pub items: Vec<ItemResponse>,
    pub complete: usize,
    pub partial: usize,
    pub fetched_at: DateTime<Utc>,
}

impl From<AggregateResult> for AggregateResponse {
    fn from(result: AggregateResult) -> Self {
        let complete = result.complete_count();
        let partial = result.partial_count();
        Self {
            source_url: result.source_url,
            header_fields: result.header_fields,
            items: result.items.into_iter().map(ItemResponse::from).collect(),
            complete,
            partial,
            fetched_at: result.fetched_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SchedulerStats {
    pub limit: usize,
    pub running: usize,
    pub waiting: usize,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CacheStats {
    pub listings: u64,
    pub items: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
