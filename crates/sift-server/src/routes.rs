use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sift_core::AppError;

use crate::dto::{
    AggregateResponse, CacheStats, HealthResponse, ItemResponse, SchedulerStats, UrlQuery,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/listing", get(get_listing))
        .route("/v1/item", get(get_item));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/listing",
    params(UrlQuery),
    responses(
        (status = 200, description = "Listing merged with its detail documents", body = AggregateResponse),
        (status = 304, description = "Result unchanged since the supplied ETag"),
        (status = 400, description = "Invalid URL", body = crate::dto::ErrorResponse),
        (status = 502, description = "Listing could not be fetched or parsed", body = crate::dto::ErrorResponse),
        (status = 504, description = "Request deadline elapsed", body = crate::dto::ErrorResponse),
    ),
    tag = "aggregate"
)]
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let result = state.aggregator.aggregate(&query.url).await?;
    let etag = format!("\"{}\"", result.fingerprint().map_err(AppError::from)?);

    let unchanged = headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));

    let etag_header = HeaderValue::from_str(&etag)
        .map_err(|e| AppError::Generic(format!("Invalid ETag header: {e}")))?;

    if unchanged {
        return Ok((StatusCode::NOT_MODIFIED, [(ETAG, etag_header)]).into_response());
    }

    let body = AggregateResponse::from(result);
    Ok(([(ETAG, etag_header)], axum::Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/item",
    params(UrlQuery),
    responses(
        (status = 200, description = "Fields of a single detail document", body = ItemResponse),
        (status = 400, description = "Invalid URL", body = crate::dto::ErrorResponse),
        (status = 502, description = "Document could not be fetched or parsed", body = crate::dto::ErrorResponse),
        (status = 504, description = "Request deadline elapsed", body = crate::dto::ErrorResponse),
    ),
    tag = "aggregate"
)]
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.aggregator.item(&query.url).await?;
    Ok(axum::Json(ItemResponse::from(item)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let aggregator = &state.aggregator;
    let scheduler = aggregator.scheduler();

    let response = HealthResponse {
        status: "healthy".to_string(),
        scheduler: SchedulerStats {
            limit: scheduler.limit(),
            running: scheduler.running(),
            waiting: scheduler.waiting(),
        },
        cache: CacheStats {
            listings: aggregator.listing_cache().entry_count().await,
            items: aggregator.item_cache().entry_count().await,
            ttl_secs: aggregator.config().cache_ttl.as_secs(),
        },
    };

    axum::Json(response)
}
