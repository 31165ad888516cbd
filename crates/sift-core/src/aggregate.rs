//! Listing → detail fan-out with partial-failure tolerance.
//!
//! ```text
//! START --cache hit--------------------------------------------> DONE
//!   |
//!   +--> LISTING FETCH --fail--> AggregationFailed
//!            |
//!            v
//!        ITEM FAN-OUT (one scheduler-gated detail task per item,
//!            |          each racing its own deadline)
//!            v
//!          MERGE (listing order) --> cache write --> DONE
//! ```
//!
//! The listing → merge pipeline races an overall request deadline; losing that
//! race is a [`AppError::RequestTimeout`] with no partial aggregate. Item-level
//! failures and timeouts only ever degrade the item to
//! [`ItemStatus::Partial`](crate::models::ItemStatus::Partial).

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::config::AggregatorConfig;
use crate::error::AppError;
use crate::fetch::RetryingFetcher;
use crate::models::{AggregateResult, DetailResult, FieldMap, ListingItem};
use crate::scheduler::Scheduler;
use crate::traits::{Extractor, Fetcher};
use crate::util::{normalize_url, resolve_reference};

/// Orchestrates listing fetch, detail fan-out, merge and caching.
///
/// Generic over the single-attempt [`Fetcher`] and the [`Extractor`], so tests
/// can inject mocks. The [`Scheduler`] and caches are shared handles: build
/// them once per process and hand clones to every aggregator that should
/// share capacity and results.
pub struct Aggregator<F, E> {
    fetcher: RetryingFetcher<F>,
    extractor: E,
    scheduler: Scheduler,
    listings: ResponseCache<AggregateResult>,
    items: ResponseCache<DetailResult>,
    config: AggregatorConfig,
}

impl<F, E> Aggregator<F, E>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    /// Build an aggregator with its own scheduler and caches sized from `config`.
    pub fn new(fetcher: F, extractor: E, config: AggregatorConfig) -> Self {
        let scheduler = Scheduler::new(config.concurrency);
        let (listings, items) = match config.cache_max_entries {
            Some(max) => (
                ResponseCache::with_capacity(config.cache_ttl, max),
                ResponseCache::with_capacity(config.cache_ttl, max),
            ),
            None => (
                ResponseCache::new(config.cache_ttl),
                ResponseCache::new(config.cache_ttl),
            ),
        };
        Self::with_shared(fetcher, extractor, scheduler, listings, items, config)
    }

    /// Build an aggregator around externally owned scheduler and caches.
    pub fn with_shared(
        fetcher: F,
        extractor: E,
        scheduler: Scheduler,
        listings: ResponseCache<AggregateResult>,
        items: ResponseCache<DetailResult>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            fetcher: RetryingFetcher::new(fetcher, config.retry.clone()),
            extractor,
            scheduler,
            listings,
            items,
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn listing_cache(&self) -> &ResponseCache<AggregateResult> {
        &self.listings
    }

    pub fn item_cache(&self) -> &ResponseCache<DetailResult> {
        &self.items
    }

    /// Fetch a listing, fan out to every item's detail document and merge.
    ///
    /// Fails only if the URL is invalid ([`AppError::InvalidInput`]), the
    /// listing cannot be fetched or parsed ([`AppError::AggregationFailed`]),
    /// or the request deadline elapses ([`AppError::RequestTimeout`]).
    pub async fn aggregate(&self, url: &str) -> Result<AggregateResult, AppError> {
        let key = normalize_url(url)?;

        if let Some(hit) = self.listings.get(key.as_str()).await {
            tracing::info!(url = %key, "Listing served from cache");
            return Ok(hit);
        }

        let span = tracing::info_span!("aggregate", request_id = %Uuid::new_v4(), url = %key);
        let result = async {
            let started = tokio::time::Instant::now();
            let result = tokio::time::timeout(self.config.request_timeout, self.run_pipeline(&key))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        timeout_ms = %self.config.request_timeout.as_millis(),
                        "Request deadline elapsed"
                    );
                    AppError::RequestTimeout(self.config.request_timeout)
                })??;

            tracing::info!(
                items = result.items.len(),
                complete = result.complete_count(),
                partial = result.partial_count(),
                elapsed_ms = %started.elapsed().as_millis(),
                "Aggregation complete"
            );
            Ok::<_, AppError>(result)
        }
        .instrument(span)
        .await?;

        self.listings.set(key.as_str(), result.clone()).await;
        Ok(result)
    }

    /// Fetch and extract a single detail document.
    ///
    /// There is no summary to fall back to, so fetch and extraction failures
    /// surface as [`AppError::FetchFailed`] / [`AppError::MalformedDocument`].
    pub async fn item(&self, url: &str) -> Result<DetailResult, AppError> {
        let key = normalize_url(url)?;

        if let Some(hit) = self.items.get(key.as_str()).await {
            tracing::info!(url = %key, "Item served from cache");
            return Ok(hit);
        }

        let span = tracing::info_span!("item", request_id = %Uuid::new_v4(), url = %key);
        let detail_fields = tokio::time::timeout(
            self.config.request_timeout,
            self.scheduler
                .run(|| fetch_detail(&self.fetcher, &self.extractor, key.as_str())),
        )
        .instrument(span)
        .await
        .map_err(|_| AppError::RequestTimeout(self.config.request_timeout))??;

        let result =
            DetailResult::complete(Some(key.to_string()), FieldMap::new(), detail_fields);
        self.items.set(key.as_str(), result.clone()).await;
        Ok(result)
    }

    async fn run_pipeline(&self, listing_url: &Url) -> Result<AggregateResult, AppError> {
        let document = self
            .fetcher
            .fetch(listing_url.as_str())
            .await
            .map_err(|e| match e {
                AppError::InvalidInput(_) => e,
                other => AppError::AggregationFailed(Box::new(other)),
            })?;

        let page = self
            .extractor
            .extract_listing(&document)
            .map_err(|e| AppError::AggregationFailed(Box::new(e)))?;
        tracing::info!(items = page.items.len(), "Listing extracted");

        // join_all yields outputs in input order, so results line up with the
        // listing regardless of which detail fetch finishes first.
        let outcomes = join_all(page.items.into_iter().enumerate().map(|(index, item)| {
            let target = item
                .reference
                .as_deref()
                .and_then(|r| resolve_reference(listing_url, r));
            self.resolve_item(index, item, target)
        }))
        .await;

        Ok(AggregateResult {
            source_url: listing_url.to_string(),
            header_fields: page.header_fields,
            items: outcomes,
            fetched_at: Utc::now(),
        })
    }

    /// Resolve one listing item into a complete or partial result. Never fails.
    async fn resolve_item(
        &self,
        index: usize,
        item: ListingItem,
        target: Option<Url>,
    ) -> DetailResult {
        let Some(target) = target else {
            tracing::debug!(index, "Item has no resolvable detail reference");
            return DetailResult::partial(item, "no detail reference");
        };

        let slot = match self.scheduler.acquire().await {
            Ok(slot) => slot,
            Err(e) => return DetailResult::partial(item, e.to_string()),
        };

        // The detail work runs as its own task holding the slot, so that a
        // fired deadline only abandons the wait: the slot is returned when the
        // task body finishes, or when `DetailTask` aborts it in cancel mode.
        let fetcher = self.fetcher.clone();
        let extractor = self.extractor.clone();
        let detail_url = target.to_string();
        let mut task = DetailTask {
            handle: tokio::spawn(
                async move {
                    let _slot = slot;
                    fetch_detail(&fetcher, &extractor, &detail_url).await
                }
                .in_current_span(),
            ),
            abort_on_drop: self.config.cancel_on_item_timeout,
        };

        match tokio::time::timeout(self.config.item_timeout, &mut task.handle).await {
            Ok(Ok(Ok(detail_fields))) => {
                tracing::debug!(index, url = %target, "Item complete");
                DetailResult::complete(item.reference, item.summary_fields, detail_fields)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(index, url = %target, error = %e, "Detail failed, keeping summary");
                DetailResult::partial(item, e.to_string())
            }
            Ok(Err(join_error)) => {
                tracing::error!(index, url = %target, error = %join_error, "Detail task aborted");
                DetailResult::partial(item, format!("detail task failed: {join_error}"))
            }
            Err(_) => {
                tracing::warn!(
                    index,
                    url = %target,
                    timeout_ms = %self.config.item_timeout.as_millis(),
                    "Detail deadline elapsed, keeping summary"
                );
                DetailResult::partial(
                    item,
                    format!(
                        "detail timed out after {} ms",
                        self.config.item_timeout.as_millis()
                    ),
                )
            }
        }
    }
}

/// Handle to a spawned detail fetch.
///
/// With `abort_on_drop` set, dropping the handle aborts the task and frees
/// its slot. That covers both a fired item deadline and the whole pipeline
/// being dropped when the request deadline fires. Otherwise the task is
/// detached and runs to completion.
struct DetailTask {
    handle: JoinHandle<Result<FieldMap, AppError>>,
    abort_on_drop: bool,
}

impl Drop for DetailTask {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.handle.abort();
        }
    }
}

async fn fetch_detail<F: Fetcher, E: Extractor>(
    fetcher: &RetryingFetcher<F>,
    extractor: &E,
    url: &str,
) -> Result<FieldMap, AppError> {
    let document = fetcher.fetch(url).await?;
    extractor.extract_detail(&document)
}
