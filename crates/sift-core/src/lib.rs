pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod scheduler;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use aggregate::Aggregator;
pub use cache::ResponseCache;
pub use config::AggregatorConfig;
pub use error::AppError;
pub use fetch::{FetchRequest, RetryPolicy, RetryingFetcher};
pub use models::{AggregateResult, DetailResult, FieldMap, ItemStatus, ListingItem, ListingPage};
pub use scheduler::{Scheduler, SchedulerSlot};
pub use traits::{Extractor, Fetcher};
