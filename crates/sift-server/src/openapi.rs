use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sift API",
        version = "0.1.0",
        description = "Aggregates a listing page with its detail pages under bounded concurrency."
    ),
    paths(
        crate::routes::get_listing,
        crate::routes::get_item,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::AggregateResponse,
        crate::dto::ItemResponse,
        crate::dto::HealthResponse,
        crate::dto::SchedulerStats,
        crate::dto::CacheStats,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "aggregate", description = "Listing and detail resolution"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
