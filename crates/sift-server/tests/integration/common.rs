use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;

use sift_client::{ReqwestFetcher, SelectorConfig, SelectorExtractor};
use sift_core::fetch::RetryPolicy;
use sift_core::{Aggregator, AggregatorConfig};
use sift_server::routes;
use sift_server::state::AppState;

pub const SELECTORS: &str = r#"{
    "listing": {
        "header": { "title": "h1" },
        "item": "li.product",
        "fields": { "name": ".name" }
    },
    "detail": {
        "fields": { "sku": ".sku", "price": ".price" }
    }
}"#;

/// Detail page that answers after the item deadline has passed.
pub const SLOW_DETAIL_ID: u32 = 2;

const LISTING: &str = r#"<html><body>
  <h1>Desk Lamps</h1>
  <ul>
    <li class="product"><a href="/p/1"><span class="name">Arc</span></a></li>
    <li class="product"><a href="/p/2"><span class="name">Banker</span></a></li>
    <li class="product"><a href="/p/404"><span class="name">Gone</span></a></li>
    <li class="product"><span class="name">Unlinked</span></li>
  </ul>
</body></html>"#;

async fn detail(Path(id): Path<u32>) -> Result<Html<String>, StatusCode> {
    match id {
        1 | 2 => {
            if id == SLOW_DETAIL_ID {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Ok(Html(format!(
                r#"<div><span class="sku">LMP-{id}</span><span class="price">$4{id}</span></div>"#
            )))
        }
        _ => Err(StatusCode::NOT_FOUND),
    }
}

/// Local HTTP origin serving a small shop on `127.0.0.1:0`.
pub async fn spawn_origin() -> SocketAddr {
    let app = Router::new()
        .route("/lamps", get(|| async { Html(LISTING) }))
        .route("/p/{id}", get(detail))
        .route("/empty", get(|| async { Html("<p>nothing to see</p>") }))
        .route(
            "/broken",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin");
    let addr = listener.local_addr().expect("Failed to read origin address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Origin server failed");
    });
    addr
}

pub fn test_config() -> AggregatorConfig {
    AggregatorConfig::default()
        .with_concurrency(2)
        .with_item_timeout(Duration::from_millis(300))
        .with_request_timeout(Duration::from_secs(3))
        .with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(1),
        })
}

pub struct TestApp {
    pub router: Router,
    pub origin: SocketAddr,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.origin)
    }
}

fn build_router(fetcher: ReqwestFetcher) -> Router {
    let selectors = SelectorConfig::from_json(SELECTORS).expect("Invalid test selectors");
    let extractor = SelectorExtractor::new(&selectors).expect("Failed to compile selectors");
    let state = Arc::new(AppState {
        aggregator: Aggregator::new(fetcher, extractor, test_config()),
    });
    routes::router(state)
}

/// App wired to a live local origin, with SSRF protection off so loopback is reachable.
pub async fn setup_test_app() -> TestApp {
    let origin = spawn_origin().await;
    let fetcher = ReqwestFetcher::new()
        .expect("Failed to build fetcher")
        .allow_private_urls();
    TestApp {
        router: build_router(fetcher),
        origin,
    }
}

/// App with the default SSRF guard enabled.
pub async fn setup_guarded_app() -> TestApp {
    let origin = spawn_origin().await;
    let fetcher = ReqwestFetcher::new().expect("Failed to build fetcher");
    TestApp {
        router: build_router(fetcher),
        origin,
    }
}
