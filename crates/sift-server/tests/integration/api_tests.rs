use axum::body::Body;
use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::integration::common::{TestApp, setup_guarded_app, setup_test_app};

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn listing_uri(app: &TestApp, path: &str) -> String {
    format!("/v1/listing?url={}", app.url(path))
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["scheduler"]["limit"], 2);
    assert_eq!(json["scheduler"]["running"], 0);
    assert_eq!(json["cache"]["listings"], 0);
    assert_eq!(json["cache"]["ttl_secs"], 300);
}

#[tokio::test]
async fn listing_merges_details_in_listing_order() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(get(&listing_uri(&app, "/lamps")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(ETAG));

    let json = json_body(response).await;
    assert_eq!(json["header_fields"]["title"], "Desk Lamps");
    assert_eq!(json["complete"], 1);
    assert_eq!(json["partial"], 3);

    let items = json["items"].as_array().unwrap();
    let names: Vec<_> = items
        .iter()
        .map(|i| i["summary_fields"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Arc", "Banker", "Gone", "Unlinked"]);

    assert_eq!(items[0]["status"], "complete");
    assert_eq!(items[0]["detail_fields"]["sku"], "LMP-1");
    assert_eq!(items[0]["reference"], "/p/1");

    // Slow detail exceeds the item deadline.
    assert_eq!(items[1]["status"], "partial");
    assert!(items[1]["error"].as_str().unwrap().contains("timed out"));
    assert!(items[1]["detail_fields"].as_object().unwrap().is_empty());

    // Missing detail exhausts its retries.
    assert_eq!(items[2]["status"], "partial");
    assert!(items[2]["error"].as_str().unwrap().contains("2 attempt"));

    assert_eq!(items[3]["status"], "partial");
    assert!(items[3]["reference"].is_null());
}

#[tokio::test]
async fn matching_etag_returns_304() {
    let app = setup_test_app().await;
    let uri = listing_uri(&app, "/lamps");

    let first = app.router.clone().oneshot(get(&uri)).await.unwrap();
    let etag = first.headers()[ETAG].clone();

    let second = app
        .router
        .clone()
        .oneshot(
            Request::get(&uri)
                .header(IF_NONE_MATCH, etag.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers()[ETAG], etag);
}

#[tokio::test]
async fn cached_listing_is_served_from_cache() {
    let app = setup_test_app().await;
    let uri = listing_uri(&app, "/lamps");

    let first = json_body(app.router.clone().oneshot(get(&uri)).await.unwrap()).await;
    let second = json_body(app.router.clone().oneshot(get(&uri)).await.unwrap()).await;
    assert_eq!(first, second);

    let health = json_body(app.router.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["cache"]["listings"], 1);
}

#[tokio::test]
async fn invalid_url_returns_400() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(get("/v1/listing?url=not-a-url"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_input");
}

#[tokio::test]
async fn failing_listing_returns_502() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(get(&listing_uri(&app, "/broken")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json = json_body(response).await;
    assert_eq!(json["error"], "aggregation_failed");
}

#[tokio::test]
async fn unparseable_listing_returns_502() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(get(&listing_uri(&app, "/empty")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn item_returns_detail_fields() {
    let app = setup_test_app().await;

    let uri = format!("/v1/item?url={}", app.url("/p/1"));
    let response = app.router.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "complete");
    assert_eq!(json["detail_fields"]["sku"], "LMP-1");
    assert_eq!(json["detail_fields"]["price"], "$41");
}

#[tokio::test]
async fn missing_item_returns_502() {
    let app = setup_test_app().await;

    let uri = format!("/v1/item?url={}", app.url("/p/404"));
    let response = app.router.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json = json_body(response).await;
    assert_eq!(json["error"], "fetch_failed");
}

#[tokio::test]
async fn loopback_origin_is_blocked_by_default() {
    let app = setup_guarded_app().await;

    let response = app
        .router
        .clone()
        .oneshot(get(&listing_uri(&app, "/lamps")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert!(json["message"].as_str().unwrap().contains("SSRF blocked"));
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(get("/api-docs/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["paths"]["/v1/listing"].is_object());
    assert!(json["paths"]["/v1/item"].is_object());
}
