//! HTTP layer tests driven through the router without a listener.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::Config;
use crate::tests::support::{engine_with, palette_corpus, write_image};
use crate::web::{router, HealthResponse, SearchResultItem, WebSettings};

fn settings_for(dir: &std::path::Path) -> WebSettings {
    let mut config = Config::default();
    config.image_dir = dir.to_string_lossy().into_owned();
    WebSettings::from_config(&config)
}

fn ready_router() -> (Router, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    palette_corpus(tmp.path());
    let (engine, _) = engine_with(32);
    engine.build_index(tmp.path()).unwrap();
    (router(engine, settings_for(tmp.path())), tmp)
}

fn search_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_returns_urls_and_rounded_scores() {
    let (app, _tmp) = ready_router();

    let response = app
        .oneshot(search_request(json!({"query": "red", "top_k": 2})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let items: Vec<SearchResultItem> = body_json(response).await;
    assert_eq!(
        items,
        vec![
            SearchResultItem {
                image_path: "http://127.0.0.1:8000/images/red.png".to_string(),
                similarity_score: 1.0,
            },
            SearchResultItem {
                image_path: "http://127.0.0.1:8000/images/orange.png".to_string(),
                similarity_score: 0.894,
            },
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_defaults_top_k() {
    let (app, _tmp) = ready_router();

    let response = app
        .oneshot(search_request(json!({"query": "green"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // default of 5 clamped to the 4 indexed images
    let items: Vec<SearchResultItem> = body_json(response).await;
    assert_eq!(items.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_rejects_out_of_range_top_k() {
    for top_k in [0, -1, 26] {
        let (app, _tmp) = ready_router();

        let response = app
            .oneshot(search_request(json!({"query": "red", "top_k": top_k})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "top_k={top_k}");

        let body: Value = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("top_k"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_rejects_empty_query() {
    let (app, _tmp) = ready_router();

    let response = app
        .oneshot(search_request(json!({"query": "  ", "top_k": 3})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_embedding_failure_is_server_error() {
    let (app, _tmp) = ready_router();

    let response = app
        .oneshot(search_request(json!({"query": "chartreuse"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_before_indexing_is_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(32);
    let app = router(engine, settings_for(tmp.path()));

    let response = app
        .oneshot(search_request(json!({"query": "red"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_reports_index() {
    let (app, _tmp) = ready_router();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.indexed, 4);
    assert_eq!(health.dimensions, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_not_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(32);
    let app = router(engine, settings_for(tmp.path()));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = body_json(response).await;
    assert_eq!(body["state"], "uninitialized");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serves_indexed_images() {
    let (app, _tmp) = ready_router();

    let response = app
        .oneshot(Request::get("/images/red.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cors_allows_frontend_origin() {
    let (app, _tmp) = ready_router();

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/search")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reindex_picks_up_new_images() {
    let (app, tmp) = ready_router();
    write_image(tmp.path(), "violet.png", [128, 0, 255]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/reindex")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: Value = body_json(response).await;
    assert_eq!(report["indexed"], 5);

    let response = app
        .oneshot(search_request(json!({"query": "blue", "top_k": 25})))
        .await
        .unwrap();
    let items: Vec<SearchResultItem> = body_json(response).await;
    assert_eq!(items.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reindex_before_ready_is_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(32);
    let app = router(engine, settings_for(tmp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/reindex")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_image_url_is_served() {
    let tmp = tempfile::tempdir().unwrap();
    write_image(tmp.path(), "red.png", [255, 0, 0]);
    write_image(tmp.path(), "2024/summer days/beach.png", [0, 0, 255]);
    write_image(tmp.path(), "2023/beach.png", [0, 255, 0]);
    let (engine, _) = engine_with(32);
    engine.build_index(tmp.path()).unwrap();
    let app = router(engine, settings_for(tmp.path()));

    let response = app
        .clone()
        .oneshot(search_request(json!({"query": "blue", "top_k": 1})))
        .await
        .unwrap();
    let items: Vec<SearchResultItem> = body_json(response).await;
    assert_eq!(
        items[0].image_path,
        "http://127.0.0.1:8000/images/2024/summer%20days/beach.png"
    );

    let uri = items[0]
        .image_path
        .strip_prefix("http://127.0.0.1:8000")
        .unwrap()
        .to_string();
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
