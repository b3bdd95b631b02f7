//! HTTP API against a dry-run printer.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http_body_util::BodyExt; // for .collect().await
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use labelprinter::Family;
use serde_json::{Value, json};
use tower::util::ServiceExt; // for `oneshot`

use labeld::app::SharedState;
use labeld::config::AppConfig;
use labeld::server::router::create_router;
use labeld::services::print_queue;

fn dry_run_state(family: Family) -> SharedState {
    SharedState::new(AppConfig {
        printer_family: family,
        dry_run_mode: true,
        ..AppConfig::default()
    })
}

fn png_page() -> String {
    let mut img = GrayImage::from_pixel(4, 16, Luma([255]));
    img.put_pixel(1, 3, Luma([0]));
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    STANDARD.encode(png)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_status_reports_family() {
    let app = create_router(dry_run_state(Family::TpB));
    let (status, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["family"], "tp-b");
    assert_eq!(body["dry_run"], true);
}

#[tokio::test]
async fn test_empty_print_request_rejected() {
    let app = create_router(dry_run_state(Family::T5080));
    let (status, body) = call(&app, "POST", "/api/print", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "request has no pages and no tag");
}

#[tokio::test]
async fn test_print_without_worker_is_unavailable() {
    let app = create_router(dry_run_state(Family::T5080));
    let (status, body) = call(&app, "POST", "/api/print", Some(json!({ "pages": [png_page()] }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not running"));
}

#[tokio::test]
async fn test_tag_rejected_on_family_without_tags() {
    let app = create_router(dry_run_state(Family::Sp));
    let request = json!({ "tag": STANDARD.encode([1u8, 2, 3]) });
    let (status, body) = call(&app, "POST", "/api/print", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("tag"));
}

#[tokio::test(start_paused = true)]
async fn test_queued_job_is_printed() {
    let state = dry_run_state(Family::T5080);
    let worker = print_queue::start_worker(state.clone()).await;
    let app = create_router(state.clone());

    let request = json!({
        "pages": [png_page(), png_page()],
        "params": { "speed": 20 },
        "description": "two labels",
    });
    let (status, body) = call(&app, "POST", "/api/print", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pages"], 2);
    let job_id = body["data"]["job_id"].as_str().unwrap().to_string();

    print_queue::close(&state).await;
    worker.await.unwrap();

    let (status, body) = call(&app, "GET", "/api/print/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["pending"], 0);
    assert_eq!(data["total_processed"], 1);
    assert_eq!(data["last_job"]["job_id"], job_id.as_str());
    assert_eq!(data["last_job"]["outcome"]["status"], "success");
    assert!(data["active_job"].is_null());
}

#[tokio::test]
async fn test_stop_without_active_job_conflicts() {
    let app = create_router(dry_run_state(Family::T5080));
    let (status, body) = call(&app, "POST", "/api/print/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "No print job is running");
}

#[tokio::test(start_paused = true)]
async fn test_dpi_readback() {
    let app = create_router(dry_run_state(Family::Sp));
    let (status, body) = call(&app, "POST", "/api/printer/dpi", Some(json!({ "paper_type": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["report"]["type"], "dpi");
}

#[tokio::test]
async fn test_dpi_unsupported_family() {
    let app = create_router(dry_run_state(Family::G));
    let (status, body) = call(&app, "POST", "/api/printer/dpi", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("do not support"));
}
